use spark_im_core::protocol::{AppMessage, HEADER_SIZE, MAX_BODY_SIZE, OFFLINE_BATCH_FIXED, OfflineBatch};

use crate::error::{Result, StorageError};

/// `RESULT` 帧中批次之前的固定部分：req_seq + status
const RESULT_FIXED: usize = 8;

/// 单批次可用字节数
pub const BATCH_BUDGET: usize = MAX_BODY_SIZE - 1 - RESULT_FIXED - OFFLINE_BATCH_FIXED;

/// 按帧长上限组装离线批次
#[derive(Debug)]
pub struct BatchBuilder {
    budget: usize,
    used: usize,
    batch: OfflineBatch,
}

impl Default for BatchBuilder {
    fn default() -> Self {
        Self::with_budget(BATCH_BUDGET)
    }
}

impl BatchBuilder {
    pub fn with_budget(budget: usize) -> Self {
        Self {
            budget,
            used: 0,
            batch: OfflineBatch::default(),
        }
    }

    /// 标记一条已扫描但不下发的记录
    pub fn skip(&mut self, msgid: i64) {
        self.batch.last_msgid = self.batch.last_msgid.max(msgid);
    }

    /// 放入一条记录；放不下时返回 false 且不改变批次
    ///
    /// 单条超出整批预算的记录永远无法下发，返回 `RecordTooLarge`。
    pub fn push(&mut self, msg: AppMessage) -> Result<bool> {
        let size = OfflineBatch::record_size(&msg);
        if size > self.budget {
            return Err(StorageError::RecordTooLarge(size));
        }
        if self.used + size > self.budget {
            return Ok(false);
        }
        self.used += size;
        self.skip(msg.msgid);
        self.batch.messages.push(msg);
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.batch.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.batch.messages.is_empty()
    }

    pub fn finish(mut self, more: bool) -> OfflineBatch {
        self.batch.more = more;
        self.batch
    }
}

/// 追加前检查：记录必须能单独放进一个离线批次
pub fn check_record_size(msg: &AppMessage) -> Result<()> {
    let size = OfflineBatch::record_size(msg);
    if size > BATCH_BUDGET {
        return Err(StorageError::RecordTooLarge(size));
    }
    Ok(())
}

/// 批次内容在 RESULT 帧中占用的总长度上限
pub fn max_result_frame() -> usize {
    HEADER_SIZE + RESULT_FIXED + OFFLINE_BATCH_FIXED + BATCH_BUDGET
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_im_core::protocol::command::IM;
    use spark_im_core::protocol::{Body, ImMessage, Message};

    fn record(msgid: i64, content: &str) -> AppMessage {
        let mut app = AppMessage::new(
            1,
            2,
            3,
            Message::new(
                IM,
                Body::Im(ImMessage {
                    sender: 9,
                    receiver: 2,
                    content: content.to_string(),
                    ..Default::default()
                }),
            ),
        );
        app.msgid = msgid;
        app
    }

    /// 测试：超出预算时拒绝并保持已放入的记录
    #[test]
    fn test_push_respects_budget() {
        let one = OfflineBatch::record_size(&record(10, "hello"));
        let mut builder = BatchBuilder::with_budget(one * 2);
        assert!(builder.push(record(10, "hello")).unwrap());
        assert!(builder.push(record(20, "hello")).unwrap());
        assert!(!builder.push(record(30, "hello")).unwrap());

        let batch = builder.finish(true);
        assert!(batch.more);
        assert_eq!(batch.last_msgid, 20);
        assert_eq!(batch.messages.len(), 2);
    }

    /// 测试：跳过的记录也推进 last_msgid
    #[test]
    fn test_skip_advances_last_msgid() {
        let mut builder = BatchBuilder::default();
        builder.skip(100);
        assert!(builder.is_empty());
        assert_eq!(builder.finish(false).last_msgid, 100);
    }

    /// 测试：单条超大记录报错，不会被静默跳过
    #[test]
    fn test_oversized_record_is_rejected() {
        let mut builder = BatchBuilder::with_budget(16);
        let err = builder
            .push(record(7, "a message larger than sixteen bytes"))
            .unwrap_err();
        assert!(matches!(err, StorageError::RecordTooLarge(size) if size > 16));
        assert_eq!(builder.len(), 0);
        assert_eq!(builder.finish(false).last_msgid, 0);
    }

    /// 测试：恰好占满预算的记录可以追加，多一个字节就被拒绝
    #[test]
    fn test_record_size_boundary() {
        let base = OfflineBatch::record_size(&record(1, ""));
        let fits = "a".repeat(BATCH_BUDGET - base);
        assert_eq!(OfflineBatch::record_size(&record(1, &fits)), BATCH_BUDGET);
        assert!(check_record_size(&record(1, &fits)).is_ok());

        let over = "a".repeat(BATCH_BUDGET - base + 1);
        assert!(matches!(
            check_record_size(&record(1, &over)),
            Err(StorageError::RecordTooLarge(size)) if size == BATCH_BUDGET + 1
        ));
    }

    #[test]
    fn test_full_batch_fits_in_frame() {
        assert!(max_result_frame() < HEADER_SIZE + MAX_BODY_SIZE);
    }
}
