use anyhow::Result;
use async_trait::async_trait;
use spark_im_core::protocol::AppMessage;

use super::model::{CursorKey, LogKind};
use crate::error::Result as StorageResult;

/// 追加式消息日志
///
/// msgid 全局单调递增且永不复用，同一队列的 msgid 列表天然有序。
#[async_trait]
pub trait MessageLog: Send + Sync {
    /// 追加一条记录并返回其 msgid
    async fn append(&self, kind: LogKind, msg: &AppMessage) -> StorageResult<i64>;

    /// 读取一条记录，返回的消息 msgid 已填充
    async fn read(&self, msgid: i64) -> StorageResult<AppMessage>;

    /// 队列中最后写入的 msgid，空队列返回 0
    async fn last_msgid(&self, kind: LogKind, appid: i64, key: i64) -> i64;

    /// 队列中大于 `after` 的全部 msgid，升序
    async fn msgids_after(&self, kind: LogKind, appid: i64, key: i64, after: i64) -> Vec<i64>;
}

/// 投递游标存储，推进采用 max 语义
#[async_trait]
pub trait CursorStore: Send + Sync {
    async fn load(&self, key: &CursorKey) -> Result<i64>;

    /// 推进游标，返回推进后的值；不会回退
    async fn advance(&self, key: &CursorKey, msgid: i64) -> Result<i64>;

    /// 持久化尚未落盘的游标
    async fn flush(&self) -> Result<()>;
}
