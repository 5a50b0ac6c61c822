//! 工具函数模块
//!
//! 提供时间戳、重连退避、服务启动辅助等通用工具

pub mod backoff;
pub mod helpers;

pub use backoff::ExponentialBackoff;
pub use helpers::ServiceHelper;

use chrono::Utc;

/// 获取当前时间戳（秒）
pub fn current_secs() -> i64 {
    Utc::now().timestamp()
}

/// 获取当前时间戳（毫秒）
pub fn current_millis() -> i64 {
    Utc::now().timestamp_millis()
}

/// 获取当前时间戳（微秒）
pub fn current_micros() -> i64 {
    Utc::now().timestamp_micros()
}

/// 按 `key % n` 选择分片下标，负数 key 取绝对值
pub fn shard_index(key: i64, n: usize) -> usize {
    if n == 0 {
        return 0;
    }
    (key.unsigned_abs() % n as u64) as usize
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 测试：分片下标对负数与零分片数稳定
    #[test]
    fn test_shard_index() {
        assert_eq!(shard_index(13, 10), 3);
        assert_eq!(shard_index(-13, 10), 3);
        assert_eq!(shard_index(5, 0), 0);
        assert_eq!(shard_index(i64::MIN, 10), (i64::MIN.unsigned_abs() % 10) as usize);
    }
}
