//! 基础设施层：文件日志与游标存储

pub mod cursor;
pub mod file_log;

pub use cursor::{FileCursorStore, RedisCursorStore};
pub use file_log::FileMessageLog;
