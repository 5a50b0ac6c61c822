//! 投递游标存储实现

mod file_store;
mod redis_store;

pub use file_store::FileCursorStore;
pub use redis_store::RedisCursorStore;
