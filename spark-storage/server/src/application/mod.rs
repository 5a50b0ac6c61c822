//! 应用层：分片执行与存储操作编排

pub mod shard;
pub mod storage_service;

pub use shard::ShardPool;
pub use storage_service::StorageService;
