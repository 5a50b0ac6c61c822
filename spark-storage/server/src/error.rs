use spark_im_core::ProtocolError;
use thiserror::Error;

/// 存储服务错误
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("message log io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("message log is corrupted: {0}")]
    Corrupted(String),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("cursor store error: {0}")]
    Cursor(#[source] anyhow::Error),

    #[error("shard worker {0} stopped")]
    ShardClosed(usize),

    #[error("request body does not match command {0}")]
    BadRequest(u32),

    #[error("record too large: {0} bytes")]
    RecordTooLarge(usize),
}

pub type Result<T> = std::result::Result<T, StorageError>;
