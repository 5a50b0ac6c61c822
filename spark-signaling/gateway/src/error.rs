use spark_im_core::ProtocolError;
use thiserror::Error;

/// 会话网关错误
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("channel to {0} is closed")]
    ChannelClosed(String),

    #[error("request to {0} timed out")]
    RequestTimeout(String),

    #[error("storage rejected request with status {0}")]
    StorageStatus(i32),

    #[error("no {0} server configured")]
    NoEndpoint(&'static str),

    #[error("group {0} not found")]
    GroupNotFound(i64),

    #[error("group {gid} is full ({members} members)")]
    GroupFull { gid: i64, members: usize },

    #[error("collaborator error: {0}")]
    Collaborator(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, GatewayError>;
