//! Spark IM Core 错误类型
//!
//! - `ProtocolError`：线协议编解码错误，对连接是致命的
//! - 各服务在自身 crate 中定义领域错误并通过 `#[from]` 包装本模块错误

use thiserror::Error;

/// 线协议错误
///
/// 任何 `ProtocolError` 都意味着当前连接必须关闭，不做重试。
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid frame length: {0}")]
    InvalidLength(usize),

    #[error("truncated {what}: need {need} bytes, got {got}")]
    Truncated {
        what: &'static str,
        need: usize,
        got: usize,
    },

    #[error("unknown command {cmd} with {len} body bytes")]
    UnknownCommand { cmd: u32, len: usize },

    #[error("malformed {what}: {reason}")]
    Malformed { what: &'static str, reason: String },

    #[error("connection closed by peer")]
    Closed,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProtocolError {
    pub fn malformed(what: &'static str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            what,
            reason: reason.into(),
        }
    }

    /// 对端正常关闭连接（读到 EOF）时返回 true
    pub fn is_closed(&self) -> bool {
        match self {
            Self::Closed => true,
            Self::Io(err) => err.kind() == std::io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }
}

pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;
