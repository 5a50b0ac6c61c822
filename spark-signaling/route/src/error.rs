use thiserror::Error;

/// 路由服务错误
#[derive(Debug, Error)]
pub enum RouteError {
    #[error("publish body is not an app message (cmd {0})")]
    InvalidPublish(u32),

    #[error("push queue error: {0}")]
    Push(#[source] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, RouteError>;
