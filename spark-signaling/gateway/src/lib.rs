//! Spark 会话网关
//!
//! 维护客户端长连接：认证、上行消息落库、离线积压与在线消息下发，
//! 并通过服务器通道与路由服务、存储服务交互。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use service::ApplicationBootstrap;
