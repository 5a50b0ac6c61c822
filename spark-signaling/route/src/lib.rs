//! Spark 路由服务
//!
//! 记录每个会话服务器订阅了哪些用户与房间，并在会话服务器之间转发不持久化的消息。

pub mod application;
pub mod config;
pub mod error;
pub mod interface;
pub mod service;

pub use service::ApplicationBootstrap;
