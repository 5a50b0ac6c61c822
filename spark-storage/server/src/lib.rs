//! Spark 存储服务
//!
//! 按接收者持久化消息、维护离线投递游标，并把新消息发布给持有接收者连接的会话服务器。

pub mod application;
pub mod config;
pub mod domain;
pub mod error;
pub mod infrastructure;
pub mod interface;
pub mod service;

pub use service::ApplicationBootstrap;
