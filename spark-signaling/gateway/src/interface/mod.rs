//! 接口层：客户端 TCP 连接

pub mod connection;

pub use connection::{serve_client, serve_clients};
