//! 接口层：会话网关链接上的存储 RPC

pub mod link_handler;

pub use link_handler::StorageLinkHandler;
