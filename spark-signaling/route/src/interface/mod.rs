//! 接口层：会话网关链接上的路由帧

pub mod link_handler;

pub use link_handler::RouteLinkHandler;
