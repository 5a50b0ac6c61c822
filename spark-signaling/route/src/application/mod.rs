//! 应用层：订阅维护与消息转发

pub mod route_service;

pub use route_service::RouteService;
