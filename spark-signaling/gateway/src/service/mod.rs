//! 服务模块 - 仅包含应用启动与依赖注入

pub mod bootstrap;
pub mod wire;

pub use bootstrap::ApplicationBootstrap;
pub use wire::ApplicationContext;
