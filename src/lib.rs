//! Spark IM Core 公共库
//!
//! 提供线路协议、配置加载、日志、指标以及服务器间链接与路由表，
//! 供会话网关、路由服务与存储服务共用。

pub mod config;
pub mod error;
pub mod link;
pub mod metrics;
pub mod protocol;
pub mod push;
pub mod routing;
pub mod tracing;
pub mod utils;

pub use config::{
    ConfigManager, GatewayServiceConfig, LoggingConfig, PostgresInstanceConfig, RedisPoolConfig,
    RouteServiceConfig, ServiceEndpointConfig, ServiceRuntimeConfig, SparkAppConfig,
    StorageServiceConfig, load_config, load_config_from_source,
};
pub use error::*;
pub use utils::*;
