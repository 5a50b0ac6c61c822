//! 辅助工具函数模块
//!
//! 提供配置加载、监听地址解析等常用辅助函数

use std::net::SocketAddr;

use anyhow::{Context, Result};

use crate::config::{ServiceRuntimeConfig, SparkAppConfig};

/// 服务启动辅助函数
pub struct ServiceHelper;

impl ServiceHelper {
    /// 加载配置并验证
    ///
    /// # 参数
    /// * `config_path` - 配置路径
    /// * `strict` - 是否严格验证配置引用
    ///
    /// # 返回
    /// 返回加载的配置实例
    pub fn load_config(config_path: Option<&str>, strict: bool) -> Result<&'static SparkAppConfig> {
        let config = crate::config::load_config(config_path);

        if strict {
            config
                .validate_references()
                .with_context(|| "configuration validation failed")?;
            return Ok(config);
        }

        // 非严格模式下，即使验证失败也继续运行，只记录警告日志
        if let Err(e) = config.validate_references() {
            tracing::warn!("configuration reference validation failed: {}", e);
        }

        Ok(config)
    }

    /// 解析服务监听地址
    ///
    /// 优先级：环境变量 `env_key` > 配置 `server.address/port` > 默认端口
    ///
    /// # 参数
    /// * `runtime` - 服务运行时配置
    /// * `env_key` - 覆盖监听地址的环境变量名
    /// * `default_port` - 配置缺省时使用的端口
    pub fn parse_server_addr(
        runtime: &ServiceRuntimeConfig,
        env_key: &str,
        default_port: u16,
    ) -> Result<SocketAddr> {
        if let Ok(addr) = std::env::var(env_key) {
            return addr
                .parse()
                .with_context(|| format!("invalid address in {env_key}: {addr}"));
        }

        let server = runtime.server.clone().unwrap_or_default();
        let address = server.address.unwrap_or_else(|| "0.0.0.0".to_string());
        let port = server.port.unwrap_or(default_port);
        format!("{address}:{port}")
            .parse()
            .with_context(|| format!("invalid server address: {address}:{port}"))
    }
}
