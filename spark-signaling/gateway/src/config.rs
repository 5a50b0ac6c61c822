use std::time::Duration;

use anyhow::{Result, anyhow};
use spark_im_core::config::{PostgresInstanceConfig, SparkAppConfig};

/// 好友与群组缓存默认重载间隔
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(300);
/// 在线消息队列默认深度
pub const DEFAULT_LIVE_QUEUE_DEPTH: usize = 1024;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// 注册到路由与存储服务的本机标识
    pub server_id: String,
    pub storage_addrs: Vec<String>,
    pub route_addrs: Vec<String>,
    /// 令牌 / 设备 / 登录点 Redis 地址，缺省时使用进程内存储
    pub redis_url: Option<String>,
    /// 关系库配置，缺省时使用进程内存储
    pub postgres: Option<PostgresInstanceConfig>,
    pub reload_interval: Duration,
    pub live_queue_depth: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            server_id: default_server_id(),
            storage_addrs: vec!["127.0.0.1:13333".to_string()],
            route_addrs: vec!["127.0.0.1:4444".to_string()],
            redis_url: None,
            postgres: None,
            reload_interval: DEFAULT_RELOAD_INTERVAL,
            live_queue_depth: DEFAULT_LIVE_QUEUE_DEPTH,
        }
    }
}

impl GatewayConfig {
    pub fn from_app_config(app: &SparkAppConfig) -> Result<Self> {
        let service = app.gateway_service();
        let defaults = Self::default();

        let redis_url = match service.redis.as_deref() {
            Some(name) => Some(
                app.redis_profile(name)
                    .map(|profile| profile.url.clone())
                    .ok_or_else(|| {
                        anyhow!("services.gateway.redis references unknown redis profile '{name}'")
                    })?,
            ),
            None => None,
        };
        let postgres = match service.postgres.as_deref() {
            Some(name) => Some(app.postgres_profile(name).cloned().ok_or_else(|| {
                anyhow!("services.gateway.postgres references unknown postgres profile '{name}'")
            })?),
            None => None,
        };

        let storage_addrs = if service.storage_addrs.is_empty() {
            defaults.storage_addrs
        } else {
            service.storage_addrs
        };
        let route_addrs = if service.route_addrs.is_empty() {
            defaults.route_addrs
        } else {
            service.route_addrs
        };

        let live_queue_depth = service.live_queue_depth.unwrap_or(defaults.live_queue_depth);
        if live_queue_depth == 0 {
            return Err(anyhow!("services.gateway.live_queue_depth must be positive"));
        }

        Ok(Self {
            server_id: service.server_id.unwrap_or(defaults.server_id),
            storage_addrs,
            route_addrs,
            redis_url,
            postgres,
            reload_interval: service
                .reload_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.reload_interval),
            live_queue_depth,
        })
    }
}

fn default_server_id() -> String {
    format!("gateway-{}", std::process::id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use spark_im_core::config::{GatewayServiceConfig, RedisPoolConfig};

    /// 测试：未配置的地址列表使用默认值，引用的 Redis 配置被解析
    #[test]
    fn test_from_app_config_resolves_profiles() {
        let mut app = SparkAppConfig::default();
        app.redis.insert(
            "session".to_string(),
            RedisPoolConfig {
                url: "redis://127.0.0.1:6379/2".to_string(),
                database: None,
            },
        );
        app.services.gateway = Some(GatewayServiceConfig {
            server_id: Some("gw-1".to_string()),
            storage_addrs: vec!["10.0.0.1:13333".to_string(), "10.0.0.2:13333".to_string()],
            redis: Some("session".to_string()),
            reload_interval_secs: Some(60),
            ..Default::default()
        });

        let config = GatewayConfig::from_app_config(&app).unwrap();
        assert_eq!(config.server_id, "gw-1");
        assert_eq!(config.storage_addrs.len(), 2);
        assert_eq!(config.route_addrs, vec!["127.0.0.1:4444".to_string()]);
        assert_eq!(config.redis_url.as_deref(), Some("redis://127.0.0.1:6379/2"));
        assert_eq!(config.reload_interval, Duration::from_secs(60));
        assert_eq!(config.live_queue_depth, DEFAULT_LIVE_QUEUE_DEPTH);
    }

    /// 测试：引用不存在的关系库配置时报错
    #[test]
    fn test_unknown_postgres_profile() {
        let mut app = SparkAppConfig::default();
        app.services.gateway = Some(GatewayServiceConfig {
            postgres: Some("missing".to_string()),
            ..Default::default()
        });
        assert!(GatewayConfig::from_app_config(&app).is_err());
    }
}
