//! Spark IM Core 配置模块
//!
//! 该模块提供了完整的应用程序配置管理功能，包括：
//! - 配置文件加载和解析（单文件或 `config/` 目录分片合并）
//! - 环境特定配置覆盖
//! - 各服务配置定义

use std::collections::HashMap;
use std::ffi::OsStr;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use toml::Value;
use tracing::warn;

mod manager;
pub use manager::ConfigManager;

/// 进程级配置实例，只在启动时加载一次
static APP_CONFIG: OnceLock<SparkAppConfig> = OnceLock::new();

/// 日志配置
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// 日志级别（`RUST_LOG` 优先）
    pub level: String,
    pub with_target: bool,
    pub with_thread_ids: bool,
    pub with_file: bool,
    pub with_line_number: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "debug".to_string(),
            with_target: true,
            with_thread_ids: true,
            with_file: true,
            with_line_number: true,
        }
    }
}

/// Redis 连接配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RedisPoolConfig {
    /// Redis 服务器地址
    pub url: String,
    /// 数据库编号
    #[serde(default)]
    pub database: Option<u32>,
}

/// PostgreSQL 数据库实例配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PostgresInstanceConfig {
    /// 数据库连接 URL
    pub url: String,
    /// 最大连接数
    #[serde(default)]
    pub max_connections: Option<u32>,
    /// 最小连接数
    #[serde(default)]
    pub min_connections: Option<u32>,
}

/// 服务端点配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceEndpointConfig {
    /// 监听地址
    pub address: Option<String>,
    /// 监听端口
    pub port: Option<u16>,
}

/// 服务运行时配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServiceRuntimeConfig {
    /// 服务名称
    #[serde(default)]
    pub service_name: Option<String>,
    /// 服务器配置
    #[serde(default)]
    pub server: Option<ServiceEndpointConfig>,
}

/// 会话网关服务配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct GatewayServiceConfig {
    /// 运行时配置
    #[serde(flatten)]
    pub runtime: ServiceRuntimeConfig,
    /// 本服务器标识，注册到路由与存储服务
    #[serde(default)]
    pub server_id: Option<String>,
    /// 存储服务地址列表，按 `key % N` 选择
    #[serde(default)]
    pub storage_addrs: Vec<String>,
    /// 路由服务地址列表
    #[serde(default)]
    pub route_addrs: Vec<String>,
    /// 令牌 / 设备 / 登录点所用的 Redis 配置名
    #[serde(default)]
    pub redis: Option<String>,
    /// 好友与群组关系库所用的 PostgreSQL 配置名
    #[serde(default)]
    pub postgres: Option<String>,
    /// 好友与群组缓存全量重载间隔（秒）
    #[serde(default)]
    pub reload_interval_secs: Option<u64>,
    /// 在线消息队列深度
    #[serde(default)]
    pub live_queue_depth: Option<usize>,
}

/// 路由服务配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RouteServiceConfig {
    /// 运行时配置
    #[serde(flatten)]
    pub runtime: ServiceRuntimeConfig,
    /// 推送队列所用的 Redis 配置名，缺省时不推送
    #[serde(default)]
    pub push_redis: Option<String>,
}

/// 存储服务配置
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageServiceConfig {
    /// 运行时配置
    #[serde(flatten)]
    pub runtime: ServiceRuntimeConfig,
    /// 消息文件所在目录
    #[serde(default)]
    pub storage_root: Option<String>,
    /// 投递游标存储的 Redis 配置名，缺省时使用本地文件
    #[serde(default)]
    pub cursor_redis: Option<String>,
    /// 推送队列所用的 Redis 配置名，缺省时不推送
    #[serde(default)]
    pub push_redis: Option<String>,
    /// 每次追加后是否 fsync
    #[serde(default)]
    pub sync_writes: Option<bool>,
    /// 游标刷盘间隔（毫秒）
    #[serde(default)]
    pub flush_interval_ms: Option<u64>,
    /// 分片 worker 数
    #[serde(default)]
    pub shard_count: Option<usize>,
}

/// 服务配置集合
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ServicesConfig {
    #[serde(default)]
    pub gateway: Option<GatewayServiceConfig>,
    #[serde(default)]
    pub route: Option<RouteServiceConfig>,
    #[serde(default)]
    pub storage: Option<StorageServiceConfig>,
}

/// Spark 应用配置主结构体
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SparkAppConfig {
    /// 日志配置
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Redis 配置映射
    #[serde(default)]
    pub redis: HashMap<String, RedisPoolConfig>,
    /// PostgreSQL 配置映射
    #[serde(default)]
    pub postgres: HashMap<String, PostgresInstanceConfig>,
    /// 服务配置
    #[serde(default)]
    pub services: ServicesConfig,
}

impl SparkAppConfig {
    /// 获取 Redis 配置
    pub fn redis_profile(&self, name: &str) -> Option<&RedisPoolConfig> {
        self.redis.get(name)
    }

    /// 获取 PostgreSQL 配置
    pub fn postgres_profile(&self, name: &str) -> Option<&PostgresInstanceConfig> {
        self.postgres.get(name)
    }

    /// 获取会话网关服务配置
    pub fn gateway_service(&self) -> GatewayServiceConfig {
        self.services.gateway.clone().unwrap_or_default()
    }

    /// 获取路由服务配置
    pub fn route_service(&self) -> RouteServiceConfig {
        self.services.route.clone().unwrap_or_default()
    }

    /// 获取存储服务配置
    pub fn storage_service(&self) -> StorageServiceConfig {
        self.services.storage.clone().unwrap_or_default()
    }

    /// 校验服务配置中引用的 Redis / PostgreSQL 配置名是否存在
    pub fn validate_references(&self) -> Result<()> {
        let gateway = self.gateway_service();
        if let Some(name) = gateway.redis.as_deref() {
            self.require_redis(name, "services.gateway.redis")?;
        }
        if let Some(name) = gateway.postgres.as_deref() {
            if self.postgres_profile(name).is_none() {
                return Err(anyhow!(
                    "services.gateway.postgres references unknown postgres profile '{name}'"
                ));
            }
        }
        if let Some(name) = self.route_service().push_redis.as_deref() {
            self.require_redis(name, "services.route.push_redis")?;
        }
        let storage = self.storage_service();
        if let Some(name) = storage.cursor_redis.as_deref() {
            self.require_redis(name, "services.storage.cursor_redis")?;
        }
        if let Some(name) = storage.push_redis.as_deref() {
            self.require_redis(name, "services.storage.push_redis")?;
        }
        Ok(())
    }

    fn require_redis(&self, name: &str, field: &str) -> Result<()> {
        if self.redis_profile(name).is_none() {
            return Err(anyhow!("{field} references unknown redis profile '{name}'"));
        }
        Ok(())
    }
}

/// 加载配置
///
/// 依次尝试给定路径（或 `config/`、`config.toml`），全部失败时退回默认配置。
pub fn load_config(path: Option<&str>) -> &'static SparkAppConfig {
    let candidates: Vec<PathBuf> = match path {
        Some(p) => vec![PathBuf::from(p)],
        None => vec![PathBuf::from("config"), PathBuf::from("config.toml")],
    };

    APP_CONFIG.get_or_init(|| load_with_fallback(&candidates))
}

/// 使用备选方案加载配置
fn load_with_fallback(candidates: &[PathBuf]) -> SparkAppConfig {
    for path in candidates {
        match load_config_from_source(path) {
            Ok(cfg) => return cfg,
            Err(err) => {
                warn!("failed to load config from {}: {err:#}", path.display());
            }
        }
    }

    warn!("no configuration source succeeded, falling back to defaults");
    SparkAppConfig::default()
}

/// 从文件或目录加载配置，并叠加环境配置
pub fn load_config_from_source(path: &Path) -> Result<SparkAppConfig> {
    if !path.exists() {
        return Err(anyhow!(
            "configuration path {} does not exist",
            path.display()
        ));
    }

    let metadata = path
        .metadata()
        .with_context(|| format!("unable to read metadata for {}", path.display()))?;

    let (mut merged, root) = if metadata.is_dir() {
        (load_directory_value(path)?, path.to_path_buf())
    } else {
        let root = path.parent().map(Path::to_path_buf).unwrap_or_default();
        (load_toml_value(path)?, root)
    };

    if let Some(overlay) = ConfigManager::environment_overlay(&root)? {
        merge_value(&mut merged, overlay);
    }

    merged
        .try_into()
        .with_context(|| format!("invalid configuration after merging {}", path.display()))
}

/// 从目录加载配置
fn load_directory_value(path: &Path) -> Result<Value> {
    let base_file = path.join("base.toml");
    if !base_file.exists() {
        return Err(anyhow!(
            "missing base configuration: {}",
            base_file.display()
        ));
    }

    let mut merged = load_toml_value(&base_file)?;

    if !merged.is_table() {
        return Err(anyhow!(
            "base configuration must be a table: {}",
            base_file.display()
        ));
    }

    merge_directory(&mut merged, &path.join("shared"))?;
    merge_directory(&mut merged, &path.join("services"))?;
    merge_directory(&mut merged, &path.join("overrides"))?;

    Ok(merged)
}

/// 合并目录中的配置
fn merge_directory(root: &mut Value, dir: &Path) -> Result<()> {
    if !dir.exists() {
        return Ok(());
    }

    let mut entries = fs::read_dir(dir)
        .with_context(|| format!("unable to read config directory {}", dir.display()))?
        .filter_map(|entry| entry.ok())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(OsStr::to_str)
                .map(|ext| ext.eq_ignore_ascii_case("toml"))
                .unwrap_or(false)
        })
        .collect::<Vec<_>>();

    entries.sort_by_key(|entry| entry.path());

    for entry in entries {
        let value = load_toml_value(&entry.path())?;
        merge_value(root, value);
    }

    Ok(())
}

/// 加载 TOML 值
pub(crate) fn load_toml_value(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("unable to read config fragment {}", path.display()))?;
    let value: Value = toml::from_str(&content)
        .with_context(|| format!("invalid TOML content in fragment {}", path.display()))?;
    Ok(value)
}

/// 递归合并，叠加层中的标量覆盖基础层
fn merge_value(base: &mut Value, overlay: Value) {
    match overlay {
        Value::Table(overlay_table) => {
            if let Value::Table(base_table) = base {
                for (key, overlay_value) in overlay_table.into_iter() {
                    match base_table.get_mut(&key) {
                        Some(base_value) => merge_value(base_value, overlay_value),
                        None => {
                            base_table.insert(key, overlay_value);
                        }
                    }
                }
            } else {
                *base = Value::Table(overlay_table);
            }
        }
        other => {
            *base = other;
        }
    }
}
