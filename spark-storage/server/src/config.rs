use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Result, anyhow};
use spark_im_core::config::SparkAppConfig;

/// 默认分片 worker 数
pub const DEFAULT_SHARD_COUNT: usize = 10;

#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// 消息文件与游标快照所在目录
    pub storage_root: PathBuf,
    /// 游标 Redis 地址，缺省时使用本地文件
    pub cursor_redis_url: Option<String>,
    /// 推送队列 Redis 地址，缺省时不推送
    pub push_redis_url: Option<String>,
    pub sync_writes: bool,
    pub flush_interval: Duration,
    pub shard_count: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_root: PathBuf::from("./data/storage"),
            cursor_redis_url: None,
            push_redis_url: None,
            sync_writes: false,
            flush_interval: Duration::from_secs(1),
            shard_count: DEFAULT_SHARD_COUNT,
        }
    }
}

impl StorageConfig {
    pub fn from_app_config(app: &SparkAppConfig) -> Result<Self> {
        let service = app.storage_service();
        let defaults = Self::default();

        let resolve_redis = |name: Option<&str>, field: &str| -> Result<Option<String>> {
            match name {
                Some(name) => app
                    .redis_profile(name)
                    .map(|profile| Some(profile.url.clone()))
                    .ok_or_else(|| anyhow!("{field} references unknown redis profile '{name}'")),
                None => Ok(None),
            }
        };

        let shard_count = service.shard_count.unwrap_or(defaults.shard_count);
        if shard_count == 0 {
            return Err(anyhow!("services.storage.shard_count must be positive"));
        }

        Ok(Self {
            storage_root: service
                .storage_root
                .map(PathBuf::from)
                .unwrap_or(defaults.storage_root),
            cursor_redis_url: resolve_redis(
                service.cursor_redis.as_deref(),
                "services.storage.cursor_redis",
            )?,
            push_redis_url: resolve_redis(
                service.push_redis.as_deref(),
                "services.storage.push_redis",
            )?,
            sync_writes: service.sync_writes.unwrap_or(defaults.sync_writes),
            flush_interval: service
                .flush_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.flush_interval),
            shard_count,
        })
    }
}
