//! Wire 风格的依赖注入模块
//!
//! 按固定顺序构建存储服务的全部依赖

use std::sync::Arc;

use anyhow::{Context, Result};
use spark_im_core::config::SparkAppConfig;
use spark_im_core::metrics::StorageMetrics;
use spark_im_core::protocol::CommandRegistry;
use spark_im_core::push::{NoopPushQueue, PushQueue, RedisPushQueue};
use spark_im_core::routing::RouteTable;
use tracing::info;

use crate::application::StorageService;
use crate::config::StorageConfig;
use crate::domain::{CursorStore, MessageLog};
use crate::infrastructure::{FileCursorStore, FileMessageLog, RedisCursorStore};
use crate::interface::StorageLinkHandler;

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: StorageConfig,
    pub registry: Arc<CommandRegistry>,
    pub service: Arc<StorageService>,
    pub handler: Arc<StorageLinkHandler>,
}

/// 从应用配置构建上下文
pub async fn initialize(app_config: &SparkAppConfig) -> Result<ApplicationContext> {
    // 1. 加载配置
    let config = StorageConfig::from_app_config(app_config)
        .context("Failed to load storage service configuration")?;
    build(config).await
}

/// 从已解析的存储配置构建上下文
pub async fn build(config: StorageConfig) -> Result<ApplicationContext> {
    // 2. 命令表
    let registry = Arc::new(CommandRegistry::standard());

    // 3. 消息日志
    let log: Arc<dyn MessageLog> = Arc::new(
        FileMessageLog::open(&config.storage_root, registry.clone(), config.sync_writes)
            .await
            .context("Failed to open message log")?,
    );

    // 4. 投递游标
    let cursors: Arc<dyn CursorStore> = match config.cursor_redis_url.as_deref() {
        Some(url) => {
            info!("Using Redis cursor store");
            Arc::new(
                RedisCursorStore::connect(url)
                    .await
                    .context("Failed to connect cursor Redis")?,
            )
        }
        None => Arc::new(
            FileCursorStore::open(&config.storage_root)
                .await
                .context("Failed to open cursor snapshot")?,
        ),
    };

    // 5. 推送队列
    let push: Arc<dyn PushQueue> = match config.push_redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisPushQueue::connect(url)
                .await
                .context("Failed to connect push Redis")?,
        ),
        None => Arc::new(NoopPushQueue),
    };

    // 6. 路由表与指标
    let routes = Arc::new(RouteTable::new());
    let metrics = Arc::new(StorageMetrics::new());

    // 7. 应用服务与链接处理器
    let service = Arc::new(StorageService::new(
        log,
        cursors,
        routes,
        push,
        metrics,
        config.shard_count,
    ));
    let handler = Arc::new(StorageLinkHandler::new(service.clone()));

    Ok(ApplicationContext {
        config,
        registry,
        service,
        handler,
    })
}
