//! Wire 风格的依赖注入模块

use std::sync::Arc;

use anyhow::{Context, Result};
use spark_im_core::config::SparkAppConfig;
use spark_im_core::metrics::RouteMetrics;
use spark_im_core::protocol::CommandRegistry;
use spark_im_core::push::{NoopPushQueue, PushQueue, RedisPushQueue};
use spark_im_core::routing::RouteTable;

use crate::application::RouteService;
use crate::config::RouteConfig;
use crate::interface::RouteLinkHandler;

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub registry: Arc<CommandRegistry>,
    pub service: Arc<RouteService>,
    pub handler: Arc<RouteLinkHandler>,
}

/// 构建应用上下文
pub async fn initialize(app_config: &SparkAppConfig) -> Result<ApplicationContext> {
    // 1. 加载配置
    let config = RouteConfig::from_app_config(app_config)
        .context("Failed to load route service configuration")?;
    build(config).await
}

pub async fn build(config: RouteConfig) -> Result<ApplicationContext> {
    // 2. VOIP 推送队列
    let push: Arc<dyn PushQueue> = match config.push_redis_url.as_deref() {
        Some(url) => Arc::new(
            RedisPushQueue::connect(url)
                .await
                .context("Failed to connect push Redis")?,
        ),
        None => Arc::new(NoopPushQueue),
    };

    // 3. 路由表、应用服务与链接处理器
    let service = Arc::new(RouteService::new(
        Arc::new(RouteTable::new()),
        push,
        Arc::new(RouteMetrics::new()),
    ));
    let handler = Arc::new(RouteLinkHandler::new(service.clone()));

    Ok(ApplicationContext {
        registry: Arc::new(CommandRegistry::standard()),
        service,
        handler,
    })
}
