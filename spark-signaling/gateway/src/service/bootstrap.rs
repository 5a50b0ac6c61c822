//! 应用启动器 - 负责依赖注入和服务启动

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::application::SessionServices;
use crate::interface::serve_clients;
use crate::service::wire::{self, ApplicationContext};

/// 会话网关默认端口
pub const DEFAULT_PORT: u16 = 23000;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run() -> Result<()> {
        use spark_im_core::ServiceHelper;

        // 加载应用配置
        let app_config = ServiceHelper::load_config(Some("./config"), false)?;
        let service_config = app_config.gateway_service();

        info!("Parsing server address...");
        let address: SocketAddr = ServiceHelper::parse_server_addr(
            &service_config.runtime,
            "SPARK_GATEWAY_ADDR",
            DEFAULT_PORT,
        )
        .with_context(|| "invalid gateway server address")?;
        info!(address = %address, "Server address parsed successfully");

        // 使用 Wire 风格的依赖注入构建应用上下文
        let context = wire::initialize(app_config).await?;

        info!("ApplicationBootstrap created successfully");

        let listener = TcpListener::bind(address)
            .await
            .with_context(|| format!("failed to bind {address}"))?;
        Self::run_with_listener(context, listener, async {
            if let Err(err) = tokio::signal::ctrl_c().await {
                warn!(?err, "failed to listen for shutdown signal");
            }
            info!("shutdown signal received");
        })
        .await
    }

    /// 在给定监听器上运行，直到 `shutdown` 完成
    ///
    /// 接受连接前先完成一次关系缓存加载，之后按 `reload_interval` 周期重载。
    pub async fn run_with_listener<F>(
        context: ApplicationContext,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let services = context.services.clone();
        reload_relations(&services).await;

        let interval = context.config.reload_interval;
        let reloader = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // 第一次 tick 立即完成
            ticker.tick().await;
            loop {
                ticker.tick().await;
                reload_relations(&services).await;
            }
        });

        let result = serve_clients(listener, context.services.clone(), shutdown).await;

        reloader.abort();
        info!("gateway server stopped");
        result
    }
}

async fn reload_relations(services: &SessionServices) {
    if let Err(err) = services.users.reload().await {
        warn!(%err, "user relation reload failed");
    }
    if let Err(err) = services.groups.reload().await {
        warn!(%err, "group reload failed");
    }
}
