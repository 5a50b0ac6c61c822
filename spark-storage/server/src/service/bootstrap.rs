//! 应用启动器 - 负责依赖注入和服务启动

use std::future::Future;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use spark_im_core::link::serve_links;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::service::wire::{self, ApplicationContext};

/// 存储服务默认端口
pub const DEFAULT_PORT: u16 = 13333;

/// 应用启动器
pub struct ApplicationBootstrap;

impl ApplicationBootstrap {
    /// 运行应用的主入口点
    pub async fn run() -> Result<()> {
        use spark_im_core::ServiceHelper;

        // 加载应用配置
        let app_config = ServiceHelper::load_config(Some("./config"), false)?;
        let service_config = app_config.storage_service();

        info!("Parsing server address...");
        let address: SocketAddr = ServiceHelper::parse_server_addr(
            &service_config.runtime,
            "SPARK_STORAGE_ADDR",
            DEFAULT_PORT,
        )
        .with_context(|| "invalid storage server address")?;
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
    pub async fn run_with_listener<F>(
        context: ApplicationContext,
        listener: TcpListener,
        shutdown: F,
    ) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let service = context.service.clone();
        let interval = context.config.flush_interval;
        let flusher = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if let Err(err) = service.flush_cursors().await {
                    warn!(%err, "periodic cursor flush failed");
                }
            }
        });

        let result = serve_links(listener, context.registry.clone(), context.handler.clone(), shutdown).await;

        flusher.abort();
        if let Err(err) = context.service.flush_cursors().await {
            warn!(%err, "final cursor flush failed");
        }
        info!("storage server stopped");
        result
    }
}
