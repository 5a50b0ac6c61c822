//! Wire 风格的依赖注入模块
//!
//! 按固定顺序构建会话网关的全部依赖。分发器先于服务器通道创建，
//! 通道建立后收到的第一条发布就能找到本机在线目录。

use std::sync::Arc;

use anyhow::{Context, Result};
use spark_im_core::config::SparkAppConfig;
use spark_im_core::metrics::GatewayMetrics;
use spark_im_core::protocol::CommandRegistry;
use tracing::info;

use crate::application::{GroupManager, Presence, PublishDispatcher, SessionServices, UserManager};
use crate::config::GatewayConfig;
use crate::domain::{DeviceRegistry, LoginPointStore, RelationStore, TokenStore};
use crate::infrastructure::redis_store;
use crate::infrastructure::{
    MemoryCollaborators, PgRelationStore, RedisDeviceRegistry, RedisLoginPointStore,
    RedisTokenStore, RouteClient, StorageClient,
};

/// 外部协作者
pub struct Collaborators {
    pub tokens: Arc<dyn TokenStore>,
    pub devices: Arc<dyn DeviceRegistry>,
    pub login_points: Arc<dyn LoginPointStore>,
    pub relations: Arc<dyn RelationStore>,
}

impl From<&MemoryCollaborators> for Collaborators {
    fn from(memory: &MemoryCollaborators) -> Self {
        Self {
            tokens: memory.tokens.clone(),
            devices: memory.devices.clone(),
            login_points: memory.login_points.clone(),
            relations: memory.relations.clone(),
        }
    }
}

/// 应用上下文 - 包含所有已初始化的服务
pub struct ApplicationContext {
    pub config: GatewayConfig,
    pub services: Arc<SessionServices>,
}

/// 从应用配置构建上下文
pub async fn initialize(app_config: &SparkAppConfig) -> Result<ApplicationContext> {
    // 1. 加载配置
    let config = GatewayConfig::from_app_config(app_config)
        .context("Failed to load gateway service configuration")?;

    // 2. 外部协作者
    let collaborators = connect_collaborators(&config).await?;
    build(config, collaborators)
}

async fn connect_collaborators(config: &GatewayConfig) -> Result<Collaborators> {
    let memory = MemoryCollaborators::new();
    let mut collaborators = Collaborators::from(&memory);

    if let Some(url) = config.redis_url.as_deref() {
        info!("Using Redis token, device and login point stores");
        let conn = redis_store::connect(url).await?;
        collaborators.tokens = Arc::new(RedisTokenStore::new(conn.clone()));
        collaborators.devices = Arc::new(RedisDeviceRegistry::new(conn.clone()));
        collaborators.login_points = Arc::new(RedisLoginPointStore::new(conn));
    }
    if let Some(postgres) = config.postgres.as_ref() {
        info!("Using PostgreSQL relation store");
        let store = PgRelationStore::connect(postgres).await?;
        store.ensure_schema().await?;
        collaborators.relations = Arc::new(store);
    }
    Ok(collaborators)
}

/// 从已解析的配置与协作者构建上下文，必须在 tokio 运行时内调用
pub fn build(config: GatewayConfig, collaborators: Collaborators) -> Result<ApplicationContext> {
    // 3. 命令表与指标
    let registry = Arc::new(CommandRegistry::standard());
    let metrics = Arc::new(GatewayMetrics::new());

    // 4. 在线目录与关系缓存
    let presence = Arc::new(Presence::new());
    let users = Arc::new(UserManager::new(collaborators.relations.clone()));
    let groups = Arc::new(GroupManager::new(collaborators.relations));

    // 5. 服务器通道
    let dispatcher = Arc::new(PublishDispatcher::new(presence.clone(), groups.clone()));
    let storage = StorageClient::start(
        &config.storage_addrs,
        &config.server_id,
        registry.clone(),
        dispatcher.clone(),
        metrics.clone(),
    )
    .context("Failed to start storage channels")?;
    let route = RouteClient::start(
        &config.route_addrs,
        &config.server_id,
        registry.clone(),
        dispatcher,
    );
    info!(
        server_id = %config.server_id,
        storage = config.storage_addrs.len(),
        route = config.route_addrs.len(),
        "server channels started"
    );

    let services = Arc::new(SessionServices {
        server_id: config.server_id.clone(),
        registry,
        presence,
        storage: Arc::new(storage),
        route: Arc::new(route),
        users,
        groups,
        tokens: collaborators.tokens,
        devices: collaborators.devices,
        login_points: collaborators.login_points,
        metrics,
        live_queue_depth: config.live_queue_depth,
    });

    Ok(ApplicationContext { config, services })
}
