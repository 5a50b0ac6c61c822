use anyhow::Result;
use spark_im_core::config::load_config;
use spark_im_core::tracing::init_tracing_from_config;

#[tokio::main]
async fn main() -> Result<()> {
    // 从配置初始化日志系统，RUST_LOG 优先
    init_tracing_from_config(Some(&load_config(Some("./config")).logging));

    spark_storage_server::ApplicationBootstrap::run().await
}
