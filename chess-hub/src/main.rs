use anyhow::Result;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chess_hub::{HubConfig, HubServer};

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env()
            .add_directive("chess_hub=debug".parse()?))
        .init();

    let config = HubConfig::from_env();
    info!(addr = %config.addr(), "国际象棋中继服务启动中...");

    let server = HubServer::bind(&config).await?;
    server.run().await
}
