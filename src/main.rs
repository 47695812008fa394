use anyhow::Result;
use tracing_subscriber::EnvFilter;

use snakepit::{GameServer, ServerConfig, VERSION};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!("snakepit-server v{}", VERSION);

    let config = ServerConfig::from_env();
    let server = GameServer::new(config);
    server.run().await?;
    Ok(())
}
