//! InfoDB node - joins the multicast group and keeps the local item
//! database in sync until interrupted.

use infodb_node::{Config, Node};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "infodb_node=info,infodb_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing::info!(
        group = %format!("{}:{}", config.send_recv_address, config.send_recv_port),
        interface = %config.send_recv_if_address,
        "Starting InfoDB node"
    );

    let node = Node::with_udp(config).await?;
    node.start().await?;

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutting down");
    node.shutdown().await?;

    Ok(())
}
