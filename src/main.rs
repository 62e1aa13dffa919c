//! Puck Rush Server
//!
//! Reads configuration from the environment and serves the HTTP API.

use tracing::info;
use tracing_subscriber::EnvFilter;

use puck_rush::{network::AppConfig, serve, VERSION};

#[cfg(feature = "debug-tracing")]
const DEFAULT_FILTER: &str = "debug";
#[cfg(not(feature = "debug-tracing"))]
const DEFAULT_FILTER: &str = "info";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
        )
        .init();

    info!("Puck Rush Server v{}", VERSION);

    let config = AppConfig::from_env()?;
    serve(config).await?;
    Ok(())
}
