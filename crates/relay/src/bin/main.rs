use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use paseo_relay::{router, RelayConfig, RelayState};

#[derive(Parser)]
#[command(name = "paseo-relay", about = "Paseo store-and-forward relay")]
struct Cli {
    /// host:port to listen on.
    #[arg(long, default_value = "0.0.0.0:7440")]
    listen: String,

    /// Seconds a session may idle before garbage collection.
    #[arg(long, default_value_t = 60)]
    idle_ttl_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    let state = Arc::new(RelayState::new(RelayConfig {
        idle_ttl: std::time::Duration::from_secs(cli.idle_ttl_secs),
        ..RelayConfig::default()
    }));

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&cli.listen)
        .await
        .with_context(|| format!("binding to {}", cli.listen))?;

    tracing::info!(addr = %cli.listen, "paseo-relay listening");

    axum::serve(listener, app)
        .await
        .context("axum server error")?;

    Ok(())
}
