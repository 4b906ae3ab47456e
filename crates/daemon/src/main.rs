use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use paseo_daemon::pairing::Identity;
use paseo_daemon::{server, uplink, Daemon};
use paseo_domain::config::{ConfigSeverity, DaemonConfig};
use paseo_protocol::offer::pairing_url;
use paseo_providers::{MetadataModel, ProviderRegistry, ScriptedProvider};

#[derive(Parser)]
#[command(name = "paseod", about = "Paseo coding-agent daemon")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the daemon (default).
    Serve,
    /// Print the pairing URL for the persisted identity.
    Offer,
    /// Print the version.
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        None | Some(Command::Serve) => {
            init_tracing();
            run_server().await
        }
        Some(Command::Offer) => {
            let config = DaemonConfig::from_env();
            let identity =
                Identity::load_or_generate(&config.paseo_home, config.server_id_override.as_deref())?;
            let relay = config
                .relay_endpoint
                .context("PASEO_RELAY_ENDPOINT is not set; offers need a relay")?;
            println!("{}", pairing_url("https://paseo.app", &identity.offer(&relay))?);
            Ok(())
        }
        Some(Command::Version) => {
            println!("paseod {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,paseo_daemon=debug")),
        )
        .json()
        .init();
}

fn build_providers() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(Arc::new(ScriptedProvider::new(vec![])));

    // Cheap metadata model for titles, branch names, and commit messages.
    if let Ok(base_url) = std::env::var("PASEO_METADATA_BASE_URL") {
        let model = std::env::var("PASEO_METADATA_MODEL")
            .unwrap_or_else(|_| "gpt-4o-mini".to_string());
        let api_key = std::env::var("PASEO_METADATA_API_KEY").ok();
        registry.set_metadata_model(MetadataModel::http(base_url, api_key, model));
        tracing::info!("metadata model configured");
    }
    registry
}

async fn run_server() -> anyhow::Result<()> {
    tracing::info!("paseod starting");

    let config = DaemonConfig::from_env();
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues
                .iter()
                .filter(|i| i.severity == ConfigSeverity::Error)
                .count()
        );
    }

    let shutdown = CancellationToken::new();
    let providers = Arc::new(build_providers());
    let daemon = Daemon::build(config, providers, shutdown.clone())
        .context("building daemon state")?;

    tracing::info!(
        server_id = %daemon.identity.server_id,
        home = %daemon.config.paseo_home.display(),
        agents = daemon.agents.list(&Default::default()).len(),
        "daemon state ready"
    );

    // One pairing_offer line per boot.
    if let Some(relay) = &daemon.config.relay_endpoint {
        daemon.identity.log_pairing_offer(relay)?;
    }

    // Relay uplink.
    {
        let daemon = daemon.clone();
        let shutdown = shutdown.clone();
        tokio::spawn(async move { uplink::run_uplink(daemon, shutdown).await });
    }

    // Periodic housekeeping: expired download tokens, exited terminals.
    {
        let daemon = daemon.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
            loop {
                interval.tick().await;
                daemon.downloads.prune_expired();
                daemon.terminals.prune_exited();
            }
        });
    }

    // Ctrl-C also drives the graceful path.
    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                shutdown.cancel();
            }
        });
    }

    let restart = daemon.restart.clone();
    server::serve(daemon, shutdown).await?;

    if restart.restart_requested() {
        tracing::info!("exiting for restart");
    } else {
        tracing::info!("paseod stopped");
    }
    Ok(())
}
