use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use sb_registry::{RegistryConfig, RegistryServer};

/// The switchboard Registry daemon.
#[derive(Parser, Debug)]
#[command(name = "switchboardd", version, about)]
struct Cli {
    /// Bind host (overrides the config file).
    #[arg(long)]
    host: Option<String>,
    /// Bind port (overrides the config file).
    #[arg(long)]
    port: Option<u16>,
    /// Path to a TOML config file.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sb_registry=debug")),
        )
        .init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            RegistryConfig::from_toml(&raw)?
        }
        None => RegistryConfig::default(),
    };
    if let Some(host) = cli.host {
        config.host = host;
    }
    if let Some(port) = cli.port {
        config.port = port;
    }

    let server = RegistryServer::bind(config).await?;
    let shutdown = server.shutdown_token();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, shutting down");
            shutdown.cancel();
        }
    });

    server.run().await;
    Ok(())
}
