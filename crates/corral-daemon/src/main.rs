//! Corral Daemon - Cluster resource coordinator
//!
//! The daemon provides:
//! - The coordinator actor, recovered from the registry at startup
//! - Periodic allocation and offer expiry
//! - Hostname whitelist polling
//! - An inspection REST API (`/state`, `/health`)

use anyhow::Context;
use clap::Parser;
use corral_daemon::{DaemonConfig, Server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Corral Daemon CLI
#[derive(Parser)]
#[command(name = "corrald")]
#[command(about = "Corral Daemon - Cluster resource coordinator", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CORRAL_CONFIG")]
    config: Option<String>,

    /// Listen address for the inspection API
    #[arg(short, long, env = "CORRAL_LISTEN_ADDR")]
    listen: Option<String>,

    /// Whitelist file, or `*` to accept every host
    #[arg(short, long, env = "CORRAL_WHITELIST")]
    whitelist: Option<String>,

    /// Log level
    #[arg(long, env = "CORRAL_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CORRAL_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config =
        DaemonConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    // Override with CLI args
    if let Some(listen) = &cli.listen {
        config.server.listen_addr = listen
            .parse()
            .with_context(|| format!("Invalid listen address: {}", listen))?;
    }
    if let Some(whitelist) = cli.whitelist {
        config.whitelist.path = whitelist;
    }
    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        listen = %config.server.listen_addr,
        whitelist = %config.whitelist.path,
        strict = config.coordinator.registry_strict,
        "Starting corrald"
    );

    Server::new(config)
        .run()
        .await
        .context("Corral daemon stopped")?;
    Ok(())
}
