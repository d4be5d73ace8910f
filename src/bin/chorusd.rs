//! Chorus Daemon - WebSocket broadcast server
//!
//! Accepts WebSocket clients and relays every text message to all
//! connected clients, tagged with the sender's identity.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default address (127.0.0.1:8765)
//! chorusd
//!
//! # Load settings from a file and override the port
//! chorusd --config chorus.toml --port 9000
//! ```

use std::env;
use std::path::PathBuf;
use std::process;

use anyhow::{Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use chorusd::config::{ServerConfig, ADDR_ENV, CONFIG_ENV};
use chorusd::registry::spawn_registry_with_capacity;
use chorusd::server::ChatServer;

/// Chorus daemon - real-time message broadcaster
#[derive(Parser, Debug)]
#[command(name = "chorusd", version, about)]
struct Args {
    /// Path to a TOML config file (falls back to $CHORUS_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Host to listen on
    #[arg(long)]
    host: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,
}

/// Log directives used when `RUST_LOG` is unset or unparseable
const DEFAULT_LOG_FILTER: &str = "chorusd=info,chorus_core=info";

/// Builds the log filter from `RUST_LOG`, falling back to the defaults.
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(DEFAULT_LOG_FILTER))
}

fn load_config(args: &Args) -> Result<ServerConfig> {
    let path = args
        .config
        .clone()
        .or_else(|| env::var_os(CONFIG_ENV).map(PathBuf::from));

    let mut config = match path {
        Some(path) => ServerConfig::from_file(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ServerConfig::default(),
    };

    if let Ok(addr) = env::var(ADDR_ENV) {
        config
            .apply_addr_override(&addr)
            .with_context(|| format!("Invalid {ADDR_ENV}"))?;
    }
    if let Some(host) = &args.host {
        config.host = host.clone();
    }
    if let Some(port) = args.port {
        config.port = port;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(log_filter(env::var(EnvFilter::DEFAULT_ENV).ok().as_deref()))
        .init();

    let config = load_config(&args)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        "Chorus daemon starting"
    );

    let cancel_token = CancellationToken::new();

    let shutdown_token = cancel_token.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let registry = spawn_registry_with_capacity(config.max_connections);
    info!(max_connections = config.max_connections, "Connection registry started");

    let server = ChatServer::new(config, registry, cancel_token);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Chorus daemon stopped");
    Ok(())
}

async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
