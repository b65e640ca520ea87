//! # Huddle Server
//!
//! Single-room realtime chat server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! huddle
//!
//! # Run with custom config
//! huddle --config /path/to/huddle.toml
//!
//! # Override the listen address
//! huddle --addr 0.0.0.0:8080
//!
//! # Run with environment variables
//! HUDDLE_PORT=8080 HUDDLE_ROOM__SLOW_MEMBER=evict huddle
//! ```

mod config;
mod handlers;
mod metrics;

use anyhow::{Context, Result};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line arguments.
#[derive(Debug, Parser)]
#[command(name = "huddle", version, about = "Single-room realtime chat server")]
struct Args {
    /// Configuration file (defaults to the first of ./huddle.toml,
    /// /etc/huddle/huddle.toml, ~/.config/huddle/huddle.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding host and port from the config
    #[arg(long)]
    addr: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "huddle=debug,huddle_core=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config =
        config::Config::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(addr) = args.addr {
        config.host = addr.ip().to_string();
        config.port = addr.port();
    }

    tracing::info!("Starting Huddle server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    handlers::run_server(config).await?;

    Ok(())
}
