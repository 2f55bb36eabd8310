//! thumbd: thumbnail proxy daemon.
//!
//! Serves the [`LookupCache`](thumbproxy::LookupCache) and the passthrough
//! endpoints over HTTP.

use clap::Parser;
use tokio::net::TcpListener;
use tracing::info;

use thumbproxy::server::config::{Config, Secrets};
use thumbproxy::server::{AppState, router};

/// Caching, rate-limit-aware thumbnail proxy.
#[derive(Parser)]
#[command(name = "thumbd")]
#[command(version = thumbproxy::PKG_VERSION)]
#[command(about = "Thumbnail proxy daemon")]
struct Args {
    /// Path to configuration file.
    #[arg(short, long, env = "THUMBPROXY_CONFIG")]
    config: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialise tracing (default: info for the daemon; override with RUST_LOG).
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let config = Config::load(args.config.as_deref())?;
    let secrets = Secrets::load()?;
    let state = AppState::from_config(&config, &secrets)?;

    let port = std::env::var("PORT").ok();
    let addr = config.server.bind_address(port.as_deref())?;

    info!(version = thumbproxy::PKG_VERSION, %addr, "thumbd starting");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown requested");
        })
        .await?;

    Ok(())
}
