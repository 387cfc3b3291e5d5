//! roomrelay-server: real-time room relay.
//!
//! Accepts WebSocket connections authenticated by a bearer token, lets them
//! join rooms through shareable links, broadcasts visitor counts and relays
//! chat events to every member of a room.

mod auth;
mod config;
mod relay;
mod server;
mod session;
mod store;
mod transport;

use clap::Parser;
use config::{ConfigOverrides, ServerConfig};
use server::RelayServer;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::{error, info, warn};

/// roomrelay-server: real-time room relay
#[derive(Parser, Debug)]
#[command(name = "roomrelay-server", version, about = "Real-time room relay")]
struct Cli {
    /// Listen port
    #[arg(short, long)]
    port: Option<u16>,

    /// Listen address
    #[arg(long)]
    bind: Option<IpAddr>,

    /// Config file path
    #[arg(long, default_value = "~/.roomrelay/config.toml")]
    config: String,

    /// Secret used to verify HS256 bearer tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: Option<String>,

    /// Append chat events to this JSON-lines file
    #[arg(long)]
    event_log: Option<String>,

    /// How long a send may wait on a slow connection, in milliseconds
    #[arg(long)]
    send_timeout_ms: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting roomrelay-server");

    // Load server config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let overrides = ConfigOverrides {
        bind: cli.bind,
        port: cli.port,
        jwt_secret: cli.jwt_secret,
        event_log: cli.event_log,
        send_timeout_ms: cli.send_timeout_ms,
    };
    let server_config = match ServerConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %e, "failed to load config");
            std::process::exit(1);
        }
    };

    let relay_server = match RelayServer::new(server_config) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to create server");
            std::process::exit(1);
        }
    };

    // Run until shutdown signal
    if let Err(e) = relay_server.run(shutdown_signal()).await {
        error!(error = %e, "server error");
        std::process::exit(1);
    }

    info!("roomrelay-server stopped");
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler, waiting for Ctrl+C only");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }

    info!("received shutdown signal");
}
