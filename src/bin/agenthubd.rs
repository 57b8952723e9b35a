//! The agenthub server daemon.
//!
//! Loads configuration from `$AGENTHUB_CONFIG_PATH` (overlaid with
//! environment variables), then serves the REST/WebSocket API until ctrl-c.
//! The listen address comes from `AGENTHUB_LISTEN` and defaults to
//! `0.0.0.0:8000`.

use agenthub::config;
use agenthub::server;
use std::net::SocketAddr;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    env_logger::init();

    let config = config::default_config().clone();
    let addr: SocketAddr = match std::env::var("AGENTHUB_LISTEN") {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            log::warn!("invalid AGENTHUB_LISTEN value {:?}; using default", raw);
            default_addr()
        }),
        Err(_) => default_addr(),
    };

    log::info!(
        "starting agenthub (conversations at {:?}, workspaces at {:?})",
        config.conversations_path,
        config.workspace_path
    );
    server::serve(config, addr).await
}

fn default_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}
