//! clipsync-relay binary entry point.
//!
//! Usage:
//! ```bash
//! clipsync-relay --config relay.toml
//! ```

use anyhow::{Context, Result};
use clipsync_relay::config::Config;
use clipsync_relay::http;
use clipsync_relay::SignalingRelay;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clipsync_relay=info")),
        )
        .init();

    let config_path = get_config_path();
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    tracing::info!(
        "clipsync-relay v{} (config: {})",
        env!("CARGO_PKG_VERSION"),
        config_path.display()
    );

    let addr: SocketAddr = config
        .server
        .bind_address
        .parse()
        .with_context(|| format!("invalid bind address {:?}", config.server.bind_address))?;
    let ws_path = config.server.ws_path.clone();

    let relay = Arc::new(SignalingRelay::new(config)?);

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;
    let port = listener.local_addr()?.port();
    for url in reachable_urls(addr.ip(), port, &ws_path) {
        tracing::info!("signaling endpoint: {}", url);
    }

    http::serve(listener, relay, shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("relay stopped");
    Ok(())
}

fn get_config_path() -> PathBuf {
    std::env::args()
        .skip_while(|arg| arg != "--config")
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("relay.toml"))
}

/// URLs clients can use to reach this relay.
fn reachable_urls(bind: IpAddr, port: u16, ws_path: &str) -> Vec<String> {
    let mut urls = vec![format!("ws://localhost:{}{}", port, ws_path)];
    if !bind.is_unspecified() {
        if !bind.is_loopback() {
            urls.push(format!("ws://{}:{}{}", bind, port, ws_path));
        }
        return urls;
    }
    match local_ip_address::list_afinet_netifas() {
        Ok(interfaces) => {
            for (name, ip) in interfaces {
                if ip.is_ipv4() && !ip.is_loopback() {
                    urls.push(format!("ws://{}:{}{}  ({})", ip, port, ws_path, name));
                }
            }
        }
        Err(e) => tracing::warn!("could not list network interfaces: {}", e),
    }
    urls
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
