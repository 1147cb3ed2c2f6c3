//! # clipsync
//!
//! Peer-to-peer encrypted clipboard sync.
//!
//! Every device in the same room with the same password shares one
//! clipboard. The relay only introduces peers to each other; clipboard
//! content travels directly between devices, encrypted.
//!
//! ## Example
//!
//! ```bash
//! # Start a relay somewhere reachable
//! clipsync-relay
//!
//! # On each device
//! clipsync --server ws://192.168.1.10:8080/ws --room home
//! ```

use std::net::IpAddr;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use sync_client::{SyncConfig, SyncCoordinator, TcpConnector, WebSocketTransport};
use tracing_subscriber::EnvFilter;

mod clipboard;

use clipboard::SystemClipboard;

/// Peer-to-peer encrypted clipboard sync.
#[derive(Parser, Debug)]
#[command(name = "clipsync")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Signaling relay WebSocket URL
    #[arg(long, short, default_value = "ws://localhost:8080/ws")]
    server: String,

    /// Room to join
    #[arg(long, short, default_value = "default")]
    room: String,

    /// Peer id for this device (random if omitted)
    #[arg(long)]
    peer_id: Option<String>,

    /// Shared password (will prompt if not provided)
    #[arg(long, short, env = "CLIPSYNC_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Seconds allowed for building an offer or answer
    #[arg(long, default_value_t = 10)]
    gather_timeout_secs: u64,

    /// Clipboard poll interval in milliseconds
    #[arg(long, default_value_t = 500)]
    poll_interval_ms: u64,

    /// Address the peer-to-peer listener binds to
    #[arg(long, default_value = "0.0.0.0")]
    listen: IpAddr,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("clipsync=info,clipsync_client=info")),
        )
        .init();

    let password = match cli.password {
        Some(password) => normalize_password(&password)?,
        None => prompt_password("Password: ")?,
    };

    let mut config = SyncConfig::new(
        &password,
        &cli.server,
        Duration::from_secs(cli.gather_timeout_secs),
    )
    .with_room(&cli.room);
    if let Some(peer_id) = &cli.peer_id {
        config = config.with_peer_id(peer_id);
    }

    let coordinator = SyncCoordinator::new(
        config,
        WebSocketTransport::new(),
        TcpConnector::new(cli.listen),
        SystemClipboard::new(Duration::from_millis(cli.poll_interval_ms)),
    )
    .context("Invalid configuration")?;

    println!("Starting clipsync...");
    println!("  Key derived from password");

    coordinator
        .start()
        .await
        .context("Failed to start clipboard sync")?;

    println!("  Clipboard watcher started");
    println!("  Connected to {}", cli.server);
    println!("  Room:    {}", coordinator.config().room);
    println!("  Peer id: {}", coordinator.local_peer_id());
    println!();
    println!("Press Ctrl+C to stop.");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;

    println!();
    println!("Stopping...");
    coordinator.shutdown().await;
    Ok(())
}

/// Prompt for the password with echo suppression.
fn prompt_password(prompt: &str) -> Result<String> {
    let password = rpassword::prompt_password(prompt).context("Failed to read password")?;
    normalize_password(&password)
}

/// Trim surrounding whitespace so every input path derives the same key.
fn normalize_password(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("Password must not be empty");
    }
    Ok(trimmed.to_string())
}
