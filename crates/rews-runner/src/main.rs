//! # rews-runner
//!
//! Runs one reconnecting WebSocket from a JSON configuration file and logs
//! every frame and lifecycle event until Ctrl+C.
//!
//! # Usage
//!
//! ```bash
//! rews-runner config.json --log-level info
//! ```

use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use rews_core::{ReconnectingSocket, SocketEvent};
use tracing::info;

/// Reconnecting WebSocket runner.
#[derive(Parser)]
#[command(name = "rews-runner", about = "Reconnecting WebSocket runner")]
struct Cli {
    /// Configuration file path (JSON).
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error). Overrides the config file.
    #[arg(short, long)]
    log_level: Option<String>,

    /// Optional log directory for file output. Overrides the config file.
    #[arg(long)]
    log_dir: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // 1. Load configuration
    let config = rews_core::config::load_config(&cli.config)?;

    // 2. Initialize logging
    rews_core::logging::init_logging(&config.log_settings(cli.log_level, cli.log_dir));

    info!("rews-runner starting — config={}, url={}", cli.config.display(), config.socket.url);

    // 3. Build and start the socket
    let mut socket = ReconnectingSocket::from_config(&config.socket)?
        .on_text(|conn, text| info!("[ws-{}] text: {text}", conn.id()))
        .on_binary(|conn, data| info!("[ws-{}] binary: {} bytes", conn.id(), data.len()))
        .on_reconnected(|new, old| info!("[ws-{}] replaced ws-{}", new.id(), old.id()));
    for event in SocketEvent::ALL {
        socket = socket.on(event, move |conn, detail| info!("[ws-{}] {event}: {detail}", conn.id()));
    }
    socket.start()?;

    info!("socket started — press Ctrl+C to stop");

    // 4. Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    socket.stop();
    info!("socket stopped — goodbye");
    Ok(())
}
