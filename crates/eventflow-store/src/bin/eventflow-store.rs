//! EventFlow storage-node daemon.
//!
//! Recovers the volume's block directory and serves it until shutdown.
//! Configuration comes from `EVENTFLOW_STORE_CONFIG` (path to a JSON
//! config file) or, absent that, from individual environment variables:
//!
//! - `EVENTFLOW_VOLUME_ID` (default 1)
//! - `EVENTFLOW_VOLUME_DIR` (default ./data/blocks)
//! - `EVENTFLOW_VOLUME_CAPACITY` bytes (default 500 GiB)
//! - `EVENTFLOW_IP` / `EVENTFLOW_PORT` advertised address
//! - `EVENTFLOW_CONTROLLERS` comma-separated controller endpoints
//!
//! Logging is controlled by `RUST_LOG` (default `info`).

use std::sync::Arc;

use eventflow_core::Id;
use eventflow_store::{StoreConfig, VolumeServer};
use tracing::info;

fn config_from_env() -> StoreConfig {
    let volume_id = std::env::var("EVENTFLOW_VOLUME_ID")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(1);
    let dir = std::env::var("EVENTFLOW_VOLUME_DIR").unwrap_or_else(|_| "./data/blocks".to_string());
    let capacity = std::env::var("EVENTFLOW_VOLUME_CAPACITY")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(500 * 1024 * 1024 * 1024);
    let ip = std::env::var("EVENTFLOW_IP").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("EVENTFLOW_PORT")
        .ok()
        .and_then(|v| v.parse::<u16>().ok())
        .unwrap_or(11811);
    let controllers = std::env::var("EVENTFLOW_CONTROLLERS")
        .map(|v| v.split(',').map(str::to_string).collect())
        .unwrap_or_default();

    StoreConfig {
        controllers,
        ip,
        port,
        volume: eventflow_store::config::VolumeInfo {
            id: Id(volume_id),
            dir: dir.into(),
            capacity,
        },
        heartbeat_interval_ms: 3000,
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = match std::env::var("EVENTFLOW_STORE_CONFIG") {
        Ok(path) => StoreConfig::load(&path)?,
        Err(_) => config_from_env(),
    };

    info!(
        volume_id = %config.volume.id,
        dir = %config.volume.dir.display(),
        address = %config.address(),
        "starting eventflow store"
    );

    let server = Arc::new(VolumeServer::recover(&config).await?);
    info!(blocks = server.block_count(), used = server.used(), "volume online");

    tokio::signal::ctrl_c().await?;
    info!("shutting down; syncing blocks");
    server.close().await?;
    Ok(())
}
