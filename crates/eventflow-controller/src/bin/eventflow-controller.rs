//! EventFlow controller daemon.
//!
//! Configuration comes from `EVENTFLOW_CONTROLLER_CONFIG` (path to a
//! JSON config file) or defaults. The metadata store is in-memory
//! unless the `etcd` feature is enabled and `EVENTFLOW_KV_ENDPOINTS`
//! is set. Logging is controlled by `RUST_LOG` (default `info`).

use std::sync::Arc;

use eventflow_controller::{Controller, ControllerConfig};
use eventflow_kv::KvClient;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let mut config = match std::env::var("EVENTFLOW_CONTROLLER_CONFIG") {
        Ok(path) => ControllerConfig::load(&path)?,
        Err(_) => ControllerConfig::default(),
    };
    if let Ok(endpoints) = std::env::var("EVENTFLOW_KV_ENDPOINTS") {
        config.kv_endpoints = endpoints.split(',').map(str::to_string).collect();
    }

    let kv = build_kv(&config).await?;
    let controller = Controller::new(kv, config);
    controller.run().await?;

    tokio::signal::ctrl_c().await?;
    info!("shutting down");
    controller.shutdown().await;
    Ok(())
}

#[cfg(feature = "etcd")]
async fn build_kv(config: &ControllerConfig) -> Result<Arc<dyn KvClient>, Box<dyn std::error::Error>> {
    if config.kv_endpoints.is_empty() {
        info!("no kv endpoints configured; using in-memory store");
        return Ok(Arc::new(eventflow_kv::MemoryKvStore::new()));
    }
    let store = eventflow_kv::EtcdKvStore::connect(config.kv_endpoints.clone()).await?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "etcd"))]
async fn build_kv(config: &ControllerConfig) -> Result<Arc<dyn KvClient>, Box<dyn std::error::Error>> {
    if !config.kv_endpoints.is_empty() {
        info!("built without the etcd feature; ignoring configured kv endpoints");
    }
    Ok(Arc::new(eventflow_kv::MemoryKvStore::new()))
}
