//! The controller process facade.
//!
//! Wires the KV store, volume manager, and eventlog manager together,
//! runs the background loops under one shutdown signal, and implements
//! the controller RPC surface storage nodes call into.

use std::sync::Arc;

use async_trait::async_trait;
use eventflow_core::rpc::RpcResult;
use eventflow_core::{ControllerClient, Id, SegmentHealth};
use eventflow_kv::KvClient;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::info;

use crate::config::ControllerConfig;
use crate::error::Result;
use crate::manager::EventlogManager;
use crate::name_service::NameService;
use crate::volume::VolumeManager;

pub struct Controller {
    volumes: Arc<VolumeManager>,
    manager: Arc<EventlogManager>,
    name_service: NameService,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl Controller {
    pub fn new(kv: Arc<dyn KvClient>, config: ControllerConfig) -> Arc<Self> {
        let volumes = Arc::new(VolumeManager::new(
            Arc::clone(&kv),
            config.volume_liveness_timeout(),
        ));
        let manager = Arc::new(EventlogManager::new(
            kv,
            Arc::clone(&volumes),
            config.clone(),
        ));
        let name_service = NameService::new(
            Arc::clone(&manager),
            Arc::clone(&volumes),
            config.name_cache_ttl(),
        );
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            volumes,
            manager,
            name_service,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        })
    }

    /// Recovers persisted state and starts the background loops.
    pub async fn run(&self) -> Result<()> {
        self.volumes.recover().await?;
        self.manager.recover().await?;
        let handles = self.manager.start(self.shutdown_tx.subscribe());
        *self.tasks.lock().await = handles;
        info!("controller running");
        Ok(())
    }

    /// Signals the background loops and waits for them to drain.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.tasks.lock().await.drain(..) {
            let _ = handle.await;
        }
        info!("controller stopped");
    }

    pub fn manager(&self) -> &Arc<EventlogManager> {
        &self.manager
    }

    pub fn volumes(&self) -> &Arc<VolumeManager> {
        &self.volumes
    }

    pub fn name_service(&self) -> &NameService {
        &self.name_service
    }
}

#[async_trait]
impl ControllerClient for Controller {
    async fn heartbeat(
        &self,
        volume_id: Id,
        address: String,
        healths: Vec<SegmentHealth>,
    ) -> RpcResult<()> {
        self.volumes.heartbeat(volume_id, &address).await?;
        self.manager.update_segments(healths).await?;
        Ok(())
    }
}
