//! Volume registry and liveness.
//!
//! The controller learns about storage nodes from their heartbeats: a
//! heartbeat registers (or refreshes) the volume's address and stamps
//! its liveness clock. A volume whose last heartbeat is older than the
//! liveness timeout is dead — the allocator stops placing blocks on it.
//!
//! Each registered volume carries the [`VolumeClient`] used to reach
//! it. In-process deployments and tests hand the client in directly;
//! a networked transport registers a connected client per node.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use dashmap::DashMap;
use eventflow_core::{time, Id, VolumeClient};
use eventflow_kv::KvClient;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metadata::{self, VolumeMetadata};

/// A storage node and the client to reach it.
pub struct VolumeInstance {
    metadata: RwLock<VolumeMetadata>,
    client: RwLock<Option<Arc<dyn VolumeClient>>>,
    last_heartbeat: AtomicI64,
}

impl VolumeInstance {
    fn new(metadata: VolumeMetadata) -> Self {
        Self {
            metadata: RwLock::new(metadata),
            client: RwLock::new(None),
            last_heartbeat: AtomicI64::new(0),
        }
    }

    pub fn id(&self) -> Id {
        self.metadata.read().unwrap().id
    }

    pub fn address(&self) -> String {
        self.metadata.read().unwrap().instance_address.clone()
    }

    pub fn metadata(&self) -> VolumeMetadata {
        self.metadata.read().unwrap().clone()
    }

    /// The client to this volume, absent until a transport (or an
    /// in-process wiring) registered one.
    pub fn client(&self) -> Result<Arc<dyn VolumeClient>> {
        self.client
            .read()
            .unwrap()
            .clone()
            .ok_or_else(|| Error::VolumeNotFound(self.id()))
    }

    pub fn set_client(&self, client: Arc<dyn VolumeClient>) {
        *self.client.write().unwrap() = Some(client);
    }

    pub fn touch(&self) {
        self.last_heartbeat.store(time::now_ms(), Ordering::Release);
    }

    pub fn alive(&self, timeout: Duration) -> bool {
        let last = self.last_heartbeat.load(Ordering::Acquire);
        last > 0 && time::now_ms() - last <= timeout.as_millis() as i64
    }

    /// Adds `delta` bytes to the volume's usage accounting.
    pub fn add_used(&self, delta: u64) {
        self.metadata.write().unwrap().used += delta;
    }
}

pub struct VolumeManager {
    kv: Arc<dyn KvClient>,
    volumes: DashMap<u64, Arc<VolumeInstance>>,
    liveness_timeout: Duration,
}

impl VolumeManager {
    pub fn new(kv: Arc<dyn KvClient>, liveness_timeout: Duration) -> Self {
        Self {
            kv,
            volumes: DashMap::new(),
            liveness_timeout,
        }
    }

    /// Loads persisted volume metadata from the KV store. Clients and
    /// liveness come back with the volumes' next heartbeats.
    pub async fn recover(&self) -> Result<()> {
        let pairs = self.kv.list(metadata::VOLUME_KEY_PREFIX).await?;
        for pair in pairs {
            let md: VolumeMetadata = serde_json::from_slice(&pair.value)?;
            let id = md.id;
            self.volumes
                .insert(id.as_u64(), Arc::new(VolumeInstance::new(md)));
            debug!(volume_id = %id, "volume recovered");
        }
        info!(volumes = self.volumes.len(), "volume manager recovered");
        Ok(())
    }

    /// Registers a volume (or refreshes its address) from a heartbeat
    /// and stamps its liveness. Persists metadata when it changed.
    pub async fn heartbeat(&self, volume_id: Id, address: &str) -> Result<Arc<VolumeInstance>> {
        let instance = match self.volumes.get(&volume_id.as_u64()) {
            Some(entry) => Arc::clone(&entry),
            None => {
                let md = VolumeMetadata {
                    id: volume_id,
                    capacity: 0,
                    used: 0,
                    instance_address: address.to_string(),
                };
                let instance = Arc::new(VolumeInstance::new(md));
                self.volumes.insert(volume_id.as_u64(), Arc::clone(&instance));
                info!(volume_id = %volume_id, address, "volume registered");
                instance
            }
        };

        let changed = {
            let mut md = instance.metadata.write().unwrap();
            if md.instance_address != address {
                md.instance_address = address.to_string();
                true
            } else {
                false
            }
        };
        instance.touch();
        if changed {
            self.persist(&instance).await?;
        }
        Ok(instance)
    }

    /// Registers a volume with an in-process client, for tests and
    /// single-process deployments.
    pub async fn register(
        &self,
        md: VolumeMetadata,
        client: Arc<dyn VolumeClient>,
    ) -> Result<Arc<VolumeInstance>> {
        let id = md.id;
        let instance = Arc::new(VolumeInstance::new(md));
        instance.set_client(client);
        instance.touch();
        self.persist(&instance).await?;
        self.volumes.insert(id.as_u64(), Arc::clone(&instance));
        info!(volume_id = %id, "volume registered with in-process client");
        Ok(instance)
    }

    async fn persist(&self, instance: &Arc<VolumeInstance>) -> Result<()> {
        let (key, data) = {
            let md = instance.metadata.read().unwrap();
            (metadata::volume_key(md.id), serde_json::to_vec(&*md)?)
        };
        self.kv.set(&key, data).await?;
        Ok(())
    }

    pub fn get(&self, id: Id) -> Option<Arc<VolumeInstance>> {
        self.volumes.get(&id.as_u64()).map(|e| Arc::clone(&e))
    }

    /// Live volumes that a client can reach, ordered by ID.
    pub fn live_volumes(&self) -> Vec<Arc<VolumeInstance>> {
        let mut live: Vec<Arc<VolumeInstance>> = self
            .volumes
            .iter()
            .filter(|e| e.alive(self.liveness_timeout) && e.client().is_ok())
            .map(|e| Arc::clone(&e))
            .collect();
        live.sort_by_key(|v| v.id());
        live
    }

    pub fn len(&self) -> usize {
        self.volumes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.volumes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bytes::Bytes;
    use eventflow_core::rpc::{ReadResult, RpcError, RpcResult};
    use eventflow_kv::MemoryKvStore;
    use std::collections::HashMap;

    struct NullVolume;

    #[async_trait]
    impl VolumeClient for NullVolume {
        async fn activate_segment(
            &self,
            _eventlog_id: Id,
            _replica_group_id: Id,
            _leader_block: Id,
            _replicas: HashMap<Id, String>,
        ) -> RpcResult<()> {
            Ok(())
        }
        async fn append_to_block(&self, _id: Id, _p: Vec<Bytes>) -> RpcResult<Vec<u32>> {
            Err(RpcError::new(
                eventflow_core::ErrorKind::Internal,
                "unused",
            ))
        }
        async fn read_from_block(
            &self,
            _id: Id,
            _offset: u32,
            _count: usize,
            _t: std::time::Duration,
        ) -> RpcResult<ReadResult> {
            Err(RpcError::new(
                eventflow_core::ErrorKind::Internal,
                "unused",
            ))
        }
        async fn lookup_offset_in_block(&self, _id: Id, _time: i64) -> RpcResult<i64> {
            Ok(-1)
        }
        async fn create_block(&self, _id: Id, _capacity: u64) -> RpcResult<()> {
            Ok(())
        }
        async fn describe_block(
            &self,
            _id: Id,
        ) -> RpcResult<eventflow_core::rpc::BlockDescription> {
            Err(RpcError::new(
                eventflow_core::ErrorKind::NotFound,
                "unused",
            ))
        }
        async fn delete_block(&self, _id: Id) -> RpcResult<()> {
            Ok(())
        }
    }

    fn volume_md(id: u64) -> VolumeMetadata {
        VolumeMetadata {
            id: Id(id),
            capacity: 1 << 30,
            used: 0,
            instance_address: format!("127.0.0.1:{}", 11810 + id),
        }
    }

    #[tokio::test]
    async fn test_register_and_liveness() {
        let kv: Arc<dyn KvClient> = Arc::new(MemoryKvStore::new());
        let mgr = VolumeManager::new(kv, Duration::from_millis(100));

        mgr.register(volume_md(1), Arc::new(NullVolume)).await.unwrap();
        assert_eq!(mgr.live_volumes().len(), 1);

        tokio::time::sleep(Duration::from_millis(130)).await;
        assert!(mgr.live_volumes().is_empty(), "volume should go dead");

        // A heartbeat revives it.
        mgr.heartbeat(Id(1), "127.0.0.1:11811").await.unwrap();
        assert_eq!(mgr.live_volumes().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_registers_unknown_volume() {
        let kv: Arc<dyn KvClient> = Arc::new(MemoryKvStore::new());
        let mgr = VolumeManager::new(Arc::clone(&kv), Duration::from_secs(10));

        let instance = mgr.heartbeat(Id(5), "10.0.0.5:11811").await.unwrap();
        assert_eq!(instance.address(), "10.0.0.5:11811");
        // No client yet: not eligible for placement.
        assert!(mgr.live_volumes().is_empty());
        assert!(mgr.get(Id(5)).is_some());
    }

    #[tokio::test]
    async fn test_heartbeat_refreshes_address_and_persists() {
        let kv = Arc::new(MemoryKvStore::new());
        let mgr = VolumeManager::new(
            Arc::clone(&kv) as Arc<dyn KvClient>,
            Duration::from_secs(10),
        );
        mgr.register(volume_md(2), Arc::new(NullVolume)).await.unwrap();

        mgr.heartbeat(Id(2), "10.9.9.9:2000").await.unwrap();
        let raw = kv.get("/vanus/resource/volume/2").await.unwrap().unwrap();
        let md: VolumeMetadata = serde_json::from_slice(&raw).unwrap();
        assert_eq!(md.instance_address, "10.9.9.9:2000");
    }

    #[tokio::test]
    async fn test_recover_restores_metadata() {
        let kv = Arc::new(MemoryKvStore::new());
        {
            let mgr = VolumeManager::new(
                Arc::clone(&kv) as Arc<dyn KvClient>,
                Duration::from_secs(10),
            );
            mgr.register(volume_md(1), Arc::new(NullVolume)).await.unwrap();
            mgr.register(volume_md(2), Arc::new(NullVolume)).await.unwrap();
        }

        let mgr = VolumeManager::new(
            Arc::clone(&kv) as Arc<dyn KvClient>,
            Duration::from_secs(10),
        );
        mgr.recover().await.unwrap();
        assert_eq!(mgr.len(), 2);
        // Recovered volumes have no client or heartbeat yet.
        assert!(mgr.live_volumes().is_empty());
    }

    #[tokio::test]
    async fn test_live_volumes_sorted_by_id() {
        let kv: Arc<dyn KvClient> = Arc::new(MemoryKvStore::new());
        let mgr = VolumeManager::new(kv, Duration::from_secs(10));
        for id in [3u64, 1, 2] {
            mgr.register(volume_md(id), Arc::new(NullVolume)).await.unwrap();
        }
        let ids: Vec<u64> = mgr.live_volumes().iter().map(|v| v.id().as_u64()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }
}
