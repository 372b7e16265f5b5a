//! Round-robin block placement.
//!
//! `pick(n)` reserves one block on each of `n` distinct live volumes,
//! rotating a cursor so placement spreads evenly; `pick_by_volumes`
//! pins placement to given volumes, which keeps all segments of one
//! eventlog co-located with their predecessors' replicas.
//!
//! Every picked block is created on its volume and persisted to the KV
//! store under `block/<volume>/<id>` before it is returned, so a
//! controller crash mid-creation leaves only discoverable orphans. The
//! round-robin cursor itself is persisted and reloaded on start.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use eventflow_core::{Id, IdGenerator};
use eventflow_kv::KvClient;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::metadata::{self, BlockMetadata};
use crate::volume::{VolumeInstance, VolumeManager};

pub struct VolumeAllocator {
    kv: Arc<dyn KvClient>,
    volumes: Arc<VolumeManager>,
    id_gen: Arc<IdGenerator>,
    default_block_size: u64,
    cursor: AtomicU64,
}

impl VolumeAllocator {
    pub fn new(
        kv: Arc<dyn KvClient>,
        volumes: Arc<VolumeManager>,
        id_gen: Arc<IdGenerator>,
        default_block_size: u64,
    ) -> Self {
        Self {
            kv,
            volumes,
            id_gen,
            default_block_size,
            cursor: AtomicU64::new(0),
        }
    }

    /// Loads the persisted round-robin cursor.
    pub async fn recover(&self) -> Result<()> {
        if let Some(raw) = self.kv.get(metadata::ALLOCATOR_CURSOR_KEY).await? {
            let cursor: u64 = serde_json::from_slice(&raw)?;
            self.cursor.store(cursor, Ordering::Release);
            debug!(cursor, "allocator cursor recovered");
        }
        Ok(())
    }

    /// Reserves `n` blocks of the default capacity on `n` distinct live
    /// volumes chosen round-robin.
    pub async fn pick(&self, n: usize) -> Result<Vec<BlockMetadata>> {
        let live = self.volumes.live_volumes();
        if live.len() < n {
            return Err(Error::NoLiveVolumes {
                need: n,
                have: live.len(),
            });
        }

        let start = self.cursor.fetch_add(n as u64, Ordering::AcqRel);
        self.persist_cursor().await?;

        let mut blocks = Vec::with_capacity(n);
        for i in 0..n {
            let volume = &live[(start as usize + i) % live.len()];
            blocks.push(self.create_block_on(volume).await?);
        }
        info!(
            count = blocks.len(),
            volumes = ?blocks.iter().map(|b| b.volume_id.as_u64()).collect::<Vec<_>>(),
            "blocks allocated"
        );
        Ok(blocks)
    }

    /// Reserves one block on each of the given volumes, preserving the
    /// caller's order. Used for volume-affine segment creation.
    pub async fn pick_by_volumes(&self, volume_ids: &[Id]) -> Result<Vec<BlockMetadata>> {
        let mut blocks = Vec::with_capacity(volume_ids.len());
        for id in volume_ids {
            let volume = self
                .volumes
                .get(*id)
                .ok_or(Error::VolumeNotFound(*id))?;
            blocks.push(self.create_block_on(&volume).await?);
        }
        Ok(blocks)
    }

    async fn create_block_on(&self, volume: &Arc<VolumeInstance>) -> Result<BlockMetadata> {
        let block_id = self.id_gen.next();
        let client = volume.client()?;
        client.create_block(block_id, self.default_block_size).await?;

        let block = BlockMetadata {
            id: block_id,
            capacity: self.default_block_size,
            size: 0,
            volume_id: volume.id(),
            segment_id: Id::EMPTY,
            eventlog_id: Id::EMPTY,
        };
        self.kv
            .set(
                &metadata::block_key(block.volume_id, block.id),
                serde_json::to_vec(&block)?,
            )
            .await?;
        volume.add_used(self.default_block_size);
        Ok(block)
    }

    async fn persist_cursor(&self) -> Result<()> {
        let cursor = self.cursor.load(Ordering::Acquire);
        self.kv
            .set(metadata::ALLOCATOR_CURSOR_KEY, serde_json::to_vec(&cursor)?)
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metadata::VolumeMetadata;
    use async_trait::async_trait;
    use bytes::Bytes;
    use eventflow_core::rpc::{ReadResult, RpcError, RpcResult};
    use eventflow_core::VolumeClient;
    use eventflow_kv::MemoryKvStore;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingVolume {
        created: Mutex<Vec<(Id, u64)>>,
    }

    #[async_trait]
    impl VolumeClient for RecordingVolume {
        async fn activate_segment(
            &self,
            _e: Id,
            _g: Id,
            _l: Id,
            _r: HashMap<Id, String>,
        ) -> RpcResult<()> {
            Ok(())
        }
        async fn append_to_block(&self, _id: Id, _p: Vec<Bytes>) -> RpcResult<Vec<u32>> {
            Err(RpcError::new(eventflow_core::ErrorKind::Internal, "unused"))
        }
        async fn read_from_block(
            &self,
            _id: Id,
            _o: u32,
            _c: usize,
            _t: Duration,
        ) -> RpcResult<ReadResult> {
            Err(RpcError::new(eventflow_core::ErrorKind::Internal, "unused"))
        }
        async fn lookup_offset_in_block(&self, _id: Id, _t: i64) -> RpcResult<i64> {
            Ok(-1)
        }
        async fn create_block(&self, id: Id, capacity: u64) -> RpcResult<()> {
            self.created.lock().unwrap().push((id, capacity));
            Ok(())
        }
        async fn describe_block(
            &self,
            _id: Id,
        ) -> RpcResult<eventflow_core::rpc::BlockDescription> {
            Err(RpcError::new(eventflow_core::ErrorKind::NotFound, "unused"))
        }
        async fn delete_block(&self, _id: Id) -> RpcResult<()> {
            Ok(())
        }
    }

    async fn setup(volume_count: u64) -> (Arc<MemoryKvStore>, Arc<VolumeManager>, VolumeAllocator) {
        let kv = Arc::new(MemoryKvStore::new());
        let volumes = Arc::new(VolumeManager::new(
            Arc::clone(&kv) as Arc<dyn KvClient>,
            Duration::from_secs(10),
        ));
        for id in 1..=volume_count {
            volumes
                .register(
                    VolumeMetadata {
                        id: Id(id),
                        capacity: 1 << 30,
                        used: 0,
                        instance_address: format!("127.0.0.1:{}", 11810 + id),
                    },
                    Arc::new(RecordingVolume::default()),
                )
                .await
                .unwrap();
        }
        let allocator = VolumeAllocator::new(
            Arc::clone(&kv) as Arc<dyn KvClient>,
            Arc::clone(&volumes),
            Arc::new(IdGenerator::new()),
            4096,
        );
        (kv, volumes, allocator)
    }

    #[tokio::test]
    async fn test_pick_uses_distinct_volumes() {
        let (_kv, _volumes, allocator) = setup(3).await;
        let blocks = allocator.pick(3).await.unwrap();
        let mut vols: Vec<u64> = blocks.iter().map(|b| b.volume_id.as_u64()).collect();
        vols.sort_unstable();
        assert_eq!(vols, vec![1, 2, 3]);
        assert!(blocks.iter().all(|b| b.capacity == 4096));
    }

    #[tokio::test]
    async fn test_pick_fails_without_enough_live_volumes() {
        let (_kv, _volumes, allocator) = setup(2).await;
        let err = allocator.pick(3).await.unwrap_err();
        assert!(matches!(err, Error::NoLiveVolumes { need: 3, have: 2 }));
    }

    #[tokio::test]
    async fn test_pick_rotates_round_robin() {
        let (_kv, _volumes, allocator) = setup(3).await;
        let first = allocator.pick(1).await.unwrap();
        let second = allocator.pick(1).await.unwrap();
        let third = allocator.pick(1).await.unwrap();
        let vols: Vec<u64> = [&first, &second, &third]
            .iter()
            .map(|b| b[0].volume_id.as_u64())
            .collect();
        assert_eq!(vols, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_pick_persists_block_metadata() {
        let (kv, _volumes, allocator) = setup(1).await;
        let blocks = allocator.pick(1).await.unwrap();
        let key = metadata::block_key(blocks[0].volume_id, blocks[0].id);
        let raw = kv.get(&key).await.unwrap().expect("block persisted");
        let md: BlockMetadata = serde_json::from_slice(&raw).unwrap();
        assert_eq!(md.id, blocks[0].id);
        assert_eq!(md.segment_id, Id::EMPTY);
    }

    #[tokio::test]
    async fn test_pick_by_volumes_preserves_order() {
        let (_kv, _volumes, allocator) = setup(3).await;
        let blocks = allocator
            .pick_by_volumes(&[Id(3), Id(1)])
            .await
            .unwrap();
        assert_eq!(blocks[0].volume_id, Id(3));
        assert_eq!(blocks[1].volume_id, Id(1));
    }

    #[tokio::test]
    async fn test_pick_by_volumes_unknown_volume() {
        let (_kv, _volumes, allocator) = setup(1).await;
        let err = allocator.pick_by_volumes(&[Id(99)]).await.unwrap_err();
        assert!(matches!(err, Error::VolumeNotFound(Id(99))));
    }

    #[tokio::test]
    async fn test_cursor_survives_restart() {
        let (kv, volumes, allocator) = setup(3).await;
        allocator.pick(2).await.unwrap();

        let restarted = VolumeAllocator::new(
            Arc::clone(&kv) as Arc<dyn KvClient>,
            Arc::clone(&volumes),
            Arc::new(IdGenerator::new()),
            4096,
        );
        restarted.recover().await.unwrap();
        // Cursor continues where the first allocator left off.
        let blocks = restarted.pick(1).await.unwrap();
        assert_eq!(blocks[0].volume_id, Id(3));
    }
}
