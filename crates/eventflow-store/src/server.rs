//! The volume server: per-node registry of blocks.
//!
//! A [`VolumeServer`] exclusively owns the block files under its data
//! directory. The controller drives lifecycle through the volume RPC
//! surface (`create_block` from the allocator, `activate_segment` at
//! segment creation, `delete_block` from GC); the gateway moves entries
//! with `append_to_block` / `read_from_block`.
//!
//! A block accepts appends only after it was leader-activated here;
//! until then `append_to_block` fails `NotLeader` and the caller
//! refreshes its routing.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use eventflow_core::rpc::{BlockDescription, ReadResult, RpcResult};
use eventflow_core::{Id, SegmentHealth, VolumeClient};
use tracing::{info, warn};

use crate::appender::Appender;
use crate::block::{block_path, recover_dir, Block, SeekFlag};
use crate::config::StoreConfig;
use crate::error::{Error, Result};

struct ActiveBlock {
    block: Arc<Block>,
    /// Present only when this volume is the block's leader.
    appender: Option<Arc<Appender>>,
    eventlog_id: Id,
    replica_group_id: Id,
}

pub struct VolumeServer {
    volume_id: Id,
    address: String,
    dir: PathBuf,
    capacity: u64,
    blocks: DashMap<u64, ActiveBlock>,
}

impl VolumeServer {
    /// Recovers every block under the configured directory and builds
    /// the server. Blocks come back readable; leadership is
    /// re-established by the controller's next activation.
    pub async fn recover(config: &StoreConfig) -> Result<Self> {
        let recovered = recover_dir(&config.volume.dir).await?;
        let blocks = DashMap::new();
        for (id, block) in recovered {
            blocks.insert(
                id.as_u64(),
                ActiveBlock {
                    block,
                    appender: None,
                    eventlog_id: Id::EMPTY,
                    replica_group_id: Id::EMPTY,
                },
            );
        }
        info!(
            volume_id = %config.volume.id,
            blocks = blocks.len(),
            dir = %config.volume.dir.display(),
            "volume server recovered"
        );
        Ok(Self {
            volume_id: config.volume.id,
            address: config.address(),
            dir: config.volume.dir.clone(),
            capacity: config.volume.capacity,
            blocks,
        })
    }

    pub fn volume_id(&self) -> Id {
        self.volume_id
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Bytes reserved by block files on this volume.
    pub fn used(&self) -> u64 {
        self.blocks.iter().map(|e| e.block.capacity()).sum()
    }

    pub fn volume_capacity(&self) -> u64 {
        self.capacity
    }

    fn block(&self, id: Id) -> Result<Arc<Block>> {
        self.blocks
            .get(&id.as_u64())
            .map(|e| Arc::clone(&e.block))
            .ok_or(Error::BlockNotFound(id))
    }

    fn appender(&self, id: Id) -> Result<Arc<Appender>> {
        let entry = self
            .blocks
            .get(&id.as_u64())
            .ok_or(Error::BlockNotFound(id))?;
        entry
            .appender
            .as_ref()
            .map(Arc::clone)
            .ok_or(Error::NotLeader(id))
    }

    /// Health snapshot of every block, for the heartbeat.
    pub fn health(&self) -> Vec<SegmentHealth> {
        self.blocks.iter().map(|e| e.block.health_info()).collect()
    }

    /// Syncs every block. Called on shutdown.
    pub async fn close(&self) -> Result<()> {
        for entry in self.blocks.iter() {
            entry.block.close().await?;
        }
        Ok(())
    }
}

#[async_trait]
impl VolumeClient for VolumeServer {
    async fn create_block(&self, block_id: Id, capacity: u64) -> RpcResult<()> {
        if self.blocks.contains_key(&block_id.as_u64()) {
            return Ok(());
        }
        let path = block_path(&self.dir, block_id);
        let block = Block::create(block_id, &path, capacity).await?;
        self.blocks.insert(
            block_id.as_u64(),
            ActiveBlock {
                block: Arc::new(block),
                appender: None,
                eventlog_id: Id::EMPTY,
                replica_group_id: Id::EMPTY,
            },
        );
        Ok(())
    }

    async fn activate_segment(
        &self,
        eventlog_id: Id,
        replica_group_id: Id,
        leader_block: Id,
        replicas: HashMap<Id, String>,
    ) -> RpcResult<()> {
        let local_id = replicas
            .iter()
            .find(|(_, endpoint)| endpoint.as_str() == self.address)
            .map(|(id, _)| *id)
            .ok_or_else(|| {
                Error::Internal(format!(
                    "no replica of group {replica_group_id} lives on {}",
                    self.address
                ))
            })?;

        let mut entry = self
            .blocks
            .get_mut(&local_id.as_u64())
            .ok_or(Error::BlockNotFound(local_id))?;
        entry.eventlog_id = eventlog_id;
        entry.replica_group_id = replica_group_id;
        if leader_block == local_id && entry.appender.is_none() {
            entry.appender = Some(Arc::new(Appender::new(Arc::clone(&entry.block))));
            info!(
                block_id = %local_id,
                eventlog_id = %eventlog_id,
                replica_group_id = %replica_group_id,
                "block activated as leader"
            );
        }
        Ok(())
    }

    async fn describe_block(&self, block_id: Id) -> RpcResult<BlockDescription> {
        let entry = self
            .blocks
            .get(&block_id.as_u64())
            .ok_or(Error::BlockNotFound(block_id))?;
        Ok(BlockDescription {
            id: block_id,
            capacity: entry.block.capacity(),
            size: entry.block.data_size() as i64,
            event_number: entry.block.entry_count(),
            is_full: entry.block.is_full(),
            leader: entry.appender.is_some(),
            eventlog_id: entry.eventlog_id,
            replica_group_id: entry.replica_group_id,
        })
    }

    async fn append_to_block(&self, block_id: Id, payloads: Vec<Bytes>) -> RpcResult<Vec<u32>> {
        let appender = self.appender(block_id)?;
        let indices = appender.append_now(payloads).await?;
        Ok(indices)
    }

    async fn read_from_block(
        &self,
        block_id: Id,
        offset: u32,
        count: usize,
        polling_timeout: Duration,
    ) -> RpcResult<ReadResult> {
        let block = self.block(block_id)?;
        let entries = block.read(offset, count, polling_timeout).await?;
        let next_offset = offset + entries.len() as u32;
        Ok(ReadResult {
            entries,
            next_offset,
        })
    }

    async fn lookup_offset_in_block(&self, block_id: Id, time: i64) -> RpcResult<i64> {
        let block = self.block(block_id)?;
        Ok(block.seek(time, SeekFlag::OrNext))
    }

    async fn delete_block(&self, block_id: Id) -> RpcResult<()> {
        let Some((_, entry)) = self.blocks.remove(&block_id.as_u64()) else {
            // Deleting a block twice must stay idempotent for GC.
            return Ok(());
        };
        if let Err(error) = entry.block.close().await {
            warn!(block_id = %block_id, %error, "sync before delete failed");
        }
        let path = entry.block.path().to_path_buf();
        drop(entry);
        tokio::fs::remove_file(&path).await.map_err(Error::from)?;
        info!(block_id = %block_id, path = %path.display(), "block deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeInfo;
    use tempfile::TempDir;

    fn config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            controllers: vec!["127.0.0.1:2048".to_string()],
            ip: "127.0.0.1".to_string(),
            port: 11811,
            volume: VolumeInfo {
                id: Id(1),
                dir: dir.path().to_path_buf(),
                capacity: 1 << 30,
            },
            heartbeat_interval_ms: 1000,
        }
    }

    async fn activated_server(dir: &TempDir) -> VolumeServer {
        let server = VolumeServer::recover(&config(dir)).await.unwrap();
        server.create_block(Id(10), 65536).await.unwrap();
        let replicas = HashMap::from([(Id(10), server.address().to_string())]);
        server
            .activate_segment(Id(7), Id(8), Id(10), replicas)
            .await
            .unwrap();
        server
    }

    #[tokio::test]
    async fn test_append_requires_leadership() {
        let dir = TempDir::new().unwrap();
        let server = VolumeServer::recover(&config(&dir)).await.unwrap();
        server.create_block(Id(10), 65536).await.unwrap();

        let err = server
            .append_to_block(Id(10), vec![Bytes::from_static(b"x")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, eventflow_core::ErrorKind::NotLeader);
    }

    #[tokio::test]
    async fn test_append_and_read_roundtrip() {
        let dir = TempDir::new().unwrap();
        let server = activated_server(&dir).await;

        let offsets = server
            .append_to_block(
                Id(10),
                vec![Bytes::from_static(b"one"), Bytes::from_static(b"two")],
            )
            .await
            .unwrap();
        assert_eq!(offsets, vec![0, 1]);

        let result = server
            .read_from_block(Id(10), 0, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 2);
        assert_eq!(result.next_offset, 2);
        assert_eq!(result.entries[0].payload, Bytes::from_static(b"one"));
        assert_eq!(result.entries[1].payload, Bytes::from_static(b"two"));
    }

    #[tokio::test]
    async fn test_unknown_block_is_not_found() {
        let dir = TempDir::new().unwrap();
        let server = VolumeServer::recover(&config(&dir)).await.unwrap();
        let err = server
            .read_from_block(Id(404), 0, 1, Duration::ZERO)
            .await
            .unwrap_err();
        assert_eq!(err.kind, eventflow_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_delete_block_removes_file() {
        let dir = TempDir::new().unwrap();
        let server = activated_server(&dir).await;
        let path = block_path(dir.path(), Id(10));
        assert!(path.exists());

        server.delete_block(Id(10)).await.unwrap();
        assert!(!path.exists());
        assert_eq!(server.block_count(), 0);

        // Idempotent.
        server.delete_block(Id(10)).await.unwrap();
    }

    #[tokio::test]
    async fn test_describe_block_reflects_bindings() {
        let dir = TempDir::new().unwrap();
        let server = activated_server(&dir).await;
        server.create_block(Id(11), 65536).await.unwrap();

        server
            .append_to_block(Id(10), vec![Bytes::from_static(b"abc")])
            .await
            .unwrap();

        // The activated leader block.
        let desc = server.describe_block(Id(10)).await.unwrap();
        assert_eq!(desc.id, Id(10));
        assert_eq!(desc.capacity, 65536);
        assert_eq!(desc.size, 7);
        assert_eq!(desc.event_number, 1);
        assert!(!desc.is_full);
        assert!(desc.leader);
        assert_eq!(desc.eventlog_id, Id(7));
        assert_eq!(desc.replica_group_id, Id(8));

        // A created but never activated block has no bindings.
        let desc = server.describe_block(Id(11)).await.unwrap();
        assert!(!desc.leader);
        assert_eq!(desc.eventlog_id, Id::EMPTY);
        assert_eq!(desc.replica_group_id, Id::EMPTY);

        // Unknown blocks are a NotFound error.
        let err = server.describe_block(Id(404)).await.unwrap_err();
        assert_eq!(err.kind, eventflow_core::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_health_reports_every_block() {
        let dir = TempDir::new().unwrap();
        let server = activated_server(&dir).await;
        server.create_block(Id(11), 65536).await.unwrap();

        server
            .append_to_block(Id(10), vec![Bytes::from_static(b"abc")])
            .await
            .unwrap();

        let mut healths = server.health();
        healths.sort_by_key(|h| h.id);
        assert_eq!(healths.len(), 2);
        assert_eq!(healths[0].id, Id(10));
        assert_eq!(healths[0].event_number, 1);
        assert_eq!(healths[0].size, 7);
        assert!(!healths[0].is_full);
        assert_eq!(healths[1].event_number, 0);
    }

    #[tokio::test]
    async fn test_recover_restores_blocks() {
        let dir = TempDir::new().unwrap();
        {
            let server = activated_server(&dir).await;
            server
                .append_to_block(Id(10), vec![Bytes::from_static(b"persist")])
                .await
                .unwrap();
            server.close().await.unwrap();
        }

        let server = VolumeServer::recover(&config(&dir)).await.unwrap();
        assert_eq!(server.block_count(), 1);
        let result = server
            .read_from_block(Id(10), 0, 10, Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(result.entries.len(), 1);
        assert_eq!(result.entries[0].payload, Bytes::from_static(b"persist"));

        // Leadership does not survive restart.
        let err = server
            .append_to_block(Id(10), vec![Bytes::from_static(b"x")])
            .await
            .unwrap_err();
        assert_eq!(err.kind, eventflow_core::ErrorKind::NotLeader);
    }
}
