//! End-to-end: a real volume server (block files on disk) wired to the
//! controller in-process. Covers the full write path — acquire an
//! eventlog, append through the segment leader's block, heartbeat the
//! health back, freeze on exhaustion, and scale up.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use eventflow_controller::metadata::VolumeMetadata;
use eventflow_controller::{Controller, ControllerConfig, SegmentState};
use eventflow_core::{ControllerClient, Id, VolumeClient};
use eventflow_kv::{KvClient, MemoryKvStore};
use eventflow_store::config::VolumeInfo;
use eventflow_store::{StoreConfig, VolumeServer};
use tempfile::TempDir;

const VOLUME_ADDR: &str = "127.0.0.1:11811";

async fn store_server(dir: &TempDir) -> Arc<VolumeServer> {
    let config = StoreConfig {
        controllers: vec!["127.0.0.1:2048".to_string()],
        ip: "127.0.0.1".to_string(),
        port: 11811,
        volume: VolumeInfo {
            id: Id(1),
            dir: dir.path().to_path_buf(),
            capacity: 1 << 30,
        },
        heartbeat_interval_ms: 1000,
    };
    Arc::new(VolumeServer::recover(&config).await.unwrap())
}

async fn wired_controller(server: &Arc<VolumeServer>, block_size: u64) -> Arc<Controller> {
    let config = ControllerConfig {
        replica_count: 1,
        default_block_size: block_size,
        ..ControllerConfig::default()
    };
    let kv = Arc::new(MemoryKvStore::new());
    let controller = Controller::new(kv as Arc<dyn KvClient>, config);
    controller
        .volumes()
        .register(
            VolumeMetadata {
                id: Id(1),
                capacity: 1 << 30,
                used: 0,
                instance_address: VOLUME_ADDR.to_string(),
            },
            Arc::clone(server) as Arc<dyn VolumeClient>,
        )
        .await
        .unwrap();
    controller
}

#[tokio::test]
async fn test_write_path_through_real_blocks() {
    let dir = TempDir::new().unwrap();
    let server = store_server(&dir).await;
    let controller = wired_controller(&server, 1 << 16).await;

    let md = controller.manager().acquire(Id(5), "orders").await.unwrap();

    // Both seed segments got real block files and a leader appender.
    assert_eq!(server.block_count(), 2);
    let appendable = controller
        .manager()
        .appendable_segments(md.id, 2)
        .await
        .unwrap();
    assert_eq!(appendable.len(), 2);

    let leader_block = appendable[0].replicas.leader_block_id;
    let offsets = server
        .append_to_block(
            leader_block,
            vec![Bytes::from_static(b"order-1"), Bytes::from_static(b"order-2")],
        )
        .await
        .unwrap();
    assert_eq!(offsets, vec![0, 1]);

    let read = server
        .read_from_block(leader_block, 0, 10, Duration::ZERO)
        .await
        .unwrap();
    assert_eq!(read.entries.len(), 2);
    assert_eq!(read.entries[0].payload, Bytes::from_static(b"order-1"));
    assert_eq!(read.next_offset, 2);

    // Health flows back into segment metadata via the heartbeat.
    controller
        .heartbeat(Id(1), VOLUME_ADDR.to_string(), server.health())
        .await
        .unwrap();
    let segments = controller.manager().list_segments(md.id).await.unwrap();
    let written = segments.iter().find(|s| s.replicas.leader_block_id == leader_block).unwrap();
    assert_eq!(written.number, 2);
    assert_eq!(written.size, 7 + 7 + 8);
    assert!(written.last_event_time > 0);
}

#[tokio::test]
async fn test_exhausted_block_freezes_segment_and_scales() {
    let dir = TempDir::new().unwrap();
    let server = store_server(&dir).await;
    // Tiny blocks: a few hundred bytes of data seal them.
    let controller = wired_controller(&server, 4096 + 256).await;

    let md = controller.manager().acquire(Id(5), "orders").await.unwrap();
    let appendable = controller
        .manager()
        .appendable_segments(md.id, 1)
        .await
        .unwrap();
    let leader_block = appendable[0].replicas.leader_block_id;

    // Overflow the block; the appender seals it.
    let err = server
        .append_to_block(leader_block, vec![Bytes::from(vec![b'x'; 400])])
        .await
        .unwrap_err();
    assert_eq!(err.kind, eventflow_core::ErrorKind::NotEnoughSpace);

    controller
        .heartbeat(Id(1), VOLUME_ADDR.to_string(), server.health())
        .await
        .unwrap();

    let segments = controller.manager().list_segments(md.id).await.unwrap();
    let frozen = segments
        .iter()
        .find(|s| s.replicas.leader_block_id == leader_block)
        .unwrap();
    assert_eq!(frozen.state, SegmentState::Frozen);

    // The scale loop replaces it.
    controller.manager().scale_once().await;
    let el = controller.manager().get_eventlog(md.id).unwrap();
    assert!(el.appendable_count().await >= 2);
    assert_eq!(server.block_count(), 3, "a third block was created");
}

#[tokio::test]
async fn test_gc_deletes_real_block_files() {
    let dir = TempDir::new().unwrap();
    let server = store_server(&dir).await;
    let mut config = ControllerConfig {
        replica_count: 1,
        default_block_size: 1 << 16,
        ..ControllerConfig::default()
    };
    config.segment_expired_time_ms = 50;
    let kv = Arc::new(MemoryKvStore::new());
    let controller = Controller::new(kv as Arc<dyn KvClient>, config);
    controller
        .volumes()
        .register(
            VolumeMetadata {
                id: Id(1),
                capacity: 1 << 30,
                used: 0,
                instance_address: VOLUME_ADDR.to_string(),
            },
            Arc::clone(&server) as Arc<dyn VolumeClient>,
        )
        .await
        .unwrap();

    let md = controller.manager().acquire(Id(5), "orders").await.unwrap();
    assert_eq!(server.block_count(), 2);

    controller.manager().delete_eventlog(md.id).await;
    controller.manager().clean_once().await;

    assert_eq!(server.block_count(), 0, "block files deleted on the volume");
    assert_eq!(controller.manager().gc_backlog(), 0);
}

#[tokio::test]
async fn test_time_lookup_through_volume_surface() {
    let dir = TempDir::new().unwrap();
    let server = store_server(&dir).await;
    let controller = wired_controller(&server, 1 << 16).await;

    let md = controller.manager().acquire(Id(5), "orders").await.unwrap();
    let appendable = controller
        .manager()
        .appendable_segments(md.id, 1)
        .await
        .unwrap();
    let leader_block = appendable[0].replicas.leader_block_id;

    let before = eventflow_core::time::now_ms();
    server
        .append_to_block(leader_block, vec![Bytes::from_static(b"e")])
        .await
        .unwrap();

    // Everything at-or-after `before` starts at index 0; a future key
    // finds nothing.
    assert_eq!(
        server
            .lookup_offset_in_block(leader_block, before)
            .await
            .unwrap(),
        0
    );
    assert_eq!(
        server
            .lookup_offset_in_block(leader_block, eventflow_core::time::now_ms() + 60_000)
            .await
            .unwrap(),
        -1
    );
}
