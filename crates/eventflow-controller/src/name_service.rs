//! Client-facing discovery.
//!
//! Gateways resolve an eventbus to its eventlogs, an eventlog to its
//! segments, and a segment to the endpoints of its replicas. Lookups
//! read through the controller's in-memory state with a short TTL
//! cache to absorb client bursts — discovery answers may be a second
//! stale, which routing already tolerates (a write to a just-frozen
//! segment fails over to the next one).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use eventflow_core::Id;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::manager::EventlogManager;
use crate::segment::Segment;
use crate::volume::VolumeManager;

/// What a client needs to know about an eventlog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventlogDescriptor {
    pub id: Id,
    pub eventbus_id: Id,
    pub writable: bool,
    pub readable: bool,
}

pub struct NameService {
    manager: Arc<EventlogManager>,
    volumes: Arc<VolumeManager>,
    cache_ttl: Duration,
    cache: Mutex<HashMap<String, (Instant, Vec<EventlogDescriptor>)>>,
}

impl NameService {
    pub fn new(
        manager: Arc<EventlogManager>,
        volumes: Arc<VolumeManager>,
        cache_ttl: Duration,
    ) -> Self {
        Self {
            manager,
            volumes,
            cache_ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    async fn lookup_logs(&self, eventbus: &str) -> Vec<EventlogDescriptor> {
        let mut cache = self.cache.lock().await;
        if let Some((at, cached)) = cache.get(eventbus) {
            if at.elapsed() < self.cache_ttl {
                return cached.clone();
            }
        }
        let descriptors: Vec<EventlogDescriptor> = self
            .manager
            .eventlogs_by_name(eventbus)
            .into_iter()
            .map(|el| {
                let md = el.metadata();
                EventlogDescriptor {
                    id: md.id,
                    eventbus_id: md.eventbus_id,
                    writable: true,
                    readable: true,
                }
            })
            .collect();
        cache.insert(eventbus.to_string(), (Instant::now(), descriptors.clone()));
        descriptors
    }

    pub async fn lookup_writable_logs(&self, eventbus: &str) -> Vec<EventlogDescriptor> {
        self.lookup_logs(eventbus)
            .await
            .into_iter()
            .filter(|d| d.writable)
            .collect()
    }

    pub async fn lookup_readable_logs(&self, eventbus: &str) -> Vec<EventlogDescriptor> {
        self.lookup_logs(eventbus)
            .await
            .into_iter()
            .filter(|d| d.readable)
            .collect()
    }

    /// The segments of an eventlog, in chain order.
    pub async fn segments_for(&self, eventlog_id: Id) -> Result<Vec<Segment>> {
        self.manager.list_segments(eventlog_id).await
    }

    /// Resolves a segment's replicas to `block_id → volume address`.
    pub async fn endpoints_for(&self, segment_id: Id) -> Result<HashMap<Id, String>> {
        let seg = self
            .manager
            .get_segment(segment_id)
            .ok_or(Error::SegmentNotFound(segment_id))?;
        let peers = seg.read().unwrap().replicas.peers.clone();
        let mut endpoints = HashMap::new();
        for block in peers.values() {
            let volume = self
                .volumes
                .get(block.volume_id)
                .ok_or(Error::VolumeNotFound(block.volume_id))?;
            endpoints.insert(block.id, volume.address());
        }
        Ok(endpoints)
    }
}
