//! The eventlog manager.
//!
//! Owns every eventlog, the global `segment_id → segment` and
//! `block_id → block` maps, and the GC set. Three supervised loops keep
//! the system in steady state:
//!
//! - **scale-up**: every eventlog keeps `default_appendable_segments`
//!   appendable segments ahead of its write cursor;
//! - **GC**: segments whose creation failed, or that expired, have
//!   their blocks deleted on every peer volume and their metadata
//!   removed from the KV store;
//! - **expiration**: frozen heads older than the retention TTL are
//!   unlinked and handed to GC.
//!
//! Separating freeze (heartbeat-driven, hot path) from GC (periodic,
//! idempotent) keeps KV writes off ingest; the GC set catches every
//! orphan, so a failure at any step of segment creation is eventually
//! reclaimed.
//!
//! ## Segment creation
//!
//! Serialized by `create_mutex` across all eventlogs:
//!
//! 1. allocate one block per replica (volume-affine when the eventlog
//!    already has a working segment);
//! 2. persist the segment as `Created`;
//! 3. elect the leader — the peer sharing the previous leader's volume,
//!    or the peer whose volume leads the fewest working segments
//!    (ties by ascending volume ID);
//! 4. activate the replica group on the leader's volume;
//! 5. rebind the block records, persist the segment as `Working`, and
//!    publish to the global maps last so readers never observe a
//!    half-created segment.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use eventflow_core::{time, Id, IdGenerator, SegmentHealth};
use eventflow_kv::KvClient;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::allocator::VolumeAllocator;
use crate::config::ControllerConfig;
use crate::error::{Error, Result};
use crate::eventlog::{persist_segment, Eventlog};
use crate::metadata::{self, BlockMetadata, EventlogMetadata};
use crate::segment::{ReplicaGroup, Segment, SegmentRef, SegmentState};
use crate::task::spawn_periodic;
use crate::volume::VolumeManager;

pub struct EventlogManager {
    kv: Arc<dyn KvClient>,
    volumes: Arc<VolumeManager>,
    allocator: VolumeAllocator,
    id_gen: Arc<IdGenerator>,
    config: ControllerConfig,

    eventlogs: DashMap<u64, Arc<Eventlog>>,
    segments: DashMap<u64, SegmentRef>,
    blocks: DashMap<u64, BlockMetadata>,
    /// Segments pending block deletion and metadata cleanup.
    gc_set: DashMap<u64, SegmentRef>,

    acquire_mutex: Mutex<()>,
    /// Serializes segment creation across eventlogs so allocator picks
    /// never race.
    create_mutex: Mutex<()>,
}

impl EventlogManager {
    pub fn new(
        kv: Arc<dyn KvClient>,
        volumes: Arc<VolumeManager>,
        config: ControllerConfig,
    ) -> Self {
        let id_gen = Arc::new(IdGenerator::new());
        let allocator = VolumeAllocator::new(
            Arc::clone(&kv),
            Arc::clone(&volumes),
            Arc::clone(&id_gen),
            config.default_block_size,
        );
        Self {
            kv,
            volumes,
            allocator,
            id_gen,
            config,
            eventlogs: DashMap::new(),
            segments: DashMap::new(),
            blocks: DashMap::new(),
            gc_set: DashMap::new(),
            acquire_mutex: Mutex::new(()),
            create_mutex: Mutex::new(()),
        }
    }

    /// Rebuilds every eventlog and the global maps from the KV store.
    pub async fn recover(&self) -> Result<()> {
        self.allocator.recover().await?;
        let pairs = self.kv.list(metadata::EVENTLOG_KEY_PREFIX).await?;
        for pair in pairs {
            let md: EventlogMetadata = serde_json::from_slice(&pair.value)?;
            let id = md.id;
            let el = Arc::new(Eventlog::load(md, Arc::clone(&self.kv)).await?);
            for seg in el.all_segments().await {
                let (seg_id, peers) = {
                    let s = seg.read().unwrap();
                    (s.id, s.replicas.peers.clone())
                };
                self.segments.insert(seg_id.as_u64(), Arc::clone(&seg));
                for (block_id, block) in peers {
                    self.blocks.insert(block_id, block);
                }
            }
            self.eventlogs.insert(id.as_u64(), el);
        }
        info!(
            eventlogs = self.eventlogs.len(),
            segments = self.segments.len(),
            "eventlog manager recovered"
        );
        Ok(())
    }

    /// Spawns the three background loops.
    pub fn start(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let scale = {
            let mgr = Arc::clone(self);
            spawn_periodic(
                "scale-up",
                self.config.scale_interval(),
                shutdown.clone(),
                move || {
                    let mgr = Arc::clone(&mgr);
                    async move { mgr.scale_once().await }
                },
            )
        };
        let clean = {
            let mgr = Arc::clone(self);
            spawn_periodic(
                "gc",
                self.config.clean_interval(),
                shutdown.clone(),
                move || {
                    let mgr = Arc::clone(&mgr);
                    async move { mgr.clean_once().await }
                },
            )
        };
        let expire = {
            let mgr = Arc::clone(self);
            spawn_periodic(
                "check-expired",
                self.config.check_expired_interval(),
                shutdown,
                move || {
                    let mgr = Arc::clone(&mgr);
                    async move { mgr.expire_once().await }
                },
            )
        };
        vec![scale, clean, expire]
    }

    // ----------------------------------------------------------------
    // Eventlog operations
    // ----------------------------------------------------------------

    /// Creates an eventlog for the eventbus and seeds it with
    /// `default_appendable_segments` working segments.
    pub async fn acquire(&self, eventbus_id: Id, eventbus_name: &str) -> Result<EventlogMetadata> {
        let _guard = self.acquire_mutex.lock().await;

        let md = EventlogMetadata {
            id: self.id_gen.next(),
            eventbus_id,
            eventbus_name: eventbus_name.to_string(),
        };
        self.kv
            .set(&metadata::eventlog_key(md.id), serde_json::to_vec(&md)?)
            .await?;

        let el = Arc::new(Eventlog::new(md.clone(), Arc::clone(&self.kv)));
        for _ in 0..self.config.default_appendable_segments {
            let seg = self.create_segment(&el).await?;
            if let Err(e) = el.append_segment(Arc::clone(&seg)).await {
                warn!(
                    eventlog_id = %md.id,
                    error = %e,
                    "failed to link seed segment; scheduling cleanup"
                );
                self.enqueue_gc(&seg, "create-failed");
                return Err(e);
            }
        }

        self.eventlogs.insert(md.id.as_u64(), el);
        info!(
            eventbus_id = %eventbus_id,
            eventlog_id = %md.id,
            "eventlog created"
        );
        Ok(md)
    }

    pub fn get_eventlog(&self, id: Id) -> Option<Arc<Eventlog>> {
        self.eventlogs.get(&id.as_u64()).map(|e| Arc::clone(&e))
    }

    /// Eventlogs belonging to an eventbus.
    pub fn eventlogs_of(&self, eventbus_id: Id) -> Vec<Arc<Eventlog>> {
        self.eventlogs
            .iter()
            .filter(|e| e.metadata().eventbus_id == eventbus_id)
            .map(|e| Arc::clone(&e))
            .collect()
    }

    /// Eventlogs belonging to the named eventbus.
    pub fn eventlogs_by_name(&self, eventbus_name: &str) -> Vec<Arc<Eventlog>> {
        self.eventlogs
            .iter()
            .filter(|e| e.metadata().eventbus_name == eventbus_name)
            .map(|e| Arc::clone(&e))
            .collect()
    }

    /// Unlinks every segment of the eventlog into the GC set and
    /// deletes the eventlog's metadata.
    pub async fn delete_eventlog(&self, id: Id) {
        let Some((_, el)) = self.eventlogs.remove(&id.as_u64()) else {
            return;
        };
        loop {
            match el.delete_head().await {
                Ok(Some(seg)) => self.enqueue_gc(&seg, "eventlog-deleted"),
                Ok(None) => break,
                Err(error) => {
                    // Hand the remainder to GC; membership records for
                    // them are covered by segment deletion.
                    warn!(eventlog_id = %id, %error, "delete_head failed; scheduling remaining segments");
                    for seg in el.all_segments().await {
                        self.enqueue_gc(&seg, "eventlog-deleted");
                    }
                    break;
                }
            }
        }
        if let Err(error) = self.kv.delete(&metadata::eventlog_key(id)).await {
            warn!(eventlog_id = %id, %error, "failed to delete eventlog metadata");
        }
        info!(eventlog_id = %id, "eventlog deleted");
    }

    /// The current appendable segment and its successors, up to `n`.
    /// When the eventlog has none, creates one synchronously.
    pub async fn appendable_segments(&self, eventlog_id: Id, n: usize) -> Result<Vec<Segment>> {
        let el = self
            .get_eventlog(eventlog_id)
            .ok_or(Error::EventlogNotFound(eventlog_id))?;

        let mut cur = el.current_appendable().await;
        if cur.is_none() {
            let seg = self.create_segment(&el).await?;
            if let Err(e) = el.append_segment(Arc::clone(&seg)).await {
                self.enqueue_gc(&seg, "create-failed");
                return Err(e);
            }
            cur = el.current_appendable().await;
        }
        let Some(cur) = cur else {
            return Err(Error::Internal(format!(
                "eventlog {eventlog_id} has no appendable segment after creating one"
            )));
        };

        let from = cur.read().unwrap().id;
        let segments = el
            .segments_from(from, true)
            .await
            .into_iter()
            .take(n)
            .map(|s| s.read().unwrap().clone())
            .collect();
        Ok(segments)
    }

    /// Copies of every segment of the eventlog, in chain order.
    pub async fn list_segments(&self, eventlog_id: Id) -> Result<Vec<Segment>> {
        let el = self
            .get_eventlog(eventlog_id)
            .ok_or(Error::EventlogNotFound(eventlog_id))?;
        Ok(el
            .all_segments()
            .await
            .into_iter()
            .map(|s| s.read().unwrap().clone())
            .collect())
    }

    pub fn get_block(&self, id: Id) -> Option<BlockMetadata> {
        self.blocks.get(&id.as_u64()).map(|b| b.clone())
    }

    pub fn get_segment(&self, id: Id) -> Option<SegmentRef> {
        self.segments.get(&id.as_u64()).map(|s| Arc::clone(&s))
    }

    // ----------------------------------------------------------------
    // Replication and heartbeat paths
    // ----------------------------------------------------------------

    /// Accepts a new replica term from the replication layer; stale
    /// terms are ignored.
    pub async fn update_segment_replicas(&self, leader_block_id: Id, term: u64) -> Result<()> {
        let block = self
            .get_block(leader_block_id)
            .ok_or(Error::BlockNotFound(leader_block_id))?;
        let seg = self
            .get_segment(block.segment_id)
            .ok_or(Error::SegmentNotFound(block.segment_id))?;
        {
            let s = seg.read().unwrap();
            if s.replicas.term >= term {
                debug!(
                    segment_id = %s.id,
                    term,
                    current = s.replicas.term,
                    "ignoring stale replica term"
                );
                return Ok(());
            }
        }
        let el = {
            let eventlog_id = seg.read().unwrap().eventlog_id;
            self.get_eventlog(eventlog_id)
                .ok_or(Error::EventlogNotFound(eventlog_id))?
        };
        {
            let mut s = seg.write().unwrap();
            s.replicas.leader_block_id = leader_block_id;
            s.replicas.term = term;
        }
        el.update_segment(&seg).await
    }

    /// Merges per-block health reports from a volume heartbeat into
    /// segment metadata, freezing segments whose leader reports full.
    ///
    /// A health report for a block that is bound to a segment the
    /// manager does not know is an inconsistency: it is logged at error
    /// level and returned as a hard error once the batch completes.
    pub async fn update_segments(&self, healths: Vec<SegmentHealth>) -> Result<()> {
        let mut first_err: Option<Error> = None;
        for health in healths {
            let Some(block) = self.get_block(health.id) else {
                // A freshly allocated block not yet bound to a segment.
                debug!(block_id = %health.id, "health report for unbound block");
                continue;
            };
            if block.segment_id.is_empty() {
                continue;
            }
            let Some(seg) = self.get_segment(block.segment_id) else {
                error!(
                    block_id = %health.id,
                    segment_id = %block.segment_id,
                    "health report references a segment missing from the global map"
                );
                first_err.get_or_insert(Error::SegmentNotFound(block.segment_id));
                continue;
            };
            let eventlog_id = seg.read().unwrap().eventlog_id;
            let Some(el) = self.get_eventlog(eventlog_id) else {
                error!(
                    segment_id = %block.segment_id,
                    eventlog_id = %eventlog_id,
                    "segment references an eventlog missing from the global map"
                );
                first_err.get_or_insert(Error::EventlogNotFound(eventlog_id));
                continue;
            };

            let changed = seg.write().unwrap().merge_health(&health);
            if changed {
                if let Err(error) = el.update_segment(&seg).await {
                    warn!(
                        segment_id = %block.segment_id,
                        %error,
                        "failed to persist segment update from heartbeat"
                    );
                    first_err.get_or_insert(error);
                }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // ----------------------------------------------------------------
    // Segment creation
    // ----------------------------------------------------------------

    pub(crate) async fn create_segment(&self, el: &Arc<Eventlog>) -> Result<SegmentRef> {
        let _guard = self.create_mutex.lock().await;

        let cur = el.current_appendable().await;
        let blocks = match &cur {
            None => self.allocator.pick(self.config.replica_count).await?,
            Some(cur_ref) => {
                // Keep the eventlog's segments on the volumes already
                // serving it.
                let volume_ids: Vec<Id> = {
                    let s = cur_ref.read().unwrap();
                    let mut ids: Vec<Id> =
                        s.replicas.peers.values().map(|b| b.volume_id).collect();
                    ids.sort();
                    ids
                };
                self.allocator.pick_by_volumes(&volume_ids).await?
            }
        };

        let seg_id = self.id_gen.next();
        let group_id = self.id_gen.next();
        let peers: HashMap<u64, BlockMetadata> = blocks
            .iter()
            .map(|b| (b.id.as_u64(), b.clone()))
            .collect();
        let mut segment = Segment::new(
            seg_id,
            blocks[0].capacity,
            ReplicaGroup {
                id: group_id,
                leader_block_id: Id::EMPTY,
                term: 0,
                peers,
            },
        );
        segment.eventlog_id = el.metadata().id;

        segment.replicas.leader_block_id = match &cur {
            Some(cur_ref) => {
                let leader_volume = {
                    cur_ref
                        .read()
                        .unwrap()
                        .leader_block()
                        .map(|b| b.volume_id)
                        .ok_or_else(|| {
                            Error::InvalidSegment(
                                "current appendable segment has no leader block".to_string(),
                            )
                        })?
                };
                segment
                    .replicas
                    .peers
                    .values()
                    .find(|b| b.volume_id == leader_volume)
                    .map(|b| b.id)
                    .ok_or_else(|| {
                        Error::InvalidSegment(format!(
                            "no replica on leader volume {leader_volume} for segment {seg_id}"
                        ))
                    })?
            }
            None => self.elect_leader(&segment)?,
        };

        let seg_ref: SegmentRef = Arc::new(std::sync::RwLock::new(segment));

        // Persist as Created; from here on, any failure hands the
        // segment (and with it the orphan blocks) to GC.
        if let Err(e) = persist_segment(&self.kv, &seg_ref).await {
            self.enqueue_gc(&seg_ref, "create-failed");
            return Err(e);
        }

        let activation = self.activate(el, &seg_ref).await;
        if let Err(e) = activation {
            self.enqueue_gc(&seg_ref, "create-failed");
            return Err(e);
        }

        // Bind the blocks to the segment, promote to Working, and
        // publish to the global maps last.
        {
            let mut s = seg_ref.write().unwrap();
            for block in s.replicas.peers.values_mut() {
                block.segment_id = seg_id;
                block.eventlog_id = el.metadata().id;
            }
            s.state = SegmentState::Working;
        }
        let peer_blocks: Vec<BlockMetadata> = {
            seg_ref
                .read()
                .unwrap()
                .replicas
                .peers
                .values()
                .cloned()
                .collect()
        };
        for block in &peer_blocks {
            let write = self
                .kv
                .set(
                    &metadata::block_key(block.volume_id, block.id),
                    serde_json::to_vec(block)?,
                )
                .await;
            if let Err(e) = write {
                self.enqueue_gc(&seg_ref, "create-failed");
                return Err(e.into());
            }
        }
        if let Err(e) = persist_segment(&self.kv, &seg_ref).await {
            self.enqueue_gc(&seg_ref, "create-failed");
            return Err(e);
        }

        for block in peer_blocks {
            self.blocks.insert(block.id.as_u64(), block);
        }
        self.segments.insert(seg_id.as_u64(), Arc::clone(&seg_ref));

        info!(
            segment_id = %seg_id,
            eventlog_id = %el.metadata().id,
            leader_block = %seg_ref.read().unwrap().replicas.leader_block_id,
            "segment created"
        );
        Ok(seg_ref)
    }

    async fn activate(&self, el: &Arc<Eventlog>, seg: &SegmentRef) -> Result<()> {
        let (group_id, leader_block_id, leader_volume_id, endpoints) = {
            let s = seg.read().unwrap();
            let leader = s.leader_block().ok_or_else(|| {
                Error::InvalidSegment(format!("segment {} has no leader block", s.id))
            })?;
            let mut endpoints = HashMap::new();
            for block in s.replicas.peers.values() {
                let volume = self
                    .volumes
                    .get(block.volume_id)
                    .ok_or(Error::VolumeNotFound(block.volume_id))?;
                endpoints.insert(block.id, volume.address());
            }
            (
                s.replicas.id,
                s.replicas.leader_block_id,
                leader.volume_id,
                endpoints,
            )
        };
        let instance = self
            .volumes
            .get(leader_volume_id)
            .ok_or(Error::VolumeNotFound(leader_volume_id))?;
        let client = instance.client()?;
        client
            .activate_segment(el.metadata().id, group_id, leader_block_id, endpoints)
            .await?;
        Ok(())
    }

    /// Picks the leader for a segment with no volume affinity: the peer
    /// whose volume currently leads the fewest working segments, ties
    /// broken by ascending volume ID.
    fn elect_leader(&self, segment: &Segment) -> Result<Id> {
        let mut leading: HashMap<u64, usize> = HashMap::new();
        for entry in self.segments.iter() {
            let s = entry.value().read().unwrap();
            if s.state == SegmentState::Working {
                if let Some(leader) = s.leader_block() {
                    *leading.entry(leader.volume_id.as_u64()).or_insert(0) += 1;
                }
            }
        }
        let mut candidates: Vec<&BlockMetadata> = segment.replicas.peers.values().collect();
        candidates.sort_by_key(|b| {
            (
                leading.get(&b.volume_id.as_u64()).copied().unwrap_or(0),
                b.volume_id.as_u64(),
            )
        });
        candidates
            .first()
            .map(|b| b.id)
            .ok_or_else(|| Error::InvalidSegment("replica group has no peers".to_string()))
    }

    fn enqueue_gc(&self, seg: &SegmentRef, reason: &'static str) {
        let seg_id = seg.read().unwrap().id;
        if self
            .gc_set
            .insert(seg_id.as_u64(), Arc::clone(seg))
            .is_none()
        {
            info!(segment_id = %seg_id, reason, "segment scheduled for gc");
        }
    }

    /// Number of segments pending cleanup. Test and metrics hook.
    pub fn gc_backlog(&self) -> usize {
        self.gc_set.len()
    }

    // ----------------------------------------------------------------
    // Background loop bodies
    // ----------------------------------------------------------------

    /// One scale-up pass: bring every eventlog back to
    /// `default_appendable_segments` appendable segments.
    pub async fn scale_once(&self) {
        let eventlogs: Vec<Arc<Eventlog>> =
            self.eventlogs.iter().map(|e| Arc::clone(&e)).collect();
        let mut created = 0usize;
        for el in eventlogs {
            while el.appendable_count().await < self.config.default_appendable_segments {
                let seg = match self.create_segment(&el).await {
                    Ok(seg) => seg,
                    Err(error) => {
                        warn!(
                            eventlog_id = %el.metadata().id,
                            %error,
                            "failed to create segment during scale-up"
                        );
                        break;
                    }
                };
                if let Err(error) = el.append_segment(Arc::clone(&seg)).await {
                    warn!(
                        eventlog_id = %el.metadata().id,
                        %error,
                        "failed to link segment during scale-up"
                    );
                    self.enqueue_gc(&seg, "create-failed");
                    break;
                }
                created += 1;
            }
        }
        if created > 0 {
            debug!(created, "scale-up pass provisioned segments");
        }
    }

    /// One GC pass: for every queued segment, delete its blocks on all
    /// peer volumes, then its metadata. A segment whose blocks cannot
    /// all be deleted yet stays queued for the next pass.
    pub async fn clean_once(&self) {
        let queued: Vec<(u64, SegmentRef)> = self
            .gc_set
            .iter()
            .map(|e| (*e.key(), Arc::clone(e.value())))
            .collect();
        let mut cleaned = 0usize;
        for (key, seg) in queued {
            let (seg_id, peers) = {
                let s = seg.read().unwrap();
                (s.id, s.replicas.peers.clone())
            };

            let mut all_deleted = true;
            for block in peers.values() {
                match self.volumes.get(block.volume_id) {
                    Some(volume) => {
                        let deleted = match volume.client() {
                            Ok(client) => client.delete_block(block.id).await.map_err(Error::from),
                            Err(e) => Err(e),
                        };
                        if let Err(error) = deleted {
                            warn!(
                                segment_id = %seg_id,
                                block_id = %block.id,
                                %error,
                                "failed to delete block; will retry"
                            );
                            all_deleted = false;
                            continue;
                        }
                    }
                    None => {
                        // The volume itself is gone; nothing to delete.
                        warn!(
                            segment_id = %seg_id,
                            block_id = %block.id,
                            volume_id = %block.volume_id,
                            "volume missing; treating block as deleted"
                        );
                    }
                }
                if let Err(error) = self
                    .kv
                    .delete(&metadata::block_key(block.volume_id, block.id))
                    .await
                {
                    warn!(
                        segment_id = %seg_id,
                        block_id = %block.id,
                        %error,
                        "failed to delete block metadata; will retry"
                    );
                    all_deleted = false;
                    continue;
                }
                self.blocks.remove(&block.id.as_u64());
            }
            if !all_deleted {
                continue;
            }

            if let Err(error) = self.kv.delete(&metadata::segment_key(seg_id)).await {
                warn!(segment_id = %seg_id, %error, "failed to delete segment metadata; will retry");
                continue;
            }
            self.segments.remove(&seg_id.as_u64());
            self.gc_set.remove(&key);
            cleaned += 1;
            info!(segment_id = %seg_id, "segment cleaned");
        }
        if cleaned > 0 {
            debug!(cleaned, "gc pass completed");
        }
    }

    /// One expiration pass: retire frozen heads older than the TTL.
    pub async fn expire_once(&self) {
        let execution_id = Uuid::new_v4().to_string();
        let ttl = self.config.segment_expired_time_ms;
        let eventlogs: Vec<Arc<Eventlog>> =
            self.eventlogs.iter().map(|e| Arc::clone(&e)).collect();
        let mut retired = 0usize;

        for el in eventlogs {
            loop {
                let Some(head) = el.head().await else { break };
                let (full, last_event_time) = {
                    let s = head.read().unwrap();
                    (s.is_full(), s.last_event_time)
                };
                if !full {
                    break;
                }
                if last_event_time == 0 {
                    // Freshly frozen with no recorded time: stamp it so
                    // the segment gets a retention window at all.
                    let stamp = if self.config.defer_expiry_on_missing_time {
                        time::now_ms() + ttl
                    } else {
                        time::now_ms()
                    };
                    {
                        head.write().unwrap().last_event_time = stamp;
                    }
                    if let Err(error) = el.update_segment(&head).await {
                        warn!(
                            execution_id = %execution_id,
                            eventlog_id = %el.metadata().id,
                            %error,
                            "failed to stamp frozen head; will retry"
                        );
                        head.write().unwrap().last_event_time = 0;
                    }
                    break;
                }
                if time::now_ms() <= last_event_time + ttl {
                    break;
                }

                match el.delete_head().await {
                    Ok(Some(seg)) => {
                        self.enqueue_gc(&seg, "expired");
                        retired += 1;
                    }
                    Ok(None) => break,
                    Err(error) => {
                        warn!(
                            execution_id = %execution_id,
                            eventlog_id = %el.metadata().id,
                            %error,
                            "failed to delete expired head"
                        );
                        break;
                    }
                }
            }
        }
        if retired > 0 {
            info!(execution_id = %execution_id, retired, "expiration pass retired segments");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eventflow_kv::MemoryKvStore;

    fn block_md(id: u64, volume: u64) -> BlockMetadata {
        BlockMetadata {
            id: Id(id),
            capacity: 4096,
            size: 0,
            volume_id: Id(volume),
            segment_id: Id::EMPTY,
            eventlog_id: Id::EMPTY,
        }
    }

    fn working_segment(mgr: &EventlogManager, seg_id: u64, leader_volume: u64) {
        let block_id = seg_id * 10;
        let mut seg = Segment::new(
            Id(seg_id),
            4096,
            ReplicaGroup {
                id: Id(seg_id * 100),
                leader_block_id: Id(block_id),
                term: 0,
                peers: HashMap::from([(block_id, block_md(block_id, leader_volume))]),
            },
        );
        seg.state = SegmentState::Working;
        mgr.segments
            .insert(seg_id, Arc::new(std::sync::RwLock::new(seg)));
    }

    fn manager() -> EventlogManager {
        let kv: Arc<dyn KvClient> = Arc::new(MemoryKvStore::new());
        let volumes = Arc::new(VolumeManager::new(
            Arc::clone(&kv),
            std::time::Duration::from_secs(10),
        ));
        EventlogManager::new(kv, volumes, ControllerConfig::default())
    }

    #[test]
    fn test_elect_leader_prefers_least_loaded_volume() {
        let mgr = manager();
        // V1 leads five working segments, V2 and V3 one each.
        for seg_id in 1..=5 {
            working_segment(&mgr, seg_id, 1);
        }
        working_segment(&mgr, 6, 2);
        working_segment(&mgr, 7, 3);

        let candidate = Segment::new(
            Id(99),
            4096,
            ReplicaGroup {
                id: Id(9900),
                leader_block_id: Id::EMPTY,
                term: 0,
                peers: HashMap::from([
                    (501, block_md(501, 1)),
                    (502, block_md(502, 2)),
                    (503, block_md(503, 3)),
                ]),
            },
        );
        // V2 and V3 tie at one leader each; the lower volume ID wins.
        assert_eq!(mgr.elect_leader(&candidate).unwrap(), Id(502));
    }

    #[test]
    fn test_elect_leader_unloaded_volumes_tie_break_by_id() {
        let mgr = manager();
        let candidate = Segment::new(
            Id(99),
            4096,
            ReplicaGroup {
                id: Id(9900),
                leader_block_id: Id::EMPTY,
                term: 0,
                peers: HashMap::from([
                    (503, block_md(503, 3)),
                    (501, block_md(501, 1)),
                    (502, block_md(502, 2)),
                ]),
            },
        );
        assert_eq!(mgr.elect_leader(&candidate).unwrap(), Id(501));
    }

    #[test]
    fn test_elect_leader_counts_only_working_segments() {
        let mgr = manager();
        working_segment(&mgr, 1, 1);
        // A frozen segment on V2 does not count against it.
        working_segment(&mgr, 2, 2);
        mgr.segments
            .get(&2)
            .unwrap()
            .write()
            .unwrap()
            .state = SegmentState::Frozen;

        let candidate = Segment::new(
            Id(99),
            4096,
            ReplicaGroup {
                id: Id(9900),
                leader_block_id: Id::EMPTY,
                term: 0,
                peers: HashMap::from([(501, block_md(501, 1)), (502, block_md(502, 2))]),
            },
        );
        assert_eq!(mgr.elect_leader(&candidate).unwrap(), Id(502));
    }
}
