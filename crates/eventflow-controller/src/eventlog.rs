//! The eventlog: an ordered chain of segments.
//!
//! Segment IDs come from a monotonic generator, so a map ordered by ID
//! is ordered by creation — the chain is a `BTreeMap` keyed by segment
//! ID, with prev/next links stored by ID inside each segment and
//! resolved through the map. Deletion never dangles because the head is
//! unlinked before anything is deleted.
//!
//! The write cursor points at the first `Working`/`Created` segment and
//! only ever advances. Chain mutations take the coarse per-eventlog
//! write lock; reads take the read lock and copy out what they need.
//!
//! Persistence is best-effort atomic: `append_segment` writes the new
//! segment, its chain-membership record, and the updated predecessor to
//! the KV store in that order, rolling the in-memory pointers back if
//! any write fails.

use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Arc;

use eventflow_core::Id;
use eventflow_kv::KvClient;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::metadata::{self, EventlogMetadata, SegmentChainRecord};
use crate::segment::{Segment, SegmentRef, SegmentState};

pub struct Eventlog {
    md: EventlogMetadata,
    kv: Arc<dyn KvClient>,
    chain: RwLock<Chain>,
}

#[derive(Default)]
struct Chain {
    list: BTreeMap<u64, SegmentRef>,
    write_ptr: Option<u64>,
}

impl Chain {
    fn next_of(&self, key: u64) -> Option<SegmentRef> {
        self.list
            .range((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(|(_, seg)| Arc::clone(seg))
    }
}

/// Serializes the segment under a short read lock, then persists it.
pub(crate) async fn persist_segment(kv: &Arc<dyn KvClient>, seg: &SegmentRef) -> Result<()> {
    let (key, data) = {
        let s = seg.read().unwrap();
        (metadata::segment_key(s.id), serde_json::to_vec(&*s)?)
    };
    kv.set(&key, data).await?;
    Ok(())
}

impl Eventlog {
    /// An empty eventlog; segments are seeded by the manager.
    pub fn new(md: EventlogMetadata, kv: Arc<dyn KvClient>) -> Self {
        Self {
            md,
            kv,
            chain: RwLock::new(Chain::default()),
        }
    }

    /// Rebuilds the chain from the KV store: the membership records
    /// name the segments, each segment record carries the rest.
    pub async fn load(md: EventlogMetadata, kv: Arc<dyn KvClient>) -> Result<Self> {
        let el = Self::new(md, kv);
        let pairs = el
            .kv
            .list(&metadata::eventlog_segments_prefix(el.md.id))
            .await?;
        let mut chain = el.chain.write().await;
        for pair in pairs {
            let record: SegmentChainRecord = serde_json::from_slice(&pair.value)?;
            let key = metadata::segment_key(record.segment_id);
            let data = el
                .kv
                .get(&key)
                .await?
                .ok_or_else(|| Error::SegmentNotFound(record.segment_id))?;
            let segment: Segment = serde_json::from_slice(&data)?;
            chain
                .list
                .insert(segment.id.as_u64(), Arc::new(std::sync::RwLock::new(segment)));
        }
        debug!(
            eventlog_id = %el.md.id,
            segments = chain.list.len(),
            "eventlog loaded"
        );
        drop(chain);
        Ok(el)
    }

    pub fn metadata(&self) -> &EventlogMetadata {
        &self.md
    }

    pub async fn len(&self) -> usize {
        self.chain.read().await.list.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.chain.read().await.list.is_empty()
    }

    pub async fn get(&self, id: Id) -> Option<SegmentRef> {
        self.chain.read().await.list.get(&id.as_u64()).cloned()
    }

    pub async fn head(&self) -> Option<SegmentRef> {
        self.chain.read().await.list.values().next().cloned()
    }

    pub async fn tail(&self) -> Option<SegmentRef> {
        self.chain.read().await.list.values().next_back().cloned()
    }

    pub async fn all_segments(&self) -> Vec<SegmentRef> {
        self.chain.read().await.list.values().cloned().collect()
    }

    /// The segment and its successors, in chain order.
    pub async fn segments_from(&self, id: Id, include_self: bool) -> Vec<SegmentRef> {
        let chain = self.chain.read().await;
        let bound = if include_self {
            Bound::Included(id.as_u64())
        } else {
            Bound::Excluded(id.as_u64())
        };
        chain
            .list
            .range((bound, Bound::Unbounded))
            .map(|(_, seg)| Arc::clone(seg))
            .collect()
    }

    /// The first appendable segment at or after the write cursor,
    /// advancing the cursor past segments that froze.
    pub async fn current_appendable(&self) -> Option<SegmentRef> {
        let mut chain = self.chain.write().await;
        let from = chain.write_ptr.unwrap_or(0);
        let found = chain
            .list
            .range(from..)
            .find(|(_, seg)| seg.read().unwrap().append_ready())
            .map(|(key, seg)| (*key, Arc::clone(seg)));
        match found {
            Some((key, seg)) => {
                chain.write_ptr = Some(key);
                Some(seg)
            }
            None => None,
        }
    }

    /// Appendable segments from the cursor onward.
    pub async fn appendable_count(&self) -> usize {
        let Some(cur) = self.current_appendable().await else {
            return 0;
        };
        let from = cur.read().unwrap().id.as_u64();
        let chain = self.chain.read().await;
        chain
            .list
            .range(from..)
            .filter(|(_, seg)| seg.read().unwrap().append_ready())
            .count()
    }

    /// Links the segment to the tail of the chain and persists the new
    /// segment, its membership record, and the updated predecessor.
    /// On any KV failure the in-memory pointers are rolled back.
    pub async fn append_segment(&self, seg: SegmentRef) -> Result<()> {
        let mut chain = self.chain.write().await;

        let (seg_id, ready) = {
            let s = seg.read().unwrap();
            (s.id, s.append_ready())
        };
        if !ready {
            return Err(Error::InvalidSegment(format!(
                "segment {seg_id} is not in an appendable state"
            )));
        }
        if chain.list.contains_key(&seg_id.as_u64()) {
            return Ok(());
        }

        let record = serde_json::to_vec(&SegmentChainRecord { segment_id: seg_id })?;

        let tail = chain.list.values().next_back().cloned();
        if let Some(tail_ref) = &tail {
            let mut t = tail_ref.write().unwrap();
            let mut s = seg.write().unwrap();
            t.next_segment_id = seg_id;
            s.prev_segment_id = t.id;
            if t.state == SegmentState::Frozen {
                s.start_offset_in_log = t.start_offset_in_log + t.number as i64;
            }
        }
        {
            seg.write().unwrap().eventlog_id = self.md.id;
        }

        fn rollback(tail: &Option<SegmentRef>, seg: &SegmentRef) {
            if let Some(t) = tail {
                t.write().unwrap().next_segment_id = Id::EMPTY;
            }
            let mut s = seg.write().unwrap();
            s.prev_segment_id = Id::EMPTY;
            s.start_offset_in_log = 0;
        }

        if let Err(e) = persist_segment(&self.kv, &seg).await {
            rollback(&tail, &seg);
            return Err(e);
        }
        if let Err(e) = self
            .kv
            .set(&metadata::eventlog_segments_key(self.md.id, seg_id), record)
            .await
        {
            rollback(&tail, &seg);
            return Err(e.into());
        }
        if let Some(tail_ref) = &tail {
            if let Err(e) = persist_segment(&self.kv, tail_ref).await {
                rollback(&tail, &seg);
                return Err(e);
            }
        }

        chain.list.insert(seg_id.as_u64(), seg);
        Ok(())
    }

    /// Unlinks and returns the front segment. The membership record is
    /// deleted first and the successor re-parented, so a crash between
    /// the two KV writes leaves no dangling reference.
    pub async fn delete_head(&self) -> Result<Option<SegmentRef>> {
        let mut chain = self.chain.write().await;
        let (head_key, head) = match chain.list.iter().next() {
            Some((key, seg)) => (*key, Arc::clone(seg)),
            None => return Ok(None),
        };
        let head_id = head.read().unwrap().id;

        self.kv
            .delete(&metadata::eventlog_segments_key(self.md.id, head_id))
            .await?;

        if let Some(next_ref) = chain.next_of(head_key) {
            {
                next_ref.write().unwrap().prev_segment_id = Id::EMPTY;
            }
            if let Err(error) = persist_segment(&self.kv, &next_ref).await {
                warn!(
                    eventlog_id = %self.md.id,
                    segment_id = %head_id,
                    %error,
                    "failed to persist successor while deleting head"
                );
                return Err(error);
            }
        }

        chain.list.remove(&head_key);
        if chain.write_ptr == Some(head_key) {
            chain.write_ptr = None;
        }
        Ok(Some(head))
    }

    /// Persists the segment; when it froze, writes the successor's
    /// start offset so the chain invariant
    /// `next.start = this.start + this.number` holds durably.
    pub async fn update_segment(&self, seg: &SegmentRef) -> Result<()> {
        persist_segment(&self.kv, seg).await?;
        let (frozen, key, start, number) = {
            let s = seg.read().unwrap();
            (
                s.state == SegmentState::Frozen,
                s.id.as_u64(),
                s.start_offset_in_log,
                s.number,
            )
        };
        if frozen {
            let next = self.chain.read().await.next_of(key);
            if let Some(next_ref) = next {
                {
                    next_ref.write().unwrap().start_offset_in_log = start + number as i64;
                }
                persist_segment(&self.kv, &next_ref).await?;
            }
        }
        Ok(())
    }
}
