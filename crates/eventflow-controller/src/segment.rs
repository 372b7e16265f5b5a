//! Controller-side segment model.
//!
//! A segment is a replica group of blocks holding the same entries.
//! The controller tracks its lifecycle
//! `Created → Working → Frozen → Archived` and its position in the
//! eventlog chain. State only ever moves forward: replica heartbeats
//! may arrive out of order with respect to the leader persisting
//! `Working`, so a merge carrying an older state is absorbed without
//! downgrading.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use eventflow_core::{Id, SegmentHealth};
use serde::{Deserialize, Serialize};

use crate::metadata::BlockMetadata;

/// Shared handle to a segment. The manager's global map and the
/// eventlog chain reference the same instance; short read/write locks
/// guard it, never held across awaits.
pub type SegmentRef = Arc<RwLock<Segment>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentState {
    Created,
    Working,
    Frozen,
    Archived,
}

impl SegmentState {
    fn rank(self) -> u8 {
        match self {
            SegmentState::Created => 0,
            SegmentState::Working => 1,
            SegmentState::Frozen => 2,
            SegmentState::Archived => 3,
        }
    }
}

/// The replica group backing a segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaGroup {
    pub id: Id,
    /// Block currently leading the group.
    pub leader_block_id: Id,
    /// Replication term; updates carrying a stale term are ignored.
    pub term: u64,
    /// Block ID → block, one per volume.
    pub peers: HashMap<u64, BlockMetadata>,
}

impl ReplicaGroup {
    pub fn leader(&self) -> Option<&BlockMetadata> {
        self.peers.get(&self.leader_block_id.as_u64())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub id: Id,
    pub eventlog_id: Id,
    pub capacity: u64,
    pub size: u64,
    pub number: u32,
    pub state: SegmentState,
    pub replicas: ReplicaGroup,
    pub prev_segment_id: Id,
    pub next_segment_id: Id,
    /// Offset of this segment's first entry within the whole eventlog.
    pub start_offset_in_log: i64,
    /// Born time of the first entry, ms since epoch; 0 until reported.
    pub first_event_time: i64,
    /// Born time of the last entry, ms since epoch; 0 until reported.
    pub last_event_time: i64,
}

impl Segment {
    pub fn new(id: Id, capacity: u64, replicas: ReplicaGroup) -> Self {
        Self {
            id,
            eventlog_id: Id::EMPTY,
            capacity,
            size: 0,
            number: 0,
            state: SegmentState::Created,
            replicas,
            prev_segment_id: Id::EMPTY,
            next_segment_id: Id::EMPTY,
            start_offset_in_log: 0,
            first_event_time: 0,
            last_event_time: 0,
        }
    }

    /// Can still take writes (or will once activated).
    pub fn append_ready(&self) -> bool {
        matches!(self.state, SegmentState::Created | SegmentState::Working)
    }

    pub fn is_full(&self) -> bool {
        matches!(self.state, SegmentState::Frozen | SegmentState::Archived)
    }

    /// Frozen long enough ago to be retired.
    pub fn stale(&self, ttl_ms: i64, now_ms: i64) -> bool {
        self.is_full() && self.last_event_time > 0 && now_ms - self.last_event_time > ttl_ms
    }

    pub fn leader_block(&self) -> Option<&BlockMetadata> {
        self.replicas.leader()
    }

    /// Moves the state forward; a lower target is ignored.
    pub fn upgrade_state(&mut self, to: SegmentState) -> bool {
        if to.rank() > self.state.rank() {
            self.state = to;
            true
        } else {
            false
        }
    }

    /// Merges a leader heartbeat into the segment. Returns whether
    /// anything changed and so needs persisting.
    pub fn merge_health(&mut self, health: &SegmentHealth) -> bool {
        let mut changed = false;
        if self.size != health.size as u64 {
            self.size = health.size as u64;
            changed = true;
        }
        if self.number != health.event_number {
            self.number = health.event_number;
            changed = true;
        }
        if health.first_event_time != 0 && self.first_event_time != health.first_event_time {
            self.first_event_time = health.first_event_time;
            changed = true;
        }
        if health.last_event_time != 0 && self.last_event_time != health.last_event_time {
            self.last_event_time = health.last_event_time;
            changed = true;
        }
        if health.is_full && self.upgrade_state(SegmentState::Frozen) {
            changed = true;
        }
        changed
    }
}
