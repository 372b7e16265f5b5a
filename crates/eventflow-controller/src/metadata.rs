//! Persisted metadata types and the KV key layout.
//!
//! Everything the controller must not lose across restarts lives in the
//! external KV store as JSON under these keys:
//!
//! | Key | Value |
//! |---|---|
//! | `/vanus/resource/eventlog/<elId>` | [`EventlogMetadata`] |
//! | `/vanus/resource/eventlog_segments/<elId>/<segId>` | `{ "segment_id": … }` |
//! | `/vanus/resource/segment/<segId>` | [`Segment`](crate::segment::Segment) |
//! | `/vanus/resource/block/<volumeId>/<blockId>` | [`BlockMetadata`] |
//! | `/vanus/resource/volume/<volumeId>` | [`VolumeMetadata`] |
//! | `/vanus/resource/allocator/round_robin` | allocator cursor |
//!
//! The layout is versioned by path, not by value: readers list a prefix
//! and decode each value independently, so a single damaged record
//! never blocks recovery of its siblings.

use eventflow_core::Id;
use serde::{Deserialize, Serialize};

pub const EVENTLOG_KEY_PREFIX: &str = "/vanus/resource/eventlog/";
pub const EVENTLOG_SEGMENTS_KEY_PREFIX: &str = "/vanus/resource/eventlog_segments/";
pub const SEGMENT_KEY_PREFIX: &str = "/vanus/resource/segment/";
pub const BLOCK_KEY_PREFIX: &str = "/vanus/resource/block/";
pub const VOLUME_KEY_PREFIX: &str = "/vanus/resource/volume/";
pub const ALLOCATOR_CURSOR_KEY: &str = "/vanus/resource/allocator/round_robin";

pub fn eventlog_key(id: Id) -> String {
    format!("{EVENTLOG_KEY_PREFIX}{id}")
}

pub fn eventlog_segments_prefix(eventlog_id: Id) -> String {
    format!("{EVENTLOG_SEGMENTS_KEY_PREFIX}{eventlog_id}/")
}

pub fn eventlog_segments_key(eventlog_id: Id, segment_id: Id) -> String {
    format!("{EVENTLOG_SEGMENTS_KEY_PREFIX}{eventlog_id}/{segment_id}")
}

pub fn segment_key(id: Id) -> String {
    format!("{SEGMENT_KEY_PREFIX}{id}")
}

pub fn block_key(volume_id: Id, block_id: Id) -> String {
    format!("{BLOCK_KEY_PREFIX}{volume_id}/{block_id}")
}

pub fn volume_key(id: Id) -> String {
    format!("{VOLUME_KEY_PREFIX}{id}")
}

/// An eventlog: one ordered chain of segments within an eventbus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventlogMetadata {
    pub id: Id,
    pub eventbus_id: Id,
    pub eventbus_name: String,
}

/// A storage node, as the controller sees it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VolumeMetadata {
    pub id: Id,
    pub capacity: u64,
    /// Bytes reserved by blocks placed on this volume.
    pub used: u64,
    /// The address the volume advertises; refreshed by heartbeats.
    pub instance_address: String,
}

/// One replica of a segment, placed on a volume.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockMetadata {
    pub id: Id,
    pub capacity: u64,
    #[serde(default)]
    pub size: u64,
    pub volume_id: Id,
    /// Filled in once the block is bound to a segment.
    #[serde(default)]
    pub segment_id: Id,
    #[serde(default)]
    pub eventlog_id: Id,
}

/// Chain-membership record under `eventlog_segments/<el>/<seg>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentChainRecord {
    pub segment_id: Id,
}
