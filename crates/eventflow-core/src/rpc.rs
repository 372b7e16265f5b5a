//! The semantic RPC surfaces between EventFlow components.
//!
//! The transport layer is an external collaborator; these traits pin
//! down only the request/response semantics. A storage node implements
//! [`VolumeClient`] (the controller calls it to activate segments and
//! the gateway calls it to move entries), and the controller implements
//! [`ControllerClient`] (storage nodes call it to report health).
//!
//! In-process deployments and tests wire the traits directly; a network
//! deployment puts its codec and channel of choice behind them.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::entry::Entry;
use crate::error::ErrorKind;
use crate::id::Id;

/// Per-block health snapshot carried by volume heartbeats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentHealth {
    /// The reporting block's ID.
    pub id: Id,
    /// Bytes in the data region.
    pub size: i64,
    /// Entries in the block.
    pub event_number: u32,
    pub is_full: bool,
    /// Serialization version of the block file.
    pub version: u32,
    /// Born time of the first entry, ms since epoch; 0 if none seen.
    pub first_event_time: i64,
    /// Born time of the last entry, ms since epoch; 0 if none seen.
    pub last_event_time: i64,
}

/// Result of a block read: the entries plus the index the next read
/// should start from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadResult {
    pub entries: Vec<Entry>,
    pub next_offset: u32,
}

/// Full description of one block on a volume, as returned by
/// [`VolumeClient::describe_block`]. Unlike the batch heartbeat
/// snapshot this also carries the block's bindings: whether this
/// volume leads it and which replica group and eventlog it serves.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockDescription {
    pub id: Id,
    /// Total bytes reserved for the block file.
    pub capacity: u64,
    /// Bytes in the data region.
    pub size: i64,
    /// Entries in the block.
    pub event_number: u32,
    pub is_full: bool,
    /// This volume holds the block's leader replica.
    pub leader: bool,
    /// Eventlog the block serves; empty until activation.
    pub eventlog_id: Id,
    /// Replica group the block belongs to; empty until activation.
    pub replica_group_id: Id,
}

/// An error crossing a component boundary: one of the platform's error
/// kinds plus context.
#[derive(Debug, Error)]
#[error("{kind:?}: {message}")]
pub struct RpcError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// Operations a storage node (volume) exposes.
#[async_trait]
pub trait VolumeClient: Send + Sync {
    /// Instructs the volume to open the given replica group; the
    /// replica whose endpoint is this volume becomes the local block,
    /// and if `leader_block` names it, it is activated as leader.
    async fn activate_segment(
        &self,
        eventlog_id: Id,
        replica_group_id: Id,
        leader_block: Id,
        replicas: HashMap<Id, String>,
    ) -> RpcResult<()>;

    /// Appends payloads to the block, assigning born-times server-side.
    /// Returns the logical index of each appended entry.
    async fn append_to_block(&self, block_id: Id, payloads: Vec<Bytes>) -> RpcResult<Vec<u32>>;

    /// Reads up to `count` entries starting at logical index `offset`,
    /// waiting up to `polling_timeout` for new data when at the end of
    /// a non-full block.
    async fn read_from_block(
        &self,
        block_id: Id,
        offset: u32,
        count: usize,
        polling_timeout: Duration,
    ) -> RpcResult<ReadResult>;

    /// Finds the first logical index whose event time is `>= time`.
    /// Returns −1 when every entry is older.
    async fn lookup_offset_in_block(&self, block_id: Id, time: i64) -> RpcResult<i64>;

    /// Creates an empty block of `capacity` bytes on this volume.
    async fn create_block(&self, block_id: Id, capacity: u64) -> RpcResult<()>;

    /// Describes one block: counters, fullness, leadership, and its
    /// replica-group and eventlog bindings.
    async fn describe_block(&self, block_id: Id) -> RpcResult<BlockDescription>;

    /// Removes the block and its file.
    async fn delete_block(&self, block_id: Id) -> RpcResult<()>;
}

/// Operations the controller exposes to storage nodes.
#[async_trait]
pub trait ControllerClient: Send + Sync {
    /// Reports a volume's address and the health of every block it
    /// serves.
    async fn heartbeat(
        &self,
        volume_id: Id,
        address: String,
        healths: Vec<SegmentHealth>,
    ) -> RpcResult<()>;
}
