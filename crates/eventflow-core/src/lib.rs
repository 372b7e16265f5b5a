//! Core primitives shared by every EventFlow component.
//!
//! This crate holds the types both sides of the system agree on:
//!
//! - [`Id`]: 64-bit identifiers for eventbuses, eventlogs, segments,
//!   replica groups, blocks, and volumes, plus the monotonic
//!   [`IdGenerator`] the controller uses to mint them. Monotonicity
//!   matters: the eventlog chain is ordered by segment ID, so IDs must
//!   never go backwards within a controller's lifetime.
//! - [`Entry`]: the unit of storage — one serialized CloudEvent with
//!   its position inside a block.
//! - [`rpc`]: the semantic RPC surfaces ([`VolumeClient`],
//!   [`ControllerClient`]) and the platform error taxonomy
//!   ([`ErrorKind`]) that crosses them.
//!
//! Everything else (block engine, controller metadata, KV access) is
//! layered on top in the sibling crates.

pub mod entry;
pub mod error;
pub mod id;
pub mod rpc;
pub mod time;

pub use entry::Entry;
pub use error::{Error, ErrorKind, Result};
pub use id::{Id, IdGenerator};
pub use rpc::{
    BlockDescription, ControllerClient, ReadResult, RpcError, RpcResult, SegmentHealth,
    VolumeClient,
};
