//! Key-value client abstraction for EventFlow metadata.
//!
//! The controller persists every piece of durable metadata (eventlogs,
//! segments, blocks, volumes, allocator cursors) as JSON values in an
//! external linearizable KV store. This crate defines the narrow
//! interface the controller needs — get / set / list-by-prefix /
//! delete — and two implementations:
//!
//! - [`MemoryKvStore`]: an in-process store for tests and single-node
//!   development runs.
//! - `EtcdKvStore` (behind the `etcd` feature): the production backend
//!   over an etcd cluster.
//!
//! ## Consistency
//!
//! The controller assumes linearizable reads and writes. etcd provides
//! this; the in-memory store trivially does. Implementations must not
//! reorder a `set` after a later `get` from the same task.
//!
//! ## Error Handling
//!
//! Store failures surface as [`Error::Transient`]; callers (the
//! manager's background loops) log and retry on the next tick rather
//! than aborting.

pub mod error;
pub mod memory;

#[cfg(feature = "etcd")]
pub mod etcd;

pub use error::{Error, Result};
pub use memory::MemoryKvStore;

#[cfg(feature = "etcd")]
pub use etcd::EtcdKvStore;

use async_trait::async_trait;
use bytes::Bytes;

/// A key with its stored value, as returned by [`KvClient::list`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: String,
    pub value: Bytes,
}

/// The KV operations the controller relies on.
///
/// All implementations must be `Send + Sync` so the store can be shared
/// as `Arc<dyn KvClient>` across the manager's background tasks.
#[async_trait]
pub trait KvClient: Send + Sync {
    /// Returns the value stored at `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Stores `value` at `key`, overwriting any existing value.
    async fn set(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Deletes `key`. Deleting an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Returns every pair whose key starts with `prefix`, in key order.
    async fn list(&self, prefix: &str) -> Result<Vec<KvPair>>;
}
