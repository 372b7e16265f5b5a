//! EventFlow storage node.
//!
//! A storage node (a *volume*) owns a directory of block files and
//! serves the data plane: segment leaders append entries into their
//! local block, readers pull entries by logical index, and the
//! controller drives block lifecycle (create, activate, delete) through
//! the volume RPC surface.
//!
//! ## Components
//!
//! - [`block`]: the single-writer, append-only block file engine —
//!   fixed header, length-prefixed entries, crash-recoverable index,
//!   two-phase append, polling reads, time-key seek.
//! - [`appender`]: the two-phase append pipeline that owns a block's
//!   live append context and makes the fullness decision.
//! - [`server`]: [`VolumeServer`], the per-node registry of active
//!   blocks implementing the volume RPC surface.
//! - [`heartbeat`]: the periodic health report to the controller.
//! - [`config`]: store-node configuration.
//!
//! ## Write path
//!
//! ```text
//! gateway ──append──▶ VolumeServer ──▶ Appender ──prepare──▶ AppendContext
//!                                        │
//!                                        └──commit───▶ Block file (one write)
//! ```
//!
//! A failed commit rolls the appender's context back to its pre-prepare
//! snapshot, so no partial batch is ever observable.

pub mod appender;
pub mod block;
pub mod config;
pub mod error;
pub mod heartbeat;
pub mod server;

pub use appender::Appender;
pub use block::{AppendContext, Block, SeekFlag};
pub use config::StoreConfig;
pub use error::{Error, Result};
pub use server::VolumeServer;
