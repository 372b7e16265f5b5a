//! The block file engine.
//!
//! A block is one replica of a segment: a preallocated, append-only
//! file on a single volume with a fixed layout:
//!
//! ```text
//! ┌────────────────┬──────────────────────────┬───────────────┐
//! │  Header Block  │  Entries ...             │  Index Region │
//! │  (4 KiB)       │  length:u32 | payload    │  (tail)       │
//! └────────────────┴──────────────────────────┴───────────────┘
//! ```
//!
//! ## Header (big-endian, CRC-guarded)
//!
//! | Bytes | Field |
//! |---|---|
//! | 0..4 | `version: u32` |
//! | 4..12 | `capacity: u64` |
//! | 12..20 | `size: u64` (data-region bytes) |
//! | 20..24 | `number: u32` (entry count) |
//! | 24 | `full: u8` |
//! | 25..29 | CRC32 of bytes 0..25 |
//! | 29..4096 | reserved zero |
//!
//! ## Data region
//!
//! Entries pack sequentially from byte 4096: a little-endian `u32`
//! length prefix followed by the payload. A zero length terminates the
//! region during recovery — a torn batch at the tail leaves trailing
//! zeros in the preallocated file, so the scan stops at the last
//! complete entry.
//!
//! ## Index region
//!
//! Written only once the block is full: `number` 16-byte records grown
//! from the file end toward the data, so record *k* occupies
//! `capacity − (k+1)·16`. Each record stores the entry's file offset
//! (`i64`), its on-disk length (`i32`, prefix included), and its event
//! time truncated to seconds in the trailing word so reopened blocks
//! can still serve time-key seeks.
//!
//! While the block is open, the index lives in memory and is extended
//! on every commit; recovery rebuilds it from the data region when the
//! block is not full.
//!
//! ## Invariants
//!
//! - `4096 + size + number·16 ≤ capacity`
//! - entry `index` is contiguous from 0; gaps are an `Internal` error
//! - once `full = 1`, appends fail with `Full` and the index region is
//!   authoritative

mod file;
mod index;
mod read;
mod recovery;
mod seek;

pub use file::{AppendContext, Block};
pub use index::IndexEntry;
pub use recovery::{block_path, recover_dir};
pub use seek::SeekFlag;

/// Size of the header block preceding the data region.
pub const HEADER_BLOCK_SIZE: u64 = 4 * 1024;

/// Bytes of the header actually encoded: version + capacity + size +
/// number + full, plus the CRC32 guard.
pub const HEADER_SIZE: usize = 4 + 8 + 8 + 4 + 1 + 4;

/// Size of one persisted index record.
pub const INDEX_RECORD_SIZE: u64 = 16;

/// Current block file serialization version.
pub const BLOCK_VERSION: u32 = 1;

/// File extension of block files inside a volume directory.
pub const BLOCK_EXT: &str = "block";
