//! 64-bit resource identifiers.
//!
//! Every resource in EventFlow (eventbus, eventlog, segment, replica
//! group, block, volume) is named by an [`Id`]: a `u64` minted by the
//! controller's [`IdGenerator`]. The generator packs the wall clock
//! into the high bits and a sequence counter into the low bits, and
//! additionally guarantees strict monotonicity across calls even if
//! the clock steps backwards. The eventlog chain relies on this:
//! segments sorted by ID are sorted by creation order.
//!
//! IDs serialize as plain integers in JSON and display as decimal
//! strings, which is also the form used inside KV store keys.

use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::time;

/// Number of low bits reserved for the per-millisecond sequence.
const SEQUENCE_BITS: u32 = 18;

/// A 64-bit resource identifier.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Id(pub u64);

impl Id {
    /// The zero ID, used for absent chain links.
    pub const EMPTY: Id = Id(0);

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// The form used inside KV store keys.
    pub fn key(&self) -> String {
        self.0.to_string()
    }
}

impl From<u64> for Id {
    fn from(v: u64) -> Self {
        Id(v)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        s.parse::<u64>()
            .map(Id)
            .map_err(|_| Error::InvalidId(s.to_string()))
    }
}

/// Mints strictly increasing [`Id`]s.
///
/// Thread-safe; a single generator is shared by the whole controller
/// process.
#[derive(Debug, Default)]
pub struct IdGenerator {
    last: AtomicU64,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an ID greater than every ID previously returned by this
    /// generator.
    pub fn next(&self) -> Id {
        let candidate = (time::now_ms() as u64) << SEQUENCE_BITS;
        let mut last = self.last.load(Ordering::Relaxed);
        loop {
            let next = candidate.max(last + 1);
            match self
                .last
                .compare_exchange_weak(last, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return Id(next),
                Err(observed) => last = observed,
            }
        }
    }
}
