//! The platform-wide error taxonomy.
//!
//! Each crate defines its own `thiserror` enum, but every error maps
//! onto one of the [`ErrorKind`]s below so callers on the far side of
//! a component boundary can dispatch on the kind without knowing the
//! concrete type. The kinds and their handling contracts:
//!
//! | Kind | Caller's move |
//! |---|---|
//! | `NotEnoughSpace` / `Full` | retry on the next appendable segment |
//! | `NotLeader` | refresh routing |
//! | `OffsetExceeded` / `OffsetOnEnd` | poll or report "no data" |
//! | `Corrupted` | block refuses to serve; operator intervention |
//! | `NotFound` | resource missing from controller maps |
//! | `Transient` | KV / RPC timeout; retry |
//! | `Internal` | invariant violated; fatal for the operation |

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The distinct failure kinds of the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    NotEnoughSpace,
    Full,
    NotLeader,
    OffsetExceeded,
    OffsetOnEnd,
    Corrupted,
    NotFound,
    Transient,
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid id: {0}")]
    InvalidId(String),
}

pub type Result<T> = std::result::Result<T, Error>;
