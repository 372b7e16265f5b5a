//! Storage-node error type.
//!
//! Every variant maps onto one of the platform's error kinds
//! ([`ErrorKind`]); the volume RPC surface converts through that
//! mapping so remote callers can dispatch without this crate.

use eventflow_core::{rpc::RpcError, ErrorKind, Id};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The batch does not fit in the block's remaining capacity.
    #[error("not enough space: required {required}, remaining {remaining}")]
    NotEnoughSpace { required: u64, remaining: u64 },

    /// The block is sealed; no further appends.
    #[error("block is full")]
    Full,

    /// The block is not leader-activated on this volume.
    #[error("block {0} is not the leader here")]
    NotLeader(Id),

    /// Read at an index that will never exist (block is full).
    #[error("offset {0} exceeds the block")]
    OffsetExceeded(u32),

    /// Read at the live end of a non-full block; no data arrived
    /// within the polling window.
    #[error("offset {0} is at the end of the block")]
    OffsetOnEnd(u32),

    /// Header or index failed validation on open.
    #[error("block file corrupted: {0}")]
    Corrupted(String),

    #[error("block {0} not found on this volume")]
    BlockNotFound(Id),

    /// An invariant was violated (discontinuous batch, bad counters).
    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Io(_) => ErrorKind::Transient,
            Error::NotEnoughSpace { .. } => ErrorKind::NotEnoughSpace,
            Error::Full => ErrorKind::Full,
            Error::NotLeader(_) => ErrorKind::NotLeader,
            Error::OffsetExceeded(_) => ErrorKind::OffsetExceeded,
            Error::OffsetOnEnd(_) => ErrorKind::OffsetOnEnd,
            Error::Corrupted(_) => ErrorKind::Corrupted,
            Error::BlockNotFound(_) => ErrorKind::NotFound,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        RpcError::new(e.kind(), e.to_string())
    }
}
