//! Controller error type.
//!
//! Background loops catch `Transient`-kind errors and continue to the
//! next tick; user-facing operations propagate the first error
//! verbatim with context.

use eventflow_core::{rpc::RpcError, ErrorKind, Id};
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("eventlog {0} not found")]
    EventlogNotFound(Id),

    #[error("segment {0} not found")]
    SegmentNotFound(Id),

    #[error("block {0} not found")]
    BlockNotFound(Id),

    #[error("volume {0} not found")]
    VolumeNotFound(Id),

    /// Fewer live volumes than the requested replica count.
    #[error("not enough live volumes: need {need}, have {have}")]
    NoLiveVolumes { need: usize, have: usize },

    #[error("invalid segment: {0}")]
    InvalidSegment(String),

    /// KV store failure; retried on the next tick.
    #[error("kv error: {0}")]
    Kv(#[from] eventflow_kv::Error),

    /// A volume RPC failed.
    #[error("volume rpc failed: {0}")]
    Rpc(#[from] RpcError),

    #[error("metadata encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("internal: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::EventlogNotFound(_)
            | Error::SegmentNotFound(_)
            | Error::BlockNotFound(_)
            | Error::VolumeNotFound(_) => ErrorKind::NotFound,
            Error::NoLiveVolumes { .. } => ErrorKind::Transient,
            Error::Kv(_) => ErrorKind::Transient,
            Error::Rpc(e) => e.kind,
            Error::InvalidSegment(_) | Error::Encoding(_) | Error::Internal(_) => {
                ErrorKind::Internal
            }
        }
    }
}

impl From<Error> for RpcError {
    fn from(e: Error) -> Self {
        RpcError::new(e.kind(), e.to_string())
    }
}
