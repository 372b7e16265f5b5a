use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// The store was unreachable or timed out; the operation may be
    /// retried.
    #[error("kv store unavailable: {0}")]
    Transient(String),

    #[error("kv key not found: {0}")]
    KeyNotFound(String),
}

pub type Result<T> = std::result::Result<T, Error>;
