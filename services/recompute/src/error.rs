use crate::blob_store::StorageError;
use thiserror::Error;

/// Errors raised by the recomputation engine.
///
/// Storage faults keep their transient/durable classification from the blob
/// store adapter; everything else is a caller-visible input problem.
#[derive(Debug, Error)]
pub enum RecomputeError {
    /// Bad UUID, month, phase token, day window, or unsupported part count.
    /// Raised during request validation, before any I/O.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced input blob does not exist.
    #[error("missing input: {0}")]
    MissingInput(String),

    /// An input blob exists but its content is malformed.
    #[error("corrupt input: {0}")]
    CorruptInput(String),

    /// A blob store fault, transient or durable per the adapter's classifier.
    #[error(transparent)]
    Storage(#[from] StorageError),
}

impl RecomputeError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn missing(msg: impl Into<String>) -> Self {
        Self::MissingInput(msg.into())
    }

    pub fn corrupt(msg: impl Into<String>) -> Self {
        Self::CorruptInput(msg.into())
    }
}
