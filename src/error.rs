use thiserror::Error;

use crate::domain::ids::WorkloadKey;

#[derive(Debug, Error)]
pub enum Error {
    #[error("File not found or could not be read: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse cluster state JSON: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("Invalid quantity notation: {0:?}")]
    InvalidQuantity(String),

    #[error("Invalid object: {0}")]
    InvalidObject(String),

    #[error("Object not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency loss against the external store. Retried with
    /// backoff inside the operation that hit it.
    #[error("Store conflict on workload {key}: expected version {expected}, found {found}")]
    Conflict { key: WorkloadKey, expected: u64, found: u64 },

    /// The external store could not be reached. Surfaced to the scheduler pass,
    /// which requeues the affected workload and retries next pass.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A programmer invariant was violated (e.g. admitting a workload that is
    /// already admitted). The current pass is aborted; the periodic resync
    /// recovers the cache from the store.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),
}

pub type Result<T> = std::result::Result<T, Error>;
