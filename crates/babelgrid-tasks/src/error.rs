use babelgrid_store::StoreError;
use thiserror::Error;

/// Errors from task persistence and queue operations.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The coordination store failed. Queue and claim operations surface
    /// this; advisory reads (stats, estimates) swallow it instead.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// A stored record could not be decoded.
    #[error("task record {task_id} is corrupt: {reason}")]
    Corrupt { task_id: String, reason: String },

    /// A record could not be serialized for storage.
    #[error("failed to encode task record: {0}")]
    Encode(#[from] serde_json::Error),
}
