//! Store error types.

use stowage_transfer::TransferError;

/// Errors produced by an object store or its transfer engine.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no such bucket: {0}")]
    NoSuchBucket(String),

    #[error("object not found: {bucket}/{key}")]
    NotFound { bucket: String, key: String },

    #[error("remote error: {0}")]
    Remote(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("local file error: {0}")]
    Local(#[from] TransferError),

    #[error("transfer cancelled")]
    Cancelled,

    #[error("transfer task failed: {0}")]
    Join(String),
}

impl StoreError {
    /// Returns `true` if the bucket or object does not exist.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StoreError::NotFound { .. } | StoreError::NoSuchBucket(_)
        )
    }
}
