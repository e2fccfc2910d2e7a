//! Bulk transfer error types.

use stowage_protocol::ProtocolError;
use stowage_store::StoreError;
use stowage_transfer::TransferError;

/// Errors produced by a bulk transfer call. Any of them aborts the whole call.
#[derive(Debug, thiserror::Error)]
pub enum BulkError {
    /// Source/destination semantics disagree; raised before any I/O.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A local destination path was rejected, or local file access failed.
    #[error(transparent)]
    Local(#[from] TransferError),

    /// The first unit transfer that failed, in submission order.
    #[error("transfer of {key} failed: {source}")]
    UnitTransfer { key: String, source: StoreError },

    /// A listing, head or request against the store failed.
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid config file: {0}")]
    ConfigFile(#[from] toml::de::Error),
}

impl BulkError {
    /// Returns `true` if a destination path escaped its root or is reserved.
    pub fn is_path_safety(&self) -> bool {
        matches!(self, BulkError::Local(e) if e.is_path_safety())
    }

    /// Returns `true` for source/destination semantics errors.
    pub fn is_configuration(&self) -> bool {
        matches!(self, BulkError::Configuration(_))
    }
}
