//! Building blocks of a bulk transfer: tasks and batches, destination path
//! safety, a shared batch progress counter and chunked local file I/O.

mod chunked;
mod progress;
mod types;
mod validation;

use std::path::PathBuf;

pub use chunked::{ChunkReader, ChunkWriter, checksum_bytes};
pub use progress::{DEFAULT_PROGRESS_TEMPLATE, ProgressAggregator, ProgressSink, ProgressState};
pub use types::{TransferBatch, TransferDirection, TransferTask};
pub use validation::{check_reserved, is_reserved_name, validate_destination};

/// Default chunk size for local file I/O: 8 MiB.
pub const DEFAULT_CHUNK_SIZE: usize = 8 * 1024 * 1024;

/// Errors produced by the transfer crate.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{} resolves outside of destination directory {}", path.display(), root.display())]
    PathEscape { path: PathBuf, root: PathBuf },

    #[error("reserved file name: {}", .0.display())]
    ReservedName(PathBuf),

    #[error("invalid path: {0}")]
    InvalidPath(String),
}

impl TransferError {
    /// Returns `true` for errors that reject a destination path.
    pub fn is_path_safety(&self) -> bool {
        matches!(
            self,
            TransferError::PathEscape { .. }
                | TransferError::ReservedName(_)
                | TransferError::InvalidPath(_)
        )
    }
}
