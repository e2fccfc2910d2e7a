//! Bulk transfers between a local filesystem and an object store.
//!
//! This crate implements the **directory-level transfer engine**. Storage is
//! reached only through the [`ObjectStore`](stowage_store::ObjectStore) and
//! [`TransferEngine`](stowage_store::TransferEngine) traits, so any backend
//! (or a mock) can be plugged in.
//!
//! # Pipeline
//!
//! 1. **Check**: trailing-separator semantics and version flags, before any I/O
//! 2. **Enumerate**: list the remote prefix or walk the local tree, validating
//!    every destination path; the whole batch and its total size are known
//!    before step 3
//! 3. **Schedule**: submit every unit transfer, feeding one shared progress
//!    counter, then wait on them in submission order; the first failure wins

pub mod client;
pub mod config;
pub mod enumerator;
pub mod error;
pub mod scheduler;

// Re-export primary types for convenience.
pub use client::TransferClient;
pub use config::BulkConfig;
pub use enumerator::{
    ObjectListing, VersionListing, list_all_objects, list_all_versions, plan_download,
    plan_upload, remote_key_for, scan_files,
};
pub use error::BulkError;
pub use scheduler::TransferScheduler;

use stowage_store::StoreError;

/// Runs filesystem work (tree walks, path resolution) on tokio's blocking pool.
pub(crate) async fn run_blocking<T, F>(work: F) -> Result<T, BulkError>
where
    F: FnOnce() -> Result<T, BulkError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| StoreError::Join(e.to_string()))?
}
