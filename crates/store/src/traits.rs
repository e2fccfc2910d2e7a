//! Object store and transfer engine traits.
//!
//! Futures are boxed by hand so the traits stay object-safe and can be shared
//! as `Arc<dyn ObjectStore>` across tasks.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use stowage_protocol::{
    HeadObjectOutput, ListObjectsPage, ListObjectsRequest, ListVersionsPage, ListVersionsRequest,
    MetadataSlots,
};
use stowage_transfer::ProgressSink;

use crate::error::StoreError;
use crate::handle::TransferHandle;

/// Boxed future returned by [`ObjectStore`] calls.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Body and metadata of a fetched object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetObjectOutput {
    pub data: Vec<u8>,
    pub metadata: MetadataSlots,
    pub version_id: Option<String>,
}

/// Request-level access to a bucket/key object store.
pub trait ObjectStore: Send + Sync {
    /// Returns one page of objects under a prefix.
    fn list_objects(&self, request: &ListObjectsRequest) -> StoreFuture<'_, ListObjectsPage>;

    /// Returns one page of object versions and delete markers under a prefix.
    fn list_object_versions(
        &self,
        request: &ListVersionsRequest,
    ) -> StoreFuture<'_, ListVersionsPage>;

    /// Fetches one object's size and metadata without its body.
    fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreFuture<'_, HeadObjectOutput>;

    /// Fetches a (small) object in one response.
    fn get_bytes(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreFuture<'_, GetObjectOutput>;

    /// Stores a (small) object in one request.
    fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: MetadataSlots,
    ) -> StoreFuture<'_, ()>;

    /// Deletes one object.
    fn delete_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, ()>;
}

/// Parameters of one object download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadRequest {
    pub bucket: String,
    pub key: String,
    pub local_path: PathBuf,
    /// Already-known object size; spares the engine its own head request.
    pub size_hint: Option<u64>,
    pub version_id: Option<String>,
}

/// Parameters of one file upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub local_path: PathBuf,
    pub bucket: String,
    pub key: String,
    pub metadata: MetadataSlots,
}

/// Runs unit transfers concurrently in the background.
///
/// Submission returns immediately; the engine decides how many transfers run
/// at once. Byte counts go to `progress` as they move. Must be called from
/// within a tokio runtime.
pub trait TransferEngine: Send + Sync {
    /// Starts downloading one object to a local file.
    fn download(&self, request: DownloadRequest, progress: Arc<dyn ProgressSink>)
    -> TransferHandle;

    /// Starts uploading one local file to an object.
    fn upload(&self, request: UploadRequest, progress: Arc<dyn ProgressSink>) -> TransferHandle;
}
