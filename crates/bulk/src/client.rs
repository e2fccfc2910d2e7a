//! Top-level transfer operations.
//!
//! Remote paths are `"bucket/key..."` strings. A trailing `/` on a source or
//! destination (remote or local) selects directory semantics; its absence
//! selects a single object. All semantic checks run before any I/O.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use stowage_protocol::{
    ObjectMetadata, PATH_SEPARATOR, RemotePath, from_slots, is_dir_path, split_path, to_slots,
};
use stowage_store::{ObjectStore, TransferEngine};
use stowage_transfer::{
    ProgressState, TransferBatch, TransferDirection, TransferTask, check_reserved,
    validate_destination,
};
use tracing::{debug, info};

use crate::config::BulkConfig;
use crate::enumerator::{
    ObjectListing, VersionListing, list_all_objects, list_all_versions, plan_download, plan_upload,
    remote_key_for,
};
use crate::error::BulkError;
use crate::run_blocking;
use crate::scheduler::TransferScheduler;

/// Entry point for transfers against one object store.
///
/// Construct once and pass it by reference; it holds no hidden global state.
pub struct TransferClient {
    store: Arc<dyn ObjectStore>,
    engine: Arc<dyn TransferEngine>,
    config: BulkConfig,
}

impl TransferClient {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        engine: Arc<dyn TransferEngine>,
        config: BulkConfig,
    ) -> Self {
        Self {
            store,
            engine,
            config,
        }
    }

    pub fn config(&self) -> &BulkConfig {
        &self.config
    }

    /// Downloads one object, or every object under a prefix.
    ///
    /// A source ending in `/` is a prefix: `dest` must then be a local
    /// directory path ending in `/`, and `version` must be `None`. For a
    /// single object, a `dest` ending in `/` receives the key's base name.
    pub async fn download_file(
        &self,
        src: &str,
        dest: &str,
        version: Option<&str>,
    ) -> Result<ProgressState, BulkError> {
        let remote = split_path(src)?;

        if is_dir_path(src) {
            if version.is_some() {
                return Err(BulkError::Configuration(
                    "cannot specify a version id for a directory".into(),
                ));
            }
            if !is_dir_path(dest) {
                return Err(BulkError::Configuration(format!(
                    "destination {dest:?} must end in {PATH_SEPARATOR}"
                )));
            }

            let batch =
                plan_download(self.store.as_ref(), &remote.bucket, &remote.key, Path::new(dest))
                    .await?;
            info!(
                bucket = %remote.bucket,
                prefix = %remote.key,
                files = batch.len(),
                total_bytes = batch.total_size(),
                "downloading directory"
            );
            return self.scheduler().execute(batch).await;
        }

        let head = self
            .store
            .head_object(&remote.bucket, &remote.key, version)
            .await?;

        let local_path = if is_dir_path(dest) {
            let dest_dir = PathBuf::from(dest);
            let base_name = remote.base_name().to_string();
            run_blocking(move || Ok(validate_destination(&dest_dir, &base_name)?)).await?
        } else {
            PathBuf::from(dest)
        };
        check_reserved(&local_path)?;

        debug!(
            bucket = %remote.bucket,
            key = %remote.key,
            size = head.size,
            dest = %local_path.display(),
            "downloading object"
        );
        let task = TransferTask::new(remote.key, local_path, head.size)
            .with_version(version.map(str::to_string));
        let batch = TransferBatch::new(remote.bucket, TransferDirection::Download, vec![task]);
        self.scheduler().execute(batch).await
    }

    /// Uploads one local file, or every file under a local directory.
    ///
    /// `metadata` is attached to every uploaded object.
    pub async fn upload_file(
        &self,
        src: &str,
        dest: &str,
        metadata: &ObjectMetadata,
    ) -> Result<ProgressState, BulkError> {
        let src_path = PathBuf::from(src);
        let is_dir = tokio::fs::metadata(&src_path)
            .await
            .is_ok_and(|m| m.is_dir());

        if is_dir_path(src) {
            if !is_dir {
                return Err(BulkError::Configuration(format!(
                    "source {src:?} is not a directory"
                )));
            }
            if !is_dir_path(dest) {
                return Err(BulkError::Configuration(format!(
                    "destination {dest:?} must end in {PATH_SEPARATOR}"
                )));
            }
        } else if is_dir {
            return Err(BulkError::Configuration(format!(
                "source {src:?} is a directory; must end in {PATH_SEPARATOR}"
            )));
        }

        let remote = split_path(dest)?;
        let batch = {
            let remote = remote.clone();
            run_blocking(move || {
                if is_dir {
                    plan_upload(&src_path, &remote.bucket, &remote.key)
                } else {
                    single_upload(&src_path, &remote)
                }
            })
            .await?
        };

        info!(
            bucket = %remote.bucket,
            key = %remote.key,
            files = batch.len(),
            total_bytes = batch.total_size(),
            "uploading"
        );
        self.scheduler()
            .with_metadata(metadata)?
            .execute(batch)
            .await
    }

    /// Fetches a small object and its decoded metadata in one request.
    pub async fn download_bytes(
        &self,
        path: &str,
        version: Option<&str>,
    ) -> Result<(Vec<u8>, ObjectMetadata), BulkError> {
        let remote = split_path(path)?;
        let output = self
            .store
            .get_bytes(&remote.bucket, &remote.key, version)
            .await?;
        let metadata = from_slots(&output.metadata)?;
        Ok((output.data, metadata))
    }

    /// Stores a small object with metadata in one request.
    pub async fn upload_bytes(
        &self,
        data: Vec<u8>,
        path: &str,
        metadata: &ObjectMetadata,
    ) -> Result<(), BulkError> {
        let remote = split_path(path)?;
        let slots = to_slots(metadata)?;
        self.store
            .put_bytes(&remote.bucket, &remote.key, data, slots)
            .await?;
        Ok(())
    }

    pub async fn delete_object(&self, path: &str) -> Result<(), BulkError> {
        let remote = split_path(path)?;
        self.store.delete_object(&remote.bucket, &remote.key).await?;
        debug!(bucket = %remote.bucket, key = %remote.key, "deleted object");
        Ok(())
    }

    /// Lists objects under `path`.
    ///
    /// Non-recursive listings stop at the next `/` and report the rolled-up
    /// prefixes separately.
    pub async fn list_objects(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<ObjectListing, BulkError> {
        let remote = split_path(path)?;
        list_all_objects(
            self.store.as_ref(),
            &remote.bucket,
            &remote.key,
            delimiter(recursive),
        )
        .await
    }

    /// Lists object versions and delete markers under `path`.
    pub async fn list_object_versions(
        &self,
        path: &str,
        recursive: bool,
    ) -> Result<VersionListing, BulkError> {
        let remote = split_path(path)?;
        list_all_versions(
            self.store.as_ref(),
            &remote.bucket,
            &remote.key,
            delimiter(recursive),
        )
        .await
    }

    fn scheduler(&self) -> TransferScheduler<'_> {
        TransferScheduler::new(self.engine.as_ref(), &self.config)
    }
}

fn delimiter(recursive: bool) -> Option<&'static str> {
    (!recursive).then_some("/")
}

fn single_upload(src: &Path, remote: &RemotePath) -> Result<TransferBatch, BulkError> {
    let size = std::fs::metadata(src)?.len();
    let file_name = src
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| BulkError::Configuration(format!("source {src:?} has no file name")))?;

    let key = remote_key_for(&remote.key, &file_name);
    let task = TransferTask::new(key, src, size);
    Ok(TransferBatch::new(
        remote.bucket.clone(),
        TransferDirection::Upload,
        vec![task],
    ))
}
