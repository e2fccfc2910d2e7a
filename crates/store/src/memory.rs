//! In-process, versioned object store.
//!
//! Keeps every bucket in memory and implements both [`ObjectStore`] and
//! [`TransferEngine`]. Unit transfers run as tokio tasks bounded by a
//! semaphore and move file bytes in chunks, reporting each chunk to the
//! progress sink, the way a multipart engine would.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use serde::{Deserialize, Serialize};
use stowage_protocol::{
    CommonPrefix, DeleteMarker, HeadObjectOutput, ListObjectsPage, ListObjectsRequest,
    ListVersionsPage, ListVersionsRequest, MetadataSlots, ObjectSummary, ObjectVersion,
};
use stowage_transfer::{ChunkReader, ChunkWriter, DEFAULT_CHUNK_SIZE, ProgressSink, checksum_bytes};
use tokio::sync::Semaphore;
use tracing::debug;

use crate::error::StoreError;
use crate::handle::TransferHandle;
use crate::traits::{
    DownloadRequest, GetObjectOutput, ObjectStore, StoreFuture, TransferEngine, UploadRequest,
};

/// Tuning for [`MemoryStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStoreConfig {
    /// Maximum entries per listing page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Bytes moved (and reported) per step of a unit transfer.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Unit transfers allowed to run at once.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
}

fn default_page_size() -> usize {
    1000
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_max_concurrency() -> usize {
    10
}

impl Default for MemoryStoreConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_size: default_chunk_size(),
            max_concurrency: default_max_concurrency(),
        }
    }
}

/// Number of calls a [`MemoryStore`] has served, per operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub list_objects: usize,
    pub list_object_versions: usize,
    pub head_object: usize,
    pub get_bytes: usize,
    pub put_bytes: usize,
    pub delete_object: usize,
    pub download: usize,
    pub upload: usize,
}

#[derive(Default)]
struct Counters {
    list_objects: AtomicUsize,
    list_object_versions: AtomicUsize,
    head_object: AtomicUsize,
    get_bytes: AtomicUsize,
    put_bytes: AtomicUsize,
    delete_object: AtomicUsize,
    download: AtomicUsize,
    upload: AtomicUsize,
}

impl Counters {
    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> CallCounts {
        CallCounts {
            list_objects: self.list_objects.load(Ordering::Relaxed),
            list_object_versions: self.list_object_versions.load(Ordering::Relaxed),
            head_object: self.head_object.load(Ordering::Relaxed),
            get_bytes: self.get_bytes.load(Ordering::Relaxed),
            put_bytes: self.put_bytes.load(Ordering::Relaxed),
            delete_object: self.delete_object.load(Ordering::Relaxed),
            download: self.download.load(Ordering::Relaxed),
            upload: self.upload.load(Ordering::Relaxed),
        }
    }
}

/// One stored version; `body: None` is a delete marker.
#[derive(Debug, Clone)]
struct StoredVersion {
    version_id: String,
    body: Option<Arc<Vec<u8>>>,
    metadata: MetadataSlots,
    last_modified: String,
    etag: String,
}

impl StoredVersion {
    fn object(body: Vec<u8>, metadata: MetadataSlots) -> Self {
        Self {
            version_id: uuid::Uuid::new_v4().to_string(),
            etag: checksum_bytes(&body),
            body: Some(Arc::new(body)),
            metadata,
            last_modified: chrono::Utc::now().to_rfc3339(),
        }
    }

    fn delete_marker() -> Self {
        Self {
            version_id: uuid::Uuid::new_v4().to_string(),
            body: None,
            metadata: MetadataSlots::new(),
            last_modified: chrono::Utc::now().to_rfc3339(),
            etag: String::new(),
        }
    }

    fn size(&self) -> u64 {
        self.body.as_ref().map_or(0, |b| b.len() as u64)
    }
}

/// Versions of every key in a bucket, oldest first.
type Bucket = BTreeMap<String, Vec<StoredVersion>>;

struct Shared {
    config: MemoryStoreConfig,
    buckets: RwLock<HashMap<String, Bucket>>,
    failures: Mutex<HashSet<(String, String)>>,
    permits: Arc<Semaphore>,
    calls: Counters,
}

/// Versioned bucket store held entirely in memory.
///
/// Cloning is cheap; clones share the same buckets.
#[derive(Clone)]
pub struct MemoryStore {
    shared: Arc<Shared>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(MemoryStoreConfig::default())
    }
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(config: MemoryStoreConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_concurrency.max(1)));
        Self {
            shared: Arc::new(Shared {
                config,
                buckets: RwLock::new(HashMap::new()),
                failures: Mutex::new(HashSet::new()),
                permits,
                calls: Counters::default(),
            }),
        }
    }

    /// Returns the store's configuration.
    pub fn config(&self) -> &MemoryStoreConfig {
        &self.shared.config
    }

    /// Creates `bucket` if it does not exist yet.
    pub fn create_bucket(&self, bucket: &str) {
        self.shared
            .write_buckets()
            .entry(bucket.to_string())
            .or_default();
    }

    /// Stores a new version of `bucket/key`, creating the bucket if needed.
    ///
    /// Returns the new version id.
    pub fn insert_object(
        &self,
        bucket: &str,
        key: &str,
        data: impl Into<Vec<u8>>,
        metadata: MetadataSlots,
    ) -> String {
        let version = StoredVersion::object(data.into(), metadata);
        let version_id = version.version_id.clone();
        self.shared
            .write_buckets()
            .entry(bucket.to_string())
            .or_default()
            .entry(key.to_string())
            .or_default()
            .push(version);
        version_id
    }

    /// Returns the body of the latest live version of `bucket/key`.
    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.shared
            .find_version(bucket, key, None)
            .ok()
            .and_then(|v| v.body.map(|b| b.as_ref().clone()))
    }

    /// Returns the user-metadata slots of the latest live version.
    pub fn object_metadata(&self, bucket: &str, key: &str) -> Option<MetadataSlots> {
        self.shared
            .find_version(bucket, key, None)
            .ok()
            .map(|v| v.metadata)
    }

    /// Makes every later unit transfer of `bucket/key` fail.
    pub fn fail_transfers_for(&self, bucket: &str, key: &str) {
        self.shared
            .failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert((bucket.to_string(), key.to_string()));
    }

    /// Calls served so far, per operation.
    pub fn calls(&self) -> CallCounts {
        self.shared.calls.snapshot()
    }
}

impl Shared {
    fn read_buckets(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, Bucket>> {
        self.buckets.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_buckets(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, Bucket>> {
        self.buckets.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn check_injected_failure(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let failures = self.failures.lock().unwrap_or_else(PoisonError::into_inner);
        if failures.contains(&(bucket.to_string(), key.to_string())) {
            return Err(StoreError::Remote(format!(
                "injected failure for {bucket}/{key}"
            )));
        }
        Ok(())
    }

    /// Finds a specific or the latest version; delete markers are not found.
    fn find_version(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> Result<StoredVersion, StoreError> {
        let buckets = self.read_buckets();
        let objects = buckets
            .get(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        let not_found = || StoreError::NotFound {
            bucket: bucket.to_string(),
            key: key.to_string(),
        };

        let versions = objects.get(key).ok_or_else(not_found)?;
        let version = match version_id {
            Some(id) => versions.iter().find(|v| v.version_id == id),
            None => versions.last(),
        }
        .ok_or_else(not_found)?;

        if version.body.is_none() {
            return Err(not_found());
        }
        Ok(version.clone())
    }

    fn put_version(&self, bucket: &str, key: &str, version: StoredVersion) -> Result<(), StoreError> {
        let mut buckets = self.write_buckets();
        let objects = buckets
            .get_mut(bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(bucket.to_string()))?;
        objects.entry(key.to_string()).or_default().push(version);
        Ok(())
    }

    fn ensure_bucket(&self, bucket: &str) -> Result<(), StoreError> {
        if self.read_buckets().contains_key(bucket) {
            Ok(())
        } else {
            Err(StoreError::NoSuchBucket(bucket.to_string()))
        }
    }

    fn page_size(&self) -> usize {
        self.config.page_size.max(1)
    }

    fn list_objects_page(&self, req: &ListObjectsRequest) -> Result<ListObjectsPage, StoreError> {
        let buckets = self.read_buckets();
        let objects = buckets
            .get(&req.bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(req.bucket.clone()))?;

        let mut entries: Vec<ListEntry> = Vec::new();
        for (key, versions) in objects.iter().filter(|(k, _)| k.starts_with(&req.prefix)) {
            let Some(latest) = versions.last().filter(|v| v.body.is_some()) else {
                continue;
            };
            if let Some(prefix) = rolled_up_prefix(key, &req.prefix, req.delimiter.as_deref()) {
                if !matches!(entries.last(), Some(ListEntry::Prefix(p)) if *p == prefix) {
                    entries.push(ListEntry::Prefix(prefix));
                }
                continue;
            }
            entries.push(ListEntry::Object(ObjectSummary {
                key: key.clone(),
                size: latest.size(),
                last_modified: latest.last_modified.clone(),
                etag: latest.etag.clone(),
            }));
        }

        let token = req.continuation_token.as_deref();
        let mut remaining = entries
            .into_iter()
            .filter(|e| token.is_none_or(|t| e.name() > t));
        let page: Vec<ListEntry> = remaining.by_ref().take(self.page_size()).collect();
        let truncated = remaining.next().is_some();
        let next_token = if truncated {
            page.last().map(|e| e.name().to_string())
        } else {
            None
        };

        let mut out = ListObjectsPage {
            truncated,
            next_token,
            ..ListObjectsPage::default()
        };
        for entry in page {
            match entry {
                ListEntry::Object(summary) => out.items.push(summary),
                ListEntry::Prefix(prefix) => out.common_prefixes.push(CommonPrefix { prefix }),
            }
        }
        Ok(out)
    }

    fn list_versions_page(&self, req: &ListVersionsRequest) -> Result<ListVersionsPage, StoreError> {
        let buckets = self.read_buckets();
        let objects = buckets
            .get(&req.bucket)
            .ok_or_else(|| StoreError::NoSuchBucket(req.bucket.clone()))?;

        let mut entries: Vec<VersionEntry> = Vec::new();
        for (key, versions) in objects.iter().filter(|(k, _)| k.starts_with(&req.prefix)) {
            if let Some(prefix) = rolled_up_prefix(key, &req.prefix, req.delimiter.as_deref()) {
                if !matches!(entries.last(), Some(VersionEntry::Prefix(p)) if *p == prefix) {
                    entries.push(VersionEntry::Prefix(prefix));
                }
                continue;
            }
            // Newest first, as object stores report them.
            for (i, v) in versions.iter().rev().enumerate() {
                let is_latest = i == 0;
                if v.body.is_some() {
                    entries.push(VersionEntry::Version(ObjectVersion {
                        key: key.clone(),
                        version_id: v.version_id.clone(),
                        is_latest,
                        size: v.size(),
                        last_modified: v.last_modified.clone(),
                        etag: v.etag.clone(),
                    }));
                } else {
                    entries.push(VersionEntry::Marker(DeleteMarker {
                        key: key.clone(),
                        version_id: v.version_id.clone(),
                        is_latest,
                        last_modified: v.last_modified.clone(),
                    }));
                }
            }
        }

        let start = match req.key_marker.as_deref() {
            None => 0,
            Some(key_marker) => {
                let version_marker = req.version_id_marker.as_deref().unwrap_or("");
                entries
                    .iter()
                    .position(|e| e.marker() == (key_marker, version_marker))
                    .map(|p| p + 1)
                    .or_else(|| entries.iter().position(|e| e.marker().0 > key_marker))
                    .unwrap_or(entries.len())
            }
        };

        let mut remaining = entries.into_iter().skip(start);
        let page: Vec<VersionEntry> = remaining.by_ref().take(self.page_size()).collect();
        let truncated = remaining.next().is_some();

        let mut out = ListVersionsPage {
            truncated,
            ..ListVersionsPage::default()
        };
        if truncated && let Some(last) = page.last() {
            let (key, version) = last.marker();
            out.next_key_marker = Some(key.to_string());
            out.next_version_id_marker = Some(version.to_string());
        }
        for entry in page {
            match entry {
                VersionEntry::Version(v) => out.versions.push(v),
                VersionEntry::Marker(m) => out.delete_markers.push(m),
                VersionEntry::Prefix(prefix) => out.common_prefixes.push(CommonPrefix { prefix }),
            }
        }
        Ok(out)
    }
}

enum ListEntry {
    Object(ObjectSummary),
    Prefix(String),
}

impl ListEntry {
    fn name(&self) -> &str {
        match self {
            ListEntry::Object(o) => &o.key,
            ListEntry::Prefix(p) => p,
        }
    }
}

enum VersionEntry {
    Version(ObjectVersion),
    Marker(DeleteMarker),
    Prefix(String),
}

impl VersionEntry {
    fn marker(&self) -> (&str, &str) {
        match self {
            VersionEntry::Version(v) => (&v.key, &v.version_id),
            VersionEntry::Marker(m) => (&m.key, &m.version_id),
            VersionEntry::Prefix(p) => (p, ""),
        }
    }
}

/// Returns the common prefix `key` rolls up into, if the delimiter occurs
/// after `prefix`.
fn rolled_up_prefix(key: &str, prefix: &str, delimiter: Option<&str>) -> Option<String> {
    let delimiter = delimiter.filter(|d| !d.is_empty())?;
    let rest = &key[prefix.len()..];
    rest.find(delimiter)
        .map(|idx| key[..prefix.len() + idx + delimiter.len()].to_string())
}

fn write_body(
    path: &Path,
    body: &[u8],
    chunk_size: usize,
    progress: &dyn ProgressSink,
) -> Result<u64, StoreError> {
    let mut writer = ChunkWriter::create(path)?;
    for chunk in body.chunks(chunk_size.max(1)) {
        let n = writer.write_chunk(chunk)?;
        progress.on_bytes(n);
    }
    Ok(writer.finish()?)
}

fn read_body(path: &Path, chunk_size: usize, progress: &dyn ProgressSink) -> Result<Vec<u8>, StoreError> {
    let mut reader = ChunkReader::new(path, chunk_size)?;
    let mut body = Vec::with_capacity(reader.file_size() as usize);
    while let Some(chunk) = reader.next_chunk()? {
        progress.on_bytes(chunk.len() as u64);
        body.extend_from_slice(&chunk);
    }
    Ok(body)
}

impl ObjectStore for MemoryStore {
    fn list_objects(&self, request: &ListObjectsRequest) -> StoreFuture<'_, ListObjectsPage> {
        Counters::bump(&self.shared.calls.list_objects);
        let result = self.shared.list_objects_page(request);
        Box::pin(async move { result })
    }

    fn list_object_versions(
        &self,
        request: &ListVersionsRequest,
    ) -> StoreFuture<'_, ListVersionsPage> {
        Counters::bump(&self.shared.calls.list_object_versions);
        let result = self.shared.list_versions_page(request);
        Box::pin(async move { result })
    }

    fn head_object(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreFuture<'_, HeadObjectOutput> {
        Counters::bump(&self.shared.calls.head_object);
        let result = self
            .shared
            .find_version(bucket, key, version_id)
            .map(|v| HeadObjectOutput {
                size: v.size(),
                version_id: Some(v.version_id),
                metadata: v.metadata,
            });
        Box::pin(async move { result })
    }

    fn get_bytes(
        &self,
        bucket: &str,
        key: &str,
        version_id: Option<&str>,
    ) -> StoreFuture<'_, GetObjectOutput> {
        Counters::bump(&self.shared.calls.get_bytes);
        let result = self
            .shared
            .find_version(bucket, key, version_id)
            .map(|v| GetObjectOutput {
                data: v.body.map(|b| b.as_ref().clone()).unwrap_or_default(),
                metadata: v.metadata,
                version_id: Some(v.version_id),
            });
        Box::pin(async move { result })
    }

    fn put_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Vec<u8>,
        metadata: MetadataSlots,
    ) -> StoreFuture<'_, ()> {
        Counters::bump(&self.shared.calls.put_bytes);
        let result = self
            .shared
            .put_version(bucket, key, StoredVersion::object(data, metadata));
        Box::pin(async move { result })
    }

    fn delete_object(&self, bucket: &str, key: &str) -> StoreFuture<'_, ()> {
        Counters::bump(&self.shared.calls.delete_object);
        let result = self
            .shared
            .put_version(bucket, key, StoredVersion::delete_marker());
        Box::pin(async move { result })
    }
}

impl TransferEngine for MemoryStore {
    fn download(
        &self,
        request: DownloadRequest,
        progress: Arc<dyn ProgressSink>,
    ) -> TransferHandle {
        Counters::bump(&self.shared.calls.download);
        let shared = Arc::clone(&self.shared);

        TransferHandle::spawn(request.key.clone(), async move {
            let _permit = Arc::clone(&shared.permits)
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Cancelled)?;
            shared.check_injected_failure(&request.bucket, &request.key)?;

            let version =
                shared.find_version(&request.bucket, &request.key, request.version_id.as_deref())?;
            let body = version.body.unwrap_or_default();
            if request.size_hint.is_some_and(|hint| hint != body.len() as u64) {
                debug!(
                    key = %request.key,
                    hint = ?request.size_hint,
                    actual = body.len(),
                    "object size changed since listing"
                );
            }

            let chunk_size = shared.config.chunk_size;
            tokio::task::spawn_blocking(move || {
                write_body(&request.local_path, &body, chunk_size, progress.as_ref())
            })
            .await
            .map_err(|e| StoreError::Join(e.to_string()))?
        })
    }

    fn upload(&self, request: UploadRequest, progress: Arc<dyn ProgressSink>) -> TransferHandle {
        Counters::bump(&self.shared.calls.upload);
        let shared = Arc::clone(&self.shared);

        TransferHandle::spawn(request.key.clone(), async move {
            let _permit = Arc::clone(&shared.permits)
                .acquire_owned()
                .await
                .map_err(|_| StoreError::Cancelled)?;
            shared.check_injected_failure(&request.bucket, &request.key)?;
            shared.ensure_bucket(&request.bucket)?;

            let chunk_size = shared.config.chunk_size;
            let path = request.local_path.clone();
            let body = tokio::task::spawn_blocking(move || {
                read_body(&path, chunk_size, progress.as_ref())
            })
            .await
            .map_err(|e| StoreError::Join(e.to_string()))??;

            let size = body.len() as u64;
            shared.put_version(
                &request.bucket,
                &request.key,
                StoredVersion::object(body, request.metadata),
            )?;
            Ok(size)
        })
    }
}
