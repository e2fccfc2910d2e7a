//! Builds the complete task list of a directory-mode call.
//!
//! Downloads page through the remote listing until the continuation cursor
//! runs out; uploads walk the local tree. Every destination is validated
//! while the batch is built, so nothing is transferred if any item is unsafe.

use std::path::{Path, PathBuf};

use stowage_protocol::{
    DeleteMarker, ListObjectsRequest, ListVersionsRequest, ObjectSummary, ObjectVersion,
    PATH_SEPARATOR,
};
use stowage_store::ObjectStore;
use stowage_transfer::{
    TransferBatch, TransferDirection, TransferError, TransferTask, validate_destination,
};
use tracing::debug;

use crate::error::BulkError;
use crate::run_blocking;

/// Full result of a (possibly delimited) object listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectListing {
    /// Rolled-up "folders"; empty for recursive listings.
    pub prefixes: Vec<String>,
    pub objects: Vec<ObjectSummary>,
}

/// Full result of a (possibly delimited) version listing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VersionListing {
    /// Rolled-up "folders"; empty for recursive listings.
    pub prefixes: Vec<String>,
    pub versions: Vec<ObjectVersion>,
    pub delete_markers: Vec<DeleteMarker>,
}

/// Lists every object under `prefix`, concatenating pages in order.
pub async fn list_all_objects(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    delimiter: Option<&str>,
) -> Result<ObjectListing, BulkError> {
    let mut request = ListObjectsRequest::new(bucket, prefix);
    request.delimiter = delimiter.map(str::to_string);

    let mut listing = ObjectListing::default();
    let mut pages = 0usize;
    loop {
        let page = store.list_objects(&request).await?;
        pages += 1;

        listing.objects.extend(page.items);
        listing
            .prefixes
            .extend(page.common_prefixes.into_iter().map(|p| p.prefix));

        if !page.truncated {
            break;
        }
        // A truncated page without a cursor cannot be continued.
        let Some(token) = page.next_token else {
            debug!(bucket, prefix, pages, "truncated listing without continuation token");
            break;
        };
        request.continuation_token = Some(token);
    }

    debug!(
        bucket,
        prefix,
        pages,
        objects = listing.objects.len(),
        prefixes = listing.prefixes.len(),
        "listing complete"
    );
    Ok(listing)
}

/// Lists every version and delete marker under `prefix`.
pub async fn list_all_versions(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    delimiter: Option<&str>,
) -> Result<VersionListing, BulkError> {
    let mut request = ListVersionsRequest::new(bucket, prefix);
    request.delimiter = delimiter.map(str::to_string);

    let mut listing = VersionListing::default();
    let mut pages = 0usize;
    loop {
        let page = store.list_object_versions(&request).await?;
        pages += 1;

        listing.versions.extend(page.versions);
        listing.delete_markers.extend(page.delete_markers);
        listing
            .prefixes
            .extend(page.common_prefixes.into_iter().map(|p| p.prefix));

        if !page.truncated {
            break;
        }
        let Some(key_marker) = page.next_key_marker else {
            debug!(bucket, prefix, pages, "truncated version listing without key marker");
            break;
        };
        request.key_marker = Some(key_marker);
        request.version_id_marker = page.next_version_id_marker;
    }

    debug!(
        bucket,
        prefix,
        pages,
        versions = listing.versions.len(),
        delete_markers = listing.delete_markers.len(),
        "version listing complete"
    );
    Ok(listing)
}

/// Builds the download batch for every object under `prefix`.
///
/// Each object lands at `dest_root / (key minus prefix)`. Keys whose
/// remainder is empty or ends in `/` are folder placeholders and are skipped.
pub async fn plan_download(
    store: &dyn ObjectStore,
    bucket: &str,
    prefix: &str,
    dest_root: &Path,
) -> Result<TransferBatch, BulkError> {
    let listing = list_all_objects(store, bucket, prefix, None).await?;

    let mut entries = Vec::with_capacity(listing.objects.len());
    for object in listing.objects {
        let relative = object.key.strip_prefix(prefix).ok_or_else(|| {
            TransferError::InvalidPath(format!(
                "listed key {:?} is outside prefix {prefix:?}",
                object.key
            ))
        })?;

        if relative.is_empty() || relative.ends_with(PATH_SEPARATOR) {
            debug!(key = %object.key, "skipping folder placeholder");
            continue;
        }

        let relative = relative.to_string();
        entries.push((object.key, relative, object.size));
    }

    let dest_root = dest_root.to_path_buf();
    let tasks = run_blocking(move || {
        entries
            .into_iter()
            .map(|(key, relative, size)| {
                let local_path = validate_destination(&dest_root, &relative)?;
                Ok(TransferTask::new(key, local_path, size))
            })
            .collect::<Result<Vec<_>, BulkError>>()
    })
    .await?;

    Ok(TransferBatch::new(bucket, TransferDirection::Download, tasks))
}

/// Builds the upload batch for every regular file under `src_root`.
pub fn plan_upload(src_root: &Path, bucket: &str, key_prefix: &str) -> Result<TransferBatch, BulkError> {
    let files = scan_files(src_root)?;

    let tasks = files
        .into_iter()
        .map(|file| {
            let key = remote_key_for(key_prefix, &file.relative_path);
            TransferTask::new(key, file.path, file.size)
        })
        .collect();

    Ok(TransferBatch::new(bucket, TransferDirection::Upload, tasks))
}

/// Maps a relative local path to its remote key.
///
/// An empty or `/`-terminated destination key is a prefix the relative path
/// is appended to; any other destination key is used verbatim.
pub fn remote_key_for(dest_key: &str, relative_path: &str) -> String {
    if dest_key.is_empty() || dest_key.ends_with(PATH_SEPARATOR) {
        format!("{dest_key}{relative_path}")
    } else {
        dest_key.to_string()
    }
}

/// A regular file found under an upload root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub path: PathBuf,
    /// Path relative to the root, `/`-separated on every platform.
    pub relative_path: String,
    pub size: u64,
}

/// Recursively collects the regular files under `root`, in name order.
///
/// Symlinks to files are followed; symlinked directories are not descended.
pub fn scan_files(root: &Path) -> Result<Vec<ScannedFile>, BulkError> {
    let mut files = Vec::new();
    walk_dir(root, root, &mut files)?;
    Ok(files)
}

fn walk_dir(root: &Path, current: &Path, files: &mut Vec<ScannedFile>) -> Result<(), BulkError> {
    let mut entries = std::fs::read_dir(current)?.collect::<Result<Vec<_>, _>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let path = entry.path();
        let file_type = entry.file_type()?;

        if file_type.is_dir() {
            walk_dir(root, &path, files)?;
            continue;
        }

        let metadata = if file_type.is_symlink() {
            match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    debug!(path = %path.display(), error = %e, "skipping dangling symlink");
                    continue;
                }
            }
        } else {
            entry.metadata()?
        };
        if !metadata.is_file() {
            continue;
        }

        let rel_path = path.strip_prefix(root).map_err(std::io::Error::other)?;
        // Normalize to forward slashes.
        let relative_path = rel_path.to_string_lossy().replace('\\', "/");

        files.push(ScannedFile {
            path,
            relative_path,
            size: metadata.len(),
        });
    }

    Ok(())
}
