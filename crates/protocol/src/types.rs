use serde::{Deserialize, Serialize};

use crate::metadata::MetadataSlots;

/// One object returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectSummary {
    pub key: String,
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

/// A rolled-up key prefix from a delimited listing (a "folder").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommonPrefix {
    pub prefix: String,
}

/// Parameters of one `ListObjects` page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListObjectsRequest {
    pub bucket: String,
    pub prefix: String,
    /// Rolls keys up to the first delimiter after the prefix when set.
    pub delimiter: Option<String>,
    /// Cursor from the previous page's `next_token`.
    pub continuation_token: Option<String>,
}

impl ListObjectsRequest {
    /// Request for the first page under `prefix`.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// One page of a `ListObjects` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListObjectsPage {
    #[serde(default)]
    pub items: Vec<ObjectSummary>,
    #[serde(default)]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    pub truncated: bool,
}

/// One stored version of an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectVersion {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    pub size: u64,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub etag: String,
}

/// A tombstone left by deleting an object in a versioned bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteMarker {
    pub key: String,
    pub version_id: String,
    pub is_latest: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_modified: String,
}

/// Parameters of one `ListObjectVersions` page request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListVersionsRequest {
    pub bucket: String,
    pub prefix: String,
    pub delimiter: Option<String>,
    pub key_marker: Option<String>,
    pub version_id_marker: Option<String>,
}

impl ListVersionsRequest {
    /// Request for the first page under `prefix`.
    pub fn new(bucket: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            prefix: prefix.into(),
            ..Self::default()
        }
    }
}

/// One page of a `ListObjectVersions` response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListVersionsPage {
    #[serde(default)]
    pub versions: Vec<ObjectVersion>,
    #[serde(default)]
    pub delete_markers: Vec<DeleteMarker>,
    #[serde(default)]
    pub common_prefixes: Vec<CommonPrefix>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_key_marker: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_version_id_marker: Option<String>,
    pub truncated: bool,
}

/// Result of probing a single object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadObjectOutput {
    pub size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    #[serde(default)]
    pub metadata: MetadataSlots,
}
