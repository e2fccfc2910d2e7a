//! Shared vocabulary between the object store and the bulk transfer engine.
//!
//! - [`path`]: the `bucket/key...` path convention and trailing-separator semantics
//! - [`types`]: listing pages, versions and head results returned by a store
//! - [`metadata`]: the opaque per-object metadata blob and its reserved slot

pub mod metadata;
pub mod path;
pub mod types;

// Re-export primary types for convenience.
pub use metadata::{
    METADATA_SLOT, MetadataSlots, ObjectMetadata, decode_metadata, encode_metadata, from_slots,
    to_slots,
};
pub use path::{PATH_SEPARATOR, RemotePath, is_dir_path, split_path};
pub use types::{
    CommonPrefix, DeleteMarker, HeadObjectOutput, ListObjectsPage, ListObjectsRequest,
    ListVersionsPage, ListVersionsRequest, ObjectSummary, ObjectVersion,
};

/// Errors produced by the protocol crate.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid remote path: {0}")]
    InvalidPath(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] serde_json::Error),
}
