//! Remote path strings.
//!
//! A remote path is written `bucket/key...`. A trailing `/` marks prefix
//! ("directory") semantics, its absence marks a single object.

use crate::ProtocolError;

/// Separator between bucket and key, and between key segments.
pub const PATH_SEPARATOR: char = '/';

/// A parsed `bucket/key` pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RemotePath {
    pub bucket: String,
    pub key: String,
}

impl RemotePath {
    /// Creates a path from its parts.
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Returns `true` if the key denotes a prefix (empty or `/`-terminated).
    pub fn is_prefix(&self) -> bool {
        self.key.is_empty() || self.key.ends_with(PATH_SEPARATOR)
    }

    /// Last `/`-separated segment of the key (empty for a prefix).
    pub fn base_name(&self) -> &str {
        self.key
            .rsplit(PATH_SEPARATOR)
            .next()
            .unwrap_or(self.key.as_str())
    }
}

impl std::fmt::Display for RemotePath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}{}", self.bucket, PATH_SEPARATOR, self.key)
    }
}

/// Returns `true` if `path` ends with the path separator.
pub fn is_dir_path(path: &str) -> bool {
    path.ends_with(PATH_SEPARATOR)
}

/// Splits `bucket/key...` into its bucket and key.
///
/// A leading separator is ignored. `"bucket"` and `"bucket/"` both yield an
/// empty key; the key keeps its trailing separator.
pub fn split_path(path: &str) -> Result<RemotePath, ProtocolError> {
    let trimmed = path.strip_prefix(PATH_SEPARATOR).unwrap_or(path);
    let (bucket, key) = match trimmed.split_once(PATH_SEPARATOR) {
        Some((bucket, key)) => (bucket, key),
        None => (trimmed, ""),
    };

    if bucket.is_empty() {
        return Err(ProtocolError::InvalidPath(format!(
            "missing bucket name: {path:?}"
        )));
    }

    Ok(RemotePath::new(bucket, key))
}
