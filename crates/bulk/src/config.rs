//! Bulk transfer configuration.
//!
//! Stored as TOML; every field has a default so an empty file is valid:
//!
//! ```toml
//! show_progress = true
//! cancel_outstanding_on_failure = false
//! progress_template = "[{bar:40}] {bytes}/{total_bytes}"
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};
use stowage_transfer::DEFAULT_PROGRESS_TEMPLATE;

use crate::error::BulkError;

/// Behaviour of [`TransferClient`](crate::TransferClient) and
/// [`TransferScheduler`](crate::TransferScheduler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkConfig {
    /// Draw one progress bar per batch on stderr.
    #[serde(default = "default_true")]
    pub show_progress: bool,

    /// Abort still-running sibling transfers when one fails. When `false`
    /// they are left running after the error is returned.
    #[serde(default)]
    pub cancel_outstanding_on_failure: bool,

    /// indicatif template for the progress bar.
    #[serde(default = "default_progress_template")]
    pub progress_template: String,
}

fn default_true() -> bool {
    true
}

fn default_progress_template() -> String {
    DEFAULT_PROGRESS_TEMPLATE.into()
}

impl Default for BulkConfig {
    fn default() -> Self {
        Self {
            show_progress: default_true(),
            cancel_outstanding_on_failure: false,
            progress_template: default_progress_template(),
        }
    }
}

impl BulkConfig {
    /// Default configuration without a progress bar.
    pub fn quiet() -> Self {
        Self {
            show_progress: false,
            ..Self::default()
        }
    }

    /// Parses a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, BulkError> {
        Ok(toml::from_str(content)?)
    }

    /// Loads a TOML file.
    pub fn load(path: &Path) -> Result<Self, BulkError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_uses_defaults() {
        let config = BulkConfig::from_toml_str("").unwrap();
        assert_eq!(config, BulkConfig::default());
        assert!(config.show_progress);
        assert!(!config.cancel_outstanding_on_failure);
        assert_eq!(config.progress_template, DEFAULT_PROGRESS_TEMPLATE);
    }

    #[test]
    fn fields_override_defaults() {
        let config = BulkConfig::from_toml_str(
            "show_progress = false\ncancel_outstanding_on_failure = true\n",
        )
        .unwrap();
        assert!(!config.show_progress);
        assert!(config.cancel_outstanding_on_failure);
    }

    #[test]
    fn wrong_type_is_rejected() {
        let err = BulkConfig::from_toml_str("show_progress = \"yes\"").unwrap_err();
        assert!(matches!(err, BulkError::ConfigFile(_)));
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stowage.toml");
        std::fs::write(&path, "show_progress = false").unwrap();
        assert_eq!(BulkConfig::load(&path).unwrap(), BulkConfig::quiet());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = BulkConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, BulkError::Io(_)));
    }
}
