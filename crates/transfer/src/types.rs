use std::path::PathBuf;

/// Which way a batch moves bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferDirection {
    /// Remote objects to local files.
    Download,
    /// Local files to remote objects.
    Upload,
}

/// One unit transfer: a remote key paired with a local file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferTask {
    pub remote_key: String,
    pub local_path: PathBuf,
    /// Known size in bytes, from the listing, a head request or the local stat.
    pub size: u64,
    /// Specific object version (single-object downloads only).
    pub version_id: Option<String>,
}

impl TransferTask {
    /// Creates a task for the latest version of `remote_key`.
    pub fn new(remote_key: impl Into<String>, local_path: impl Into<PathBuf>, size: u64) -> Self {
        Self {
            remote_key: remote_key.into(),
            local_path: local_path.into(),
            size,
            version_id: None,
        }
    }

    /// Pins the task to one object version.
    pub fn with_version(mut self, version_id: Option<String>) -> Self {
        self.version_id = version_id;
        self
    }
}

/// The complete, ordered task list of one top-level call.
///
/// Built in full before anything is submitted so the total is known upfront.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferBatch {
    bucket: String,
    direction: TransferDirection,
    tasks: Vec<TransferTask>,
    total_size: u64,
}

impl TransferBatch {
    /// Creates a batch; the total is the sum of the task sizes.
    pub fn new(bucket: impl Into<String>, direction: TransferDirection, tasks: Vec<TransferTask>) -> Self {
        let total_size = tasks.iter().map(|t| t.size).sum();
        Self {
            bucket: bucket.into(),
            direction,
            tasks,
            total_size,
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    pub fn direction(&self) -> TransferDirection {
        self.direction
    }

    pub fn tasks(&self) -> &[TransferTask] {
        &self.tasks
    }

    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Consumes the batch, yielding its tasks in order.
    pub fn into_tasks(self) -> Vec<TransferTask> {
        self.tasks
    }
}
