//! Submits a batch to the transfer engine and waits for it.

use std::sync::Arc;

use stowage_protocol::{MetadataSlots, ObjectMetadata, to_slots};
use stowage_store::{DownloadRequest, TransferEngine, TransferHandle, UploadRequest};
use stowage_transfer::{
    ProgressAggregator, ProgressSink, ProgressState, TransferBatch, TransferDirection,
};
use tracing::{debug, info, warn};

use crate::config::BulkConfig;
use crate::error::BulkError;

/// Runs every unit transfer of a batch against one shared progress counter.
pub struct TransferScheduler<'a> {
    engine: &'a dyn TransferEngine,
    config: &'a BulkConfig,
    metadata: MetadataSlots,
}

impl<'a> TransferScheduler<'a> {
    pub fn new(engine: &'a dyn TransferEngine, config: &'a BulkConfig) -> Self {
        Self {
            engine,
            config,
            metadata: MetadataSlots::new(),
        }
    }

    /// Attaches user metadata to every upload of the batch.
    ///
    /// The metadata is encoded once here, not per object.
    pub fn with_metadata(mut self, metadata: &ObjectMetadata) -> Result<Self, BulkError> {
        self.metadata = to_slots(metadata)?;
        Ok(self)
    }

    /// Submits every task, then waits for them in submission order.
    ///
    /// The first failure observed in that order is returned. Transfers still
    /// outstanding at that point are aborted if
    /// [`BulkConfig::cancel_outstanding_on_failure`] is set and left running
    /// otherwise.
    pub async fn execute(&self, batch: TransferBatch) -> Result<ProgressState, BulkError> {
        let progress = Arc::new(if self.config.show_progress {
            ProgressAggregator::with_bar(batch.total_size(), &self.config.progress_template)
        } else {
            ProgressAggregator::new(batch.total_size())
        });

        let bucket = batch.bucket().to_string();
        let direction = batch.direction();
        info!(
            bucket = %bucket,
            ?direction,
            tasks = batch.len(),
            total_bytes = batch.total_size(),
            "starting batch"
        );

        let mut handles = Vec::with_capacity(batch.len());
        for task in batch.into_tasks() {
            let sink: Arc<dyn ProgressSink> = Arc::clone(&progress) as Arc<dyn ProgressSink>;
            let handle = match direction {
                TransferDirection::Download => {
                    if let Some(parent) = task.local_path.parent() {
                        if let Err(e) = tokio::fs::create_dir_all(parent).await {
                            self.stop_outstanding(&handles);
                            progress.abandon();
                            return Err(e.into());
                        }
                    }
                    self.engine.download(
                        DownloadRequest {
                            bucket: bucket.clone(),
                            key: task.remote_key,
                            local_path: task.local_path,
                            size_hint: Some(task.size),
                            version_id: task.version_id,
                        },
                        sink,
                    )
                }
                TransferDirection::Upload => self.engine.upload(
                    UploadRequest {
                        local_path: task.local_path,
                        bucket: bucket.clone(),
                        key: task.remote_key,
                        metadata: self.metadata.clone(),
                    },
                    sink,
                ),
            };
            handles.push(handle);
        }

        let mut pending = handles.into_iter();
        while let Some(handle) = pending.next() {
            let key = handle.key().to_string();
            match handle.wait().await {
                Ok(bytes) => debug!(key = %key, bytes, "unit transfer complete"),
                Err(source) => {
                    let outstanding: Vec<TransferHandle> = pending.collect();
                    self.stop_outstanding(&outstanding);
                    progress.abandon();
                    return Err(BulkError::UnitTransfer { key, source });
                }
            }
        }

        progress.finish();
        let state = progress.snapshot();
        info!(
            bucket = %bucket,
            processed = state.processed,
            total = state.total,
            "batch complete"
        );
        Ok(state)
    }

    fn stop_outstanding(&self, outstanding: &[TransferHandle]) {
        let running = outstanding.iter().filter(|h| !h.is_finished()).count();
        if running == 0 {
            return;
        }
        if self.config.cancel_outstanding_on_failure {
            warn!(outstanding = running, "batch failed, aborting outstanding transfers");
            for handle in outstanding {
                handle.abort();
            }
        } else {
            warn!(
                outstanding = running,
                "batch failed, outstanding transfers keep running"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use stowage_store::StoreError;
    use stowage_transfer::TransferTask;
    use tempfile::TempDir;

    #[derive(Clone, Copy)]
    enum Outcome {
        /// Completes after the given number of yields, reporting the task size.
        Ok { yields: usize },
        /// Fails after the given number of yields.
        Fail { yields: usize },
        /// Never completes; sets the drop flag when its task is dropped.
        Hang,
    }

    struct DropFlag(Arc<AtomicBool>);

    impl Drop for DropFlag {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    /// Engine whose unit transfers follow a per-key script.
    struct ScriptedEngine {
        outcomes: HashMap<String, Outcome>,
        submitted: Mutex<Vec<String>>,
        uploads: Mutex<Vec<UploadRequest>>,
        hung_dropped: Arc<AtomicBool>,
    }

    impl ScriptedEngine {
        fn new(outcomes: &[(&str, Outcome)]) -> Self {
            Self {
                outcomes: outcomes
                    .iter()
                    .map(|(k, o)| (k.to_string(), *o))
                    .collect(),
                submitted: Mutex::new(Vec::new()),
                uploads: Mutex::new(Vec::new()),
                hung_dropped: Arc::new(AtomicBool::new(false)),
            }
        }

        fn run(&self, key: String, size: u64, progress: Arc<dyn ProgressSink>) -> TransferHandle {
            self.submitted.lock().unwrap().push(key.clone());
            let outcome = self.outcomes[&key];
            let flag = matches!(outcome, Outcome::Hang)
                .then(|| DropFlag(Arc::clone(&self.hung_dropped)));
            let failing_key = key.clone();
            TransferHandle::spawn(key, async move {
                let _flag = flag;
                match outcome {
                    Outcome::Ok { yields } => {
                        for _ in 0..yields {
                            tokio::task::yield_now().await;
                        }
                        progress.on_bytes(size);
                        Ok(size)
                    }
                    Outcome::Fail { yields } => {
                        for _ in 0..yields {
                            tokio::task::yield_now().await;
                        }
                        Err(StoreError::Remote(format!("{failing_key} failed")))
                    }
                    Outcome::Hang => {
                        std::future::pending::<()>().await;
                        Ok(0)
                    }
                }
            })
        }
    }

    impl TransferEngine for ScriptedEngine {
        fn download(
            &self,
            request: DownloadRequest,
            progress: Arc<dyn ProgressSink>,
        ) -> TransferHandle {
            let size = request.size_hint.unwrap_or(0);
            self.run(request.key, size, progress)
        }

        fn upload(&self, request: UploadRequest, progress: Arc<dyn ProgressSink>) -> TransferHandle {
            self.uploads.lock().unwrap().push(request.clone());
            let size = std::fs::metadata(&request.local_path)
                .map(|m| m.len())
                .unwrap_or(0);
            self.run(request.key, size, progress)
        }
    }

    fn download_batch(dir: &TempDir, tasks: &[(&str, u64)]) -> TransferBatch {
        let tasks = tasks
            .iter()
            .map(|(key, size)| TransferTask::new(*key, dir.path().join("out").join(key), *size))
            .collect();
        TransferBatch::new("b", TransferDirection::Download, tasks)
    }

    #[tokio::test]
    async fn all_successful_reports_total() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine::new(&[
            ("a", Outcome::Ok { yields: 3 }),
            ("b", Outcome::Ok { yields: 0 }),
            ("c", Outcome::Ok { yields: 1 }),
        ]);
        let config = BulkConfig::quiet();

        let batch = download_batch(&dir, &[("a", 10), ("b", 20), ("c", 30)]);
        let state = TransferScheduler::new(&engine, &config)
            .execute(batch)
            .await
            .unwrap();

        assert_eq!(state, ProgressState { processed: 60, total: 60 });
        assert_eq!(*engine.submitted.lock().unwrap(), ["a", "b", "c"]);
        // Parent directories exist before submission.
        assert!(dir.path().join("out").is_dir());
    }

    #[tokio::test]
    async fn first_failure_in_submission_order_wins() {
        let dir = TempDir::new().unwrap();
        // "c" fails before "b" does, but "b" was submitted first.
        let engine = ScriptedEngine::new(&[
            ("a", Outcome::Ok { yields: 0 }),
            ("b", Outcome::Fail { yields: 5 }),
            ("c", Outcome::Fail { yields: 0 }),
        ]);
        let config = BulkConfig::quiet();

        let batch = download_batch(&dir, &[("a", 1), ("b", 1), ("c", 1)]);
        let err = TransferScheduler::new(&engine, &config)
            .execute(batch)
            .await
            .unwrap_err();

        match err {
            BulkError::UnitTransfer { key, source } => {
                assert_eq!(key, "b");
                assert!(matches!(source, StoreError::Remote(_)));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        // Every task was submitted before waiting began.
        assert_eq!(engine.submitted.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn failure_leaves_outstanding_running_by_default() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine::new(&[
            ("a", Outcome::Fail { yields: 0 }),
            ("b", Outcome::Hang),
        ]);
        let config = BulkConfig::quiet();

        let batch = download_batch(&dir, &[("a", 1), ("b", 1)]);
        let err = TransferScheduler::new(&engine, &config)
            .execute(batch)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::UnitTransfer { ref key, .. } if key == "a"));

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(!engine.hung_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn failure_aborts_outstanding_when_configured() {
        let dir = TempDir::new().unwrap();
        let engine = ScriptedEngine::new(&[
            ("a", Outcome::Fail { yields: 0 }),
            ("b", Outcome::Hang),
        ]);
        let config = BulkConfig {
            cancel_outstanding_on_failure: true,
            ..BulkConfig::quiet()
        };

        let batch = download_batch(&dir, &[("a", 1), ("b", 1)]);
        let err = TransferScheduler::new(&engine, &config)
            .execute(batch)
            .await
            .unwrap_err();
        assert!(matches!(err, BulkError::UnitTransfer { .. }));

        for _ in 0..10 {
            if engine.hung_dropped.load(Ordering::SeqCst) {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(engine.hung_dropped.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn empty_batch_completes() {
        let engine = ScriptedEngine::new(&[]);
        let config = BulkConfig::quiet();
        let batch = TransferBatch::new("b", TransferDirection::Upload, Vec::new());

        let state = TransferScheduler::new(&engine, &config)
            .execute(batch)
            .await
            .unwrap();
        assert_eq!(state, ProgressState::default());
        assert!(engine.submitted.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn uploads_carry_encoded_metadata() {
        let dir = TempDir::new().unwrap();
        let file: PathBuf = dir.path().join("f.txt");
        std::fs::write(&file, b"hello").unwrap();

        let engine = ScriptedEngine::new(&[("dest/f.txt", Outcome::Ok { yields: 0 })]);
        let config = BulkConfig::quiet();
        let mut metadata = ObjectMetadata::new();
        metadata.insert("owner".into(), "ops".into());

        let batch = TransferBatch::new(
            "b",
            TransferDirection::Upload,
            vec![TransferTask::new("dest/f.txt", &file, 5)],
        );
        let state = TransferScheduler::new(&engine, &config)
            .with_metadata(&metadata)
            .unwrap()
            .execute(batch)
            .await
            .unwrap();

        assert_eq!(state.processed, 5);
        let uploads = engine.uploads.lock().unwrap();
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].metadata, to_slots(&metadata).unwrap());
    }
}
