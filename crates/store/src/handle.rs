//! Handle to a unit transfer running in the background.

use std::future::Future;

use tokio::task::JoinHandle;

use crate::error::StoreError;

/// Completion handle of one submitted unit transfer.
///
/// Dropping the handle detaches the transfer; it keeps running.
#[derive(Debug)]
pub struct TransferHandle {
    key: String,
    task: JoinHandle<Result<u64, StoreError>>,
}

impl TransferHandle {
    /// Spawns `transfer` on the current tokio runtime.
    pub fn spawn<F>(key: impl Into<String>, transfer: F) -> Self
    where
        F: Future<Output = Result<u64, StoreError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            task: tokio::spawn(transfer),
        }
    }

    /// Remote key this transfer moves.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Returns `true` once the transfer has resolved.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stops the transfer at its next suspension point.
    pub fn abort(&self) {
        self.task.abort();
    }

    /// Waits for the transfer and returns the number of bytes moved.
    pub async fn wait(self) -> Result<u64, StoreError> {
        match self.task.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(StoreError::Cancelled),
            Err(e) => Err(StoreError::Join(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_returns_transfer_result() {
        let handle = TransferHandle::spawn("a", async { Ok(42) });
        assert_eq!(handle.key(), "a");
        assert_eq!(handle.wait().await.unwrap(), 42);
    }

    #[tokio::test]
    async fn wait_surfaces_transfer_error() {
        let handle = TransferHandle::spawn("a", async { Err(StoreError::Remote("boom".into())) });
        assert!(matches!(handle.wait().await, Err(StoreError::Remote(_))));
    }

    #[tokio::test]
    async fn aborted_transfer_reports_cancelled() {
        let handle = TransferHandle::spawn("a", std::future::pending());
        handle.abort();
        assert!(matches!(handle.wait().await, Err(StoreError::Cancelled)));
    }

    #[tokio::test]
    async fn panicking_transfer_reports_join_error() {
        let handle = TransferHandle::spawn("a", async {
            if true {
                panic!("engine bug");
            }
            Ok(0)
        });
        assert!(matches!(handle.wait().await, Err(StoreError::Join(_))));
    }

    #[tokio::test]
    async fn dropped_handle_keeps_running() {
        let (tx, rx) = tokio::sync::oneshot::channel();
        let handle = TransferHandle::spawn("a", async move {
            tokio::task::yield_now().await;
            let _ = tx.send(());
            Ok(0)
        });
        drop(handle);
        assert!(rx.await.is_ok());
    }
}
