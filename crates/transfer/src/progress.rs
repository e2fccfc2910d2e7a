use std::sync::{Mutex, PoisonError};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use serde::Serialize;
use tracing::warn;

/// Default indicatif template for the batch progress bar.
pub const DEFAULT_PROGRESS_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})";

/// Receives byte counts from an in-flight unit transfer.
///
/// Implementations are shared by every transfer of a batch and are called
/// concurrently from the engine's workers.
pub trait ProgressSink: Send + Sync {
    /// Records `bytes` more bytes transferred.
    fn on_bytes(&self, bytes: u64);
}

/// Snapshot of a batch's byte counter.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub processed: u64,
    pub total: u64,
}

impl ProgressState {
    /// Fraction done in `0.0..=1.0` (1.0 for an empty batch).
    pub fn fraction(&self) -> f64 {
        if self.total == 0 {
            return 1.0;
        }
        (self.processed as f64 / self.total as f64).min(1.0)
    }
}

/// One byte counter for a whole batch, rendered as a single progress bar.
///
/// Every increment goes through a mutex so concurrent callbacks never lose
/// updates; `processed` only grows.
pub struct ProgressAggregator {
    state: Mutex<ProgressState>,
    bar: ProgressBar,
}

impl ProgressAggregator {
    /// Creates a counter for `total` bytes that draws nothing.
    pub fn new(total: u64) -> Self {
        Self {
            state: Mutex::new(ProgressState {
                processed: 0,
                total,
            }),
            bar: ProgressBar::with_draw_target(Some(total), ProgressDrawTarget::hidden()),
        }
    }

    /// Creates a counter for `total` bytes drawn on stderr with `template`.
    ///
    /// An invalid template falls back to [`DEFAULT_PROGRESS_TEMPLATE`].
    pub fn with_bar(total: u64, template: &str) -> Self {
        let style = ProgressStyle::with_template(template)
            .or_else(|e| {
                warn!(error = %e, "invalid progress template, using default");
                ProgressStyle::with_template(DEFAULT_PROGRESS_TEMPLATE)
            })
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("=> ");

        let bar = ProgressBar::new(total);
        bar.set_style(style);

        Self {
            state: Mutex::new(ProgressState {
                processed: 0,
                total,
            }),
            bar,
        }
    }

    /// Returns the current `(processed, total)` pair.
    pub fn snapshot(&self) -> ProgressState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Leaves the bar at its final position.
    pub fn finish(&self) {
        self.bar.finish();
    }

    /// Clears the bar without marking it complete.
    pub fn abandon(&self) {
        self.bar.abandon();
    }
}

impl ProgressSink for ProgressAggregator {
    fn on_bytes(&self, bytes: u64) {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.processed = state.processed.saturating_add(bytes);
        self.bar.set_position(state.processed);
    }
}

impl std::fmt::Debug for ProgressAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressAggregator")
            .field("state", &self.snapshot())
            .finish()
    }
}
