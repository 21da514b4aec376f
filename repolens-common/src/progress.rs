//! Analysis progress contract shared by the daemon and client.
//!
//! [`AnalysisProgress`] is a single self-contained snapshot; partial
//! [`ProgressUpdate`]s are merged shallowly onto it (absent fields retain the
//! previous value). [`ProgressStore`] wraps the snapshot in a tokio `watch`
//! channel so any number of consumers can await changes without polling.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::watch;

/// Lifecycle state of an analysis.
///
/// `"processing"` is accepted on the wire as an alias of `Running`; it is
/// never emitted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    #[default]
    Idle,
    #[serde(alias = "processing")]
    Running,
    Completed,
    Failed,
}

impl AnalysisStatus {
    /// Terminal states end the client's streaming loop.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Point-in-time snapshot of one analysis.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AnalysisProgress {
    pub status: AnalysisStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Percentage, 0 through 100. Not validated; publishers own their math.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Latest human-readable status line.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_elapsed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

impl AnalysisProgress {
    /// Shallow merge: every `Some` field of `update` replaces the current
    /// value, every `None` field leaves it untouched.
    pub fn apply(&mut self, update: ProgressUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        macro_rules! merge {
            ($($field:ident),+ $(,)?) => {
                $(if update.$field.is_some() {
                    self.$field = update.$field;
                })+
            };
        }
        merge!(
            current_step,
            progress,
            total_steps,
            error,
            log,
            files_processed,
            total_files,
            time_elapsed,
            time_remaining,
            tokens_used,
        );
    }
}

/// All-optional partial update merged onto [`AnalysisProgress`].
///
/// Older event producers used `currentFile`, `processed`, and `total` for the
/// same fields; those spellings are accepted on input and never emitted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProgressUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AnalysisStatus>,
    #[serde(alias = "currentFile", skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub progress: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
    #[serde(alias = "processed", skip_serializing_if = "Option::is_none")]
    pub files_processed: Option<u64>,
    #[serde(alias = "total", skip_serializing_if = "Option::is_none")]
    pub total_files: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_elapsed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tokens_used: Option<u64>,
}

impl ProgressUpdate {
    pub fn status(status: AnalysisStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Watch-backed holder of the latest [`AnalysisProgress`] snapshot plus an
/// opaque result slot. No history; late subscribers see only the current
/// state.
#[derive(Debug)]
pub struct ProgressStore {
    progress_tx: watch::Sender<AnalysisProgress>,
    results_tx: watch::Sender<Option<Value>>,
}

impl Default for ProgressStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressStore {
    pub fn new() -> Self {
        let (progress_tx, _) = watch::channel(AnalysisProgress::default());
        let (results_tx, _) = watch::channel(None);
        Self {
            progress_tx,
            results_tx,
        }
    }

    /// Merge a partial update into the snapshot and notify watchers.
    pub fn set_progress(&self, update: ProgressUpdate) {
        self.progress_tx.send_modify(|snapshot| snapshot.apply(update));
    }

    /// Replace the result wholesale. `None` clears it.
    pub fn set_results(&self, results: Option<Value>) {
        self.results_tx.send_replace(results);
    }

    #[must_use]
    pub fn snapshot(&self) -> AnalysisProgress {
        self.progress_tx.borrow().clone()
    }

    #[must_use]
    pub fn results(&self) -> Option<Value> {
        self.results_tx.borrow().clone()
    }

    /// Receiver for awaiting snapshot changes.
    pub fn watch(&self) -> watch::Receiver<AnalysisProgress> {
        self.progress_tx.subscribe()
    }
}
