//! Analysis job runner.
//!
//! Each submitted analysis runs as a spawned task that walks the repository,
//! emits progress frames through the [`EventBus`], honors cooperative
//! cancellation, and publishes an opaque summary on completion. The batch
//! variant runs repositories sequentially and reports the full result list.

use ignore::WalkBuilder;
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use uuid::Uuid;

use repolens_common::errors::{ClassifiedError, ErrorClassifier, ErrorContext};
use repolens_common::progress::{AnalysisStatus, ProgressUpdate};
use repolens_common::wire::{
    AnalysisCompleteEvent, AnalysisErrorEvent, AnalysisProgressEvent, BatchCompleteEvent,
    BatchProgressEvent, ServerMessage,
};

use crate::events::EventBus;

/// Directories never descended into, gitignored or not.
const SKIPPED_DIRS: &[&str] = &[
    ".git",
    ".hg",
    ".svn",
    "node_modules",
    "target",
    "dist",
    "build",
    "vendor",
    "__pycache__",
];

/// Files per progress frame.
const PROGRESS_CHUNK: usize = 50;

struct JobHandle {
    cancelled: Arc<AtomicBool>,
}

/// Owns running analysis jobs and their cancellation flags.
pub struct AnalysisPipeline {
    events: EventBus,
    classifier: Arc<ErrorClassifier>,
    jobs: RwLock<HashMap<String, JobHandle>>,
}

impl AnalysisPipeline {
    pub fn new(events: EventBus, classifier: Arc<ErrorClassifier>) -> Self {
        Self {
            events,
            classifier,
            jobs: RwLock::new(HashMap::new()),
        }
    }

    /// Validate the repository path and spawn the analysis task. Returns the
    /// analysis id immediately; progress flows through the event bus.
    pub async fn start_analysis(self: &Arc<Self>, path: PathBuf) -> Result<String, ClassifiedError> {
        self.validate_path(&path)?;

        let analysis_id = Uuid::new_v4().to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.jobs.write().await.insert(
            analysis_id.clone(),
            JobHandle {
                cancelled: cancelled.clone(),
            },
        );

        info!(analysis_id = %analysis_id, path = %path.display(), "analysis started");
        let pipeline = Arc::clone(self);
        let id = analysis_id.clone();
        tokio::spawn(async move {
            pipeline.run_single(&id, &path, cancelled).await;
            pipeline.jobs.write().await.remove(&id);
        });

        Ok(analysis_id)
    }

    /// Validate every path and spawn one task that analyzes them in order.
    pub async fn start_batch(self: &Arc<Self>, paths: Vec<PathBuf>) -> Result<String, ClassifiedError> {
        if paths.is_empty() {
            let error = self.classifier.classify_message(
                "batch contained no repository paths",
                ErrorContext::new(),
                None,
            );
            return Err(error);
        }
        for path in &paths {
            self.validate_path(path)?;
        }

        let batch_id = Uuid::new_v4().to_string();
        let cancelled = Arc::new(AtomicBool::new(false));
        self.jobs.write().await.insert(
            batch_id.clone(),
            JobHandle {
                cancelled: cancelled.clone(),
            },
        );

        info!(batch_id = %batch_id, repositories = paths.len(), "batch analysis started");
        let pipeline = Arc::clone(self);
        let id = batch_id.clone();
        tokio::spawn(async move {
            pipeline.run_batch(&id, &paths, cancelled).await;
            pipeline.jobs.write().await.remove(&id);
        });

        Ok(batch_id)
    }

    /// Request cancellation. Returns false when the id is unknown or the job
    /// already finished.
    pub async fn cancel(&self, analysis_id: &str) -> bool {
        match self.jobs.read().await.get(analysis_id) {
            Some(handle) => {
                handle.cancelled.store(true, Ordering::Relaxed);
                info!(analysis_id, "cancellation requested");
                true
            }
            None => false,
        }
    }

    pub async fn is_running(&self, analysis_id: &str) -> bool {
        self.jobs.read().await.contains_key(analysis_id)
    }

    fn validate_path(&self, path: &Path) -> Result<(), ClassifiedError> {
        let context = ErrorContext::new().with_path(path.display().to_string());
        let metadata = match std::fs::metadata(path) {
            Ok(m) => m,
            Err(e) => {
                return Err(self.classifier.classify_error(&e, context, None));
            }
        };
        if !metadata.is_dir() {
            return Err(self.classifier.classify_message(
                format!("not a directory: {}", path.display()),
                context,
                None,
            ));
        }
        Ok(())
    }

    async fn run_single(&self, analysis_id: &str, path: &Path, cancelled: Arc<AtomicBool>) {
        self.emit_progress(
            analysis_id,
            ProgressUpdate {
                status: Some(AnalysisStatus::Running),
                current_step: Some("scanning".into()),
                progress: Some(0),
                total_steps: Some(100),
                log: Some(format!("Scanning {}", path.display())),
                ..ProgressUpdate::default()
            },
        );

        match self.analyze_repository(analysis_id, path, &cancelled).await {
            Ok(summary) => {
                self.emit_progress(
                    analysis_id,
                    ProgressUpdate {
                        status: Some(AnalysisStatus::Completed),
                        current_step: Some("done".into()),
                        progress: Some(100),
                        total_steps: Some(100),
                        log: Some("Analysis complete".into()),
                        ..ProgressUpdate::default()
                    },
                );
                self.events
                    .emit(ServerMessage::AnalysisComplete(AnalysisCompleteEvent {
                        analysis_id: analysis_id.to_string(),
                        result: summary,
                    }));
                info!(analysis_id, "analysis completed");
            }
            Err(error) => {
                self.emit_progress(
                    analysis_id,
                    ProgressUpdate {
                        status: Some(AnalysisStatus::Failed),
                        error: Some(error.message.clone()),
                        log: Some(format!("Analysis failed: {}", error.message)),
                        ..ProgressUpdate::default()
                    },
                );
                self.events
                    .emit(ServerMessage::AnalysisError(AnalysisErrorEvent {
                        analysis_id: analysis_id.to_string(),
                        message: error.message.clone(),
                    }));
                warn!(analysis_id, code = error.code.wire_name(), "analysis failed");
            }
        }
    }

    async fn run_batch(&self, batch_id: &str, paths: &[PathBuf], cancelled: Arc<AtomicBool>) {
        let total = paths.len() as u32;
        let mut failed: u32 = 0;
        let mut repositories: Vec<Value> = Vec::with_capacity(paths.len());

        for (index, path) in paths.iter().enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                let error = self.classifier.classify_message(
                    "batch analysis cancelled",
                    ErrorContext::new().with_correlation_id(batch_id),
                    None,
                );
                self.events
                    .emit(ServerMessage::AnalysisError(AnalysisErrorEvent {
                        analysis_id: batch_id.to_string(),
                        message: error.message,
                    }));
                return;
            }

            self.events
                .emit(ServerMessage::BatchAnalysisProgress(BatchProgressEvent {
                    batch_id: batch_id.to_string(),
                    repository: Some(path.display().to_string()),
                    completed: index as u32,
                    total,
                    failed,
                    update: ProgressUpdate {
                        status: Some(AnalysisStatus::Running),
                        current_step: Some(format!("analyzing {}", path.display())),
                        progress: Some(index as u32 * 100 / total),
                        total_steps: Some(100),
                        ..ProgressUpdate::default()
                    },
                }));

            let result = match self.analyze_repository(batch_id, path, &cancelled).await {
                Ok(summary) => summary,
                Err(error) => {
                    failed += 1;
                    json!({
                        "path": path.display().to_string(),
                        "error": error.message,
                        "code": error.code,
                    })
                }
            };
            repositories.push(result);
        }

        // The completion frame carries every repository result, not just the
        // first.
        self.events
            .emit(ServerMessage::BatchAnalysisComplete(BatchCompleteEvent {
                batch_id: batch_id.to_string(),
                repositories,
            }));
        info!(batch_id, "batch analysis completed");
    }

    /// Walk one repository and build its summary value.
    async fn analyze_repository(
        &self,
        analysis_id: &str,
        path: &Path,
        cancelled: &AtomicBool,
    ) -> Result<Value, ClassifiedError> {
        let started = Instant::now();
        let files = collect_files(path).map_err(|e| {
            self.classifier.classify_error(
                &e,
                ErrorContext::new().with_path(path.display().to_string()),
                None,
            )
        })?;

        let total = files.len();
        let mut total_bytes: u64 = 0;
        let mut languages: BTreeMap<String, usize> = BTreeMap::new();

        for (index, file) in files.iter().enumerate() {
            if cancelled.load(Ordering::Relaxed) {
                let error = self.classifier.classify_message(
                    "analysis cancelled",
                    ErrorContext::new().with_path(path.display().to_string()),
                    None,
                );
                debug!(analysis_id, "job observed cancellation flag");
                return Err(error);
            }

            if let Ok(metadata) = std::fs::metadata(file) {
                total_bytes += metadata.len();
            }
            if let Some(ext) = file.extension().and_then(|e| e.to_str()) {
                *languages.entry(ext.to_ascii_lowercase()).or_default() += 1;
            }

            if (index + 1) % PROGRESS_CHUNK == 0 {
                self.emit_progress(
                    analysis_id,
                    ProgressUpdate {
                        current_step: Some("analyzing files".into()),
                        progress: Some(((index + 1) * 100 / total.max(1)) as u32),
                        files_processed: Some((index + 1) as u64),
                        total_files: Some(total as u64),
                        time_elapsed: Some(started.elapsed().as_secs()),
                        log: Some(format!("Processed {}/{} files", index + 1, total)),
                        ..ProgressUpdate::default()
                    },
                );
                // Let other tasks run between chunks.
                tokio::task::yield_now().await;
            }
        }

        Ok(json!({
            "path": path.display().to_string(),
            "fileCount": total,
            "totalBytes": total_bytes,
            "languages": languages,
            "durationMs": started.elapsed().as_millis() as u64,
        }))
    }

    fn emit_progress(&self, analysis_id: &str, update: ProgressUpdate) {
        self.events
            .emit(ServerMessage::AnalysisProgress(AnalysisProgressEvent {
                analysis_id: analysis_id.to_string(),
                update,
            }));
    }
}

/// Gitignore-aware file collection. Hidden entries are kept so dot
/// directories like `.github` are counted; `.gitignore` rules apply even
/// without a `.git` directory (exported trees). Symlinks are not followed.
fn collect_files(root: &Path) -> Result<Vec<PathBuf>, ignore::Error> {
    let mut files = Vec::new();
    let walker = WalkBuilder::new(root)
        .hidden(false)
        .git_ignore(true)
        .require_git(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let skip = entry.file_type().is_some_and(|t| t.is_dir())
                && entry
                    .file_name()
                    .to_str()
                    .is_some_and(|name| SKIPPED_DIRS.contains(&name));
            !skip
        })
        .build();

    for entry in walker {
        let entry = entry?;
        if entry.file_type().is_some_and(|t| t.is_file()) {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use repolens_common::config::HistoryConfig;
    use repolens_common::errors::ErrorCode;
    use std::time::Duration;
    use tokio::sync::broadcast::error::TryRecvError;

    fn pipeline() -> Arc<AnalysisPipeline> {
        let classifier = Arc::new(ErrorClassifier::new(HistoryConfig { max_entries: 64 }));
        Arc::new(AnalysisPipeline::new(EventBus::default(), classifier))
    }

    fn seed_repo(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in files {
            let path = dir.path().join(name);
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent).unwrap();
            }
            std::fs::write(path, content).unwrap();
        }
        dir
    }

    async fn drain_until_terminal(
        rx: &mut tokio::sync::broadcast::Receiver<ServerMessage>,
    ) -> Vec<ServerMessage> {
        let mut frames = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for frames")
                .expect("bus closed");
            let terminal = matches!(
                frame,
                ServerMessage::AnalysisComplete(_)
                    | ServerMessage::AnalysisError(_)
                    | ServerMessage::BatchAnalysisComplete(_)
            );
            frames.push(frame);
            if terminal {
                return frames;
            }
        }
    }

    #[tokio::test]
    async fn test_missing_path_is_rejected_with_path_not_found() {
        let p = pipeline();
        let error = p
            .start_analysis(PathBuf::from("/definitely/not/here"))
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::PathNotFound);
    }

    #[tokio::test]
    async fn test_file_path_is_rejected() {
        let repo = seed_repo(&[("single.rs", "fn main() {}")]);
        let p = pipeline();
        let error = p
            .start_analysis(repo.path().join("single.rs"))
            .await
            .unwrap_err();
        assert_eq!(error.code, ErrorCode::PathNotDirectory);
    }

    #[tokio::test]
    async fn test_analysis_emits_progress_then_complete() {
        let repo = seed_repo(&[
            ("src/main.rs", "fn main() {}"),
            ("src/lib.rs", "pub fn f() {}"),
            ("README.md", "# repo"),
        ]);
        let p = pipeline();
        let mut rx = p.events.subscribe();

        let id = p.start_analysis(repo.path().to_path_buf()).await.unwrap();
        let frames = drain_until_terminal(&mut rx).await;

        let ServerMessage::AnalysisProgress(first) = &frames[0] else {
            panic!("expected initial progress frame");
        };
        assert_eq!(first.analysis_id, id);
        assert_eq!(first.update.status, Some(AnalysisStatus::Running));

        let ServerMessage::AnalysisComplete(complete) = frames.last().unwrap() else {
            panic!("expected completion frame");
        };
        assert_eq!(complete.result["fileCount"], json!(3));
        assert_eq!(complete.result["languages"]["rs"], json!(2));
        assert_eq!(complete.result["languages"]["md"], json!(1));

        // Final progress before completion reports 100.
        let last_progress = frames
            .iter()
            .rev()
            .find_map(|f| match f {
                ServerMessage::AnalysisProgress(e) => Some(e),
                _ => None,
            })
            .unwrap();
        assert_eq!(last_progress.update.progress, Some(100));
        assert_eq!(last_progress.update.status, Some(AnalysisStatus::Completed));
    }

    #[tokio::test]
    async fn test_skipped_dirs_are_not_counted() {
        let repo = seed_repo(&[
            ("src/main.rs", "fn main() {}"),
            (".git/config", "[core]"),
            ("node_modules/pkg/index.js", "x"),
            ("target/debug/junk", "x"),
        ]);
        let p = pipeline();
        let mut rx = p.events.subscribe();
        p.start_analysis(repo.path().to_path_buf()).await.unwrap();

        let frames = drain_until_terminal(&mut rx).await;
        let ServerMessage::AnalysisComplete(complete) = frames.last().unwrap() else {
            panic!("expected completion frame");
        };
        assert_eq!(complete.result["fileCount"], json!(1));
    }

    #[tokio::test]
    async fn test_gitignored_files_are_excluded_but_dot_dirs_count() {
        let repo = seed_repo(&[
            ("src/main.rs", "fn main() {}"),
            (".gitignore", "out/\n"),
            (".github/workflows/ci.yml", "on: push"),
            ("out/artifact.bin", "x"),
            ("out/nested/more.bin", "x"),
        ]);
        let p = pipeline();
        let mut rx = p.events.subscribe();
        p.start_analysis(repo.path().to_path_buf()).await.unwrap();

        let frames = drain_until_terminal(&mut rx).await;
        let ServerMessage::AnalysisComplete(complete) = frames.last().unwrap() else {
            panic!("expected completion frame");
        };
        // main.rs, .gitignore itself, and the workflow file; nothing in out/.
        assert_eq!(complete.result["fileCount"], json!(3));
        assert_eq!(complete.result["languages"]["yml"], json!(1));
        assert!(complete.result["languages"].get("bin").is_none());
    }

    #[tokio::test]
    async fn test_cancel_unknown_id_is_false() {
        let p = pipeline();
        assert!(!p.cancel("nope").await);
    }

    #[tokio::test]
    async fn test_batch_reports_all_repositories() {
        let a = seed_repo(&[("a.rs", "fn a() {}")]);
        let b = seed_repo(&[("b.py", "pass"), ("c.py", "pass")]);
        let p = pipeline();
        let mut rx = p.events.subscribe();

        let batch_id = p
            .start_batch(vec![a.path().to_path_buf(), b.path().to_path_buf()])
            .await
            .unwrap();
        let frames = drain_until_terminal(&mut rx).await;

        let progress: Vec<_> = frames
            .iter()
            .filter_map(|f| match f {
                ServerMessage::BatchAnalysisProgress(e) => Some(e),
                _ => None,
            })
            .collect();
        assert_eq!(progress.len(), 2);
        assert_eq!(progress[0].batch_id, batch_id);
        assert_eq!(progress[0].total, 2);

        let ServerMessage::BatchAnalysisComplete(complete) = frames.last().unwrap() else {
            panic!("expected batch completion");
        };
        assert_eq!(complete.repositories.len(), 2);
        assert_eq!(complete.repositories[0]["fileCount"], json!(1));
        assert_eq!(complete.repositories[1]["fileCount"], json!(2));
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let p = pipeline();
        let error = p.start_batch(vec![]).await.unwrap_err();
        assert_eq!(error.code, ErrorCode::Unknown);
        // No frames were emitted.
        let mut rx = p.events.subscribe();
        assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
    }
}
