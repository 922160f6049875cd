// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Bounded-concurrency file worker
//!
//! Paths arrive through a bounded queue. The run loop dequeues them in
//! arrival order, takes a permit from a fixed pool and spawns one pipeline
//! task per file; completions are reaped on the same loop, which is the only
//! writer of [`WorkerStats`]. Completion order across files is not FIFO.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch, Semaphore};
use tokio::task::{Id, JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::cache::{HashStrategy, ResultCache};
use crate::classifier::{ClassificationRequest, ClassificationResult, Classifier};
use crate::config::{AppConfig, WorkerConfig};
use crate::extract::{Extractor, PlainTextExtractor};
use crate::history::SharedHistory;
use crate::mover::{MoveResult, MoveStatus, Mover};
use crate::provider::RemoteProvider;
use crate::remote::RemoteClassifier;
use crate::rules::RuleEngine;
use crate::{FoldwiseError, Result};

const EVENT_CAPACITY: usize = 256;

/// Extract, classify and move a single file
pub struct Pipeline {
    extractor: Arc<dyn Extractor>,
    classifier: Classifier,
    mover: Arc<Mover>,
}

/// Everything that happened to one file
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub filename: String,
    pub classification: ClassificationResult,
    pub movement: MoveResult,
}

impl Pipeline {
    pub fn new(extractor: Arc<dyn Extractor>, classifier: Classifier, mover: Mover) -> Self {
        Self {
            extractor,
            classifier,
            mover: Arc::new(mover),
        }
    }

    /// Assemble the standard pipeline from configuration
    pub fn from_config(
        config: &AppConfig,
        provider: Arc<dyn RemoteProvider>,
        history: SharedHistory,
    ) -> Result<Self> {
        let cache = if config.cache.enabled {
            Some(ResultCache::open(&config.cache.path)?)
        } else {
            None
        };
        let remote = RemoteClassifier::new(provider, &config.provider, &config.prompts);
        let classifier = Classifier::new(
            RuleEngine::new(&config.rules),
            cache,
            remote,
            HashStrategy::from(&config.cache),
        );
        let mover = Mover::new(config.base_path(), &config.mover).with_history(history);
        Ok(Self::new(Arc::new(PlainTextExtractor::new()), classifier, mover))
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    pub fn mover(&self) -> &Mover {
        &self.mover
    }

    /// Run one file through the pipeline; `None` if it vanished first
    pub async fn process(&self, path: PathBuf) -> Result<Option<FileOutcome>> {
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            warn!("File no longer exists: {}", path.display());
            return Ok(None);
        }

        let extractor = self.extractor.clone();
        let source = path.clone();
        let extraction = tokio::task::spawn_blocking(move || extractor.extract(&source))
            .await
            .map_err(join_error)?;
        if let Some(e) = &extraction.error {
            debug!("Extraction incomplete for {}: {}", path.display(), e);
        }

        let request = ClassificationRequest::for_path(&path, extraction.content);
        let classification = self.classifier.classify(&request).await;
        if !classification.is_success() {
            return Err(FoldwiseError::Worker(format!(
                "classification failed for {}: {}",
                request.filename,
                classification.error.as_deref().unwrap_or("unknown error")
            )));
        }

        let mover = self.mover.clone();
        let folder = classification.folder_name.clone();
        let source = path.clone();
        let movement = tokio::task::spawn_blocking(move || mover.move_file(&source, &folder))
            .await
            .map_err(join_error)?;

        Ok(Some(FileOutcome {
            filename: request.filename,
            classification,
            movement,
        }))
    }
}

fn join_error(e: JoinError) -> FoldwiseError {
    FoldwiseError::Worker(format!("blocking task failed: {}", e))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerState {
    Idle,
    Running,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerStats {
    pub total_processed: u64,
    pub successful: u64,
    pub failed: u64,
    /// Successful moves per destination folder
    pub categories: BTreeMap<String, u64>,
}

/// Per-file status shown by presentation layers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StatusGlyph {
    Success,
    Failure,
    Skipped,
}

impl StatusGlyph {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "✓",
            Self::Failure => "✗",
            Self::Skipped => "⚠",
        }
    }
}

impl std::fmt::Display for StatusGlyph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Completion notice broadcast for every processed file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEvent {
    pub filename: String,
    pub folder_name: String,
    pub status: StatusGlyph,
    pub destination: Option<PathBuf>,
    pub error: Option<String>,
}

/// `onFileProcessed(filename, folder_name, glyph)`
pub type FileCallback = Box<dyn Fn(&str, &str, StatusGlyph) + Send + Sync>;

struct TaskReport {
    path: PathBuf,
    outcome: Result<Option<FileOutcome>>,
}

/// Loop-owned bookkeeping: counters plus the path behind every live task
#[derive(Default)]
struct Books {
    stats: WorkerStats,
    in_flight: HashMap<Id, PathBuf>,
}

/// The consumer side; consumed by [`Worker::run`]
pub struct Worker {
    pipeline: Arc<Pipeline>,
    queue: mpsc::Receiver<PathBuf>,
    permits: Arc<Semaphore>,
    dequeue_timeout: Duration,
    shutdown: watch::Receiver<bool>,
    state: watch::Sender<WorkerState>,
    stats: watch::Sender<WorkerStats>,
    events: broadcast::Sender<FileEvent>,
    callback: Option<FileCallback>,
}

/// Cloneable producer and control side
#[derive(Clone)]
pub struct WorkerHandle {
    queue: mpsc::Sender<PathBuf>,
    shutdown: Arc<watch::Sender<bool>>,
    state: watch::Receiver<WorkerState>,
    stats: watch::Receiver<WorkerStats>,
    events: broadcast::Sender<FileEvent>,
}

impl Worker {
    pub fn new(pipeline: Arc<Pipeline>, config: &WorkerConfig) -> (Self, WorkerHandle) {
        let (queue_tx, queue_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (state_tx, state_rx) = watch::channel(WorkerState::Idle);
        let (stats_tx, stats_rx) = watch::channel(WorkerStats::default());
        let (events_tx, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = Self {
            pipeline,
            queue: queue_rx,
            permits: Arc::new(Semaphore::new(config.max_concurrent.max(1))),
            dequeue_timeout: Duration::from_millis(config.dequeue_timeout_ms.max(1)),
            shutdown: shutdown_rx,
            state: state_tx,
            stats: stats_tx,
            events: events_tx.clone(),
            callback: None,
        };
        let handle = WorkerHandle {
            queue: queue_tx,
            shutdown: Arc::new(shutdown_tx),
            state: state_rx,
            stats: stats_rx,
            events: events_tx,
        };
        (worker, handle)
    }

    /// Register the per-file completion callback
    pub fn on_file_processed<F>(mut self, callback: F) -> Self
    where
        F: Fn(&str, &str, StatusGlyph) + Send + Sync + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Process queued paths until stopped, then drain in-flight tasks
    pub async fn run(mut self) -> Result<()> {
        self.state.send_replace(WorkerState::Running);
        info!(
            "Worker running with {} permits",
            self.permits.available_permits()
        );

        let mut tasks: JoinSet<TaskReport> = JoinSet::new();
        let mut books = Books::default();
        let mut shutdown = self.shutdown.clone();

        loop {
            if *shutdown.borrow_and_update() {
                break;
            }

            tokio::select! {
                biased;

                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }

                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.complete(joined, &mut books);
                }

                item = tokio::time::timeout(self.dequeue_timeout, self.queue.recv()) => {
                    match item {
                        // Nothing arrived; loop round to re-check shutdown
                        Err(_) => {}
                        Ok(None) => {
                            debug!("All producers dropped");
                            break;
                        }
                        Ok(Some(path)) => self.dispatch(path, &mut tasks, &mut books).await,
                    }
                }
            }
        }

        self.state.send_replace(WorkerState::Draining);
        info!("Worker draining {} in-flight files", tasks.len());
        while let Some(joined) = tasks.join_next_with_id().await {
            self.complete(joined, &mut books);
        }
        let stats = books.stats;

        self.state.send_replace(WorkerState::Stopped);
        info!(
            "Worker stopped: {} processed, {} successful, {} failed",
            stats.total_processed, stats.successful, stats.failed
        );
        Ok(())
    }

    /// Run the loop on its own thread with a single-threaded runtime
    pub fn spawn_on_thread(self) -> std::io::Result<std::thread::JoinHandle<Result<()>>> {
        std::thread::Builder::new()
            .name("foldwise-worker".to_string())
            .spawn(move || {
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(self.run())
            })
    }

    async fn dispatch(
        &self,
        path: PathBuf,
        tasks: &mut JoinSet<TaskReport>,
        books: &mut Books,
    ) {
        // Keep reaping while waiting so completed tasks free their permits
        let permit = loop {
            tokio::select! {
                biased;
                Some(joined) = tasks.join_next_with_id(), if !tasks.is_empty() => {
                    self.complete(joined, books);
                }
                permit = self.permits.clone().acquire_owned() => match permit {
                    Ok(permit) => break permit,
                    Err(_) => {
                        error!("Permit pool closed, dropping {}", path.display());
                        return;
                    }
                },
            }
        };

        debug!("Dispatching {}", path.display());
        let pipeline = self.pipeline.clone();
        let tracked = path.clone();
        let handle = tasks.spawn(async move {
            let _permit = permit;
            let task_path = path.clone();
            // Inner task isolates panics so the report still names the file
            let outcome = match tokio::spawn(async move { pipeline.process(task_path).await }).await {
                Ok(outcome) => outcome,
                Err(e) => Err(FoldwiseError::Worker(format!("pipeline task failed: {}", e))),
            };
            TaskReport { path, outcome }
        });
        books.in_flight.insert(handle.id(), tracked);
    }

    fn complete(&self, joined: std::result::Result<(Id, TaskReport), JoinError>, books: &mut Books) {
        let stats = &mut books.stats;
        let event = match joined {
            Ok((id, TaskReport { path, outcome })) => {
                books.in_flight.remove(&id);
                match outcome {
                    Ok(Some(outcome)) => Some(record_outcome(stats, outcome)),
                    Ok(None) => {
                        debug!("Skipped vanished file {}", path.display());
                        None
                    }
                    Err(e) => {
                        error!("Processing error: {} - {}", path.display(), e);
                        stats.total_processed += 1;
                        stats.failed += 1;
                        Some(FileEvent {
                            filename: display_name(&path),
                            folder_name: String::new(),
                            status: StatusGlyph::Failure,
                            destination: None,
                            error: Some(e.to_string()),
                        })
                    }
                }
            }
            Err(e) => {
                let path = books.in_flight.remove(&e.id());
                let filename = path.as_deref().map(display_name).unwrap_or_default();
                error!("Worker task failed for {:?}: {}", filename, e);
                stats.total_processed += 1;
                stats.failed += 1;
                Some(FileEvent {
                    filename,
                    folder_name: String::new(),
                    status: StatusGlyph::Failure,
                    destination: None,
                    error: Some(format!("worker task failed: {}", e)),
                })
            }
        };

        self.stats.send_replace(stats.clone());

        if let Some(event) = event {
            if let Some(callback) = &self.callback {
                callback(&event.filename, &event.folder_name, event.status);
            }
            // No subscribers is fine
            let _ = self.events.send(event);
        }
    }
}

fn record_outcome(stats: &mut WorkerStats, outcome: FileOutcome) -> FileEvent {
    let movement = outcome.movement;
    stats.total_processed += 1;

    let status = match movement.status {
        MoveStatus::Success => {
            stats.successful += 1;
            *stats.categories.entry(movement.folder_name.clone()).or_insert(0) += 1;
            info!("File processed: {} -> {}", outcome.filename, movement.folder_name);
            StatusGlyph::Success
        }
        MoveStatus::Warning => {
            stats.failed += 1;
            warn!(
                "File left in place: {} - {}",
                outcome.filename,
                movement.error.as_deref().unwrap_or("skipped")
            );
            StatusGlyph::Skipped
        }
        MoveStatus::Error => {
            stats.failed += 1;
            error!(
                "Move failed: {} - {}",
                outcome.filename,
                movement.error.as_deref().unwrap_or("unknown error")
            );
            StatusGlyph::Failure
        }
    };

    FileEvent {
        filename: outcome.filename,
        folder_name: movement.folder_name,
        status,
        destination: movement.destination_path,
        error: movement.error,
    }
}

fn display_name(path: &std::path::Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.display().to_string())
}

impl WorkerHandle {
    /// Queue a path, waiting for space
    pub async fn enqueue(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.check_accepting()?;
        self.queue
            .send(path.into())
            .await
            .map_err(|_| FoldwiseError::Worker("worker is no longer running".to_string()))
    }

    /// Queue a path without waiting; fails when the queue is full
    pub fn try_enqueue(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.check_accepting()?;
        self.queue.try_send(path.into()).map_err(|e| match e {
            mpsc::error::TrySendError::Full(p) => {
                FoldwiseError::Worker(format!("queue full, dropped {}", p.display()))
            }
            mpsc::error::TrySendError::Closed(_) => {
                FoldwiseError::Worker("worker is no longer running".to_string())
            }
        })
    }

    /// Queue a path from synchronous code; must not be called inside a runtime
    pub fn blocking_enqueue(&self, path: impl Into<PathBuf>) -> Result<()> {
        self.check_accepting()?;
        self.queue
            .blocking_send(path.into())
            .map_err(|_| FoldwiseError::Worker("worker is no longer running".to_string()))
    }

    /// Signal shutdown and wait until in-flight files have finished.
    /// Returns at once if the worker was never started; a later `run`
    /// sees the signal and stops without dequeuing.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let mut state = self.state.clone();
        // Err means the worker was dropped, which is also stopped
        let _ = state
            .wait_for(|s| matches!(s, WorkerState::Idle | WorkerState::Stopped))
            .await;
    }

    /// [`WorkerHandle::stop`] for synchronous callers
    pub fn blocking_stop(&self) -> Result<()> {
        let runtime = tokio::runtime::Builder::new_current_thread().build()?;
        runtime.block_on(self.stop());
        Ok(())
    }

    pub fn stats(&self) -> WorkerStats {
        self.stats.borrow().clone()
    }

    pub fn state(&self) -> WorkerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FileEvent> {
        self.events.subscribe()
    }

    fn check_accepting(&self) -> Result<()> {
        if *self.shutdown.borrow() {
            Err(FoldwiseError::Worker("worker is shutting down".to_string()))
        } else {
            Ok(())
        }
    }
}
