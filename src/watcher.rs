// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Folder watching: the event source that feeds the worker queue

use notify::event::{ModifyKind, RenameMode};
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{channel, Receiver, RecvTimeoutError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};

use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(500);
const STABLE_CHECK_INTERVAL: Duration = Duration::from_millis(500);

/// Events emitted by the watcher
#[derive(Debug, Clone, PartialEq)]
pub enum WatchEvent {
    /// A file appeared, by creation or by being renamed into place
    Arrived(PathBuf),
    /// Watcher error
    Error(String),
}

/// Watches directories for newly arrived files
pub struct FileWatcher {
    watcher: RecommendedWatcher,
    watched_paths: Vec<PathBuf>,
    ignored: Vec<PathBuf>,
    event_rx: Receiver<notify::Result<Event>>,
}

impl FileWatcher {
    pub fn new() -> Result<Self> {
        let (tx, rx) = channel();
        let config = Config::default().with_poll_interval(Duration::from_secs(2));
        let watcher = RecommendedWatcher::new(tx, config)?;

        Ok(Self {
            watcher,
            watched_paths: Vec::new(),
            ignored: Vec::new(),
            event_rx: rx,
        })
    }

    /// Add a directory to watch, creating it if needed
    pub fn watch(&mut self, path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::create_dir_all(path)?;
            info!("Created watch directory: {:?}", path);
        }

        self.watcher.watch(path, RecursiveMode::NonRecursive)?;
        self.watched_paths.push(path.to_path_buf());
        info!("Watching: {:?}", path);
        Ok(())
    }

    /// Never report files under `path` (e.g. the sorted output tree)
    pub fn ignore(&mut self, path: &Path) {
        self.ignored.push(path.canonicalize().unwrap_or_else(|_| path.to_path_buf()));
    }

    pub fn watched_paths(&self) -> &[PathBuf] {
        &self.watched_paths
    }

    /// Next event, waiting at most `timeout`
    pub fn next_event(&self, timeout: Duration) -> Option<WatchEvent> {
        match self.event_rx.recv_timeout(timeout) {
            Ok(Ok(event)) => convert_event(event),
            Ok(Err(e)) => Some(WatchEvent::Error(e.to_string())),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(WatchEvent::Error("Watcher disconnected".to_string()))
            }
        }
    }

    /// Forward arrivals to `tx` until `stop` is set or the receiver closes.
    /// Blocks the calling thread; run it under `spawn_blocking`.
    pub fn forward(self, tx: UnboundedSender<PathBuf>, stop: Arc<AtomicBool>) {
        while !stop.load(Ordering::Relaxed) {
            match self.next_event(POLL_INTERVAL) {
                Some(WatchEvent::Arrived(path)) => {
                    if !should_process(&path) || self.is_ignored(&path) {
                        debug!("Ignoring {:?}", path);
                        continue;
                    }
                    if tx.send(path).is_err() {
                        break;
                    }
                }
                Some(WatchEvent::Error(e)) => {
                    warn!("Watch error: {}", e);
                    if e.contains("disconnected") {
                        break;
                    }
                }
                None => {}
            }
        }
        debug!("Watcher stopped");
    }

    fn is_ignored(&self, path: &Path) -> bool {
        let path = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());
        self.ignored.iter().any(|ignored| path.starts_with(ignored))
    }
}

fn convert_event(event: Event) -> Option<WatchEvent> {
    match event.kind {
        EventKind::Create(_) => event.paths.into_iter().next().map(WatchEvent::Arrived),
        // Renamed into the folder: the destination is the last path
        EventKind::Modify(ModifyKind::Name(RenameMode::To))
        | EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => {
            event.paths.into_iter().last().map(WatchEvent::Arrived)
        }
        _ => None,
    }
}

/// Files already sitting in `dir`, for processing on startup
pub fn existing_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && should_process(path))
        .collect();
    files.sort();
    Ok(files)
}

/// Check if a file should be processed
pub fn should_process(path: &Path) -> bool {
    let filename = match path.file_name().and_then(|n| n.to_str()) {
        Some(n) => n,
        None => return false,
    };

    // Hidden files
    if filename.starts_with('.') {
        return false;
    }

    // Partial downloads and editor temp files
    let temp_suffixes = [".tmp", ".part", ".crdownload", ".partial", ".download", "~"];
    if temp_suffixes.iter().any(|ext| filename.ends_with(ext)) {
        return false;
    }
    if filename.starts_with("~$") {
        return false;
    }

    let skip_names = ["desktop.ini", "thumbs.db", ".ds_store"];
    !skip_names.iter().any(|n| filename.eq_ignore_ascii_case(n))
}

/// Wait for a file to stop growing; `false` if it vanished
pub async fn wait_for_stable(path: &Path, max_wait: Duration) -> bool {
    let start = std::time::Instant::now();

    let mut last_size = match tokio::fs::metadata(path).await {
        Ok(m) => m.len(),
        Err(_) => return false,
    };

    loop {
        tokio::time::sleep(STABLE_CHECK_INTERVAL).await;

        let current_size = match tokio::fs::metadata(path).await {
            Ok(m) => m.len(),
            Err(_) => return false,
        };

        if current_size == last_size {
            return true;
        }

        if start.elapsed() > max_wait {
            warn!("File stability check timed out for {:?}", path);
            return true;
        }

        last_size = current_size;
        debug!("File {:?} still being written, size: {}", path, current_size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::CreateKind;

    #[test]
    fn test_should_process() {
        assert!(should_process(Path::new("/in/report.pdf")));
        assert!(should_process(Path::new("사진.jpg")));
        assert!(!should_process(Path::new("/in/.hidden")));
        assert!(!should_process(Path::new("/in/movie.mkv.part")));
        assert!(!should_process(Path::new("/in/setup.exe.crdownload")));
        assert!(!should_process(Path::new("/in/~$budget.xlsx")));
        assert!(!should_process(Path::new("/in/Thumbs.db")));
    }

    #[test]
    fn test_convert_event() {
        let created = Event::new(EventKind::Create(CreateKind::File)).add_path("/in/a.txt".into());
        assert_eq!(convert_event(created), Some(WatchEvent::Arrived("/in/a.txt".into())));

        let renamed = Event::new(EventKind::Modify(ModifyKind::Name(RenameMode::Both)))
            .add_path("/in/a.part".into())
            .add_path("/in/a.zip".into());
        assert_eq!(convert_event(renamed), Some(WatchEvent::Arrived("/in/a.zip".into())));

        let removed = Event::new(EventKind::Remove(notify::event::RemoveKind::File))
            .add_path("/in/a.txt".into());
        assert_eq!(convert_event(removed), None);
    }

    #[test]
    fn test_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.txt"), "b").unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        std::fs::write(dir.path().join(".hidden"), "h").unwrap();
        std::fs::create_dir(dir.path().join("folder")).unwrap();

        let files = existing_files(dir.path()).unwrap();
        assert_eq!(files, vec![dir.path().join("a.txt"), dir.path().join("b.txt")]);
    }

    #[tokio::test]
    async fn test_wait_for_stable() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("done.txt");
        std::fs::write(&path, "complete").unwrap();
        assert!(wait_for_stable(&path, Duration::from_secs(5)).await);
        assert!(!wait_for_stable(&dir.path().join("missing"), Duration::from_secs(1)).await);
    }
}
