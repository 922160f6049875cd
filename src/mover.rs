// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Safe file relocation into classified folders

use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::{DuplicateStrategy, MoverConfig};
use crate::history::{self, SharedHistory, UndoAction};

const FORBIDDEN_CHARS: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];
const RESERVED_DEVICE_NAMES: &[&str] = &[
    "CON", "PRN", "AUX", "NUL", "COM1", "COM2", "COM3", "COM4", "COM5", "COM6", "COM7", "COM8",
    "COM9", "LPT1", "LPT2", "LPT3", "LPT4", "LPT5", "LPT6", "LPT7", "LPT8", "LPT9",
];
const RESERVED_SUFFIX: &str = "_folder";
const PLACEHOLDER_NAME: &str = "folder";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MoveStatus {
    Success,
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MoveErrorKind {
    NotFound,
    PermissionDenied,
    InsufficientSpace,
    InvalidFolderName,
    DuplicateSkipped,
    Io,
}

impl MoveErrorKind {
    fn from_io(err: &io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => Self::NotFound,
            io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            _ if is_out_of_space(err) || err.to_string().to_lowercase().contains("space") => {
                Self::InsufficientSpace
            }
            _ => Self::Io,
        }
    }
}

/// Auditable outcome of one move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MoveResult {
    pub status: MoveStatus,
    pub source_path: PathBuf,
    pub destination_path: Option<PathBuf>,
    pub folder_name: String,
    pub created_new_folder: bool,
    pub duplicate_handled: bool,
    pub error: Option<String>,
    pub error_kind: Option<MoveErrorKind>,
    pub undo_action_id: Option<String>,
}

impl MoveResult {
    fn failed(source: &Path, folder_name: &str, kind: MoveErrorKind, message: String) -> Self {
        Self {
            status: MoveStatus::Error,
            source_path: source.to_path_buf(),
            destination_path: None,
            folder_name: folder_name.to_string(),
            created_new_folder: false,
            duplicate_handled: false,
            error: Some(message),
            error_kind: Some(kind),
            undo_action_id: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == MoveStatus::Success
    }
}

enum Placement {
    Moved { target: PathBuf, duplicate_handled: bool },
    Skipped(PathBuf),
    Failed { target: PathBuf, duplicate_handled: bool, error: io::Error },
}

/// Moves files under a base directory
pub struct Mover {
    base_path: PathBuf,
    strategy: DuplicateStrategy,
    max_name_len: usize,
    history: Option<SharedHistory>,
}

impl Mover {
    pub fn new(base_path: impl Into<PathBuf>, config: &MoverConfig) -> Self {
        Self {
            base_path: base_path.into(),
            strategy: config.duplicate_strategy,
            max_name_len: config.max_folder_name_length.max(1),
            history: None,
        }
    }

    /// Record every successful move in `history`
    pub fn with_history(mut self, history: SharedHistory) -> Self {
        self.history = Some(history);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    pub fn history(&self) -> Option<&SharedHistory> {
        self.history.as_ref()
    }

    /// Move `source` into `<base>/<folder_name>/`
    pub fn move_file(&self, source: &Path, folder_name: &str) -> MoveResult {
        if let Err((kind, message)) = check_source(source) {
            return MoveResult::failed(source, folder_name, kind, message);
        }

        let Some(folder) = sanitize_folder_name(folder_name, self.max_name_len) else {
            return MoveResult::failed(
                source,
                folder_name,
                MoveErrorKind::InvalidFolderName,
                format!("unusable folder name {:?}", folder_name),
            );
        };

        let dest_dir = self.base_path.join(&folder);
        let created_new_folder = !dest_dir.is_dir();
        if let Err(e) = fs::create_dir_all(&dest_dir) {
            return MoveResult::failed(
                source,
                &folder,
                MoveErrorKind::from_io(&e),
                format!("cannot create {}: {}", dest_dir.display(), e),
            );
        }
        if created_new_folder {
            debug!("Created folder {}", dest_dir.display());
        }

        let Some(filename) = source.file_name() else {
            return MoveResult::failed(source, &folder, MoveErrorKind::Io, "source has no file name".to_string());
        };
        let filename = filename.to_string_lossy().into_owned();

        if same_file(source, &dest_dir.join(&filename)) {
            return MoveResult {
                status: MoveStatus::Warning,
                source_path: source.to_path_buf(),
                destination_path: Some(dest_dir.join(&filename)),
                folder_name: folder,
                created_new_folder,
                duplicate_handled: false,
                error: Some("file is already in its destination".to_string()),
                error_kind: None,
                undo_action_id: None,
            };
        }

        let (target, duplicate_handled) = match self.place(source, &dest_dir, &filename) {
            Placement::Moved { target, duplicate_handled } => (target, duplicate_handled),
            Placement::Skipped(existing) => {
                info!("Skipping {}: {} exists", source.display(), existing.display());
                return MoveResult {
                    status: MoveStatus::Warning,
                    source_path: source.to_path_buf(),
                    destination_path: None,
                    folder_name: folder,
                    created_new_folder,
                    duplicate_handled: true,
                    error: Some(format!("{} already exists", existing.display())),
                    error_kind: Some(MoveErrorKind::DuplicateSkipped),
                    undo_action_id: None,
                };
            }
            Placement::Failed { target, duplicate_handled, error } => {
                return MoveResult {
                    created_new_folder,
                    duplicate_handled,
                    ..MoveResult::failed(
                        source,
                        &folder,
                        MoveErrorKind::from_io(&error),
                        format!("move to {} failed: {}", target.display(), error),
                    )
                };
            }
        };

        info!("Moved {} -> {}", source.display(), target.display());
        let undo_action_id = self.record(source, &target, &folder);

        MoveResult {
            status: MoveStatus::Success,
            source_path: source.to_path_buf(),
            destination_path: Some(target),
            folder_name: folder,
            created_new_folder,
            duplicate_handled,
            error: None,
            error_kind: None,
            undo_action_id,
        }
    }

    /// Choose the destination name and move into it in one step; a name
    /// is only ever taken by claiming it, never by checking it first
    fn place(&self, source: &Path, dest_dir: &Path, filename: &str) -> Placement {
        let target = dest_dir.join(filename);
        match claim_move(source, &target) {
            Ok(()) => {
                return Placement::Moved {
                    target,
                    duplicate_handled: false,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(error) => {
                return Placement::Failed {
                    target,
                    duplicate_handled: false,
                    error,
                }
            }
        }

        match self.strategy {
            DuplicateStrategy::Skip => Placement::Skipped(target),
            DuplicateStrategy::Overwrite => {
                let replaced = match fs::remove_file(&target) {
                    Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
                    _ => relocate(source, &target),
                };
                match replaced {
                    Ok(()) => Placement::Moved {
                        target,
                        duplicate_handled: true,
                    },
                    Err(error) => Placement::Failed {
                        target,
                        duplicate_handled: true,
                        error,
                    },
                }
            }
            DuplicateStrategy::RenameWithNumber => claim_numbered(source, dest_dir, filename),
            DuplicateStrategy::RenameWithTimestamp => {
                let stamped = format!("{}_{}", chrono::Local::now().format(TIMESTAMP_FORMAT), filename);
                let target = dest_dir.join(&stamped);
                match claim_move(source, &target) {
                    Ok(()) => Placement::Moved {
                        target,
                        duplicate_handled: true,
                    },
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        claim_numbered(source, dest_dir, &stamped)
                    }
                    Err(error) => Placement::Failed {
                        target,
                        duplicate_handled: true,
                        error,
                    },
                }
            }
        }
    }

    fn record(&self, source: &Path, target: &Path, folder: &str) -> Option<String> {
        let shared = self.history.as_ref()?;
        let action = UndoAction::new_move(source.to_path_buf(), target.to_path_buf(), folder);
        let id = action.id.clone();

        let outcome = history::lock(shared).and_then(|mut h| h.add(action));
        match outcome {
            Ok(()) => Some(id),
            Err(e) => {
                // The move itself succeeded; only its undo record is missing
                warn!("Failed to record move of {}: {}", source.display(), e);
                None
            }
        }
    }
}

fn check_source(source: &Path) -> std::result::Result<(), (MoveErrorKind, String)> {
    let meta = fs::metadata(source).map_err(|e| {
        (
            MoveErrorKind::from_io(&e),
            format!("cannot access {}: {}", source.display(), e),
        )
    })?;
    if !meta.is_file() {
        return Err((
            MoveErrorKind::Io,
            format!("{} is not a regular file", source.display()),
        ));
    }
    fs::File::open(source).map_err(|e| {
        (
            MoveErrorKind::from_io(&e),
            format!("cannot read {}: {}", source.display(), e),
        )
    })?;
    Ok(())
}

/// Make a model-supplied name safe to use as a single path component
pub fn sanitize_folder_name(name: &str, max_len: usize) -> Option<String> {
    let replaced: String = name
        .chars()
        .map(|c| {
            if FORBIDDEN_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    let trimmed = replaced.trim();
    if trimmed.is_empty() {
        return None;
    }
    if trimmed.chars().all(|c| c == '.') {
        return Some(PLACEHOLDER_NAME.to_string());
    }

    let mut sanitized: String = trimmed.chars().take(max_len).collect();
    sanitized = sanitized.trim_end().to_string();
    if sanitized.is_empty() {
        return None;
    }

    let upper = sanitized.to_uppercase();
    if RESERVED_DEVICE_NAMES.contains(&upper.as_str()) {
        sanitized.push_str(RESERVED_SUFFIX);
    }
    Some(sanitized)
}

/// Claim the first free `stem(n).ext` in `dir`
fn claim_numbered(source: &Path, dir: &Path, filename: &str) -> Placement {
    let path = Path::new(filename);
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| filename.to_string());
    let ext = path.extension().map(|e| e.to_string_lossy().into_owned());

    let mut n = 1u32;
    loop {
        let candidate = match &ext {
            Some(ext) => format!("{}({}).{}", stem, n, ext),
            None => format!("{}({})", stem, n),
        };
        let target = dir.join(candidate);
        match claim_move(source, &target) {
            Ok(()) => {
                return Placement::Moved {
                    target,
                    duplicate_handled: true,
                }
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists && n < u32::MAX => n += 1,
            Err(error) => {
                return Placement::Failed {
                    target,
                    duplicate_handled: true,
                    error,
                }
            }
        }
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Move `from` to `to` only if `to` is free; fails with `AlreadyExists`
/// otherwise and leaves both paths untouched
pub(crate) fn claim_move(from: &Path, to: &Path) -> io::Result<()> {
    match fs::hard_link(from, to) {
        Ok(()) => {
            if let Err(e) = fs::remove_file(from) {
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
        Err(e) if matches!(e.kind(), io::ErrorKind::AlreadyExists | io::ErrorKind::NotFound) => Err(e),
        Err(e) => {
            debug!("Cannot link {} ({}), copying", from.display(), e);
            copy_exclusive(from, to)
        }
    }
}

/// Copy into a newly created `to`, then drop `from`
fn copy_exclusive(from: &Path, to: &Path) -> io::Result<()> {
    let mut input = fs::File::open(from)?;
    let mut output = fs::OpenOptions::new().write(true).create_new(true).open(to)?;

    let copied = io::copy(&mut input, &mut output).and_then(|_| output.sync_all());
    if let Err(e) = copied {
        drop(output);
        let _ = fs::remove_file(to);
        return Err(e);
    }
    if let Ok(meta) = input.metadata() {
        let _ = fs::set_permissions(to, meta.permissions());
    }

    if let Err(e) = fs::remove_file(from) {
        // Keep exactly one copy
        let _ = fs::remove_file(to);
        return Err(e);
    }
    Ok(())
}

/// Rename over `to`, falling back to copy and delete across filesystems
fn relocate(from: &Path, to: &Path) -> io::Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(e) if is_cross_device(&e) => {
            debug!("Cross-device move of {}, copying", from.display());
            fs::copy(from, to)?;
            if let Err(e) = fs::remove_file(from) {
                // Keep exactly one copy
                let _ = fs::remove_file(to);
                return Err(e);
            }
            Ok(())
        }
        Err(e) => Err(e),
    }
}

fn is_cross_device(err: &io::Error) -> bool {
    // EXDEV on unix, ERROR_NOT_SAME_DEVICE on windows
    matches!(err.raw_os_error(), Some(18) if cfg!(unix))
        || matches!(err.raw_os_error(), Some(17) if cfg!(windows))
}

fn is_out_of_space(err: &io::Error) -> bool {
    // ENOSPC on unix, ERROR_DISK_FULL / ERROR_HANDLE_DISK_FULL on windows
    match err.raw_os_error() {
        Some(28) => cfg!(unix),
        Some(112) | Some(39) => cfg!(windows),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::UndoManager;

    fn mover(base: &Path, strategy: DuplicateStrategy) -> Mover {
        Mover::new(
            base,
            &MoverConfig {
                duplicate_strategy: strategy,
                ..MoverConfig::default()
            },
        )
    }

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        fs::create_dir_all(dir).unwrap();
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_move_creates_folder() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(&dir.path().join("in"), "plan.txt", "trip");
        let base = dir.path().join("sorted");

        let result = mover(&base, DuplicateStrategy::RenameWithNumber).move_file(&src, "Travel");
        assert!(result.is_success(), "{:?}", result.error);
        assert!(result.created_new_folder);
        assert!(!result.duplicate_handled);
        assert_eq!(result.destination_path, Some(base.join("Travel").join("plan.txt")));
        assert!(!src.exists());

        let src = write(&dir.path().join("in"), "other.txt", "x");
        let result = mover(&base, DuplicateStrategy::RenameWithNumber).move_file(&src, "Travel");
        assert!(!result.created_new_folder);
    }

    #[test]
    fn test_rename_with_number() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sorted");
        let m = mover(&base, DuplicateStrategy::RenameWithNumber);

        let first = m.move_file(&write(&dir.path().join("a"), "name.ext", "first"), "Docs");
        let second = m.move_file(&write(&dir.path().join("b"), "name.ext", "second"), "Docs");
        let third = m.move_file(&write(&dir.path().join("c"), "name.ext", "third"), "Docs");

        let folder = base.join("Docs");
        assert_eq!(first.destination_path, Some(folder.join("name.ext")));
        assert_eq!(second.destination_path, Some(folder.join("name(1).ext")));
        assert_eq!(third.destination_path, Some(folder.join("name(2).ext")));
        assert!(second.duplicate_handled);
        assert_eq!(fs::read_to_string(folder.join("name.ext")).unwrap(), "first");
        assert_eq!(fs::read_to_string(folder.join("name(1).ext")).unwrap(), "second");
    }

    #[test]
    fn test_concurrent_same_name_moves_keep_every_file() {
        const TASKS: usize = 16;
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sorted");
        let m = mover(&base, DuplicateStrategy::RenameWithNumber);
        let sources: Vec<PathBuf> = (0..TASKS)
            .map(|i| write(&dir.path().join(format!("in{}", i)), "report.txt", &format!("copy {}", i)))
            .collect();
        fs::create_dir_all(base.join("Reports")).unwrap();

        let barrier = std::sync::Barrier::new(TASKS);
        let results: Vec<MoveResult> = std::thread::scope(|scope| {
            let handles: Vec<_> = sources
                .iter()
                .map(|src| {
                    let (m, barrier) = (&m, &barrier);
                    scope.spawn(move || {
                        barrier.wait();
                        m.move_file(src, "Reports")
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert!(results.iter().all(MoveResult::is_success));
        let mut destinations: Vec<PathBuf> =
            results.into_iter().filter_map(|r| r.destination_path).collect();
        destinations.sort();
        destinations.dedup();
        assert_eq!(destinations.len(), TASKS);

        let mut contents: Vec<String> = fs::read_dir(base.join("Reports"))
            .unwrap()
            .map(|e| fs::read_to_string(e.unwrap().path()).unwrap())
            .collect();
        contents.sort();
        let mut expected: Vec<String> = (0..TASKS).map(|i| format!("copy {}", i)).collect();
        expected.sort();
        assert_eq!(contents, expected);
    }

    #[test]
    fn test_claim_move_refuses_occupied_target() {
        let dir = tempfile::tempdir().unwrap();
        let incoming = write(dir.path(), "a.txt", "incoming");
        let target = write(&dir.path().join("Docs"), "a.txt", "already moved");

        let err = claim_move(&incoming, &target).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
        assert_eq!(fs::read_to_string(&target).unwrap(), "already moved");
        assert_eq!(fs::read_to_string(&incoming).unwrap(), "incoming");
    }

    #[test]
    fn test_copy_exclusive_refuses_occupied_target() {
        let dir = tempfile::tempdir().unwrap();
        let incoming = write(dir.path(), "a.txt", "incoming");
        let target = write(&dir.path().join("Docs"), "a.txt", "already moved");

        assert!(copy_exclusive(&incoming, &target).is_err());
        assert_eq!(fs::read_to_string(&target).unwrap(), "already moved");
        assert!(incoming.exists());

        let free = dir.path().join("Docs").join("b.txt");
        copy_exclusive(&incoming, &free).unwrap();
        assert_eq!(fs::read_to_string(&free).unwrap(), "incoming");
        assert!(!incoming.exists());
    }

    #[test]
    fn test_skip_leaves_source() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sorted");
        write(&base.join("Docs"), "a.txt", "existing");
        let src = write(&dir.path().join("in"), "a.txt", "incoming");

        let result = mover(&base, DuplicateStrategy::Skip).move_file(&src, "Docs");
        assert_eq!(result.status, MoveStatus::Warning);
        assert_eq!(result.error_kind, Some(MoveErrorKind::DuplicateSkipped));
        assert!(src.exists());
        assert_eq!(fs::read_to_string(base.join("Docs").join("a.txt")).unwrap(), "existing");
    }

    #[test]
    fn test_overwrite_replaces() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sorted");
        write(&base.join("Docs"), "a.txt", "existing");
        let src = write(&dir.path().join("in"), "a.txt", "incoming");

        let result = mover(&base, DuplicateStrategy::Overwrite).move_file(&src, "Docs");
        assert!(result.is_success());
        assert!(result.duplicate_handled);
        assert_eq!(fs::read_to_string(base.join("Docs").join("a.txt")).unwrap(), "incoming");
    }

    #[test]
    fn test_rename_with_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("sorted");
        write(&base.join("Docs"), "a.txt", "existing");
        let src = write(&dir.path().join("in"), "a.txt", "incoming");

        let result = mover(&base, DuplicateStrategy::RenameWithTimestamp).move_file(&src, "Docs");
        let dest = result.destination_path.unwrap();
        let name = dest.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with("_a.txt"), "{}", name);
        // YYYY-MM-DD_HH-MM-SS_
        assert_eq!(name.len(), "a.txt".len() + 20);
        assert_eq!(fs::read_to_string(&dest).unwrap(), "incoming");
    }

    #[test]
    fn test_missing_source() {
        let dir = tempfile::tempdir().unwrap();
        let result = mover(dir.path(), DuplicateStrategy::Skip)
            .move_file(&dir.path().join("nope.txt"), "Docs");
        assert_eq!(result.status, MoveStatus::Error);
        assert_eq!(result.error_kind, Some(MoveErrorKind::NotFound));
    }

    #[test]
    fn test_directory_source_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let sub = dir.path().join("subdir");
        fs::create_dir_all(&sub).unwrap();
        let result = mover(dir.path(), DuplicateStrategy::Skip).move_file(&sub, "Docs");
        assert_eq!(result.status, MoveStatus::Error);
        assert!(sub.exists());
    }

    #[test]
    fn test_invalid_folder_name() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(dir.path(), "a.txt", "x");
        let result = mover(&dir.path().join("out"), DuplicateStrategy::Skip).move_file(&src, "   ");
        assert_eq!(result.error_kind, Some(MoveErrorKind::InvalidFolderName));
        assert!(src.exists());
    }

    #[test]
    fn test_records_history() {
        let dir = tempfile::tempdir().unwrap();
        let src = write(&dir.path().join("in"), "a.txt", "x");
        let history = UndoManager::in_memory().shared();
        let m = mover(&dir.path().join("out"), DuplicateStrategy::Skip).with_history(history.clone());

        let result = m.move_file(&src, "Docs");
        let h = history.lock().unwrap();
        assert_eq!(h.len(), 1);
        assert_eq!(result.undo_action_id.as_deref(), Some(h.history()[0].id.as_str()));
        assert_eq!(h.history()[0].source_path, src);
        assert_eq!(h.history()[0].folder_name, "Docs");
    }

    #[test]
    fn test_sanitize_folder_name() {
        assert_eq!(sanitize_folder_name("a/b:c", 255).as_deref(), Some("a_b_c"));
        assert_eq!(sanitize_folder_name("  Travel  ", 255).as_deref(), Some("Travel"));
        assert_eq!(sanitize_folder_name("con", 255).as_deref(), Some("con_folder"));
        assert_eq!(sanitize_folder_name("LPT9", 255).as_deref(), Some("LPT9_folder"));
        assert_eq!(sanitize_folder_name("...", 255).as_deref(), Some("folder"));
        assert_eq!(sanitize_folder_name("abcdef", 3).as_deref(), Some("abc"));
        assert_eq!(sanitize_folder_name("", 255), None);
        assert_eq!(sanitize_folder_name("abc", 0), None);
        assert_eq!(sanitize_folder_name("tab\there", 255).as_deref(), Some("tab_here"));
    }
}
