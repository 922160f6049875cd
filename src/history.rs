// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Undo/redo history of file moves
//!
//! A single ordered list plus a cursor at the most recently applied action.
//! Adding an action while the cursor is not at the tail discards everything
//! after it. The manager only tracks which move to reverse; [`revert`] and
//! [`reapply`] perform the filesystem side for callers that want it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::mover::claim_move;
use crate::{FoldwiseError, Result};

/// History shared between the mover and whoever drives undo
pub type SharedHistory = Arc<Mutex<UndoManager>>;

pub const MOVE_OPERATION: &str = "move";

/// A single recorded move
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UndoAction {
    pub id: String,
    pub operation: String,
    pub source_path: PathBuf,
    pub destination_path: PathBuf,
    pub filename: String,
    pub folder_name: String,
    pub timestamp: DateTime<Utc>,
}

impl UndoAction {
    pub fn new_move(source_path: PathBuf, destination_path: PathBuf, folder_name: &str) -> Self {
        let filename = destination_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            operation: MOVE_OPERATION.to_string(),
            source_path,
            destination_path,
            filename,
            folder_name: folder_name.to_string(),
            timestamp: Utc::now(),
        }
    }
}

#[derive(Serialize)]
struct DocumentRef<'a> {
    history: &'a [UndoAction],
    current_index: i64,
}

#[derive(Deserialize)]
struct Document {
    #[serde(default)]
    history: Vec<UndoAction>,
    #[serde(default = "no_cursor")]
    current_index: i64,
}

fn no_cursor() -> i64 {
    -1
}

/// Linear undo history with a cursor
#[derive(Debug)]
pub struct UndoManager {
    path: Option<PathBuf>,
    history: Vec<UndoAction>,
    /// Index of the most recently applied action, -1 when none is applied
    current_index: i64,
}

impl UndoManager {
    /// Load history from `path`, starting empty if it is missing or unreadable
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (history, current_index) = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<Document>(&content) {
                Ok(doc) => {
                    let max = doc.history.len() as i64 - 1;
                    let index = doc.current_index.clamp(-1, max);
                    (doc.history, index)
                }
                Err(e) => {
                    warn!("Failed to parse history file {:?}: {}", path, e);
                    (Vec::new(), -1)
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => (Vec::new(), -1),
            Err(e) => {
                warn!("Failed to read history file {:?}: {}", path, e);
                (Vec::new(), -1)
            }
        };

        debug!("Loaded {} history entries from {:?}", history.len(), path);
        Self {
            path: Some(path),
            history,
            current_index,
        }
    }

    /// History that is never written to disk
    pub fn in_memory() -> Self {
        Self {
            path: None,
            history: Vec::new(),
            current_index: -1,
        }
    }

    pub fn shared(self) -> SharedHistory {
        Arc::new(Mutex::new(self))
    }

    /// Record a new action, discarding any redo branch
    pub fn add(&mut self, action: UndoAction) -> Result<()> {
        let keep = (self.current_index + 1) as usize;
        let mut history = self.history[..keep].to_vec();
        history.push(action);
        let index = history.len() as i64 - 1;

        self.persist(&history, index)?;
        self.history = history;
        self.current_index = index;
        Ok(())
    }

    /// True once any action is applied; the cursor sits at -1 only when none is
    pub fn can_undo(&self) -> bool {
        self.current_index >= 0
    }

    pub fn can_redo(&self) -> bool {
        self.current_index < self.history.len() as i64 - 1
    }

    /// Step back; returns the action to reverse
    pub fn undo(&mut self) -> Result<Option<UndoAction>> {
        if !self.can_undo() {
            return Ok(None);
        }
        let action = self.history[self.current_index as usize].clone();
        self.persist(&self.history, self.current_index - 1)?;
        self.current_index -= 1;
        Ok(Some(action))
    }

    /// Step forward; returns the action to reapply
    pub fn redo(&mut self) -> Result<Option<UndoAction>> {
        if !self.can_redo() {
            return Ok(None);
        }
        let index = self.current_index + 1;
        let action = self.history[index as usize].clone();
        self.persist(&self.history, index)?;
        self.current_index = index;
        Ok(Some(action))
    }

    /// Put back an action taken by [`UndoManager::undo`] whose reversal failed
    pub fn restore_undone(&mut self) -> Result<()> {
        if self.can_redo() {
            self.persist(&self.history, self.current_index + 1)?;
            self.current_index += 1;
        }
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.persist(&[], -1)?;
        self.history.clear();
        self.current_index = -1;
        Ok(())
    }

    pub fn history(&self) -> &[UndoAction] {
        &self.history
    }

    /// Actions currently in effect, oldest first
    pub fn applied(&self) -> &[UndoAction] {
        &self.history[..(self.current_index + 1) as usize]
    }

    pub fn current_index(&self) -> i64 {
        self.current_index
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Write the given state atomically (temp file, then rename)
    fn persist(&self, history: &[UndoAction], current_index: i64) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(&DocumentRef {
            history,
            current_index,
        })?;
        let tmp = path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

/// Move a file back to where `action` found it
pub fn revert(action: &UndoAction) -> Result<()> {
    move_checked(&action.destination_path, &action.source_path)
}

/// Repeat the move `action` describes
pub fn reapply(action: &UndoAction) -> Result<()> {
    move_checked(&action.source_path, &action.destination_path)
}

fn move_checked(from: &Path, to: &Path) -> Result<()> {
    if !from.is_file() {
        return Err(FoldwiseError::History(format!(
            "{} no longer exists",
            from.display()
        )));
    }
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent)?;
    }
    claim_move(from, to).map_err(|e| {
        if e.kind() == std::io::ErrorKind::AlreadyExists {
            FoldwiseError::History(format!("{} is occupied, refusing to overwrite", to.display()))
        } else {
            FoldwiseError::FileSystem(e)
        }
    })
}

/// Lock shared history, mapping poisoning to a history error
pub fn lock(history: &SharedHistory) -> Result<std::sync::MutexGuard<'_, UndoManager>> {
    history
        .lock()
        .map_err(|_| FoldwiseError::History("History lock poisoned".to_string()))
}
