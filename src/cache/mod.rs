// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Classification cache keyed by file content hash
//!
//! One row per distinct content, independent of path or name, so a renamed
//! or re-downloaded copy of a file never costs a second remote call.

pub mod hash;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use crate::{FoldwiseError, Result};

pub use hash::{content_hash, HashStrategy};

/// Result cache (thread-safe wrapper)
#[derive(Clone)]
pub struct ResultCache {
    conn: Arc<Mutex<Connection>>,
}

/// A stored classification outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub content_hash: String,
    pub filename: String,
    pub file_size_bytes: u64,
    pub folder_name: String,
    pub category: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Cache statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: i64,
    pub folder_count: i64,
    pub total_bytes: i64,
}

impl ResultCache {
    /// Open or create the cache database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.initialize()?;
        Ok(cache)
    }

    /// Open an in-memory cache (for testing)
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let cache = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        cache.initialize()?;
        Ok(cache)
    }

    fn lock_conn(&self) -> Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| FoldwiseError::Config("Cache lock poisoned".to_string()))
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS classification_cache (
                content_hash TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                file_size INTEGER NOT NULL DEFAULT 0,
                folder_name TEXT NOT NULL,
                category TEXT NOT NULL DEFAULT '',
                reason TEXT NOT NULL DEFAULT '',
                timestamp TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_cache_folder ON classification_cache(folder_name);
        "#,
        )?;
        Ok(())
    }

    /// Find a prior outcome for this content
    pub fn lookup(&self, content_hash: &str) -> Result<Option<CacheEntry>> {
        let conn = self.lock_conn()?;
        let result = conn.query_row(
            r#"SELECT content_hash, filename, file_size, folder_name, category, reason, timestamp
               FROM classification_cache WHERE content_hash = ?1"#,
            params![content_hash],
            |row| {
                let size: i64 = row.get(2)?;
                let timestamp: String = row.get(6)?;
                Ok(CacheEntry {
                    content_hash: row.get(0)?,
                    filename: row.get(1)?,
                    file_size_bytes: size.max(0) as u64,
                    folder_name: row.get(3)?,
                    category: row.get(4)?,
                    reason: row.get(5)?,
                    timestamp: DateTime::parse_from_rfc3339(&timestamp)
                        .map(|dt| dt.with_timezone(&Utc))
                        .unwrap_or_else(|_| Utc::now()),
                })
            },
        );
        match result {
            Ok(entry) => Ok(Some(entry)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Insert or replace the entry for its content hash (last write wins)
    pub fn store(&self, entry: &CacheEntry) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT OR REPLACE INTO classification_cache
               (content_hash, filename, file_size, folder_name, category, reason, timestamp)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"#,
            params![
                entry.content_hash,
                entry.filename,
                entry.file_size_bytes.min(i64::MAX as u64) as i64,
                entry.folder_name,
                entry.category,
                entry.reason,
                entry.timestamp.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn stats(&self) -> Result<CacheStats> {
        let conn = self.lock_conn()?;
        let (entry_count, folder_count, total_bytes) = conn.query_row(
            r#"SELECT COUNT(*), COUNT(DISTINCT folder_name), COALESCE(SUM(file_size), 0)
               FROM classification_cache"#,
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        Ok(CacheStats {
            entry_count,
            folder_count,
            total_bytes,
        })
    }

    /// Remove every entry; returns how many were deleted
    pub fn clear(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        Ok(conn.execute("DELETE FROM classification_cache", [])?)
    }

    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute("VACUUM", [])?;
        Ok(())
    }

    pub async fn lookup_async(&self, content_hash: String) -> Result<Option<CacheEntry>> {
        let cache = self.clone();
        offload(move || cache.lookup(&content_hash)).await
    }

    pub async fn store_async(&self, entry: CacheEntry) -> Result<()> {
        let cache = self.clone();
        offload(move || cache.store(&entry)).await
    }
}

/// Hash a file from async code without blocking the scheduler
pub async fn content_hash_async(path: PathBuf, strategy: HashStrategy) -> Result<String> {
    offload(move || content_hash(&path, &strategy).map_err(FoldwiseError::from)).await
}

async fn offload<T, F>(f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FoldwiseError::Worker(format!("blocking task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(hash: &str, folder: &str) -> CacheEntry {
        CacheEntry {
            content_hash: hash.to_string(),
            filename: "report.txt".to_string(),
            file_size_bytes: 42,
            folder_name: folder.to_string(),
            category: "document".to_string(),
            reason: "looks like a report".to_string(),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_store_and_lookup() {
        let cache = ResultCache::in_memory().unwrap();
        assert!(cache.lookup("abc").unwrap().is_none());

        cache.store(&entry("abc", "Reports")).unwrap();
        let found = cache.lookup("abc").unwrap().unwrap();
        assert_eq!(found.folder_name, "Reports");
        assert_eq!(found.file_size_bytes, 42);
        assert_eq!(found.category, "document");
    }

    #[test]
    fn test_last_write_wins() {
        let cache = ResultCache::in_memory().unwrap();
        cache.store(&entry("abc", "Reports")).unwrap();
        cache.store(&entry("abc", "Finance")).unwrap();

        assert_eq!(cache.lookup("abc").unwrap().unwrap().folder_name, "Finance");
        assert_eq!(cache.stats().unwrap().entry_count, 1);
    }

    #[test]
    fn test_stats_and_clear() {
        let cache = ResultCache::in_memory().unwrap();
        cache.store(&entry("a", "Reports")).unwrap();
        cache.store(&entry("b", "Reports")).unwrap();
        cache.store(&entry("c", "Travel")).unwrap();

        let stats = cache.stats().unwrap();
        assert_eq!(stats.entry_count, 3);
        assert_eq!(stats.folder_count, 2);
        assert_eq!(stats.total_bytes, 126);

        assert_eq!(cache.clear().unwrap(), 3);
        assert_eq!(cache.stats().unwrap().entry_count, 0);
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.db");
        {
            let cache = ResultCache::open(&path).unwrap();
            cache.store(&entry("persist", "Travel")).unwrap();
        }
        let cache = ResultCache::open(&path).unwrap();
        assert_eq!(cache.lookup("persist").unwrap().unwrap().folder_name, "Travel");
    }

    #[tokio::test]
    async fn test_async_adapters() {
        let cache = ResultCache::in_memory().unwrap();
        cache.store_async(entry("k", "Reports")).await.unwrap();
        let found = cache.lookup_async("k".to_string()).await.unwrap();
        assert_eq!(found.unwrap().folder_name, "Reports");

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("f.txt");
        std::fs::write(&path, b"hello").unwrap();
        let h = content_hash_async(path.clone(), HashStrategy::default()).await.unwrap();
        assert_eq!(h, content_hash(&path, &HashStrategy::default()).unwrap());
    }
}
