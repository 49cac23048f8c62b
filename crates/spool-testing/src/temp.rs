//! Temporary SQLite stores that clean up after themselves.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use anyhow::{Context, Result};
use spool_core::SqliteStore;
use tempfile::TempDir;

/// Hands out SQLite stores backed by files in a private temporary directory.
///
/// Every file is removed by [`clean`](Self::clean) or, at the latest, when
/// the manager is dropped.
pub struct TempStores {
    dir: TempDir,
    files: Mutex<Vec<PathBuf>>,
}

impl TempStores {
    /// Creates a fresh temporary directory.
    pub fn new() -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix("spool-")
            .tempdir()
            .context("failed to create temporary directory")?;
        Ok(Self { dir, files: Mutex::new(Vec::new()) })
    }

    /// Directory holding the database files.
    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Registers and returns a new, not yet created database path.
    pub fn new_path(&self) -> PathBuf {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let path = self.dir.path().join(format!("queue-{}.db", files.len()));
        files.push(path.clone());
        path
    }

    /// Opens a store on a fresh database file.
    pub async fn create(&self) -> Result<SqliteStore> {
        self.open(self.new_path()).await
    }

    /// Opens (or reopens) a store at `path`.
    pub async fn open(&self, path: impl AsRef<Path>) -> Result<SqliteStore> {
        let path = path.as_ref();
        SqliteStore::open(path)
            .await
            .with_context(|| format!("failed to open sqlite store at {}", path.display()))
    }

    /// Removes every database file handed out so far, including WAL side
    /// files.
    pub fn clean(&self) {
        let mut files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        for path in files.drain(..) {
            for suffix in ["", "-wal", "-shm"] {
                let mut file = path.clone().into_os_string();
                file.push(suffix);
                let _ = std::fs::remove_file(file);
            }
        }
    }
}
