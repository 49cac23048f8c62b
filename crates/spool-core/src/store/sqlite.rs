//! SQLite-backed store with transactional dequeue.
//!
//! Payloads live in a single `queue` table keyed by an autoincrementing id,
//! so ids are never reused once a row is removed. The pool is pinned to one
//! physical connection: every enqueue and dequeue is serialized through it,
//! which keeps correctness independent of the driver's own locking.

use std::{
    path::Path,
    str::FromStr,
    sync::atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};
use tracing::debug;

use super::{Payload, Store};
use crate::error::{Result, StoreError};

const CREATE_QUEUE_TABLE: &str = r"
    CREATE TABLE IF NOT EXISTS queue (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        data BLOB NOT NULL
    )
";

/// Durable FIFO queue stored in a SQLite database.
#[derive(Debug)]
pub struct SqliteStore {
    pool: SqlitePool,
    closed: AtomicBool,
}

impl SqliteStore {
    /// Opens the database at `path`, creating the file and table if needed.
    ///
    /// # Errors
    ///
    /// Returns `StoreError::Database` if the file cannot be opened or the
    /// schema cannot be created.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .pragma("secure_delete", "on");

        debug!(path = %path.as_ref().display(), "opening sqlite store");
        Self::connect_with(options).await
    }

    /// Opens a private in-memory database. Contents vanish on close.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.pragma("secure_delete", "on");
        Self::connect_with(options).await
    }

    async fn connect_with(options: SqliteConnectOptions) -> Result<Self> {
        // One live connection for the lifetime of the store. An in-memory
        // database would be lost if the pool recycled it.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;

        sqlx::query(CREATE_QUEUE_TABLE).execute(&pool).await?;

        Ok(Self { pool, closed: AtomicBool::new(false) })
    }

    /// Number of payloads currently stored.
    pub async fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM queue").fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }

    async fn pop_oldest(&self) -> Result<Payload> {
        let mut tx = self.pool.begin().await?;

        let oldest: Option<(i64, Vec<u8>)> =
            sqlx::query_as("SELECT id, data FROM queue ORDER BY id LIMIT 1")
                .fetch_optional(&mut *tx)
                .await?;

        let Some((id, data)) = oldest else {
            tx.rollback().await?;
            return Err(StoreError::Empty);
        };

        // Dropping `tx` on an early return rolls back, so a failed delete
        // never leaves the row half-removed.
        sqlx::query("DELETE FROM queue WHERE id = ?").bind(id).execute(&mut *tx).await?;
        tx.commit().await?;

        Ok(data)
    }
}

impl Store for SqliteStore {
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            sqlx::query("INSERT INTO queue (data) VALUES (?)")
                .bind(payload)
                .execute(&self.pool)
                .await?;
            Ok(())
        })
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Payload>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.pop_oldest().await
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(StoreError::Closed);
            }
            self.pool.close().await;
            debug!("sqlite store closed");
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn sequential_dequeues_follow_insertion_order() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.enqueue(vec![9, 9]).await.unwrap();
        store.enqueue(vec![0]).await.unwrap();

        assert_eq!(store.dequeue().await.unwrap(), vec![9, 9]);
        assert_eq!(store.dequeue().await.unwrap(), vec![0]);
        assert_eq!(store.dequeue().await, Err(StoreError::Empty));
    }

    #[tokio::test]
    async fn ids_are_not_reused_after_the_last_row_is_removed() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.enqueue(vec![1]).await.unwrap();
        store.dequeue().await.unwrap();
        store.enqueue(vec![2]).await.unwrap();

        let id: i64 = sqlx::query_scalar("SELECT id FROM queue").fetch_one(&store.pool).await.unwrap();
        assert_eq!(id, 2);
    }

    #[tokio::test]
    async fn len_tracks_pending_rows() {
        let store = SqliteStore::in_memory().await.unwrap();

        store.enqueue(b"a".to_vec()).await.unwrap();
        store.enqueue(b"b".to_vec()).await.unwrap();
        assert_eq!(store.len().await.unwrap(), 2);

        store.dequeue().await.unwrap();
        assert_eq!(store.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn closed_store_rejects_operations() {
        let store = SqliteStore::in_memory().await.unwrap();
        store.close().await.unwrap();

        assert_eq!(store.enqueue(vec![1]).await, Err(StoreError::Closed));
        assert_eq!(store.dequeue().await, Err(StoreError::Closed));
        assert_eq!(store.close().await, Err(StoreError::Closed));
    }
}
