//! Error types for store and worker pool operations.
//!
//! `StoreError::Empty` is a control-flow signal rather than a failure: it
//! tells the caller that nothing is currently queued. Everything else is a
//! real failure of the backing store or of pool wiring.

use thiserror::Error;

/// Result type alias for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors returned by [`Store`](crate::store::Store) implementations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// No item is currently available.
    #[error("store is empty")]
    Empty,

    /// The backing engine failed (transaction, I/O, driver).
    #[error("database error: {message}")]
    Database {
        /// Driver error message
        message: String,
    },

    /// The store was closed and no longer accepts operations.
    #[error("store is closed")]
    Closed,
}

impl StoreError {
    /// Creates a database error from a message.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database { message: message.into() }
    }

    /// Returns `true` for the empty signal.
    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::Empty,
            sqlx::Error::PoolClosed => Self::Closed,
            _ => Self::database(err.to_string()),
        }
    }
}

/// Errors returned by the [`WorkerPool`](crate::worker_pool::WorkerPool).
#[derive(Debug, Error)]
pub enum PoolError {
    /// The pool was wired incorrectly at build time.
    #[error("invalid worker pool configuration: {message}")]
    Configuration {
        /// What was missing or out of range
        message: String,
    },

    /// The pool was already closed.
    #[error("worker pool is closed")]
    Closed,

    /// The wrapped store rejected an enqueue.
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PoolError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_is_a_signal_not_a_database_failure() {
        assert!(StoreError::Empty.is_empty());
        assert!(!StoreError::database("disk I/O error").is_empty());
        assert!(!StoreError::Closed.is_empty());
    }

    #[test]
    fn sqlx_errors_map_onto_store_errors() {
        assert_eq!(StoreError::from(sqlx::Error::RowNotFound), StoreError::Empty);
        assert_eq!(StoreError::from(sqlx::Error::PoolClosed), StoreError::Closed);
        assert!(matches!(
            StoreError::from(sqlx::Error::Protocol("bad frame".to_string())),
            StoreError::Database { .. }
        ));
    }

    #[test]
    fn error_display_format() {
        assert_eq!(StoreError::Empty.to_string(), "store is empty");
        assert_eq!(StoreError::database("locked").to_string(), "database error: locked");
        assert_eq!(
            PoolError::configuration("worker_count must be positive").to_string(),
            "invalid worker pool configuration: worker_count must be positive"
        );
        assert_eq!(PoolError::from(StoreError::Closed).to_string(), "store is closed");
    }
}
