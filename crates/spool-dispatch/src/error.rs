//! Error types for request dispatch.
//!
//! Transport failures, timeouts and non-success statuses are retryable and
//! consume the retry budget. Everything else drops the record on the spot:
//! a record that cannot be decoded or turned into a request will not get
//! better by being resubmitted.

use spool_core::{PoolError, StoreError};
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Errors produced by the dispatcher and reported on its error channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
    /// Invalid dispatcher configuration.
    #[error("invalid dispatcher configuration: {message}")]
    Configuration {
        /// What was rejected
        message: String,
    },

    /// The dispatcher was already closed.
    #[error("dispatcher is closed")]
    Closed,

    /// The backing store failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// A record could not be serialized or sealed.
    #[error("failed to encode record: {message}")]
    Encode {
        /// Codec error message
        message: String,
    },

    /// A stored record could not be opened or deserialized.
    #[error("failed to decode record: {message}")]
    Decode {
        /// Codec error message
        message: String,
    },

    /// The record does not describe a sendable request.
    #[error("invalid request: {message}")]
    InvalidRequest {
        /// Why the request was rejected
        message: String,
    },

    /// Connection-level failure before a response arrived.
    #[error("transport failure: {message}")]
    Transport {
        /// Error message describing the failure
        message: String,
    },

    /// No response within the client timeout.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout {
        /// Configured client timeout in milliseconds
        timeout_ms: u64,
    },

    /// The target answered with a non-success status.
    #[error("unsuccessful response: HTTP {status_code}")]
    Status {
        /// HTTP status code
        status_code: u16,
    },

    /// The retry budget ran out.
    #[error("giving up after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        /// Total attempts made, including the first
        attempts: u32,
        /// Failure of the final attempt
        last_error: Box<DispatchError>,
    },
}

impl DispatchError {
    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an encode error.
    pub fn encode(message: impl Into<String>) -> Self {
        Self::Encode { message: message.into() }
    }

    /// Creates a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode { message: message.into() }
    }

    /// Creates an invalid request error.
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest { message: message.into() }
    }

    /// Creates a transport error.
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_ms: u64) -> Self {
        Self::Timeout { timeout_ms }
    }

    /// Creates a status error.
    pub fn status(status_code: u16) -> Self {
        Self::Status { status_code }
    }

    /// Creates a retries exhausted error wrapping the final failure.
    pub fn retries_exhausted(attempts: u32, last_error: DispatchError) -> Self {
        Self::RetriesExhausted { attempts, last_error: Box::new(last_error) }
    }

    /// Returns `true` if another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport { .. } | Self::Timeout { .. } | Self::Status { .. })
    }
}

impl From<PoolError> for DispatchError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Configuration { message } => Self::Configuration { message },
            PoolError::Closed => Self::Closed,
            PoolError::Store(store) => Self::Store(store),
        }
    }
}
