//! Durable, retrying HTTP request dispatch on top of a spool store.
//!
//! A [`Dispatcher`] accepts [`Request`]s, persists them through any
//! [`spool_core::Store`], and sends them from a pool of workers. Failed
//! attempts go back to the tail of the queue until their retry budget runs
//! out.
//!
//! # Key Features
//!
//! - **Bounded Retries** - transport failures and non-2xx responses are
//!   retried up to `max_retries` times, then reported
//! - **Encryption at Rest** - with a passphrase, the store only ever holds
//!   AES-256-GCM sealed records
//! - **No Busy Waiting** - idle workers park until the next submission
//! - **Non-blocking Reporting** - dropped records are reported on an
//!   optional channel without ever stalling a worker
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spool_core::MemoryStore;
//! use spool_dispatch::{DispatchConfig, DispatchError, Dispatcher, Request};
//! use url::Url;
//!
//! # async fn example() -> Result<(), DispatchError> {
//! let dispatcher =
//!     Dispatcher::new(Arc::new(MemoryStore::new()), None, DispatchConfig::default())?;
//!
//! let target = Url::parse("https://example.com/hook").expect("valid url");
//! dispatcher.submit(Request::post(target, b"{}".to_vec())).await?;
//!
//! dispatcher.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod codec;
pub mod config;
pub mod crypto;
mod dispatcher;
pub mod error;
pub mod request;

// Re-export main public API
pub use client::{ClientConfig, DispatchClient};
pub use config::{DispatchConfig, Settings};
pub use dispatcher::Dispatcher;
pub use error::{DispatchError, Result};
pub use request::{Record, Request};
