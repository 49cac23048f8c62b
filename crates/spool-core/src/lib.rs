//! FIFO byte queues and the worker pool that drains them.
//!
//! This crate provides the storage and concurrency half of spool: an ordered
//! [`Store`] of opaque payloads, two backends for it, and a [`WorkerPool`]
//! that pulls items off a store and hands them to a user handler.
//!
//! # Architecture
//!
//! Producers call [`WorkerPool::enqueue`], which appends to the store and
//! wakes one idle worker. Each worker loops:
//!
//! 1. **Dequeue** - take the oldest payload from the store
//! 2. **Handle** - invoke the handler inside a panic-catching boundary
//! 3. **Park** - when the store is empty, wait for the next wake or shutdown
//!
//! # Key Features
//!
//! - **Pluggable Storage** - [`MemoryStore`] or the durable [`SqliteStore`]
//! - **Fault Isolation** - a handler that errors or panics loses only its item
//! - **Graceful Shutdown** - close waits for in-flight handlers, not the queue
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use spool_core::{MemoryStore, Payload, PoolError, StoreError, WorkerPool};
//!
//! async fn print(item: Result<Payload, StoreError>) -> anyhow::Result<()> {
//!     println!("{:?}", item?);
//!     Ok(())
//! }
//!
//! # async fn example() -> Result<(), PoolError> {
//! let pool = WorkerPool::new(Arc::new(MemoryStore::new()), print, 3)?;
//!
//! pool.enqueue(b"hello".to_vec()).await?;
//! pool.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod store;
pub mod worker_pool;

// Re-export main public API
pub use error::{PoolError, Result, StoreError};
pub use store::{MemoryStore, Payload, SqliteStore, Store};
pub use worker_pool::{EmptyPolicy, Handler, PoolStats, WorkerPool, WorkerPoolBuilder};
