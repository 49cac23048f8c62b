//! Storage abstraction for FIFO byte queues.
//!
//! A [`Store`] holds opaque payloads and hands them back oldest first. Two
//! implementations are provided: [`MemoryStore`] for process-local queues and
//! [`SqliteStore`] for queues that must survive a restart. The worker pool
//! only ever talks to the trait, so callers can bring their own backend.

use futures::future::BoxFuture;

use crate::error::Result;

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Opaque bytes carried through a store.
pub type Payload = Vec<u8>;

/// Ordered, concurrency-safe payload container.
///
/// Implementations must never lose a payload, never hand the same payload
/// out twice, and always return the oldest still-present payload from
/// [`dequeue`](Store::dequeue).
pub trait Store: Send + Sync + 'static {
    /// Appends a payload at the tail.
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<()>>;

    /// Removes and returns the payload at the head.
    ///
    /// Returns [`StoreError::Empty`](crate::StoreError::Empty) when nothing is
    /// queued.
    fn dequeue(&self) -> BoxFuture<'_, Result<Payload>>;

    /// Releases backing resources. Every later call fails with
    /// [`StoreError::Closed`](crate::StoreError::Closed).
    fn close(&self) -> BoxFuture<'_, Result<()>>;
}
