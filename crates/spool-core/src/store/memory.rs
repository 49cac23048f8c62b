//! In-memory store guarded by a single async mutex.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicBool, Ordering},
};

use futures::future::BoxFuture;
use tokio::sync::Mutex;

use super::{Payload, Store};
use crate::error::{Result, StoreError};

/// Process-local FIFO queue.
///
/// Enqueue pushes to the back and dequeue pops from the front of a
/// `VecDeque`, both under one lock.
#[derive(Debug, Default)]
pub struct MemoryStore {
    items: Mutex<VecDeque<Payload>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of payloads currently queued.
    pub async fn len(&self) -> usize {
        self.items.lock().await.len()
    }

    /// Returns `true` when nothing is queued.
    pub async fn is_empty(&self) -> bool {
        self.items.lock().await.is_empty()
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(StoreError::Closed);
        }
        Ok(())
    }
}

impl Store for MemoryStore {
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.items.lock().await.push_back(payload);
            Ok(())
        })
    }

    fn dequeue(&self) -> BoxFuture<'_, Result<Payload>> {
        Box::pin(async move {
            self.ensure_open()?;
            self.items.lock().await.pop_front().ok_or(StoreError::Empty)
        })
    }

    fn close(&self) -> BoxFuture<'_, Result<()>> {
        Box::pin(async move {
            if self.closed.swap(true, Ordering::AcqRel) {
                return Err(StoreError::Closed);
            }
            Ok(())
        })
    }
}
