//! Worker pool that drains a store through a caller-supplied handler.
//!
//! A fixed number of tokio tasks repeatedly dequeue from the shared
//! [`Store`] and pass each result to the [`Handler`]. Idle workers park on a
//! wake signal instead of polling, and every handler invocation runs inside
//! its own fault boundary so one bad item cannot take a worker down.
//!
//! # Shutdown
//!
//! [`WorkerPool::close`] cancels every worker and waits until all of them
//! have returned. A handler that is already running finishes first; items
//! still sitting in the store stay there. The pool never closes the store it
//! wraps.

use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc,
    },
};

use futures::{future::BoxFuture, FutureExt};
use tokio::{
    runtime::Handle,
    sync::{Mutex, Notify, RwLock},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    error::{PoolError, StoreError},
    store::{Payload, Store},
};

const OPEN: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Processes items taken from the store.
///
/// `item` is either a dequeued payload or the store error that occurred
/// while dequeuing. [`StoreError::Empty`] only reaches the handler when the
/// pool was built with [`EmptyPolicy::Deliver`].
///
/// Returning an error or panicking discards the item; the worker carries on
/// with the next one.
pub trait Handler: Send + Sync + 'static {
    /// Handles one dequeue result.
    fn handle(&self, item: Result<Payload, StoreError>) -> BoxFuture<'_, anyhow::Result<()>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Result<Payload, StoreError>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, item: Result<Payload, StoreError>) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(self(item))
    }
}

/// What a worker does when the store reports it is empty.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EmptyPolicy {
    /// Park until the next wake or shutdown signal. The handler never sees
    /// [`StoreError::Empty`].
    #[default]
    Intercept,
    /// Pass [`StoreError::Empty`] to the handler and poll again once it
    /// returns. The handler is responsible for backing off.
    Deliver,
}

/// Point-in-time counters for a worker pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Items (payloads or store failures) passed to the handler.
    pub handled: u64,
    /// Handler invocations that returned an error or panicked.
    pub faults: u64,
    /// Handler invocations currently in progress.
    pub in_flight: u64,
}

/// Builder for [`WorkerPool`].
#[derive(Default)]
pub struct WorkerPoolBuilder {
    store: Option<Arc<dyn Store>>,
    handler: Option<Arc<dyn Handler>>,
    worker_count: usize,
    empty_policy: EmptyPolicy,
}

impl WorkerPoolBuilder {
    /// Store to drain. The pool shares it and never closes it.
    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    /// Handler invoked for every dequeued item.
    pub fn handler<H: Handler>(mut self, handler: H) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Number of concurrent workers. Must be positive.
    pub fn worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Behaviour on an empty store. Defaults to [`EmptyPolicy::Intercept`].
    pub fn empty_policy(mut self, empty_policy: EmptyPolicy) -> Self {
        self.empty_policy = empty_policy;
        self
    }

    /// Validates the wiring and spawns the workers.
    ///
    /// Returns as soon as the workers are spawned; it does not wait for them
    /// to start.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Configuration` if the store or handler is missing,
    /// the worker count is zero, or no Tokio runtime is available.
    pub fn build(self) -> Result<WorkerPool, PoolError> {
        let store = self.store.ok_or_else(|| PoolError::configuration("store is missing"))?;
        let handler = self.handler.ok_or_else(|| PoolError::configuration("handler is missing"))?;
        if self.worker_count == 0 {
            return Err(PoolError::configuration("worker_count must be positive"));
        }
        let runtime = Handle::try_current()
            .map_err(|e| PoolError::configuration(format!("no tokio runtime available: {e}")))?;

        let wake = Arc::new(Notify::new());
        let shutdown = CancellationToken::new();
        let stats =
            Arc::new(RwLock::new(PoolStats { active_workers: self.worker_count, ..Default::default() }));

        info!(
            worker_count = self.worker_count,
            empty_policy = ?self.empty_policy,
            "spawning queue workers"
        );

        let handles = (0..self.worker_count)
            .map(|worker_id| {
                let worker = Worker {
                    id: worker_id,
                    store: store.clone(),
                    handler: handler.clone(),
                    empty_policy: self.empty_policy,
                    wake: wake.clone(),
                    shutdown: shutdown.clone(),
                    stats: stats.clone(),
                };
                runtime.spawn(worker.run())
            })
            .collect();

        Ok(WorkerPool {
            store,
            wake,
            shutdown,
            state: AtomicU8::new(OPEN),
            worker_count: self.worker_count,
            workers: Mutex::new(handles),
            stats,
        })
    }
}

/// Fixed pool of workers draining one store.
pub struct WorkerPool {
    store: Arc<dyn Store>,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    state: AtomicU8,
    worker_count: usize,
    workers: Mutex<Vec<JoinHandle<()>>>,
    stats: Arc<RwLock<PoolStats>>,
}

impl WorkerPool {
    /// Starts building a pool.
    pub fn builder() -> WorkerPoolBuilder {
        WorkerPoolBuilder::default()
    }

    /// Spawns `worker_count` workers draining `store` through `handler`,
    /// intercepting empty results.
    ///
    /// # Errors
    ///
    /// See [`WorkerPoolBuilder::build`].
    pub fn new<H: Handler>(
        store: Arc<dyn Store>,
        handler: H,
        worker_count: usize,
    ) -> Result<Self, PoolError> {
        Self::builder().store(store).handler(handler).worker_count(worker_count).build()
    }

    /// Stores `payload` and wakes an idle worker.
    ///
    /// The wake is best-effort: if no worker is parked and a wake is already
    /// pending, this one is dropped. Busy workers drain the store before
    /// parking again, so the payload is still picked up.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` once [`close`](Self::close) has completed,
    /// or `PoolError::Store` if the store rejects the payload.
    pub async fn enqueue(&self, payload: Payload) -> Result<(), PoolError> {
        if self.state.load(Ordering::Acquire) == CLOSED {
            return Err(PoolError::Closed);
        }
        self.store.enqueue(payload).await?;
        self.wake.notify_one();
        Ok(())
    }

    /// Stops every worker and waits for them to exit.
    ///
    /// Returns once every handler invocation that started before this call
    /// has returned. Does not wait for the store to drain and does not close
    /// it. Handlers still running may enqueue until this returns.
    ///
    /// # Errors
    ///
    /// Returns `PoolError::Closed` if the pool is already closing or closed.
    pub async fn close(&self) -> Result<(), PoolError> {
        if self
            .state
            .compare_exchange(OPEN, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PoolError::Closed);
        }

        info!(worker_count = self.worker_count, "closing worker pool");
        self.shutdown.cancel();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for (worker_id, handle) in handles.into_iter().enumerate() {
            if let Err(join_error) = handle.await {
                error!(worker_id, error = %join_error, "worker task failed during shutdown");
            }
        }

        self.stats.write().await.active_workers = 0;
        self.state.store(CLOSED, Ordering::Release);

        info!("worker pool closed");
        Ok(())
    }

    /// The store this pool drains.
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Number of workers the pool was built with.
    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Returns `true` while any worker task is still running.
    pub async fn has_active_workers(&self) -> bool {
        self.workers.lock().await.iter().any(|handle| !handle.is_finished())
    }

    /// Current pool counters.
    pub async fn stats(&self) -> PoolStats {
        self.stats.read().await.clone()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if *self.state.get_mut() != OPEN {
            return;
        }

        let active = self.workers.get_mut().iter().filter(|h| !h.is_finished()).count();
        if active > 0 {
            self.shutdown.cancel();
            warn!(
                active_workers = active,
                "worker pool dropped without close(); cancelling workers without waiting"
            );
        }
    }
}

struct Worker {
    id: usize,
    store: Arc<dyn Store>,
    handler: Arc<dyn Handler>,
    empty_policy: EmptyPolicy,
    wake: Arc<Notify>,
    shutdown: CancellationToken,
    stats: Arc<RwLock<PoolStats>>,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "queue worker starting");

        let mut idle = false;
        loop {
            if idle {
                tokio::select! {
                    () = self.wake.notified() => {},
                    () = self.shutdown.cancelled() => break,
                }
            } else if self.shutdown.is_cancelled() {
                break;
            }

            idle = self.poll_once().await;
        }

        debug!(worker_id = self.id, "queue worker stopped");
    }

    /// Dequeues once. Returns `true` when the worker should park.
    async fn poll_once(&self) -> bool {
        match self.store.dequeue().await {
            Err(StoreError::Empty) if self.empty_policy == EmptyPolicy::Intercept => true,
            Err(StoreError::Empty) => {
                self.invoke(Err(StoreError::Empty)).await;
                false
            },
            item => {
                self.stats.write().await.in_flight += 1;
                let faulted = self.invoke(item).await;

                let mut stats = self.stats.write().await;
                stats.in_flight -= 1;
                stats.handled += 1;
                if faulted {
                    stats.faults += 1;
                }
                false
            },
        }
    }

    /// Runs the handler inside the fault boundary. Returns `true` if the
    /// invocation failed.
    async fn invoke(&self, item: Result<Payload, StoreError>) -> bool {
        let handler = &self.handler;
        let outcome = AssertUnwindSafe(async move { handler.handle(item).await }).catch_unwind().await;

        match outcome {
            Ok(Ok(())) => false,
            Ok(Err(error)) => {
                warn!(worker_id = self.id, error = %error, "handler failed, item discarded");
                true
            },
            Err(panic) => {
                error!(
                    worker_id = self.id,
                    panic = %panic_message(panic.as_ref()),
                    "handler panicked, item discarded"
                );
                true
            },
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use std::{
        sync::atomic::{AtomicUsize, Ordering},
        time::Duration,
    };

    use super::*;
    use crate::store::MemoryStore;

    fn memory_store() -> Arc<dyn Store> {
        Arc::new(MemoryStore::new())
    }

    async fn accept(_item: Result<Payload, StoreError>) -> anyhow::Result<()> {
        Ok(())
    }

    async fn reject_zero_panic_on_one(item: Result<Payload, StoreError>) -> anyhow::Result<()> {
        match item?.as_slice() {
            [0] => anyhow::bail!("rejected"),
            [1] => panic!("handler defect"),
            _ => Ok(()),
        }
    }

    async fn wait_until(mut condition: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached within 5s");
    }

    #[tokio::test]
    async fn build_rejects_missing_wiring() {
        let missing_store =
            WorkerPool::builder().handler(accept).worker_count(1).build();
        assert!(matches!(missing_store, Err(PoolError::Configuration { .. })));

        let missing_handler = WorkerPool::builder().store(memory_store()).worker_count(1).build();
        assert!(matches!(missing_handler, Err(PoolError::Configuration { .. })));

        let no_workers = WorkerPool::new(memory_store(), accept, 0);
        assert!(matches!(no_workers, Err(PoolError::Configuration { .. })));
    }

    #[test]
    fn build_outside_runtime_is_a_configuration_error() {
        let result = WorkerPool::new(memory_store(), accept, 1);
        assert!(matches!(result, Err(PoolError::Configuration { .. })));
    }

    #[tokio::test]
    async fn spawns_configured_number_of_workers() {
        let pool = WorkerPool::new(memory_store(), accept, 4).unwrap();

        assert_eq!(pool.worker_count(), 4);
        assert_eq!(pool.stats().await.active_workers, 4);
        assert!(pool.has_active_workers().await);

        pool.close().await.unwrap();
        assert_eq!(pool.stats().await.active_workers, 0);
        assert!(!pool.has_active_workers().await);
    }

    #[tokio::test]
    async fn empty_results_are_intercepted_by_default() {
        let empties = Arc::new(AtomicUsize::new(0));
        let seen = empties.clone();
        let pool = WorkerPool::new(
            memory_store(),
            move |item: Result<Payload, StoreError>| {
                let seen = seen.clone();
                async move {
                    if matches!(item, Err(StoreError::Empty)) {
                        seen.fetch_add(1, Ordering::SeqCst);
                    }
                    Ok::<(), anyhow::Error>(())
                }
            },
            2,
        )
        .unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.close().await.unwrap();

        assert_eq!(empties.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deliver_policy_hands_empty_to_the_handler() {
        let empties = Arc::new(AtomicUsize::new(0));
        let seen = empties.clone();
        let pool = WorkerPool::builder()
            .store(memory_store())
            .worker_count(1)
            .empty_policy(EmptyPolicy::Deliver)
            .handler(move |item: Result<Payload, StoreError>| {
                let seen = seen.clone();
                async move {
                    if matches!(item, Err(StoreError::Empty)) {
                        seen.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                    Ok::<(), anyhow::Error>(())
                }
            })
            .build()
            .unwrap();

        let probe = empties.clone();
        wait_until(move || probe.load(Ordering::SeqCst) >= 2).await;
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn handler_errors_and_panics_are_counted_as_faults() {
        let pool = WorkerPool::new(
            memory_store(),
            reject_zero_panic_on_one,
            1,
        )
        .unwrap();

        for byte in [0u8, 1, 2] {
            pool.enqueue(vec![byte]).await.unwrap();
        }

        tokio::time::timeout(Duration::from_secs(5), async {
            while pool.stats().await.handled < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let stats = pool.stats().await;
        assert_eq!(stats.faults, 2);
        assert_eq!(stats.in_flight, 0);
        pool.close().await.unwrap();
    }

    #[tokio::test]
    async fn second_close_is_an_error() {
        let pool = WorkerPool::new(memory_store(), accept, 1).unwrap();

        pool.close().await.unwrap();
        assert!(matches!(pool.close().await, Err(PoolError::Closed)));
    }

    #[tokio::test]
    async fn enqueue_after_close_is_rejected_and_store_stays_open() {
        let store = Arc::new(MemoryStore::new());
        let pool = WorkerPool::new(store.clone(), accept, 1).unwrap();

        pool.close().await.unwrap();
        assert!(matches!(pool.enqueue(vec![1]).await, Err(PoolError::Closed)));

        store.enqueue(vec![2]).await.unwrap();
        assert_eq!(store.dequeue().await.unwrap(), vec![2]);
    }

    #[test]
    fn panic_messages_are_extracted() {
        let static_str: Box<dyn Any + Send> = Box::new("boom");
        let owned: Box<dyn Any + Send> = Box::new(String::from("bang"));
        let other: Box<dyn Any + Send> = Box::new(42_u32);

        assert_eq!(panic_message(static_str.as_ref()), "boom");
        assert_eq!(panic_message(owned.as_ref()), "bang");
        assert_eq!(panic_message(other.as_ref()), "non-string panic payload");
    }
}
