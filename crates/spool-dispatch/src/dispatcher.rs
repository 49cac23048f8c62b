//! Retrying dispatcher built on a spool worker pool.
//!
//! Submitted requests are encoded into [`Record`]s and stored. Workers take
//! records off the store, send them, and put failed ones back at the tail
//! with one retry less until the budget is spent.
//!
//! # Waiting on an empty store
//!
//! The pool is built with [`EmptyPolicy::Deliver`], so an empty store reaches
//! the dispatch handler, which parks on a [`Monitor`] until the next enqueue
//! or until the dispatcher closes. Closing sets the monitor's flag before
//! waking every waiter, and a waiter registers before reading the flag, so
//! no worker can miss the close.
//!
//! A record dequeued after the flag is set goes straight back into the store
//! without being sent.

use std::{
    pin::pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use futures::future::BoxFuture;
use secrecy::SecretString;
use spool_core::{EmptyPolicy, Handler, Payload, PoolStats, Store, StoreError, WorkerPool};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::{
    client::DispatchClient,
    codec::{PlainCodec, RecordCodec, SealedCodec},
    config::DispatchConfig,
    crypto::Cipher,
    error::{DispatchError, Result},
    request::{Record, Request},
};

/// Closed flag plus a condition workers wait on while the store is empty.
#[derive(Debug, Default)]
struct Monitor {
    closed: AtomicBool,
    condition: Notify,
}

impl Monitor {
    /// Waits until signalled or closed. Returns immediately once closed.
    async fn wait(&self) {
        let mut notified = pin!(self.condition.notified());
        notified.as_mut().enable();

        if self.is_closed() {
            return;
        }
        notified.await;
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Wakes one waiter, or the next one to arrive.
    fn signal(&self) {
        self.condition.notify_one();
    }

    /// Marks the monitor closed and wakes every waiter.
    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.condition.notify_waiters();
    }
}

/// State shared between the dispatcher handle and its workers.
struct Shared {
    store: Arc<dyn Store>,
    codec: Box<dyn RecordCodec>,
    client: DispatchClient,
    retry_budget: u32,
    errors: Option<mpsc::Sender<DispatchError>>,
    monitor: Monitor,
}

impl Shared {
    /// Encodes, stores and signals. Used for submissions and retries alike.
    async fn enqueue(&self, record: &Record) -> Result<()> {
        let payload = self.codec.encode(record)?;
        self.store.enqueue(payload).await?;
        self.monitor.signal();
        Ok(())
    }

    async fn process(&self, item: std::result::Result<Payload, StoreError>) -> Result<()> {
        let payload = match item {
            // Picked up after close began: leave it stored for the next run.
            Ok(payload) if self.monitor.is_closed() => {
                self.store.enqueue(payload).await?;
                return Ok(());
            },
            Ok(payload) => payload,
            Err(StoreError::Empty) => {
                self.monitor.wait().await;
                return Ok(());
            },
            Err(error) => return Err(error.into()),
        };

        let mut record = self.codec.decode(&payload)?;
        record.attempts = record.attempts.saturating_add(1);

        match self.client.send(&record.request).await {
            Ok(status) => {
                debug!(
                    target_url = %record.request.target,
                    attempt = record.attempts,
                    status,
                    "request delivered"
                );
                Ok(())
            },
            Err(error) if error.is_retryable() && record.retries_remaining > 0 => {
                record.retries_remaining -= 1;
                warn!(
                    target_url = %record.request.target,
                    attempt = record.attempts,
                    retries_remaining = record.retries_remaining,
                    error = %error,
                    "request failed, scheduling retry"
                );
                self.enqueue(&record).await
            },
            Err(error) if error.is_retryable() => {
                Err(DispatchError::retries_exhausted(record.attempts, error))
            },
            Err(error) => Err(error),
        }
    }

    fn report(&self, error: DispatchError) {
        let Some(errors) = &self.errors else {
            return;
        };
        if let Err(mpsc::error::TrySendError::Full(dropped)) = errors.try_send(error) {
            debug!(error = %dropped, "error channel full, report dropped");
        }
    }
}

/// Pool handler: runs one record through [`Shared::process`] and reports
/// whatever makes it drop the record.
struct DispatchHandler {
    shared: Arc<Shared>,
}

impl Handler for DispatchHandler {
    fn handle(
        &self,
        item: std::result::Result<Payload, StoreError>,
    ) -> BoxFuture<'_, anyhow::Result<()>> {
        Box::pin(async move {
            match self.shared.process(item).await {
                Ok(()) => Ok(()),
                Err(error) => {
                    self.shared.report(error.clone());
                    Err(error.into())
                },
            }
        })
    }
}

/// Durable, retrying HTTP request queue.
///
/// Owns its store: [`close`](Self::close) closes it after the workers stop.
pub struct Dispatcher {
    shared: Arc<Shared>,
    pool: WorkerPool,
    open: AtomicBool,
}

impl Dispatcher {
    /// Starts a dispatcher over `store`.
    ///
    /// With a passphrase, every stored record is sealed with it; without one
    /// records are stored as plain JSON.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` for a zero worker count, a zero
    /// client timeout, an empty passphrase, or when called outside a Tokio
    /// runtime.
    pub fn new(
        store: Arc<dyn Store>,
        passphrase: Option<SecretString>,
        config: DispatchConfig,
    ) -> Result<Self> {
        config.validate()?;

        let sealed = passphrase.is_some();
        let codec: Box<dyn RecordCodec> = match passphrase {
            Some(passphrase) => Box::new(SealedCodec::new(Cipher::new(passphrase)?)),
            None => Box::new(PlainCodec),
        };

        let shared = Arc::new(Shared {
            store: store.clone(),
            codec,
            client: DispatchClient::new(config.client.clone())?,
            retry_budget: config.retry_budget(),
            errors: config.errors.clone(),
            monitor: Monitor::default(),
        });

        let pool = WorkerPool::builder()
            .store(store)
            .handler(DispatchHandler { shared: shared.clone() })
            .worker_count(config.worker_count)
            .empty_policy(EmptyPolicy::Deliver)
            .build()?;

        info!(
            worker_count = config.worker_count,
            retry_budget = shared.retry_budget,
            sealed,
            "dispatcher started"
        );

        Ok(Self { shared, pool, open: AtomicBool::new(true) })
    }

    /// Queues `request` with the configured retry budget.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Closed` after [`close`](Self::close), or the
    /// encode or store error that prevented queueing.
    pub async fn submit(&self, request: Request) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(DispatchError::Closed);
        }
        self.shared.enqueue(&Record::new(request, self.shared.retry_budget)).await
    }

    /// Stops the workers and closes the store.
    ///
    /// Requests in flight finish (and may be re-queued for retry) before the
    /// store is closed; queued requests stay in the store.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Closed` on a second call, or the store error
    /// raised while closing it.
    pub async fn close(&self) -> Result<()> {
        if self.open.compare_exchange(true, false, Ordering::AcqRel, Ordering::Acquire).is_err() {
            return Err(DispatchError::Closed);
        }

        info!("closing dispatcher");
        self.shared.monitor.close();
        self.pool.close().await?;
        self.shared.store.close().await?;
        info!("dispatcher closed");
        Ok(())
    }

    /// Current worker pool counters. `faults` counts dropped records.
    pub async fn stats(&self) -> PoolStats {
        self.pool.stats().await
    }
}

impl Drop for Dispatcher {
    fn drop(&mut self) {
        if *self.open.get_mut() {
            // Workers parked on the monitor never see the pool's cancellation.
            self.shared.monitor.close();
        }
    }
}
