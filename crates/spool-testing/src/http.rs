//! HTTP server that records every request it receives.

use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicU16, Ordering},
        Arc,
    },
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode, Uri},
    Router,
};
use tokio::{
    net::TcpListener,
    sync::{mpsc, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// A request as seen by the [`CaptureServer`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Clone)]
struct CaptureState {
    requests: mpsc::Sender<CapturedRequest>,
    status: Arc<AtomicU16>,
    shutdown: CancellationToken,
}

/// Local HTTP server that publishes each received request on a bounded
/// channel and replies with a configurable status.
///
/// A request handler blocks until its request has been taken off the
/// channel, so a test controls how far the client can run ahead.
pub struct CaptureServer {
    addr: SocketAddr,
    status: Arc<AtomicU16>,
    requests: Mutex<mpsc::Receiver<CapturedRequest>>,
    shutdown: CancellationToken,
    task: Mutex<Option<JoinHandle<std::io::Result<()>>>>,
}

impl CaptureServer {
    /// Binds to a random local port and starts serving.
    ///
    /// `capacity` is the number of requests buffered before handlers start
    /// waiting on the test. Responses default to `200 OK`.
    pub async fn start(capacity: usize) -> Result<Self> {
        let listener =
            TcpListener::bind("127.0.0.1:0").await.context("failed to bind capture server")?;
        let addr = listener.local_addr()?;

        let (tx, rx) = mpsc::channel(capacity.max(1));
        let status = Arc::new(AtomicU16::new(StatusCode::OK.as_u16()));
        let shutdown = CancellationToken::new();

        let state =
            CaptureState { requests: tx, status: status.clone(), shutdown: shutdown.clone() };
        let router = Router::new().fallback(capture).with_state(state);

        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
        });

        debug!(%addr, "capture server listening");
        Ok(Self { addr, status, requests: Mutex::new(rx), shutdown, task: Mutex::new(Some(task)) })
    }

    /// Socket address the server is bound to.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Absolute URL for `path` on this server.
    pub fn url(&self, path: &str) -> String {
        format!("http://{}/{}", self.addr, path.trim_start_matches('/'))
    }

    /// Changes the status code returned to subsequent requests.
    pub fn set_status(&self, status: u16) {
        self.status.store(status, Ordering::Release);
    }

    /// Waits up to `timeout` for the next captured request.
    pub async fn next_request(&self, timeout: Duration) -> Option<CapturedRequest> {
        let mut requests = self.requests.lock().await;
        tokio::time::timeout(timeout, requests.recv()).await.ok().flatten()
    }

    /// Returns an already captured request without waiting.
    pub async fn try_next_request(&self) -> Option<CapturedRequest> {
        self.requests.lock().await.try_recv().ok()
    }

    /// Stops accepting connections and waits for the server task to exit.
    pub async fn close(&self) -> Result<()> {
        self.shutdown.cancel();

        let Some(task) = self.task.lock().await.take() else {
            return Ok(());
        };
        task.await.context("capture server task panicked")?.context("capture server failed")?;

        debug!(addr = %self.addr, "capture server closed");
        Ok(())
    }
}

impl Drop for CaptureServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn capture(
    State(state): State<CaptureState>,
    method: Method,
    uri: Uri,
    body: Bytes,
) -> StatusCode {
    let request =
        CapturedRequest { method: method.to_string(), path: uri.path().to_string(), body: body.to_vec() };

    tokio::select! {
        sent = state.requests.send(request) => {
            if sent.is_err() {
                warn!("capture receiver dropped; request not recorded");
            }
        },
        () = state.shutdown.cancelled() => {
            return StatusCode::SERVICE_UNAVAILABLE;
        },
    }

    StatusCode::from_u16(state.status.load(Ordering::Acquire))
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}
