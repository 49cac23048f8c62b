//! HTTP client for dispatching requests with a bounded timeout.
//!
//! Sends one attempt per call and classifies the outcome for the retry
//! logic: a 2xx response is delivered, anything else is an error whose
//! [`is_retryable`](DispatchError::is_retryable) decides the record's fate.

use std::time::{Duration, Instant};

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::{debug, info_span, warn, Instrument};

use crate::{
    error::{DispatchError, Result},
    request::Request,
};

/// Configuration for the dispatch client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    /// Upper bound on a single attempt, connect through response headers.
    pub timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self { timeout: Duration::from_secs(1), user_agent: "Spool-Dispatch/0.1".to_string() }
    }
}

/// Thin wrapper around a pooled `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct DispatchClient {
    client: reqwest::Client,
    config: ClientConfig,
}

impl DispatchClient {
    /// Creates a client with the given configuration.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the timeout is zero or the
    /// underlying client cannot be built.
    pub fn new(config: ClientConfig) -> Result<Self> {
        if config.timeout.is_zero() {
            return Err(DispatchError::configuration("client timeout must be positive"));
        }

        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(&config.user_agent)
            .build()
            .map_err(|e| {
                DispatchError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Creates a client with default configuration.
    pub fn with_defaults() -> Result<Self> {
        Self::new(ClientConfig::default())
    }

    /// The configuration this client was built with.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Performs one attempt of `request`.
    ///
    /// Returns the status code of a successful (2xx) response.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` if the method is not a valid HTTP token
    /// - `Timeout` if no response arrived in time
    /// - `Transport` for connection and protocol failures
    /// - `Status` for any non-2xx response
    pub async fn send(&self, request: &Request) -> Result<u16> {
        let method = Method::from_bytes(request.method.as_bytes()).map_err(|e| {
            DispatchError::invalid_request(format!("invalid method {:?}: {e}", request.method))
        })?;

        let span = info_span!("dispatch", method = %method, target = %request.target);

        async move {
            let started = Instant::now();

            let response = match self
                .client
                .request(method, request.target.clone())
                .body(request.body.clone())
                .send()
                .await
            {
                Ok(response) => response,
                Err(e) => {
                    let elapsed_ms = started.elapsed().as_millis();
                    warn!(elapsed_ms, error = %e, "request failed");

                    if e.is_timeout() {
                        return Err(DispatchError::timeout(timeout_millis(self.config.timeout)));
                    }
                    if e.is_builder() {
                        return Err(DispatchError::invalid_request(e.to_string()));
                    }
                    return Err(DispatchError::transport(e.to_string()));
                },
            };

            let status = response.status();
            debug!(
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis(),
                "received response"
            );

            if status.is_success() {
                Ok(status.as_u16())
            } else {
                Err(DispatchError::status(status.as_u16()))
            }
        }
        .instrument(span)
        .await
    }
}

fn timeout_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use url::Url;
    use wiremock::{matchers, Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request(server: &MockServer, method: &str) -> Request {
        let target = Url::parse(&format!("{}/hook", server.uri())).unwrap();
        Request::new(method, target, b"test payload".to_vec())
    }

    #[tokio::test]
    async fn successful_delivery() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("POST"))
            .and(matchers::path("/hook"))
            .and(matchers::body_bytes(b"test payload".to_vec()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DispatchClient::with_defaults().unwrap();
        let status = client.send(&request(&mock_server, "POST")).await.unwrap();

        assert_eq!(status, 202);
    }

    #[tokio::test]
    async fn method_is_passed_through() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::method("DELETE"))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&mock_server)
            .await;

        let client = DispatchClient::with_defaults().unwrap();
        assert_eq!(client.send(&request(&mock_server, "DELETE")).await.unwrap(), 204);
    }

    #[tokio::test]
    async fn non_success_status_is_retryable() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(404))
            .mount(&mock_server)
            .await;

        let client = DispatchClient::with_defaults().unwrap();
        let error = client.send(&request(&mock_server, "POST")).await.unwrap_err();

        assert_eq!(error, DispatchError::status(404));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn slow_response_times_out() {
        let mock_server = MockServer::start().await;

        Mock::given(matchers::any())
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&mock_server)
            .await;

        let config = ClientConfig { timeout: Duration::from_millis(100), ..Default::default() };
        let client = DispatchClient::new(config).unwrap();
        let error = client.send(&request(&mock_server, "POST")).await.unwrap_err();

        assert_eq!(error, DispatchError::timeout(100));
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn connection_refused_is_a_retryable_transport_error() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let target = Url::parse(&format!("http://{addr}/hook")).unwrap();
        let client = DispatchClient::with_defaults().unwrap();
        let error = client.send(&Request::post(target, Vec::new())).await.unwrap_err();

        assert!(matches!(error, DispatchError::Transport { .. }), "got {error:?}");
        assert!(error.is_retryable());
    }

    #[tokio::test]
    async fn invalid_method_is_terminal() {
        let target = Url::parse("http://127.0.0.1:9/hook").unwrap();
        let client = DispatchClient::with_defaults().unwrap();

        let error =
            client.send(&Request::new("NOT A METHOD", target, Vec::new())).await.unwrap_err();

        assert!(matches!(error, DispatchError::InvalidRequest { .. }));
        assert!(!error.is_retryable());
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = ClientConfig { timeout: Duration::ZERO, ..Default::default() };
        assert!(matches!(DispatchClient::new(config), Err(DispatchError::Configuration { .. })));
    }
}
