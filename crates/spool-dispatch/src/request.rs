//! Outbound requests and the record that carries them through the store.

use serde::{Deserialize, Serialize};
use url::Url;

/// An HTTP request to be sent at some point in the future.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    /// Raw request body.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,
    /// HTTP method, e.g. `POST`.
    pub method: String,
    /// Absolute target URL.
    pub target: Url,
}

impl Request {
    /// Creates a request.
    pub fn new(method: impl Into<String>, target: Url, body: impl Into<Vec<u8>>) -> Self {
        Self { body: body.into(), method: method.into(), target }
    }

    /// Creates a `POST` request.
    pub fn post(target: Url, body: impl Into<Vec<u8>>) -> Self {
        Self::new("POST", target, body)
    }
}

/// A request together with its retry bookkeeping, as persisted in the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    #[serde(flatten)]
    pub request: Request,
    /// Attempts still allowed after the next one fails.
    pub retries_remaining: u32,
    /// Attempts already made.
    #[serde(default)]
    pub attempts: u32,
}

impl Record {
    /// Wraps a fresh request with a full retry budget.
    pub fn new(request: Request, retries_remaining: u32) -> Self {
        Self { request, retries_remaining, attempts: 0 }
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&BASE64.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        BASE64.decode(encoded).map_err(serde::de::Error::custom)
    }
}
