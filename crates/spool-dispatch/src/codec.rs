//! Conversion between [`Record`]s and store payloads.

use crate::{
    crypto::Cipher,
    error::{DispatchError, Result},
    request::Record,
};

/// Turns records into store payloads and back.
pub trait RecordCodec: Send + Sync + 'static {
    /// Serializes a record.
    fn encode(&self, record: &Record) -> Result<Vec<u8>>;

    /// Restores a record from a payload produced by [`encode`](Self::encode).
    fn decode(&self, data: &[u8]) -> Result<Record>;
}

/// JSON encoding with no protection; the store sees the request in clear.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlainCodec;

impl RecordCodec for PlainCodec {
    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|e| DispatchError::encode(e.to_string()))
    }

    fn decode(&self, data: &[u8]) -> Result<Record> {
        serde_json::from_slice(data).map_err(|e| DispatchError::decode(e.to_string()))
    }
}

/// JSON encoding sealed with a passphrase; the store only holds ciphertext.
#[derive(Debug)]
pub struct SealedCodec {
    cipher: Cipher,
}

impl SealedCodec {
    pub fn new(cipher: Cipher) -> Self {
        Self { cipher }
    }
}

impl RecordCodec for SealedCodec {
    fn encode(&self, record: &Record) -> Result<Vec<u8>> {
        self.cipher.seal(&PlainCodec.encode(record)?)
    }

    fn decode(&self, data: &[u8]) -> Result<Record> {
        PlainCodec.decode(&self.cipher.open(data)?)
    }
}
