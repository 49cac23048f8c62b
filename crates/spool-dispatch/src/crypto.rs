//! Passphrase-based authenticated encryption for stored records.
//!
//! Sealed payloads use the layout
//! `version (1) | salt (16) | nonce (12) | ciphertext + tag`.
//! The AES-256-GCM key is derived from the passphrase and salt with
//! Argon2id. Each cipher picks a random salt once and derives its key once;
//! payloads sealed under another salt (for instance by an earlier process
//! sharing the same store file) have their key derived on first sight. That
//! key is cached, up to a fixed number of salts, once it has opened a
//! payload; keys that fail to authenticate are never kept.

use std::{
    collections::HashMap,
    sync::{Mutex, PoisonError},
};

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use argon2::Argon2;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};

use crate::error::{DispatchError, Result};

const ENVELOPE_VERSION: u8 = 1;
const SALT_SIZE: usize = 16;
const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const HEADER_SIZE: usize = 1 + SALT_SIZE + NONCE_SIZE;
/// Upper bound on cached keys for salts other than the cipher's own.
const MAX_FOREIGN_KEYS: usize = 32;

type Salt = [u8; SALT_SIZE];

/// Seals and opens byte payloads under a passphrase.
pub struct Cipher {
    passphrase: SecretString,
    salt: Salt,
    primary: Aes256Gcm,
    foreign: Mutex<HashMap<Salt, Aes256Gcm>>,
}

impl Cipher {
    /// Derives the sealing key for a fresh random salt.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::Configuration` if the passphrase is empty or
    /// key derivation fails.
    pub fn new(passphrase: SecretString) -> Result<Self> {
        if passphrase.expose_secret().is_empty() {
            return Err(DispatchError::configuration("passphrase must not be empty"));
        }

        let mut salt = [0u8; SALT_SIZE];
        rand::thread_rng().fill_bytes(&mut salt);

        let primary = derive_key(&passphrase, &salt)
            .map_err(|e| DispatchError::configuration(format!("key derivation failed: {e}")))?;

        Ok(Self { passphrase, salt, primary, foreign: Mutex::new(HashMap::new()) })
    }

    /// Encrypts `plaintext` into a self-describing envelope.
    pub fn seal(&self, plaintext: &[u8]) -> Result<Vec<u8>> {
        let mut nonce = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce);

        let ciphertext = self
            .primary
            .encrypt(Nonce::from_slice(&nonce), plaintext)
            .map_err(|e| DispatchError::encode(format!("encryption failed: {e}")))?;

        let mut sealed = Vec::with_capacity(HEADER_SIZE + ciphertext.len());
        sealed.push(ENVELOPE_VERSION);
        sealed.extend_from_slice(&self.salt);
        sealed.extend_from_slice(&nonce);
        sealed.extend_from_slice(&ciphertext);
        Ok(sealed)
    }

    /// Authenticates and decrypts an envelope produced by [`seal`](Self::seal)
    /// under the same passphrase.
    pub fn open(&self, sealed: &[u8]) -> Result<Vec<u8>> {
        if sealed.len() < HEADER_SIZE {
            return Err(DispatchError::decode(format!(
                "sealed payload is {} bytes, shorter than the {HEADER_SIZE} byte header",
                sealed.len()
            )));
        }

        let (version, rest) = sealed.split_at(1);
        if version[0] != ENVELOPE_VERSION {
            return Err(DispatchError::decode(format!(
                "unsupported envelope version {} (expected {ENVELOPE_VERSION})",
                version[0]
            )));
        }

        let (salt, rest) = rest.split_at(SALT_SIZE);
        let (nonce, ciphertext) = rest.split_at(NONCE_SIZE);

        if salt == self.salt.as_slice() {
            return self
                .primary
                .decrypt(Nonce::from_slice(nonce), ciphertext)
                .map_err(|_| authentication_failed());
        }
        self.open_foreign(salt, nonce, ciphertext)
    }

    /// Opens an envelope sealed under another salt. The derived key is only
    /// cached once it has authenticated a payload.
    fn open_foreign(&self, salt: &[u8], nonce: &[u8], ciphertext: &[u8]) -> Result<Vec<u8>> {
        let nonce = Nonce::from_slice(nonce);
        let salt: Salt =
            salt.try_into().map_err(|_| DispatchError::decode("malformed envelope salt"))?;

        let cached = self.foreign.lock().unwrap_or_else(PoisonError::into_inner).get(&salt).cloned();
        if let Some(key) = cached {
            return key.decrypt(nonce, ciphertext).map_err(|_| authentication_failed());
        }

        // Derived outside the lock; a concurrent derivation of the same salt
        // produces the same key.
        let key = derive_key(&self.passphrase, &salt)
            .map_err(|e| DispatchError::decode(format!("key derivation failed: {e}")))?;
        let plaintext = key.decrypt(nonce, ciphertext).map_err(|_| authentication_failed())?;

        let mut foreign = self.foreign.lock().unwrap_or_else(PoisonError::into_inner);
        if foreign.len() < MAX_FOREIGN_KEYS {
            foreign.insert(salt, key);
        }
        Ok(plaintext)
    }

    #[cfg(test)]
    fn cached_foreign_keys(&self) -> usize {
        self.foreign.lock().unwrap_or_else(PoisonError::into_inner).len()
    }
}

fn authentication_failed() -> DispatchError {
    DispatchError::decode("authentication failed (wrong passphrase?)")
}

impl std::fmt::Debug for Cipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cipher").field("passphrase", &"[REDACTED]").finish_non_exhaustive()
    }
}

fn derive_key(passphrase: &SecretString, salt: &[u8]) -> std::result::Result<Aes256Gcm, String> {
    let mut key = [0u8; KEY_SIZE];
    Argon2::default()
        .hash_password_into(passphrase.expose_secret().as_bytes(), salt, &mut key)
        .map_err(|e| e.to_string())?;

    Aes256Gcm::new_from_slice(&key).map_err(|e| e.to_string())
}
