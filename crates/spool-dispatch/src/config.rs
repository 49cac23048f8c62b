//! Dispatcher configuration.
//!
//! [`DispatchConfig`] is what a [`Dispatcher`](crate::Dispatcher) is built
//! from. [`Settings`] is the externally loaded form: defaults, then an
//! optional `spool.toml`, then `SPOOL_*` environment variables.

use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use secrecy::SecretString;
use serde::{Deserialize, Deserializer, Serialize};
use spool_core::{MemoryStore, SqliteStore, Store};
use tokio::sync::mpsc;

use crate::{client::ClientConfig, error::DispatchError};

const CONFIG_FILE: &str = "spool.toml";
const ENV_PREFIX: &str = "SPOOL_";

/// Default number of dispatch workers.
pub const DEFAULT_WORKER_COUNT: usize = 5;

/// Default retry budget per request.
pub const DEFAULT_MAX_RETRIES: i32 = 3;

/// Runtime configuration for a dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Number of concurrent dispatch workers.
    pub worker_count: usize,
    /// Retries after the first failed attempt. Negative values mean none.
    pub max_retries: i32,
    /// HTTP client settings.
    pub client: ClientConfig,
    /// Receives reportable failures. Sends never block; a full channel drops
    /// the report.
    pub errors: Option<mpsc::Sender<DispatchError>>,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            max_retries: DEFAULT_MAX_RETRIES,
            client: ClientConfig::default(),
            errors: None,
        }
    }
}

impl DispatchConfig {
    /// Retry budget with negative values clamped to zero.
    pub fn retry_budget(&self) -> u32 {
        u32::try_from(self.max_retries).unwrap_or(0)
    }

    pub(crate) fn validate(&self) -> crate::error::Result<()> {
        if self.worker_count == 0 {
            return Err(DispatchError::configuration("worker_count must be positive"));
        }
        if self.client.timeout.is_zero() {
            return Err(DispatchError::configuration("client timeout must be positive"));
        }
        Ok(())
    }
}

/// Externally loaded dispatcher settings.
///
/// Environment variables use the `SPOOL_` prefix, e.g. `SPOOL_WORKER_COUNT`,
/// `SPOOL_MAX_RETRIES`, `SPOOL_TIMEOUT_MS`, `SPOOL_STORE_PATH` and
/// `SPOOL_PASSPHRASE`.
#[derive(Debug, Serialize, Deserialize)]
pub struct Settings {
    /// Number of concurrent dispatch workers.
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,
    /// Retry budget per request; negatives clamp to zero.
    #[serde(default = "default_max_retries")]
    pub max_retries: i32,
    /// Per-attempt timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// User agent sent with every request.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// SQLite file backing the queue. In-memory when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    /// Encrypts stored records when set.
    #[serde(default, skip_serializing, deserialize_with = "deserialize_passphrase")]
    pub passphrase: Option<SecretString>,
}

impl Settings {
    /// Loads settings from defaults, `spool.toml` and `SPOOL_*` variables.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider used by [`load`](Self::load).
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates settings from an arbitrary provider.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let settings: Self = figment.extract().context("failed to load dispatcher settings")?;
        settings.to_dispatch_config(None).validate().context("invalid dispatcher settings")?;
        Ok(settings)
    }

    /// Builds the runtime configuration, attaching an optional error channel.
    pub fn to_dispatch_config(
        &self,
        errors: Option<mpsc::Sender<DispatchError>>,
    ) -> DispatchConfig {
        DispatchConfig {
            worker_count: self.worker_count,
            max_retries: self.max_retries,
            client: ClientConfig {
                timeout: Duration::from_millis(self.timeout_ms),
                user_agent: self.user_agent.clone(),
            },
            errors,
        }
    }

    /// Opens the configured store: SQLite at `store_path`, memory otherwise.
    pub async fn open_store(&self) -> Result<Arc<dyn Store>> {
        match &self.store_path {
            Some(path) => {
                let store = SqliteStore::open(path)
                    .await
                    .with_context(|| format!("failed to open store at {}", path.display()))?;
                Ok(Arc::new(store))
            },
            None => Ok(Arc::new(MemoryStore::new())),
        }
    }

    /// Takes the passphrase out of the settings.
    pub fn take_passphrase(&mut self) -> Option<SecretString> {
        self.passphrase.take()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_count: default_worker_count(),
            max_retries: default_max_retries(),
            timeout_ms: default_timeout_ms(),
            user_agent: default_user_agent(),
            store_path: None,
            passphrase: None,
        }
    }
}

fn default_worker_count() -> usize {
    DEFAULT_WORKER_COUNT
}

fn default_max_retries() -> i32 {
    DEFAULT_MAX_RETRIES
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_user_agent() -> String {
    ClientConfig::default().user_agent
}

/// Environment values are parsed into typed scalars, so an all-digit
/// passphrase arrives as a number.
#[derive(Deserialize)]
#[serde(untagged)]
enum Scalar {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
}

fn deserialize_passphrase<'de, D>(deserializer: D) -> Result<Option<SecretString>, D::Error>
where
    D: Deserializer<'de>,
{
    let passphrase = Option::<Scalar>::deserialize(deserializer)?.map(|scalar| match scalar {
        Scalar::Text(text) => text,
        Scalar::Integer(number) => number.to_string(),
        Scalar::Float(number) => number.to_string(),
        Scalar::Bool(flag) => flag.to_string(),
    });
    Ok(passphrase.map(SecretString::from))
}
