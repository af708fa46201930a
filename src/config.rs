//! Client and cache configuration.
//!
//! All knobs are fixed at construction time. [`ClientConfig::from_env`]
//! reads the `PICOQUERY_*` environment variables (a `.env` file is honored
//! when the binary calls `dotenvy::dotenv()` first).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{QueryError, Result};

/// Delay between warmup (HTTP 503) retries, in milliseconds.
pub const DEFAULT_WARMUP_RETRY_DELAY_MS: u64 = 5_000;

/// Per-attempt HTTP timeout, in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 120;

/// Maximum number of cached responses.
pub const DEFAULT_CACHE_CAPACITY: usize = 50;

/// Cached response time-to-live, in milliseconds (24 hours).
pub const DEFAULT_CACHE_TTL_MS: u64 = 86_400_000;

/// Construction-time configuration for [`crate::client::QueryClient`].
#[derive(Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// URL prefix of the remote service; the model identifier is appended.
    pub endpoint_base: String,
    /// Opaque bearer token sent on every request. Redacted in `Debug`.
    pub credential: String,
    /// When false the response cache is bypassed entirely (no read, no write).
    #[serde(default = "default_true")]
    pub cache_enabled: bool,
    /// When true, absence of connectivity fails fast instead of attempting
    /// the call.
    #[serde(default = "default_true")]
    pub offline_fallback_enabled: bool,
    /// Fixed delay between warmup retries.
    #[serde(default = "default_warmup_retry_delay_ms")]
    pub warmup_retry_delay_ms: u64,
    /// Ceiling on warmup retries. `None` keeps retrying until the model
    /// comes up.
    #[serde(default)]
    pub max_warmup_retries: Option<u32>,
    /// Per-attempt HTTP timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_true() -> bool {
    true
}

fn default_warmup_retry_delay_ms() -> u64 {
    DEFAULT_WARMUP_RETRY_DELAY_MS
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl ClientConfig {
    /// Build a config with default resilience knobs for the given endpoint
    /// and credential.
    pub fn new(endpoint_base: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            endpoint_base: endpoint_base.into(),
            credential: credential.into(),
            cache_enabled: true,
            offline_fallback_enabled: true,
            warmup_retry_delay_ms: DEFAULT_WARMUP_RETRY_DELAY_MS,
            max_warmup_retries: None,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
        }
    }

    /// Read configuration from the environment.
    ///
    /// Required: `PICOQUERY_TOKEN` (falls back to `HF_API_TOKEN`).
    /// Optional: `PICOQUERY_ENDPOINT`, `PICOQUERY_CACHE`,
    /// `PICOQUERY_OFFLINE_CHECK`, `PICOQUERY_RETRY_DELAY_MS`,
    /// `PICOQUERY_MAX_RETRIES`, `PICOQUERY_TIMEOUT_SECS`.
    pub fn from_env() -> Result<Self> {
        let endpoint_base = std::env::var("PICOQUERY_ENDPOINT")
            .unwrap_or_else(|_| "https://api-inference.huggingface.co/models/".to_string());
        let credential = std::env::var("PICOQUERY_TOKEN")
            .or_else(|_| std::env::var("HF_API_TOKEN"))
            .map_err(|_| {
                QueryError::Config("PICOQUERY_TOKEN (or HF_API_TOKEN) is not set".into())
            })?;

        let mut config = Self::new(endpoint_base, credential);

        if let Some(v) = env_bool("PICOQUERY_CACHE")? {
            config.cache_enabled = v;
        }
        if let Some(v) = env_bool("PICOQUERY_OFFLINE_CHECK")? {
            config.offline_fallback_enabled = v;
        }
        if let Some(v) = env_parse::<u64>("PICOQUERY_RETRY_DELAY_MS")? {
            config.warmup_retry_delay_ms = v;
        }
        if let Some(v) = env_parse::<u32>("PICOQUERY_MAX_RETRIES")? {
            config.max_warmup_retries = Some(v);
        }
        if let Some(v) = env_parse::<u64>("PICOQUERY_TIMEOUT_SECS")? {
            config.request_timeout_secs = v;
        }

        Ok(config)
    }

    /// Warmup retry delay as a [`Duration`].
    pub fn warmup_retry_delay(&self) -> Duration {
        Duration::from_millis(self.warmup_retry_delay_ms)
    }

    /// Per-attempt HTTP timeout as a [`Duration`].
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("endpoint_base", &self.endpoint_base)
            .field("credential", &"[REDACTED]")
            .field("cache_enabled", &self.cache_enabled)
            .field("offline_fallback_enabled", &self.offline_fallback_enabled)
            .field("warmup_retry_delay_ms", &self.warmup_retry_delay_ms)
            .field("max_warmup_retries", &self.max_warmup_retries)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

/// Sizing and expiry knobs for [`crate::cache::ResponseCache`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries. Clamped to a minimum of 1.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry time-to-live in milliseconds.
    #[serde(default = "default_cache_ttl_ms")]
    pub ttl_ms: u64,
}

fn default_cache_capacity() -> usize {
    DEFAULT_CACHE_CAPACITY
}

fn default_cache_ttl_ms() -> u64 {
    DEFAULT_CACHE_TTL_MS
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CACHE_CAPACITY,
            ttl_ms: DEFAULT_CACHE_TTL_MS,
        }
    }
}

/// Parse an optional boolean env var. Accepts `1/0`, `true/false`, `yes/no`.
fn env_bool(name: &str) -> Result<Option<bool>> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(Some(true)),
            "0" | "false" | "no" => Ok(Some(false)),
            other => Err(QueryError::Config(format!(
                "{name}: expected a boolean, got {other:?}"
            ))),
        },
        Err(_) => Ok(None),
    }
}

/// Parse an optional numeric env var.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map(Some)
            .map_err(|_| QueryError::Config(format!("{name}: could not parse {raw:?}"))),
        Err(_) => Ok(None),
    }
}
