//! Resilient query client.
//!
//! One logical entry point: [`QueryClient::query`]. Consults the response
//! cache, short-circuits when the device is offline, performs the remote
//! POST, waits out warmup (HTTP 503) replies with a fixed delay, and
//! writes successes back to the cache. Concurrent identical queries
//! coalesce onto a single remote call through a per-key in-flight guard.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::{json, Value};
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::cache::{CacheStats, FileStorage, ResponseCache};
use crate::config::{CacheConfig, ClientConfig};
use crate::error::{QueryError, Result};

pub mod connectivity;
pub mod transport;

pub use connectivity::{AssumeOnline, ConnectivityProbe};
pub use transport::{HttpTransport, InferenceTransport, WireReply};

/// HTTP status the inference service answers with while a model loads.
const MODEL_WARMING_UP: u16 = 503;

/// Cache-backed client for a hosted text-inference endpoint.
///
/// The cache, transport, and connectivity probe are injected at
/// construction; [`QueryClient::with_defaults`] wires the production
/// implementations.
pub struct QueryClient {
    config: ClientConfig,
    cache: Arc<Mutex<ResponseCache>>,
    transport: Arc<dyn InferenceTransport>,
    probe: Arc<dyn ConnectivityProbe>,
    in_flight: AsyncMutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl QueryClient {
    /// Assemble a client from explicit collaborators.
    pub fn new(
        config: ClientConfig,
        cache: ResponseCache,
        transport: Arc<dyn InferenceTransport>,
        probe: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        Self {
            config,
            cache: Arc::new(Mutex::new(cache)),
            transport,
            probe,
            in_flight: AsyncMutex::new(HashMap::new()),
        }
    }

    /// Production wiring: reqwest transport, file-backed cache at the
    /// canonical per-user path, and an always-online probe.
    pub fn with_defaults(config: ClientConfig) -> Result<Self> {
        let transport = Arc::new(HttpTransport::new(config.request_timeout())?);
        let cache = ResponseCache::new(
            CacheConfig::default(),
            Box::new(FileStorage::default_path()),
        );
        Ok(Self::new(config, cache, transport, Arc::new(AssumeOnline)))
    }

    /// Run one logical query for `(text, model)`.
    ///
    /// Returns the decoded response value, from cache when a fresh entry
    /// exists, otherwise from the remote service. Cache hits and live
    /// calls are shape-identical to the caller.
    pub async fn query(&self, text: &str, model: &str) -> Result<Value> {
        self.query_with_cancellation(text, model, &CancellationToken::new())
            .await
    }

    /// [`query`](Self::query) with a cancellation token. Cancelling while
    /// the client is waiting out a warmup delay aborts the retry loop
    /// with [`QueryError::Cancelled`].
    pub async fn query_with_cancellation(
        &self,
        text: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let key = ResponseCache::cache_key(model, text);

        if self.config.cache_enabled {
            if let Some(value) = self.cache_lookup(&key) {
                debug!(model, "cache hit, skipping remote call");
                return Ok(value);
            }
        }

        if self.config.offline_fallback_enabled && !self.probe.is_online() {
            debug!(model, "no connectivity, skipping remote call");
            return Err(QueryError::Offline);
        }

        if !self.config.cache_enabled {
            // No cache means joiners could not share a result anyway.
            return self.call_remote(text, model, cancel).await;
        }

        let cell = self.lease(&key).await;
        let result = {
            let _guard = cell.lock().await;
            // An identical query may have landed while we waited.
            match self.cache_lookup(&key) {
                Some(value) => {
                    debug!(model, "cache populated by concurrent query");
                    Ok(value)
                }
                None => {
                    let result = self.call_remote(text, model, cancel).await;
                    if let Ok(value) = &result {
                        self.cache
                            .lock()
                            .expect("cache lock poisoned")
                            .set(key.clone(), value.clone());
                    }
                    result
                }
            }
        };
        drop(cell);
        self.release(&key).await;
        result
    }

    /// Snapshot of the underlying cache counters.
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.lock().expect("cache lock poisoned").stats()
    }

    // -- private helpers ---------------------------------------------------

    fn cache_lookup(&self, key: &str) -> Option<Value> {
        self.cache.lock().expect("cache lock poisoned").get(key)
    }

    /// POST to the endpoint, waiting out warmup replies.
    async fn call_remote(
        &self,
        text: &str,
        model: &str,
        cancel: &CancellationToken,
    ) -> Result<Value> {
        let url = format!("{}{}", self.config.endpoint_base, model);
        let body = json!({ "inputs": text });
        let mut warmup_attempts: u32 = 0;

        loop {
            let reply = self
                .transport
                .post_json(&url, &self.config.credential, &body)
                .await?;

            if reply.is_success() {
                return serde_json::from_str(&reply.body)
                    .map_err(|e| QueryError::Decode(e.to_string()));
            }

            if reply.status == MODEL_WARMING_UP {
                if let Some(max) = self.config.max_warmup_retries {
                    if warmup_attempts >= max {
                        warn!(model, attempts = warmup_attempts, "warmup retry budget exhausted");
                        return Err(QueryError::Remote {
                            status: MODEL_WARMING_UP,
                        });
                    }
                }
                warmup_attempts += 1;
                debug!(
                    model,
                    attempt = warmup_attempts,
                    delay_ms = self.config.warmup_retry_delay_ms,
                    "model warming up, retrying after delay"
                );
                tokio::select! {
                    _ = cancel.cancelled() => return Err(QueryError::Cancelled),
                    _ = tokio::time::sleep(self.config.warmup_retry_delay()) => {}
                }
                continue;
            }

            return Err(QueryError::Remote {
                status: reply.status,
            });
        }
    }

    /// Fetch (or create) the in-flight guard for `key`.
    async fn lease(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut map = self.in_flight.lock().await;
        map.entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Drop the guard for `key` once no other query holds it.
    async fn release(&self, key: &str) {
        let mut map = self.in_flight.lock().await;
        if let Some(cell) = map.get(key) {
            if Arc::strong_count(cell) == 1 {
                map.remove(key);
            }
        }
    }
}

impl std::fmt::Debug for QueryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryClient")
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStorage;
    use crate::client::connectivity::MockConnectivityProbe;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Transport that pops pre-scripted replies and counts calls.
    /// Panics when called more often than scripted.
    struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<WireReply>>>,
        calls: AtomicUsize,
        delay: Duration,
    }

    impl ScriptedTransport {
        fn new(replies: Vec<Result<WireReply>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
            })
        }

        fn with_delay(replies: Vec<Result<WireReply>>, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                calls: AtomicUsize::new(0),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl InferenceTransport for ScriptedTransport {
        async fn post_json(&self, _url: &str, _credential: &str, _body: &Value) -> Result<WireReply> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .expect("unexpected transport call")
        }
    }

    fn reply(status: u16, body: &str) -> Result<WireReply> {
        Ok(WireReply {
            status,
            body: body.to_string(),
        })
    }

    fn test_config() -> ClientConfig {
        let mut config = ClientConfig::new("https://inference.test/models/", "test-token");
        config.warmup_retry_delay_ms = 1;
        config
    }

    fn test_client(config: ClientConfig, transport: Arc<ScriptedTransport>) -> QueryClient {
        let cache = ResponseCache::new(CacheConfig::default(), Box::new(MemoryStorage::new()));
        QueryClient::new(config, cache, transport, Arc::new(AssumeOnline))
    }

    fn offline_probe() -> Arc<MockConnectivityProbe> {
        let mut probe = MockConnectivityProbe::new();
        probe.expect_is_online().return_const(false);
        Arc::new(probe)
    }

    // --- cache interplay ---

    #[tokio::test]
    async fn test_repeat_query_is_served_from_cache() {
        let transport = ScriptedTransport::new(vec![reply(200, r#"{"label":"POSITIVE"}"#)]);
        let client = test_client(test_config(), transport.clone());

        let first = client.query("I dreamed of flying", "sentiment-model").await.unwrap();
        let second = client.query("I dreamed of flying", "sentiment-model").await.unwrap();

        assert_eq!(first, json!({"label": "POSITIVE"}));
        assert_eq!(second, first);
        assert_eq!(transport.calls(), 1, "second query must not hit the network");
    }

    #[tokio::test]
    async fn test_shared_prefix_queries_share_an_entry() {
        let transport = ScriptedTransport::new(vec![reply(200, r#"{"label":"NEUTRAL"}"#)]);
        let client = test_client(test_config(), transport.clone());

        let prefix = "x".repeat(50);
        let first = client.query(&format!("{prefix} long tail one"), "m").await.unwrap();
        let second = client.query(&format!("{prefix} long tail two"), "m").await.unwrap();

        assert_eq!(first, second);
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_distinct_models_do_not_share_cache() {
        let transport = ScriptedTransport::new(vec![
            reply(200, r#"{"label":"A"}"#),
            reply(200, r#"{"label":"B"}"#),
        ]);
        let client = test_client(test_config(), transport.clone());

        let a = client.query("same text", "model-a").await.unwrap();
        let b = client.query("same text", "model-b").await.unwrap();

        assert_ne!(a, b);
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn test_cache_disabled_always_calls_remote() {
        let transport = ScriptedTransport::new(vec![
            reply(200, r#"{"n":1}"#),
            reply(200, r#"{"n":2}"#),
        ]);
        let mut config = test_config();
        config.cache_enabled = false;
        let client = test_client(config, transport.clone());

        assert_eq!(client.query("t", "m").await.unwrap(), json!({"n": 1}));
        assert_eq!(client.query("t", "m").await.unwrap(), json!({"n": 2}));
        assert_eq!(transport.calls(), 2);
        assert_eq!(client.cache_stats().entries, 0, "disabled cache is never written");
    }

    #[tokio::test]
    async fn test_failed_query_is_not_cached() {
        let transport = ScriptedTransport::new(vec![reply(404, "not found")]);
        let client = test_client(test_config(), transport.clone());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Remote { status: 404 }));
        assert_eq!(client.cache_stats().entries, 0);
    }

    // --- offline behavior ---

    #[tokio::test]
    async fn test_offline_short_circuits_before_transport() {
        let transport = ScriptedTransport::new(vec![]);
        let cache = ResponseCache::new(CacheConfig::default(), Box::new(MemoryStorage::new()));
        let client = QueryClient::new(test_config(), cache, transport.clone(), offline_probe());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Offline));
        assert_eq!(transport.calls(), 0);
    }

    #[tokio::test]
    async fn test_offline_check_disabled_attempts_the_call() {
        let transport = ScriptedTransport::new(vec![reply(200, r#"{"ok":true}"#)]);
        let mut config = test_config();
        config.offline_fallback_enabled = false;
        let cache = ResponseCache::new(CacheConfig::default(), Box::new(MemoryStorage::new()));
        let client = QueryClient::new(config, cache, transport.clone(), offline_probe());

        assert_eq!(client.query("t", "m").await.unwrap(), json!({"ok": true}));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_is_served_even_offline() {
        let transport = ScriptedTransport::new(vec![]);
        let cache = ResponseCache::new(CacheConfig::default(), Box::new(MemoryStorage::new()));
        let client = QueryClient::new(test_config(), cache, transport.clone(), offline_probe());

        let key = ResponseCache::cache_key("m", "t");
        client
            .cache
            .lock()
            .unwrap()
            .set(key, json!({"label": "CACHED"}));

        assert_eq!(client.query("t", "m").await.unwrap(), json!({"label": "CACHED"}));
        assert_eq!(transport.calls(), 0);
    }

    // --- warmup retries ---

    #[tokio::test]
    async fn test_warmup_replies_are_retried_until_success() {
        let transport = ScriptedTransport::new(vec![
            reply(503, "model loading"),
            reply(503, "model loading"),
            reply(200, r#"{"label":"POSITIVE"}"#),
        ]);
        let client = test_client(test_config(), transport.clone());

        let value = client.query("t", "m").await.unwrap();
        assert_eq!(value, json!({"label": "POSITIVE"}));
        assert_eq!(transport.calls(), 3, "two delayed retries then success");
        assert_eq!(client.cache_stats().entries, 1, "cached only after the 200");
    }

    #[tokio::test]
    async fn test_warmup_budget_exhaustion_surfaces_503() {
        let transport = ScriptedTransport::new(vec![
            reply(503, ""),
            reply(503, ""),
            reply(503, ""),
        ]);
        let mut config = test_config();
        config.max_warmup_retries = Some(2);
        let client = test_client(config, transport.clone());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Remote { status: 503 }));
        assert_eq!(transport.calls(), 3, "initial attempt plus two retries");
    }

    #[tokio::test]
    async fn test_non_retryable_status_fails_on_first_reply() {
        let transport = ScriptedTransport::new(vec![reply(429, "quota")]);
        let client = test_client(test_config(), transport.clone());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Remote { status: 429 }));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_warmup_backoff() {
        let transport = ScriptedTransport::new(vec![reply(503, "")]);
        let mut config = test_config();
        config.warmup_retry_delay_ms = 60_000;
        let client = test_client(config, transport.clone());

        let token = CancellationToken::new();
        token.cancel();
        let err = client
            .query_with_cancellation("t", "m", &token)
            .await
            .unwrap_err();
        assert!(matches!(err, QueryError::Cancelled));
        assert_eq!(transport.calls(), 1);
    }

    // --- failure taxonomy ---

    #[tokio::test]
    async fn test_transport_failure_propagates_without_retry() {
        let transport = ScriptedTransport::new(vec![Err(QueryError::Transport(
            "connection refused".into(),
        ))]);
        let client = test_client(test_config(), transport.clone());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Transport(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test]
    async fn test_undecodable_body_is_a_decode_error() {
        let transport = ScriptedTransport::new(vec![reply(200, "<html>gateway</html>")]);
        let client = test_client(test_config(), transport.clone());

        let err = client.query("t", "m").await.unwrap_err();
        assert!(matches!(err, QueryError::Decode(_)));
        assert_eq!(client.cache_stats().entries, 0);
    }

    // --- coalescing ---

    #[tokio::test]
    async fn test_concurrent_identical_queries_share_one_call() {
        let transport = ScriptedTransport::with_delay(
            vec![reply(200, r#"{"label":"POSITIVE"}"#)],
            Duration::from_millis(20),
        );
        let client = test_client(test_config(), transport.clone());

        let (a, b) = tokio::join!(client.query("t", "m"), client.query("t", "m"));
        assert_eq!(a.unwrap(), json!({"label": "POSITIVE"}));
        assert_eq!(b.unwrap(), json!({"label": "POSITIVE"}));
        assert_eq!(transport.calls(), 1, "joiner must reuse the in-flight result");
    }

    #[tokio::test]
    async fn test_in_flight_guards_are_released() {
        let transport = ScriptedTransport::new(vec![reply(200, r#"{}"#)]);
        let client = test_client(test_config(), transport);

        client.query("t", "m").await.unwrap();
        assert!(client.in_flight.lock().await.is_empty());
    }
}
