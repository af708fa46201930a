//! Inference response cache with TTL expiry and insertion-order eviction.
//!
//! Cache key is a SHA-256 digest of `(model, input prefix)` — the input
//! text is truncated to its first 50 characters before key derivation, so
//! near-duplicate long inputs collapse onto one entry. Entries expire
//! 24 hours after insertion and the store holds at most 50 of them; the
//! oldest insertion is evicted when a write crosses the bound. The whole
//! map is persisted through a [`CacheStorage`] backend on every write.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::cache::storage::CacheStorage;
use crate::config::CacheConfig;

/// Number of input characters that participate in key derivation.
const KEY_PREFIX_CHARS: usize = 50;

/// A single cached inference response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    /// The decoded response body.
    pub value: Value,
    /// Unix timestamp in milliseconds when the entry was inserted.
    pub stored_at: u64,
}

/// Persistent store serialized to JSON.
#[derive(Debug, Serialize, Deserialize, Default)]
struct CacheStore {
    entries: HashMap<String, CacheEntry>,
}

/// Bounded, time-expiring response store.
///
/// Expiry is lazy: `get` hides entries past their TTL without deleting
/// them; the next `set` sweeps them out. Eviction is by insertion time
/// only — reads never refresh an entry's position.
pub struct ResponseCache {
    store: CacheStore,
    storage: Box<dyn CacheStorage>,
    ttl_ms: u64,
    capacity: usize,
    hits: u64,
    misses: u64,
}

impl ResponseCache {
    /// Create a cache over the given storage backend, loading any
    /// previously persisted entries.
    ///
    /// A missing or corrupt blob yields an empty cache — construction
    /// never fails. `capacity` is clamped to a minimum of 1.
    pub fn new(config: CacheConfig, storage: Box<dyn CacheStorage>) -> Self {
        let store = match storage.load() {
            Some(data) => match serde_json::from_str(&data) {
                Ok(store) => store,
                Err(e) => {
                    warn!("cache blob is corrupt, starting empty: {}", e);
                    CacheStore::default()
                }
            },
            None => CacheStore::default(),
        };
        Self {
            store,
            storage,
            ttl_ms: config.ttl_ms,
            capacity: config.capacity.max(1),
            hits: 0,
            misses: 0,
        }
    }

    /// Build a deterministic cache key from `(model, input_text)`.
    ///
    /// Only the first 50 characters of the input participate, so long
    /// inputs sharing a prefix share an entry. Segments are
    /// length-prefixed before hashing to prevent separator collisions
    /// between model and text.
    pub fn cache_key(model: &str, input_text: &str) -> String {
        let prefix: String = input_text.chars().take(KEY_PREFIX_CHARS).collect();
        let mut hasher = Sha256::new();
        hasher.update((model.len() as u64).to_le_bytes());
        hasher.update(model.as_bytes());
        hasher.update((prefix.len() as u64).to_le_bytes());
        hasher.update(prefix.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// Look up a cached response. Returns `None` if the key is absent or
    /// the entry is older than the TTL.
    ///
    /// Expired entries are hidden, not removed — the next `set` sweeps
    /// them. `get` never touches the storage backend.
    pub fn get(&mut self, key: &str) -> Option<Value> {
        let now = now_ms();
        match self.store.entries.get(key) {
            Some(entry) if now.saturating_sub(entry.stored_at) < self.ttl_ms => {
                self.hits += 1;
                Some(entry.value.clone())
            }
            Some(_) => {
                debug!(key = %&key[..8.min(key.len())], "cache entry expired");
                self.misses += 1;
                None
            }
            None => {
                self.misses += 1;
                None
            }
        }
    }

    /// Store a response, then persist the full map.
    ///
    /// Sweeps expired entries first. If the insertion pushes the store
    /// past capacity, the entry with the smallest `stored_at` is evicted
    /// (ties broken by smallest key). Storage write failures are logged
    /// and never surfaced.
    pub fn set(&mut self, key: String, value: Value) {
        let now = now_ms();
        self.sweep_expired(now);
        self.store
            .entries
            .insert(key, CacheEntry { value, stored_at: now });
        while self.store.entries.len() > self.capacity {
            self.evict_oldest();
        }
        self.persist();
    }

    /// Remove all entries and persist the empty map.
    pub fn clear(&mut self) {
        self.store.entries.clear();
        self.persist();
    }

    /// Number of entries currently stored, including hidden expired ones.
    pub fn len(&self) -> usize {
        self.store.entries.len()
    }

    /// `true` when the store holds no entries.
    pub fn is_empty(&self) -> bool {
        self.store.entries.is_empty()
    }

    /// Aggregate hit/miss counters for this process lifetime.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.store.entries.len(),
            hits: self.hits,
            misses: self.misses,
        }
    }

    // -- private helpers ---------------------------------------------------

    fn sweep_expired(&mut self, now: u64) {
        let ttl = self.ttl_ms;
        self.store
            .entries
            .retain(|_, e| now.saturating_sub(e.stored_at) < ttl);
    }

    fn evict_oldest(&mut self) {
        let oldest = self
            .store
            .entries
            .iter()
            .min_by(|(ka, ea), (kb, eb)| ea.stored_at.cmp(&eb.stored_at).then_with(|| ka.cmp(kb)))
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            debug!(key = %&key[..8.min(key.len())], "evicting oldest cache entry");
            self.store.entries.remove(&key);
        }
    }

    fn persist(&self) {
        match serde_json::to_string(&self.store) {
            Ok(blob) => {
                if let Err(e) = self.storage.store(&blob) {
                    warn!("failed to persist response cache: {}", e);
                }
            }
            Err(e) => warn!("failed to serialize response cache: {}", e),
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResponseCache")
            .field("entries", &self.store.entries.len())
            .field("capacity", &self.capacity)
            .field("ttl_ms", &self.ttl_ms)
            .finish()
    }
}

/// Aggregate cache statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently in the store.
    pub entries: usize,
    /// Lookups answered from the cache since construction.
    pub hits: u64,
    /// Lookups that fell through since construction.
    pub misses: u64,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
