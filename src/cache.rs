//! Best-effort in-memory and network caches.
//!
//! Neither cache is authoritative: a miss must trigger a full backend
//! fan-out, and a hit may be momentarily stale. [`FindCache`] holds
//! discovery results for a short fixed TTL; [`QueryCache`] is the
//! pluggable byte-blob cache for encoded render results, with a
//! bounded in-memory variant and a network-backed variant sharing one
//! contract.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use metrics::counter;
use tracing::debug;

use crate::types::Matches;

struct FindEntry {
    matches: Matches,
    inserted_at: Instant,
}

/// Short-TTL cache of discovery results, keyed by query fingerprint.
///
/// Holds at most `capacity` entries; on overflow the entry inserted
/// longest ago is evicted. `put` is best-effort: concurrent puts
/// for one key may both succeed with the last write winning.
pub struct FindCache {
    inner: Mutex<FindCacheInner>,
    capacity: usize,
    ttl: Duration,
}

struct FindCacheInner {
    entries: HashMap<String, FindEntry>,
    // Insertion order, oldest at the front. Replacing an existing key
    // keeps its original position.
    order: VecDeque<String>,
}

impl FindCache {
    /// A cache holding up to `capacity` entries for `ttl` each.
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(FindCacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
            ttl,
        }
    }

    /// Look up a fingerprint. Expired entries count as misses and are
    /// dropped on the way out.
    pub fn get(&self, key: &str) -> Option<Matches> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        match inner.entries.get(key) {
            Some(entry) if entry.inserted_at.elapsed() < self.ttl => {
                counter!("fanout_find_cache_hits_total").increment(1);
                Some(entry.matches.clone())
            }
            Some(_) => {
                inner.entries.remove(key);
                if let Some(pos) = inner.order.iter().position(|k| k == key) {
                    inner.order.remove(pos);
                }
                counter!("fanout_find_cache_misses_total").increment(1);
                None
            }
            None => {
                counter!("fanout_find_cache_misses_total").increment(1);
                None
            }
        }
    }

    /// Insert a discovery result. Evicts the oldest insertions when
    /// the cache is full.
    pub fn put(&self, key: impl Into<String>, matches: Matches) {
        if self.capacity == 0 {
            return;
        }
        let key = key.into();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let is_new = !inner.entries.contains_key(&key);
        if is_new {
            while inner.entries.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(oldest) => {
                        inner.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
            inner.order.push_back(key.clone());
        }

        inner.entries.insert(
            key,
            FindEntry {
                matches,
                inserted_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Pluggable byte-blob cache keyed by fingerprint.
///
/// Entries carry a per-entry TTL supplied at `put` time, typically
/// derived from the request's step size. Both operations are
/// best-effort and infallible: a broken cache degrades to a miss.
#[async_trait]
pub trait QueryCache: Send + Sync {
    /// Fetch the blob for `key` if present and not expired.
    async fn get(&self, key: &str) -> Option<Vec<u8>>;

    /// Store `value` under `key` for at most `ttl`.
    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration);
}

struct QueryEntry {
    value: Vec<u8>,
    expires_at: Instant,
}

/// Bounded in-memory LRU [`QueryCache`].
pub struct MemoryQueryCache {
    inner: Mutex<MemoryQueryCacheInner>,
    capacity: usize,
}

struct MemoryQueryCacheInner {
    entries: HashMap<String, QueryEntry>,
    // Recency order, least-recently-used at the front.
    order: VecDeque<String>,
}

impl MemoryQueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(MemoryQueryCacheInner {
                entries: HashMap::new(),
                order: VecDeque::new(),
            }),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entries
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MemoryQueryCacheInner {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            self.order.remove(pos);
        }
        self.order.push_back(key.to_string());
    }
}

#[async_trait]
impl QueryCache for MemoryQueryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let (value, expired) = match inner.entries.get(key) {
            Some(entry) if entry.expires_at > Instant::now() => (Some(entry.value.clone()), false),
            Some(_) => (None, true),
            None => (None, false),
        };

        if expired {
            inner.entries.remove(key);
            if let Some(pos) = inner.order.iter().position(|k| k == key) {
                inner.order.remove(pos);
            }
        }

        match value {
            Some(value) => {
                inner.touch(key);
                counter!("fanout_query_cache_hits_total").increment(1);
                Some(value)
            }
            None => {
                counter!("fanout_query_cache_misses_total").increment(1);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if !inner.entries.contains_key(key) {
            while inner.entries.len() >= self.capacity {
                match inner.order.pop_front() {
                    Some(lru) => {
                        inner.entries.remove(&lru);
                    }
                    None => break,
                }
            }
        }

        inner.entries.insert(
            key.to_string(),
            QueryEntry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        inner.touch(key);
    }
}

/// Network-backed [`QueryCache`] speaking plain HTTP to a cache
/// service: `GET {base_url}/{prefix}{key}` returns the blob or 404,
/// `PUT` stores it with the TTL in an `x-ttl-seconds` header.
///
/// The `prefix` namespaces keys so several gateways can share one
/// cache service. All failures degrade to misses and are logged at
/// debug level.
pub struct RemoteQueryCache {
    client: reqwest::Client,
    base_url: String,
    prefix: String,
}

impl RemoteQueryCache {
    /// A cache client for the service at `base_url` (scheme included),
    /// namespacing every key with `prefix`.
    pub fn new(base_url: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            prefix: prefix.into(),
        }
    }

    fn entry_url(&self, key: &str) -> String {
        let encoded: String =
            url::form_urlencoded::byte_serialize(format!("{}{}", self.prefix, key).as_bytes())
                .collect();
        format!("{}/{}", self.base_url, encoded)
    }
}

#[async_trait]
impl QueryCache for RemoteQueryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let url = self.entry_url(key);
        let response = match self.client.get(&url).send().await {
            Ok(response) => response,
            Err(err) => {
                debug!(%url, error = %err, "query cache get failed");
                counter!("fanout_query_cache_misses_total").increment(1);
                return None;
            }
        };

        if !response.status().is_success() {
            counter!("fanout_query_cache_misses_total").increment(1);
            return None;
        }

        match response.bytes().await {
            Ok(body) => {
                counter!("fanout_query_cache_hits_total").increment(1);
                Some(body.to_vec())
            }
            Err(err) => {
                debug!(%url, error = %err, "query cache body read failed");
                counter!("fanout_query_cache_misses_total").increment(1);
                None
            }
        }
    }

    async fn put(&self, key: &str, value: Vec<u8>, ttl: Duration) {
        let url = self.entry_url(key);
        let result = self
            .client
            .put(&url)
            .header("x-ttl-seconds", ttl.as_secs())
            .body(value)
            .send()
            .await;

        if let Err(err) = result {
            debug!(%url, error = %err, "query cache put failed");
        }
    }
}

/// A [`QueryCache`] that stores nothing. Used when caching is disabled.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullQueryCache;

#[async_trait]
impl QueryCache for NullQueryCache {
    async fn get(&self, _key: &str) -> Option<Vec<u8>> {
        None
    }

    async fn put(&self, _key: &str, _value: Vec<u8>, _ttl: Duration) {}
}
