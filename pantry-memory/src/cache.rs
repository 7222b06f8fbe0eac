// Copyright 2025 pantry Project Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::{
    fmt::Debug,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, OnceLock,
    },
    time::Duration,
};

use pantry_common::{
    code::Value,
    event::{Event, EventListener},
};
use serde::{Deserialize, Serialize};

use crate::{
    lru::{Lru, LruConfig},
    lru2::{Lru2, Lru2Config},
    store::Store,
};

const DEFAULT_MAX_BYTES: usize = 8 << 20;
const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Selects the store engine backing a [`Cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    /// Bounded-bytes LRU with TTL.
    #[default]
    Lru,
    /// Sharded two-level LRU with fixed slot capacity.
    Lru2,
}

/// Options for a [`Cache`] and its underlying store engine.
pub struct CacheOptions<V> {
    /// Which store engine to construct.
    pub engine: Engine,
    /// Byte capacity for the [`Engine::Lru`] engine. Zero means unbounded.
    pub max_bytes: usize,
    /// Bucket count for [`Engine::Lru2`]; rounded up to a power of two.
    pub bucket_count: usize,
    /// Level-0 slot capacity per bucket for [`Engine::Lru2`].
    pub cap_per_bucket: usize,
    /// Level-1 slot capacity per bucket for [`Engine::Lru2`].
    pub level2_cap: usize,
    /// Period of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// Listener invoked for every removal.
    pub listener: Option<Arc<dyn EventListener<Value = V>>>,
}

impl<V> Default for CacheOptions<V> {
    fn default() -> Self {
        Self {
            engine: Engine::Lru,
            max_bytes: DEFAULT_MAX_BYTES,
            bucket_count: 16,
            cap_per_bucket: 1024,
            level2_cap: 1024,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            listener: None,
        }
    }
}

impl<V> Clone for CacheOptions<V> {
    fn clone(&self) -> Self {
        Self {
            engine: self.engine,
            max_bytes: self.max_bytes,
            bucket_count: self.bucket_count,
            cap_per_bucket: self.cap_per_bucket,
            level2_cap: self.level2_cap,
            cleanup_interval: self.cleanup_interval,
            listener: self.listener.clone(),
        }
    }
}

impl<V> Debug for CacheOptions<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOptions")
            .field("engine", &self.engine)
            .field("max_bytes", &self.max_bytes)
            .field("bucket_count", &self.bucket_count)
            .field("cap_per_bucket", &self.cap_per_bucket)
            .field("level2_cap", &self.level2_cap)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

/// Point-in-time counters for a [`Cache`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    /// Lookups answered from the store.
    pub hits: u64,
    /// Lookups that found nothing live.
    pub misses: u64,
    /// Entries dropped by capacity eviction or TTL expiry.
    pub evictions: u64,
    /// Live entries.
    pub len: usize,
    /// Bytes accounted to live entries.
    pub used_bytes: usize,
}

/// Counts capacity and TTL removals before forwarding to the user listener.
struct CountingListener<V> {
    evictions: Arc<AtomicU64>,
    inner: Option<Arc<dyn EventListener<Value = V>>>,
}

impl<V> EventListener for CountingListener<V>
where
    V: Value,
{
    type Value = V;

    fn on_leave(&self, reason: Event, key: &str, value: &Self::Value) {
        if matches!(reason, Event::Evict | Event::Expire) {
            self.evictions.fetch_add(1, Ordering::Relaxed);
        }
        if let Some(inner) = self.inner.as_ref() {
            inner.on_leave(reason, key, value);
        }
    }
}

/// Uniform wrapper over a store engine choice.
///
/// The concrete store is constructed lazily on first access, so building a
/// `Cache` is cheap and the sweeper task only exists once the cache is used.
pub struct Cache<V>
where
    V: Value,
{
    options: CacheOptions<V>,
    store: OnceLock<Arc<dyn Store<V>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: Arc<AtomicU64>,
}

impl<V> Cache<V>
where
    V: Value,
{
    /// Create a cache over the configured engine.
    pub fn new(options: CacheOptions<V>) -> Self {
        Self {
            options,
            store: OnceLock::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: Arc::new(AtomicU64::new(0)),
        }
    }

    fn store(&self) -> &Arc<dyn Store<V>> {
        self.store.get_or_init(|| {
            let listener: Arc<dyn EventListener<Value = V>> = Arc::new(CountingListener {
                evictions: Arc::clone(&self.evictions),
                inner: self.options.listener.clone(),
            });
            tracing::debug!(engine = ?self.options.engine, "[cache]: initializing store");
            match self.options.engine {
                Engine::Lru => Arc::new(Lru::new(LruConfig {
                    max_bytes: self.options.max_bytes,
                    cleanup_interval: self.options.cleanup_interval,
                    listener: Some(listener),
                })),
                Engine::Lru2 => Arc::new(Lru2::new(Lru2Config {
                    bucket_count: self.options.bucket_count,
                    cap_per_bucket: self.options.cap_per_bucket,
                    level2_cap: self.options.level2_cap,
                    cleanup_interval: self.options.cleanup_interval,
                    listener: Some(listener),
                })),
            }
        })
    }

    /// Get a value, counting the hit or miss.
    pub fn get(&self, key: &str) -> Option<V> {
        match self.store().get(key) {
            Some(value) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(value)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Set a value without expiration.
    pub fn set(&self, key: &str, value: V) {
        self.store().set(key, value);
    }

    /// Set a value with an optional TTL.
    pub fn set_with_expiration(&self, key: &str, value: V, ttl: Option<Duration>) {
        self.store().set_with_expiration(key, value, ttl);
    }

    /// Get a value together with its remaining TTL.
    pub fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Duration>)> {
        self.store().get_with_expiration(key)
    }

    /// Replace the TTL of an existing key.
    pub fn update_expiration(&self, key: &str, ttl: Option<Duration>) -> bool {
        self.store().update_expiration(key, ttl)
    }

    /// Delete a key. Returns whether an entry was removed.
    pub fn delete(&self, key: &str) -> bool {
        self.store().delete(key)
    }

    /// Drop every entry.
    pub fn clear(&self) {
        if let Some(store) = self.store.get() {
            store.clear();
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.store.get().map(|store| store.len()).unwrap_or(0)
    }

    /// Whether the cache holds no live entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes accounted to live entries.
    pub fn used_bytes(&self) -> usize {
        self.store.get().map(|store| store.used_bytes()).unwrap_or(0)
    }

    /// Stop the underlying store's sweeper, if the store was ever built.
    pub fn close(&self) {
        if let Some(store) = self.store.get() {
            store.close();
        }
    }

    /// Snapshot the cache counters.
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: self.len(),
            used_bytes: self.used_bytes(),
        }
    }
}

impl<V> Debug for Cache<V>
where
    V: Value,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("options", &self.options)
            .field("initialized", &self.store.get().is_some())
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lazy_init() {
        let cache = Cache::<String>::new(CacheOptions::default());
        // Nothing constructed yet.
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);

        cache.set("a", "1".to_string());
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.len(), 1);
        cache.close();
    }

    #[tokio::test]
    async fn test_counts_hits_and_misses() {
        let cache = Cache::<String>::new(CacheOptions::default());
        cache.set("a", "1".to_string());

        assert!(cache.get("a").is_some());
        assert!(cache.get("b").is_none());
        assert!(cache.get("a").is_some());

        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        cache.close();
    }

    #[tokio::test]
    async fn test_counts_evictions() {
        let cache = Cache::<String>::new(CacheOptions {
            max_bytes: 4,
            ..Default::default()
        });

        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string()); // evicts "a"

        assert_eq!(cache.stats().evictions, 1);
        cache.close();
    }

    #[tokio::test]
    async fn test_lru2_engine() {
        let cache = Cache::<String>::new(CacheOptions {
            engine: Engine::Lru2,
            bucket_count: 2,
            cap_per_bucket: 4,
            level2_cap: 4,
            ..Default::default()
        });

        cache.set("a", "1".to_string());
        cache.set_with_expiration("b", "2".to_string(), Some(Duration::from_secs(3600)));
        assert_eq!(cache.get("a"), Some("1".to_string()));
        let (value, ttl) = cache.get_with_expiration("b").unwrap();
        assert_eq!(value, "2");
        assert!(ttl.is_some());
        cache.close();
    }
}
