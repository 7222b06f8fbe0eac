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
        atomic::{AtomicBool, Ordering},
        Arc, Weak,
    },
    time::{Duration, Instant, SystemTime},
};

use hashbrown::HashMap;
use pantry_common::{
    code::Value,
    event::{Event, EventListener},
};
use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::{dlist::Dlist, store::Store};

const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Configuration for the bounded-bytes [`Lru`] store.
pub struct LruConfig<V> {
    /// Capacity bound in bytes. Zero means unbounded.
    pub max_bytes: usize,
    /// Period of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// Listener invoked for every removal.
    pub listener: Option<Arc<dyn EventListener<Value = V>>>,
}

impl<V> Default for LruConfig<V> {
    fn default() -> Self {
        Self {
            max_bytes: 0,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            listener: None,
        }
    }
}

impl<V> Debug for LruConfig<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LruConfig")
            .field("max_bytes", &self.max_bytes)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

struct LruEntry<V> {
    key: String,
    value: V,
}

struct LruState<V>
where
    V: Value,
{
    /// Recency list; the front is the least recently used entry.
    list: Dlist<LruEntry<V>>,
    index: HashMap<String, usize>,
    expiries: HashMap<String, Instant>,
    used_bytes: usize,
    max_bytes: usize,
}

impl<V> LruState<V>
where
    V: Value,
{
    /// Detach an entry from the list, index and expiry map.
    fn unlink(&mut self, key: &str) -> Option<(String, V)> {
        let &idx = self.index.get(key)?;
        let entry = self.list.remove(idx)?;
        self.index.remove(key);
        self.expiries.remove(key);
        self.used_bytes -= entry.key.len() + entry.value.weight();
        Some((entry.key, entry.value))
    }

    /// Reclaim expired entries, then pop the front until the byte bound
    /// holds. Must run with the write lock held; removals are collected into
    /// `garbage` and reported after the lock is released.
    fn evict(&mut self, garbage: &mut Vec<(Event, String, V)>) {
        let now = Instant::now();
        let expired = self
            .expiries
            .iter()
            .filter(|(_, deadline)| **deadline <= now)
            .map(|(key, _)| key.clone())
            .collect::<Vec<_>>();
        for key in expired {
            if let Some((key, value)) = self.unlink(&key) {
                garbage.push((Event::Expire, key, value));
            }
        }

        while self.max_bytes > 0 && self.used_bytes > self.max_bytes && !self.list.is_empty() {
            let Some(idx) = self.list.front() else { break };
            let Some(key) = self.list.get(idx).map(|entry| entry.key.clone()) else {
                break;
            };
            match self.unlink(&key) {
                Some((key, value)) => garbage.push((Event::Evict, key, value)),
                None => break,
            }
        }
    }
}

struct LruInner<V>
where
    V: Value,
{
    state: RwLock<LruState<V>>,
    listener: Option<Arc<dyn EventListener<Value = V>>>,
    closed: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl<V> LruInner<V>
where
    V: Value,
{
    fn notify(&self, garbage: Vec<(Event, String, V)>) {
        if let Some(listener) = self.listener.as_ref() {
            for (event, key, value) in garbage {
                listener.on_leave(event, &key, &value);
            }
        }
    }

    fn sweep(&self) {
        let mut garbage = Vec::new();
        self.state.write().evict(&mut garbage);
        if !garbage.is_empty() {
            tracing::trace!(count = garbage.len(), "[lru]: sweeper reclaimed entries");
        }
        self.notify(garbage);
    }
}

/// Bounded-bytes LRU store with per-key TTL and a background expiry sweep.
///
/// A single reader-writer lock guards the recency list, the key index, the
/// expiry map and the byte counter.
pub struct Lru<V>
where
    V: Value,
{
    inner: Arc<LruInner<V>>,
}

impl<V> Clone for Lru<V>
where
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Lru<V>
where
    V: Value,
{
    /// Create the store and launch its sweeper.
    ///
    /// Must be called within a tokio runtime; the sweeper stops on
    /// [`Store::close`] or when the last handle is dropped.
    pub fn new(config: LruConfig<V>) -> Self {
        let cleanup_interval = if config.cleanup_interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            config.cleanup_interval
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let inner = Arc::new(LruInner {
            state: RwLock::new(LruState {
                list: Dlist::new(),
                index: HashMap::new(),
                expiries: HashMap::new(),
                used_bytes: 0,
                max_bytes: config.max_bytes,
            }),
            listener: config.listener,
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
        });

        spawn_sweeper(Arc::downgrade(&inner), cleanup_interval, stop_rx);

        Self { inner }
    }
}

fn spawn_sweeper<V>(inner: Weak<LruInner<V>>, period: Duration, mut stop: oneshot::Receiver<()>)
where
    V: Value,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.sweep();
                }
            }
        }
    });
}

impl<V> Store<V> for Lru<V>
where
    V: Value,
{
    fn get(&self, key: &str) -> Option<V> {
        let (value, idx) = {
            let state = self.inner.state.read();
            let &idx = state.index.get(key)?;
            if let Some(deadline) = state.expiries.get(key) {
                if *deadline <= Instant::now() {
                    // Expired entries read as misses; the sweeper reclaims
                    // them so readers never block on eviction.
                    return None;
                }
            }
            (state.list.get(idx)?.value.clone(), idx)
        };

        // The recency update needs the write lock. The entry may have been
        // removed between the two acquisitions; re-check before moving.
        let mut state = self.inner.state.write();
        if state.index.get(key) == Some(&idx) {
            state.list.move_to_back(idx);
        }
        Some(value)
    }

    fn set(&self, key: &str, value: V) {
        self.set_with_expiration(key, value, None);
    }

    fn set_with_expiration(&self, key: &str, value: V, ttl: Option<Duration>) {
        if value.weight() == 0 {
            self.delete(key);
            return;
        }

        let mut garbage = Vec::new();
        {
            let mut state = self.inner.state.write();

            match ttl {
                Some(ttl) if !ttl.is_zero() => {
                    state.expiries.insert(key.to_string(), Instant::now() + ttl);
                }
                _ => {
                    state.expiries.remove(key);
                }
            }

            if let Some(&idx) = state.index.get(key) {
                let new_weight = value.weight();
                if let Some(entry) = state.list.get_mut(idx) {
                    let old_weight = entry.value.weight();
                    entry.value = value;
                    state.used_bytes = state.used_bytes - old_weight + new_weight;
                    state.list.move_to_back(idx);
                }
                return;
            }

            let weight = value.weight();
            let idx = state.list.push_back(LruEntry {
                key: key.to_string(),
                value,
            });
            state.index.insert(key.to_string(), idx);
            state.used_bytes += key.len() + weight;

            state.evict(&mut garbage);
        }
        self.inner.notify(garbage);
    }

    fn delete(&self, key: &str) -> bool {
        let removed = self.inner.state.write().unlink(key);
        match removed {
            Some((key, value)) => {
                self.inner.notify(vec![(Event::Remove, key, value)]);
                true
            }
            None => false,
        }
    }

    fn clear(&self) {
        let mut garbage = Vec::new();
        {
            let mut state = self.inner.state.write();
            let keys = state
                .list
                .iter()
                .map(|(_, entry)| entry.key.clone())
                .collect::<Vec<_>>();
            for key in keys {
                if let Some((key, value)) = state.unlink(&key) {
                    garbage.push((Event::Clear, key, value));
                }
            }
        }
        self.inner.notify(garbage);
    }

    fn len(&self) -> usize {
        self.inner.state.read().list.len()
    }

    fn used_bytes(&self) -> usize {
        self.inner.state.read().used_bytes
    }

    fn max_bytes(&self) -> usize {
        self.inner.state.read().max_bytes
    }

    fn set_max_bytes(&self, max_bytes: usize) {
        let mut garbage = Vec::new();
        {
            let mut state = self.inner.state.write();
            state.max_bytes = max_bytes;
            if max_bytes > 0 {
                state.evict(&mut garbage);
            }
        }
        self.inner.notify(garbage);
    }

    fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Duration>)> {
        let state = self.inner.state.read();
        let &idx = state.index.get(key)?;
        let value = state.list.get(idx)?.value.clone();
        match state.expiries.get(key) {
            Some(deadline) => {
                let now = Instant::now();
                if *deadline <= now {
                    return None;
                }
                Some((value, Some(deadline.saturating_duration_since(now))))
            }
            None => Some((value, None)),
        }
    }

    fn get_expiration(&self, key: &str) -> Option<SystemTime> {
        let deadline = *self.inner.state.read().expiries.get(key)?;
        let now = Instant::now();
        let sys = SystemTime::now();
        Some(if deadline >= now {
            sys + deadline.saturating_duration_since(now)
        } else {
            sys - now.saturating_duration_since(deadline)
        })
    }

    fn update_expiration(&self, key: &str, ttl: Option<Duration>) -> bool {
        let mut state = self.inner.state.write();
        if !state.index.contains_key(key) {
            return false;
        }
        match ttl {
            Some(ttl) if !ttl.is_zero() => {
                state.expiries.insert(key.to_string(), Instant::now() + ttl);
            }
            _ => {
                state.expiries.remove(key);
            }
        }
        true
    }

    fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            if let Some(stop) = self.inner.stop.lock().take() {
                let _ = stop.send(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex as PlMutex;

    use super::*;

    #[derive(Default)]
    struct Recorder {
        events: PlMutex<Vec<(Event, String, String)>>,
    }

    impl EventListener for Recorder {
        type Value = String;

        fn on_leave(&self, reason: Event, key: &str, value: &Self::Value) {
            self.events.lock().push((reason, key.to_string(), value.clone()));
        }
    }

    fn store(max_bytes: usize) -> Lru<String> {
        Lru::new(LruConfig {
            max_bytes,
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let cache = store(1024);
        cache.set("a", "1".to_string());
        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("missing"), None);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.used_bytes(), 2);
        cache.close();
    }

    #[tokio::test]
    async fn test_eviction_order() {
        let cache = store("a".len() + "1".len() + "b".len() + "2".len());

        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string());

        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.get("b"), Some("2".to_string()));
        assert_eq!(cache.get("c"), Some("3".to_string()));
        cache.close();
    }

    #[tokio::test]
    async fn test_recency_protects_accessed_keys() {
        let cache = store(4);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());

        // Touch "a" so "b" becomes the eviction victim.
        assert!(cache.get("a").is_some());
        cache.set("c", "3".to_string());

        assert_eq!(cache.get("a"), Some("1".to_string()));
        assert_eq!(cache.get("b"), None);
        assert_eq!(cache.get("c"), Some("3".to_string()));
        cache.close();
    }

    #[tokio::test]
    async fn test_expiration() {
        let cache = Lru::new(LruConfig {
            max_bytes: 1024,
            cleanup_interval: Duration::from_millis(100),
            listener: None,
        });

        cache.set_with_expiration("x", "v".to_string(), Some(Duration::from_millis(200)));
        assert_eq!(cache.get("x"), Some("v".to_string()));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(cache.get("x"), None);

        // Reclaimed within one cleanup interval.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn test_update_expiration_extends_ttl() {
        let cache = Lru::new(LruConfig {
            max_bytes: 1024,
            cleanup_interval: Duration::from_millis(200),
            listener: None,
        });

        cache.set_with_expiration("x", "v".to_string(), Some(Duration::from_millis(300)));
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.update_expiration("x", Some(Duration::from_millis(500))));
        tokio::time::sleep(Duration::from_millis(400)).await;

        assert_eq!(cache.get("x"), Some("v".to_string()));
        cache.close();
    }

    #[tokio::test]
    async fn test_update_expiration_absent_key() {
        let cache = store(1024);
        assert!(!cache.update_expiration("missing", Some(Duration::from_secs(1))));
        cache.close();
    }

    #[tokio::test]
    async fn test_zero_ttl_means_no_expiration() {
        let cache = store(1024);
        cache.set_with_expiration("a", "1".to_string(), Some(Duration::ZERO));
        cache.set_with_expiration("b", "2".to_string(), None);
        assert_eq!(cache.get_expiration("a"), None);
        assert_eq!(cache.get_expiration("b"), None);
        assert_eq!(cache.get_with_expiration("a"), Some(("1".to_string(), None)));
        cache.close();
    }

    #[tokio::test]
    async fn test_empty_value_deletes() {
        let cache = store(1024);
        cache.set("a", "1".to_string());
        cache.set_with_expiration("a", String::new(), Some(Duration::from_secs(1)));
        assert_eq!(cache.get("a"), None);
        assert_eq!(cache.len(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn test_delete_and_clear() {
        let cache = store(1024);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());

        assert!(cache.delete("a"));
        assert!(!cache.delete("a"));
        assert_eq!(cache.get("a"), None);

        cache.clear();
        assert_eq!(cache.len(), 0);
        assert_eq!(cache.used_bytes(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn test_update_keeps_bytes_consistent() {
        let cache = store(1024);
        cache.set("key", "abc".to_string());
        assert_eq!(cache.used_bytes(), 6);
        cache.set("key", "a".to_string());
        assert_eq!(cache.used_bytes(), 4);
        assert!(cache.delete("key"));
        assert_eq!(cache.used_bytes(), 0);
        cache.close();
    }

    #[tokio::test]
    async fn test_listener_events() {
        let recorder = Arc::new(Recorder::default());
        let cache = Lru::new(LruConfig {
            max_bytes: 4,
            cleanup_interval: Duration::from_secs(60),
            listener: Some(recorder.clone()),
        });

        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        cache.set("c", "3".to_string()); // evicts "a"
        assert!(cache.delete("b"));
        cache.clear(); // drops "c"

        let events = recorder.events.lock().clone();
        assert_eq!(
            events,
            vec![
                (Event::Evict, "a".to_string(), "1".to_string()),
                (Event::Remove, "b".to_string(), "2".to_string()),
                (Event::Clear, "c".to_string(), "3".to_string()),
            ]
        );
        cache.close();
    }

    #[tokio::test]
    async fn test_set_max_bytes_evicts() {
        let cache = store(0);
        cache.set("a", "1".to_string());
        cache.set("b", "2".to_string());
        assert_eq!(cache.len(), 2);

        cache.set_max_bytes(2);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.max_bytes(), 2);
        assert_eq!(cache.get("b"), Some("2".to_string()));
        cache.close();
    }

    #[tokio::test]
    async fn test_double_close_is_safe() {
        let cache = store(1024);
        cache.close();
        cache.close();
    }
}
