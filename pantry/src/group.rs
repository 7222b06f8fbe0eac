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
    collections::HashMap,
    future::Future,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, LazyLock, OnceLock,
    },
    time::{Duration, Instant},
};

use async_trait::async_trait;
use bytes::Bytes;
use pantry_memory::{Cache, CacheOptions, CacheStats};
use parking_lot::RwLock;
use serde::Serialize;

use crate::{
    error::{Error, Result},
    flight::Flight,
    peer::{PeerChoice, PeerPicker},
    view::ByteView,
};

/// Process-wide registry of groups by name.
static GROUPS: LazyLock<RwLock<HashMap<String, Group>>> = LazyLock::new(Default::default);

/// Loads values from the origin of truth on a full cache miss.
#[async_trait]
pub trait Getter: Send + Sync + 'static {
    /// Load the bytes for `key`.
    async fn get(&self, key: &str) -> anyhow::Result<Bytes>;
}

/// Adapts a closure into a [`Getter`].
///
/// ```ignore
/// let getter = GetterFn(|key| async move { Ok(Bytes::from(format!("value for {key}"))) });
/// ```
pub struct GetterFn<F>(pub F);

#[async_trait]
impl<F, Fut> Getter for GetterFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<Bytes>> + Send + 'static,
{
    async fn get(&self, key: &str) -> anyhow::Result<Bytes> {
        (self.0)(key.to_string()).await
    }
}

#[derive(Default)]
struct Counters {
    loads: AtomicU64,
    local_hits: AtomicU64,
    local_misses: AtomicU64,
    peer_hits: AtomicU64,
    peer_misses: AtomicU64,
    loader_hits: AtomicU64,
    loader_errors: AtomicU64,
    load_duration_ns: AtomicU64,
}

/// Point-in-time statistics for a [`Group`].
#[derive(Debug, Clone, Serialize)]
pub struct GroupStats {
    /// Group name.
    pub name: String,
    /// Whether the group has been closed.
    pub closed: bool,
    /// Default TTL applied to loaded and written entries.
    pub expiration: Option<Duration>,
    /// Loads that went through the single-flight path.
    pub loads: u64,
    /// Gets answered from the local cache.
    pub local_hits: u64,
    /// Gets that missed the local cache.
    pub local_misses: u64,
    /// Loads answered by the owning peer.
    pub peer_hits: u64,
    /// Peer lookups that failed and fell through to the origin.
    pub peer_misses: u64,
    /// Loads answered by the origin loader.
    pub loader_hits: u64,
    /// Loads that failed outright.
    pub loader_errors: u64,
    /// Fraction of gets answered from the local cache.
    pub hit_rate: f64,
    /// Mean load latency in milliseconds.
    pub avg_load_time_ms: f64,
    /// Counters of the local cache.
    pub cache: CacheStats,
}

struct GroupInner {
    name: String,
    getter: Arc<dyn Getter>,
    main_cache: Cache<ByteView>,
    peers: OnceLock<Arc<dyn PeerPicker>>,
    flight: Flight<ByteView>,
    expiration: Option<Duration>,
    closed: AtomicBool,
    counters: Counters,
}

impl GroupInner {
    fn insert_local(&self, key: &str, view: ByteView) {
        self.main_cache.set_with_expiration(key, view, self.expiration);
    }
}

/// A named namespace of cached entries backed by one origin loader.
///
/// Reads fall through local cache → owning peer → origin loader, with
/// concurrent loads for the same key collapsed into one execution. Writes
/// and deletes apply locally and propagate asynchronously to the owning
/// peer.
///
/// Groups register themselves process-wide on construction; handles are
/// cheap to clone.
#[derive(Clone)]
pub struct Group {
    inner: Arc<GroupInner>,
}

/// Builder for a [`Group`].
pub struct GroupBuilder {
    name: String,
    getter: Arc<dyn Getter>,
    expiration: Option<Duration>,
    peers: Option<Arc<dyn PeerPicker>>,
    cache_options: CacheOptions<ByteView>,
}

impl GroupBuilder {
    /// Start building a group over an origin loader.
    pub fn new(name: impl Into<String>, getter: impl Getter) -> Self {
        Self {
            name: name.into(),
            getter: Arc::new(getter),
            expiration: None,
            peers: None,
            cache_options: CacheOptions::default(),
        }
    }

    /// Apply a default TTL to every loaded and written entry.
    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = Some(expiration);
        self
    }

    /// Route misses and writes through a peer picker.
    pub fn with_peers(mut self, peers: impl PeerPicker) -> Self {
        self.peers = Some(Arc::new(peers));
        self
    }

    /// Configure the local cache.
    pub fn with_cache_options(mut self, options: CacheOptions<ByteView>) -> Self {
        self.cache_options = options;
        self
    }

    /// Bound the local cache to `max_bytes`.
    pub fn with_max_bytes(mut self, max_bytes: usize) -> Self {
        self.cache_options.max_bytes = max_bytes;
        self
    }

    /// Build the group and register it process-wide.
    ///
    /// Registering a name that already exists replaces the previous binding
    /// with a warning.
    pub fn build(self) -> Group {
        let peers = OnceLock::new();
        if let Some(picker) = self.peers {
            let _ = peers.set(picker);
        }

        let group = Group {
            inner: Arc::new(GroupInner {
                name: self.name,
                getter: self.getter,
                main_cache: Cache::new(self.cache_options),
                peers,
                flight: Flight::new(),
                expiration: self.expiration,
                closed: AtomicBool::new(false),
                counters: Counters::default(),
            }),
        };
        register(group.clone());
        group
    }
}

fn register(group: Group) {
    let name = group.name().to_string();
    let expiration = group.inner.expiration;
    let mut groups = GROUPS.write();
    if groups.insert(name.clone(), group).is_some() {
        tracing::warn!(group = %name, "[group]: group already exists, replacing");
    }
    tracing::info!(group = %name, ?expiration, "[group]: created cache group");
}

impl Group {
    /// Start building a group over an origin loader.
    pub fn builder(name: impl Into<String>, getter: impl Getter) -> GroupBuilder {
        GroupBuilder::new(name, getter)
    }

    /// The group's name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    fn ensure_open(&self) -> Result<()> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::GroupClosed);
        }
        Ok(())
    }

    /// Get a value: local cache, then owning peer, then origin loader.
    pub async fn get(&self, key: &str) -> Result<ByteView> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }

        if let Some(view) = self.inner.main_cache.get(key) {
            self.inner.counters.local_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(view);
        }
        self.inner.counters.local_misses.fetch_add(1, Ordering::Relaxed);

        self.load(key).await
    }

    /// Single-flight load with latency bookkeeping.
    async fn load(&self, key: &str) -> Result<ByteView> {
        let start = Instant::now();
        let fut = {
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            async move { load_data(inner, key).await }
        };
        let result = self.inner.flight.run(key, fut).await;

        self.inner
            .counters
            .load_duration_ns
            .fetch_add(start.elapsed().as_nanos() as u64, Ordering::Relaxed);
        self.inner.counters.loads.fetch_add(1, Ordering::Relaxed);

        match result {
            Ok(view) => {
                self.inner.insert_local(key, view.clone());
                Ok(view)
            }
            Err(err) => {
                self.inner.counters.loader_errors.fetch_add(1, Ordering::Relaxed);
                Err(err)
            }
        }
    }

    /// Set a value locally and propagate it to the owning peer.
    pub fn set(&self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.set_inner(key, value.into(), false)
    }

    /// Apply a set that arrived from a peer.
    ///
    /// The RPC server routes propagated writes here so they are not
    /// propagated again.
    pub fn set_from_peer(&self, key: &str, value: impl Into<Bytes>) -> Result<()> {
        self.set_inner(key, value.into(), true)
    }

    fn set_inner(&self, key: &str, value: Bytes, from_peer: bool) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }
        if value.is_empty() {
            return Err(Error::ValueRequired);
        }

        self.inner.insert_local(key, ByteView::new(value.clone()));

        if !from_peer && self.inner.peers.get().is_some() {
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            tokio::spawn(async move { sync_to_peers(inner, SyncOp::Set(value), key).await });
        }
        Ok(())
    }

    /// Delete a key locally and propagate the delete to the owning peer.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.delete_inner(key, false)
    }

    /// Apply a delete that arrived from a peer; not propagated again.
    pub fn delete_from_peer(&self, key: &str) -> Result<()> {
        self.delete_inner(key, true)
    }

    fn delete_inner(&self, key: &str, from_peer: bool) -> Result<()> {
        self.ensure_open()?;
        if key.is_empty() {
            return Err(Error::KeyRequired);
        }

        self.inner.main_cache.delete(key);

        if !from_peer && self.inner.peers.get().is_some() {
            let inner = Arc::clone(&self.inner);
            let key = key.to_string();
            tokio::spawn(async move { sync_to_peers(inner, SyncOp::Delete, key).await });
        }
        Ok(())
    }

    /// Drop every locally cached entry of the group.
    pub fn clear(&self) {
        if self.inner.closed.load(Ordering::Acquire) {
            return;
        }
        self.inner.main_cache.clear();
        tracing::info!(group = %self.inner.name, "[group]: cleared cache");
    }

    /// Close the group, stop its cache and deregister it. Idempotent.
    pub fn close(&self) {
        if self
            .inner
            .closed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        self.inner.main_cache.close();

        let mut groups = GROUPS.write();
        if let Some(current) = groups.get(self.name()) {
            if Arc::ptr_eq(&current.inner, &self.inner) {
                groups.remove(self.name());
            }
        }
        drop(groups);

        tracing::info!(group = %self.inner.name, "[group]: closed cache group");
    }

    /// Register the peer picker after construction.
    ///
    /// # Panics
    ///
    /// Panics if a picker was already registered (including one supplied to
    /// the builder).
    pub fn register_peers(&self, peers: impl PeerPicker) {
        if self.inner.peers.set(Arc::new(peers)).is_err() {
            panic!("register_peers called more than once");
        }
        tracing::info!(group = %self.inner.name, "[group]: registered peers");
    }

    /// Snapshot the group's statistics.
    pub fn stats(&self) -> GroupStats {
        let counters = &self.inner.counters;
        let local_hits = counters.local_hits.load(Ordering::Relaxed);
        let local_misses = counters.local_misses.load(Ordering::Relaxed);
        let loads = counters.loads.load(Ordering::Relaxed);

        let total_gets = local_hits + local_misses;
        let hit_rate = if total_gets > 0 {
            local_hits as f64 / total_gets as f64
        } else {
            0.0
        };
        let avg_load_time_ms = if loads > 0 {
            counters.load_duration_ns.load(Ordering::Relaxed) as f64 / loads as f64 / 1e6
        } else {
            0.0
        };

        GroupStats {
            name: self.inner.name.clone(),
            closed: self.inner.closed.load(Ordering::Acquire),
            expiration: self.inner.expiration,
            loads,
            local_hits,
            local_misses,
            peer_hits: counters.peer_hits.load(Ordering::Relaxed),
            peer_misses: counters.peer_misses.load(Ordering::Relaxed),
            loader_hits: counters.loader_hits.load(Ordering::Relaxed),
            loader_errors: counters.loader_errors.load(Ordering::Relaxed),
            hit_rate,
            avg_load_time_ms,
            cache: self.inner.main_cache.stats(),
        }
    }
}

/// Fetch from the owning peer when one exists, falling back to the origin
/// loader.
async fn load_data(inner: Arc<GroupInner>, key: String) -> Result<ByteView> {
    if let Some(picker) = inner.peers.get() {
        if let PeerChoice::Remote(peer) = picker.pick_peer(&key) {
            match peer.get(&inner.name, &key).await {
                Ok(bytes) => {
                    inner.counters.peer_hits.fetch_add(1, Ordering::Relaxed);
                    return Ok(ByteView::new(bytes));
                }
                Err(err) => {
                    inner.counters.peer_misses.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        group = %inner.name,
                        key = %key,
                        error = %err,
                        "[group]: failed to get from peer"
                    );
                }
            }
        }
    }

    match inner.getter.get(&key).await {
        Ok(bytes) => {
            inner.counters.loader_hits.fetch_add(1, Ordering::Relaxed);
            Ok(ByteView::copy_from_slice(&bytes))
        }
        Err(err) => Err(Error::load(key.as_str(), err)),
    }
}

enum SyncOp {
    Set(Bytes),
    Delete,
}

impl SyncOp {
    fn name(&self) -> &'static str {
        match self {
            Self::Set(_) => "set",
            Self::Delete => "delete",
        }
    }
}

/// Fire-and-forget propagation of a local write to the owning peer.
async fn sync_to_peers(inner: Arc<GroupInner>, op: SyncOp, key: String) {
    let Some(picker) = inner.peers.get() else {
        return;
    };
    let PeerChoice::Remote(peer) = picker.pick_peer(&key) else {
        return;
    };

    let op_name = op.name();
    let result = match op {
        SyncOp::Set(value) => peer.set(&inner.name, &key, value).await,
        SyncOp::Delete => peer.delete(&inner.name, &key).await.map(|_| ()),
    };
    if let Err(err) = result {
        tracing::error!(
            group = %inner.name,
            key = %key,
            op = op_name,
            error = %err,
            "[group]: failed to sync to peer"
        );
    }
}

/// Look up a registered group by name.
pub fn get_group(name: &str) -> Option<Group> {
    GROUPS.read().get(name).cloned()
}

/// Names of every registered group.
pub fn list_groups() -> Vec<String> {
    GROUPS.read().keys().cloned().collect()
}

/// Close and deregister a group. Returns whether it existed.
pub fn destroy_group(name: &str) -> bool {
    let group = GROUPS.write().remove(name);
    match group {
        Some(group) => {
            group.close();
            tracing::info!(group = %name, "[group]: destroyed cache group");
            true
        }
        None => false,
    }
}

/// Close and deregister every group. Intended for teardown and test
/// isolation.
pub fn destroy_all_groups() {
    let groups = {
        let mut map = GROUPS.write();
        map.drain().collect::<Vec<_>>()
    };
    for (name, group) in groups {
        group.close();
        tracing::info!(group = %name, "[group]: destroyed cache group");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type ReadyGetter = GetterFn<fn(String) -> std::future::Ready<anyhow::Result<Bytes>>>;

    fn origin() -> ReadyGetter {
        fn load(key: String) -> std::future::Ready<anyhow::Result<Bytes>> {
            std::future::ready(Ok(Bytes::from(format!("origin:{key}"))))
        }
        GetterFn(load)
    }

    fn failing_origin() -> ReadyGetter {
        fn load(_key: String) -> std::future::Ready<anyhow::Result<Bytes>> {
            std::future::ready(Err(anyhow::anyhow!("origin down")))
        }
        GetterFn(load)
    }

    #[tokio::test]
    async fn test_get_validations() {
        let group = Group::builder("unit-validations", origin()).build();

        assert!(matches!(group.get("").await, Err(Error::KeyRequired)));
        assert!(matches!(group.set("", "v"), Err(Error::KeyRequired)));
        assert!(matches!(group.set("k", Vec::<u8>::new()), Err(Error::ValueRequired)));
        assert!(matches!(group.delete(""), Err(Error::KeyRequired)));

        group.close();
        assert!(matches!(group.get("k").await, Err(Error::GroupClosed)));
        assert!(matches!(group.set("k", "v"), Err(Error::GroupClosed)));
        assert!(matches!(group.delete("k"), Err(Error::GroupClosed)));
    }

    #[tokio::test]
    async fn test_get_loads_and_caches() {
        let group = Group::builder("unit-loads", origin()).build();

        let view = group.get("alpha").await.unwrap();
        assert_eq!(view.as_bytes(), b"origin:alpha");

        // Second get is a local hit; the loader is not consulted again.
        let view = group.get("alpha").await.unwrap();
        assert_eq!(view.as_bytes(), b"origin:alpha");

        let stats = group.stats();
        assert_eq!(stats.local_misses, 1);
        assert_eq!(stats.local_hits, 1);
        assert_eq!(stats.loader_hits, 1);
        assert_eq!(stats.loads, 1);
        assert!(stats.hit_rate > 0.0);

        group.close();
    }

    #[tokio::test]
    async fn test_set_then_get_without_loader() {
        let group = Group::builder("unit-set", origin()).build();

        group.set("k", "local").unwrap();
        let view = group.get("k").await.unwrap();
        assert_eq!(view.as_bytes(), b"local");
        assert_eq!(group.stats().loader_hits, 0);

        group.delete("k").unwrap();
        let view = group.get("k").await.unwrap();
        assert_eq!(view.as_bytes(), b"origin:k");

        group.close();
    }

    #[tokio::test]
    async fn test_loader_errors_surface_and_count() {
        let group = Group::builder("unit-loader-error", failing_origin()).build();

        let err = group.get("k").await.unwrap_err();
        assert!(matches!(err, Error::Load { .. }));
        assert!(err.to_string().contains("origin down"));

        let stats = group.stats();
        assert_eq!(stats.loader_errors, 1);
        assert_eq!(stats.loader_hits, 0);

        group.close();
    }

    #[tokio::test]
    async fn test_default_expiration_applies() {
        let group = Group::builder("unit-expiration", origin())
            .with_expiration(Duration::from_millis(100))
            .with_cache_options(CacheOptions {
                cleanup_interval: Duration::from_millis(50),
                ..Default::default()
            })
            .build();

        group.get("k").await.unwrap();
        assert_eq!(group.stats().cache.len, 1);

        tokio::time::sleep(Duration::from_millis(250)).await;
        assert_eq!(group.stats().cache.len, 0);

        group.close();
    }

    #[tokio::test]
    async fn test_registry() {
        let group = Group::builder("unit-registry", origin()).build();

        assert!(list_groups().contains(&"unit-registry".to_string()));
        assert!(get_group("unit-registry").is_some());
        assert!(get_group("unit-registry-nope").is_none());

        assert!(destroy_group("unit-registry"));
        assert!(!destroy_group("unit-registry"));
        assert!(get_group("unit-registry").is_none());

        // The handle we kept observes the close.
        assert!(matches!(group.get("k").await, Err(Error::GroupClosed)));
    }

    #[tokio::test]
    async fn test_duplicate_registration_replaces() {
        let first = Group::builder("unit-duplicate", origin()).build();
        let second = Group::builder("unit-duplicate", origin()).build();

        let registered = get_group("unit-duplicate").unwrap();
        assert!(Arc::ptr_eq(&registered.inner, &second.inner));

        // Closing the replaced group must not deregister its successor.
        first.close();
        assert!(get_group("unit-duplicate").is_some());

        second.close();
        assert!(get_group("unit-duplicate").is_none());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let group = Group::builder("unit-close", origin()).build();
        group.close();
        group.close();
    }

    #[tokio::test]
    #[should_panic(expected = "register_peers called more than once")]
    async fn test_register_peers_twice_panics() {
        struct NoPeers;
        impl PeerPicker for NoPeers {
            fn pick_peer(&self, _key: &str) -> PeerChoice {
                PeerChoice::None
            }
        }

        let group = Group::builder("unit-register-peers", origin()).build();
        group.register_peers(NoPeers);
        group.register_peers(NoPeers);
    }
}
