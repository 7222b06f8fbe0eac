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
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use parking_lot::{Mutex, RwLock};
use tokio::sync::oneshot;

use crate::peer::{Peer, PeerChoice, PeerPicker};

const REBALANCE_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum observed requests before a rebalance is considered.
const MIN_SAMPLES: u64 = 1000;

/// Hash function mapping bytes onto the ring.
pub type HashFn = fn(&[u8]) -> u32;

fn crc32c_hash(data: &[u8]) -> u32 {
    crc32c::crc32c(data)
}

/// Configuration for the consistent-hash [`Ring`].
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Virtual nodes created per real node on `add`.
    pub default_replicas: usize,
    /// Lower clamp for adaptive rebalancing.
    pub min_replicas: usize,
    /// Upper clamp for adaptive rebalancing.
    pub max_replicas: usize,
    /// Per-node load deviation (relative to the mean) that triggers a
    /// rebalance.
    pub load_balance_threshold: f64,
    /// Hash function for keys and virtual nodes.
    pub hash_fn: HashFn,
}

impl Default for RingConfig {
    fn default() -> Self {
        Self {
            default_replicas: 50,
            min_replicas: 10,
            max_replicas: 200,
            load_balance_threshold: 0.25,
            hash_fn: crc32c_hash,
        }
    }
}

#[derive(Default)]
struct RingState {
    /// Sorted virtual-node hash positions.
    keys: Vec<u32>,
    /// Virtual-node hash to real-node name.
    hash_map: HashMap<u32, String>,
    /// Real-node name to its current virtual-node count.
    node_replicas: HashMap<String, usize>,
    /// Per-node request counters, atomic so `get` can count under the read
    /// lock.
    node_counts: HashMap<String, AtomicU64>,
}

fn add_node_locked(state: &mut RingState, node: &str, replicas: usize, hash_fn: HashFn) {
    for i in 0..replicas {
        let hash = hash_fn(format!("{node}-{i}").as_bytes());
        state.keys.push(hash);
        state.hash_map.insert(hash, node.to_string());
    }
    state.node_replicas.insert(node.to_string(), replicas);
    state.node_counts.entry(node.to_string()).or_default();
}

fn remove_node_locked(state: &mut RingState, node: &str, hash_fn: HashFn) -> bool {
    let Some(replicas) = state.node_replicas.get(node).copied() else {
        return false;
    };
    for i in 0..replicas {
        let hash = hash_fn(format!("{node}-{i}").as_bytes());
        state.hash_map.remove(&hash);
        if let Some(pos) = state.keys.iter().position(|&k| k == hash) {
            state.keys.remove(pos);
        }
    }
    state.node_replicas.remove(node);
    state.node_counts.remove(node);
    true
}

struct RingInner {
    config: RingConfig,
    state: RwLock<RingState>,
    total_requests: AtomicU64,
    closed: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl RingInner {
    /// Rebalance when enough samples have accumulated and some node's load
    /// deviates too far from the mean.
    fn maybe_rebalance(&self) {
        if self.total_requests.load(Ordering::Relaxed) < MIN_SAMPLES {
            return;
        }

        let unbalanced = {
            let state = self.state.read();
            if state.node_replicas.is_empty() {
                return;
            }
            let total = self.total_requests.load(Ordering::Relaxed) as f64;
            let avg = total / state.node_replicas.len() as f64;
            let mut max_diff = 0.0f64;
            for count in state.node_counts.values() {
                let count = count.load(Ordering::Relaxed) as f64;
                max_diff = max_diff.max((count - avg).abs() / avg);
            }
            max_diff > self.config.load_balance_threshold
        };

        if unbalanced {
            self.rebalance();
        }
    }

    fn rebalance(&self) {
        let mut state = self.state.write();
        if state.node_replicas.is_empty() {
            return;
        }
        let total = self.total_requests.load(Ordering::Relaxed) as f64;
        let avg = total / state.node_replicas.len() as f64;
        if avg <= 0.0 {
            return;
        }

        let snapshot = state
            .node_counts
            .iter()
            .map(|(node, count)| (node.clone(), count.load(Ordering::Relaxed)))
            .collect::<Vec<_>>();

        for (node, count) in snapshot {
            let Some(current) = state.node_replicas.get(&node).copied() else {
                continue;
            };
            let load_ratio = count as f64 / avg;
            let new_replicas = if load_ratio > 1.0 {
                // Hot node: fewer virtual nodes.
                (current as f64 / load_ratio) as usize
            } else {
                // Cold node: more virtual nodes.
                (current as f64 * (2.0 - load_ratio)) as usize
            };
            let new_replicas = new_replicas.clamp(self.config.min_replicas, self.config.max_replicas);
            if new_replicas != current {
                if !remove_node_locked(&mut state, &node, self.config.hash_fn) {
                    continue;
                }
                add_node_locked(&mut state, &node, new_replicas, self.config.hash_fn);
                tracing::debug!(
                    node = %node,
                    from = current,
                    to = new_replicas,
                    "[ring]: adjusted virtual nodes"
                );
            }
        }

        for count in state.node_counts.values() {
            count.store(0, Ordering::Relaxed);
        }
        self.total_requests.store(0, Ordering::Relaxed);
        state.keys.sort_unstable();
    }
}

/// Consistent-hash ring with virtual nodes and load-adaptive replica
/// rebalancing.
///
/// The ring owns no cache entries, only routing metadata. A background task
/// re-weighs virtual-node counts every second based on observed per-node
/// load; between rebalances, `get` is a pure function of the key.
pub struct Ring {
    inner: Arc<RingInner>,
}

impl Clone for Ring {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Default for Ring {
    fn default() -> Self {
        Self::new(RingConfig::default())
    }
}

impl Ring {
    /// Create an empty ring and launch its rebalancer.
    ///
    /// Must be called within a tokio runtime; the rebalancer stops on
    /// [`Ring::close`] or when the last handle is dropped.
    pub fn new(config: RingConfig) -> Self {
        let (stop_tx, stop_rx) = oneshot::channel();
        let inner = Arc::new(RingInner {
            config,
            state: RwLock::new(RingState::default()),
            total_requests: AtomicU64::new(0),
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
        });
        spawn_rebalancer(Arc::downgrade(&inner), stop_rx);
        Self { inner }
    }

    /// Add real nodes, each with the default virtual-node count.
    ///
    /// Empty node names are skipped.
    pub fn add<I, S>(&self, nodes: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut state = self.inner.state.write();
        for node in nodes {
            let node = node.as_ref();
            if node.is_empty() {
                continue;
            }
            add_node_locked(&mut state, node, self.inner.config.default_replicas, self.inner.config.hash_fn);
        }
        state.keys.sort_unstable();
    }

    /// Remove a real node and all of its virtual nodes.
    ///
    /// Returns `false` if the node is unknown.
    pub fn remove(&self, node: &str) -> bool {
        if node.is_empty() {
            return false;
        }
        let mut state = self.inner.state.write();
        remove_node_locked(&mut state, node, self.inner.config.hash_fn)
    }

    /// The real node owning `key`, or `None` when the ring is empty.
    pub fn get(&self, key: &str) -> Option<String> {
        if key.is_empty() {
            return None;
        }
        let state = self.inner.state.read();
        if state.keys.is_empty() {
            return None;
        }

        let hash = (self.inner.config.hash_fn)(key.as_bytes());
        let idx = state.keys.partition_point(|&k| k < hash);
        // The ring wraps: past the last position, ownership falls back to
        // the first.
        let idx = if idx == state.keys.len() { 0 } else { idx };
        let node = state.hash_map.get(&state.keys[idx])?.clone();

        if let Some(count) = state.node_counts.get(&node) {
            count.fetch_add(1, Ordering::Relaxed);
        }
        self.inner.total_requests.fetch_add(1, Ordering::Relaxed);

        Some(node)
    }

    /// Per-node fraction of the requests observed since the last rebalance.
    pub fn stats(&self) -> HashMap<String, f64> {
        let mut stats = HashMap::new();
        let total = self.inner.total_requests.load(Ordering::Relaxed);
        if total == 0 {
            return stats;
        }
        let state = self.inner.state.read();
        for (node, count) in state.node_counts.iter() {
            stats.insert(
                node.clone(),
                count.load(Ordering::Relaxed) as f64 / total as f64,
            );
        }
        stats
    }

    /// Stop the rebalancer. Safe to call more than once.
    pub fn close(&self) {
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

fn spawn_rebalancer(inner: Weak<RingInner>, mut stop: oneshot::Receiver<()>) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(REBALANCE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first tick completes immediately.
        interval.tick().await;
        loop {
            tokio::select! {
                _ = &mut stop => break,
                _ = interval.tick() => {
                    let Some(inner) = inner.upgrade() else { break };
                    inner.maybe_rebalance();
                }
            }
        }
    });
}

/// Picks peers by consulting a [`Ring`] and comparing the owner against the
/// local node's name.
///
/// The transport layer supplies the peer handles; this type only decides
/// ownership.
pub struct RingPicker<F> {
    ring: Ring,
    self_name: String,
    peers: F,
}

impl<F> RingPicker<F>
where
    F: Fn(&str) -> Option<Arc<dyn Peer>> + Send + Sync + 'static,
{
    /// Build a picker over `ring` for the node named `self_name`; `peers`
    /// resolves a node name to its transport client.
    pub fn new(ring: Ring, self_name: impl Into<String>, peers: F) -> Self {
        Self {
            ring,
            self_name: self_name.into(),
            peers,
        }
    }
}

impl<F> PeerPicker for RingPicker<F>
where
    F: Fn(&str) -> Option<Arc<dyn Peer>> + Send + Sync + 'static,
{
    fn pick_peer(&self, key: &str) -> PeerChoice {
        let Some(node) = self.ring.get(key) else {
            return PeerChoice::None;
        };
        if node == self.self_name {
            return PeerChoice::Local;
        }
        match (self.peers)(&node) {
            Some(peer) => PeerChoice::Remote(peer),
            None => PeerChoice::None,
        }
    }
}
