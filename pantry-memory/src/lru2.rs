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
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Weak,
    },
    time::{Duration, SystemTime},
};

use hashbrown::HashMap;
use pantry_common::{
    clock,
    code::Value,
    event::{Event, EventListener},
    hasher,
};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::store::Store;

const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Prev column of the adjacency table.
const P: usize = 0;
/// Next column of the adjacency table.
const N: usize = 1;

/// Configuration for the sharded two-level [`Lru2`] store.
pub struct Lru2Config<V> {
    /// Number of buckets; rounded up to a power of two.
    pub bucket_count: usize,
    /// Level-0 (probation) slot capacity per bucket.
    pub cap_per_bucket: usize,
    /// Level-1 (protected) slot capacity per bucket.
    pub level2_cap: usize,
    /// Period of the background expiry sweep.
    pub cleanup_interval: Duration,
    /// Listener invoked for every removal.
    pub listener: Option<Arc<dyn EventListener<Value = V>>>,
}

impl<V> Default for Lru2Config<V> {
    fn default() -> Self {
        Self {
            bucket_count: 16,
            cap_per_bucket: 1024,
            level2_cap: 1024,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            listener: None,
        }
    }
}

impl<V> Debug for Lru2Config<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lru2Config")
            .field("bucket_count", &self.bucket_count)
            .field("cap_per_bucket", &self.cap_per_bucket)
            .field("level2_cap", &self.level2_cap)
            .field("cleanup_interval", &self.cleanup_interval)
            .field("listener", &self.listener.is_some())
            .finish()
    }
}

struct Node<V> {
    key: String,
    value: V,
    /// Unix-nano deadline. `0` marks a tombstoned slot awaiting recycling;
    /// [`clock::NEVER`] marks an entry without expiry.
    expire_at: i64,
}

impl<V> Node<V> {
    fn is_live(&self, now: i64) -> bool {
        self.expire_at > now
    }
}

enum PutOutcome<V> {
    /// The key was already indexed; value and expiry replaced in place.
    Updated { old_value: V, old_expire_at: i64 },
    /// Inserted into a fresh slot.
    Inserted,
    /// Inserted by recycling the least recently used slot; its previous live
    /// occupant is returned (tombstones yield `None`).
    Displaced(Option<Node<V>>),
}

/// Fixed-capacity LRU slot table.
///
/// Entries occupy a preallocated slot array; recency is encoded in a
/// `[cap+1][2]` adjacency table of prev/next indices with slot 0 as the
/// sentinel. `last` tracks the next free slot; once the table is full,
/// insertion recycles the tail.
struct SlotTable<V> {
    cap: u32,
    last: u32,
    nodes: Vec<Node<V>>,
    dlnk: Vec<[u32; 2]>,
    index: HashMap<String, u32>,
}

impl<V> SlotTable<V>
where
    V: Value,
{
    fn new(cap: usize) -> Self {
        let cap = cap.max(1);
        Self {
            cap: cap as u32,
            last: 0,
            nodes: Vec::with_capacity(cap),
            dlnk: vec![[0, 0]; cap + 1],
            index: HashMap::with_capacity(cap),
        }
    }

    fn contains(&self, key: &str) -> bool {
        self.index.contains_key(key)
    }

    /// Move a slot to the head (`f = P, t = N`) or to the tail
    /// (`f = N, t = P`). A slot already at that end stays put.
    fn adjust(&mut self, slot: u32, f: usize, t: usize) {
        if self.dlnk[slot as usize][f] == 0 {
            return;
        }
        let fp = self.dlnk[slot as usize][f];
        let tp = self.dlnk[slot as usize][t];
        self.dlnk[fp as usize][t] = tp;
        self.dlnk[tp as usize][f] = fp;

        let end = self.dlnk[0][t];
        self.dlnk[slot as usize][f] = 0;
        self.dlnk[slot as usize][t] = end;
        self.dlnk[end as usize][f] = slot;
        self.dlnk[0][t] = slot;
    }

    /// Insert at the head, reusing a fresh slot or recycling the LRU tail.
    fn put(&mut self, key: &str, value: V, expire_at: i64) -> PutOutcome<V> {
        if let Some(&slot) = self.index.get(key) {
            let node = &mut self.nodes[slot as usize - 1];
            let old_value = std::mem::replace(&mut node.value, value);
            let old_expire_at = std::mem::replace(&mut node.expire_at, expire_at);
            self.adjust(slot, P, N);
            return PutOutcome::Updated {
                old_value,
                old_expire_at,
            };
        }

        if self.last == self.cap {
            let slot = self.dlnk[0][P];
            let node = &mut self.nodes[slot as usize - 1];
            let old = std::mem::replace(
                node,
                Node {
                    key: key.to_string(),
                    value,
                    expire_at,
                },
            );
            self.index.remove(&old.key);
            self.index.insert(key.to_string(), slot);
            self.adjust(slot, P, N);
            return PutOutcome::Displaced((old.expire_at != 0).then_some(old));
        }

        self.last += 1;
        let slot = self.last;
        self.nodes.push(Node {
            key: key.to_string(),
            value,
            expire_at,
        });
        let head = self.dlnk[0][N];
        self.dlnk[slot as usize] = [0, head];
        self.dlnk[head as usize][P] = slot;
        self.dlnk[0][N] = slot;
        self.index.insert(key.to_string(), slot);
        PutOutcome::Inserted
    }

    /// Look up a key, refreshing its recency. Tombstoned and expired nodes
    /// are returned as-is; liveness is the caller's concern.
    fn get(&mut self, key: &str) -> Option<&Node<V>> {
        let &slot = self.index.get(key)?;
        self.adjust(slot, P, N);
        Some(&self.nodes[slot as usize - 1])
    }

    /// Tombstone a key and park its slot at the tail so it is recycled
    /// first. Returns the old value and expiry for non-tombstoned keys.
    fn del(&mut self, key: &str) -> Option<(V, i64)> {
        let &slot = self.index.get(key)?;
        let node = &mut self.nodes[slot as usize - 1];
        if node.expire_at == 0 {
            return None;
        }
        let old_expire_at = std::mem::replace(&mut node.expire_at, 0);
        let value = node.value.clone();
        self.adjust(slot, N, P);
        Some((value, old_expire_at))
    }

    /// Visit non-tombstoned entries from most to least recently used; stop
    /// when the visitor returns `false`.
    fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&str, &V, i64) -> bool,
    {
        let mut slot = self.dlnk[0][N];
        while slot != 0 {
            let node = &self.nodes[slot as usize - 1];
            if node.expire_at != 0 && !f(&node.key, &node.value, node.expire_at) {
                return;
            }
            slot = self.dlnk[slot as usize][N];
        }
    }

    fn len(&self) -> usize {
        let mut len = 0;
        self.walk(|_, _, _| {
            len += 1;
            true
        });
        len
    }
}

type Garbage<V> = Vec<(Event, String, V)>;

/// A pair of slot tables (level 0 probation, level 1 protected) guarded by
/// one mutex at the store layer.
struct Bucket<V> {
    levels: [SlotTable<V>; 2],
}

impl<V> Bucket<V>
where
    V: Value,
{
    fn new(cap_per_bucket: usize, level2_cap: usize) -> Self {
        Self {
            levels: [SlotTable::new(cap_per_bucket), SlotTable::new(level2_cap)],
        }
    }

    /// Two-level lookup: a live hit in level 0 refreshes recency; a live hit
    /// in level 1 promotes the entry into level 0, demoting the displaced
    /// level-0 tail.
    fn get(&mut self, key: &str, now: i64) -> (Option<V>, Garbage<V>, isize) {
        let mut garbage = Vec::new();
        let mut delta = 0isize;

        if let Some(node) = self.levels[0].get(key) {
            if node.is_live(now) {
                return (Some(node.value.clone()), garbage, delta);
            }
        }

        let promoted = match self.levels[1].get(key) {
            Some(node) if node.is_live(now) => Some((node.value.clone(), node.expire_at)),
            _ => None,
        };
        let Some((value, expire_at)) = promoted else {
            return (None, garbage, delta);
        };

        self.levels[1].del(key);
        match self.levels[0].put(key, value.clone(), expire_at) {
            PutOutcome::Updated { .. } | PutOutcome::Inserted | PutOutcome::Displaced(None) => {}
            PutOutcome::Displaced(Some(victim)) => self.demote(victim, &mut garbage, &mut delta),
        }
        (Some(value), garbage, delta)
    }

    /// Park a displaced level-0 tail at the head of level 1, evicting the
    /// level-1 tail when that table is full.
    fn demote(&mut self, victim: Node<V>, garbage: &mut Garbage<V>, delta: &mut isize) {
        let Node {
            key,
            value,
            expire_at,
        } = victim;
        match self.levels[1].put(&key, value, expire_at) {
            PutOutcome::Updated {
                old_value,
                old_expire_at,
            } => {
                if old_expire_at != 0 {
                    *delta -= (key.len() + old_value.weight()) as isize;
                    garbage.push((Event::Evict, key, old_value));
                }
            }
            PutOutcome::Inserted | PutOutcome::Displaced(None) => {}
            PutOutcome::Displaced(Some(evicted)) => {
                *delta -= (evicted.key.len() + evicted.value.weight()) as isize;
                garbage.push((Event::Evict, evicted.key, evicted.value));
            }
        }
    }

    fn set(&mut self, key: &str, value: V, expire_at: i64) -> (Garbage<V>, isize) {
        let mut garbage = Vec::new();
        let mut delta = 0isize;
        let weight = value.weight();

        if self.levels[0].contains(key) {
            let outcome = self.levels[0].put(key, value, expire_at);
            delta += update_delta(key, weight, outcome);
            return (garbage, delta);
        }
        if self.levels[1].contains(key) {
            let outcome = self.levels[1].put(key, value, expire_at);
            delta += update_delta(key, weight, outcome);
            return (garbage, delta);
        }

        delta += (key.len() + weight) as isize;
        match self.levels[0].put(key, value, expire_at) {
            PutOutcome::Inserted | PutOutcome::Displaced(None) => {}
            PutOutcome::Displaced(Some(victim)) => self.demote(victim, &mut garbage, &mut delta),
            PutOutcome::Updated { .. } => unreachable!("key is not indexed"),
        }
        (garbage, delta)
    }

    fn delete(&mut self, key: &str) -> (bool, Garbage<V>, isize) {
        let mut garbage = Vec::new();
        let mut delta = 0isize;
        for level in 0..2 {
            if let Some((value, _)) = self.levels[level].del(key) {
                delta -= (key.len() + value.weight()) as isize;
                garbage.push((Event::Remove, key.to_string(), value));
                return (true, garbage, delta);
            }
        }
        (false, garbage, delta)
    }

    /// Lookup without promotion or recency refresh.
    fn peek(&self, key: &str, now: i64) -> Option<(V, i64)> {
        for level in 0..2 {
            let table = &self.levels[level];
            if let Some(&slot) = table.index.get(key) {
                let node = &table.nodes[slot as usize - 1];
                if node.is_live(now) {
                    return Some((node.value.clone(), node.expire_at));
                }
            }
        }
        None
    }

    fn update_expiration(&mut self, key: &str, expire_at: i64) -> bool {
        for level in 0..2 {
            let table = &mut self.levels[level];
            if let Some(&slot) = table.index.get(key) {
                let node = &mut table.nodes[slot as usize - 1];
                if node.expire_at != 0 {
                    node.expire_at = expire_at;
                    return true;
                }
            }
        }
        false
    }

    /// Tombstone everything whose deadline has passed.
    fn sweep(&mut self, now: i64) -> (Garbage<V>, isize) {
        let mut garbage = Vec::new();
        let mut delta = 0isize;
        for level in 0..2 {
            let mut expired = Vec::new();
            self.levels[level].walk(|key, _, expire_at| {
                if expire_at <= now {
                    expired.push(key.to_string());
                }
                true
            });
            for key in expired {
                if let Some((value, _)) = self.levels[level].del(&key) {
                    delta -= (key.len() + value.weight()) as isize;
                    garbage.push((Event::Expire, key, value));
                }
            }
        }
        (garbage, delta)
    }

    fn clear(&mut self) -> (Garbage<V>, isize) {
        let mut garbage = Vec::new();
        let mut delta = 0isize;
        for level in 0..2 {
            let cap = self.levels[level].cap as usize;
            let mut entries = Vec::new();
            self.levels[level].walk(|key, value, _| {
                entries.push((key.to_string(), value.clone()));
                true
            });
            for (key, value) in entries {
                delta -= (key.len() + value.weight()) as isize;
                garbage.push((Event::Clear, key, value));
            }
            self.levels[level] = SlotTable::new(cap);
        }
        (garbage, delta)
    }

    fn len(&self) -> usize {
        self.levels[0].len() + self.levels[1].len()
    }
}

fn update_delta<V>(key: &str, new_weight: usize, outcome: PutOutcome<V>) -> isize
where
    V: Value,
{
    match outcome {
        PutOutcome::Updated {
            old_value,
            old_expire_at,
        } => {
            if old_expire_at == 0 {
                // Resurrected a tombstoned slot.
                (key.len() + new_weight) as isize
            } else {
                new_weight as isize - old_value.weight() as isize
            }
        }
        _ => unreachable!("put on an indexed key"),
    }
}

struct Lru2Inner<V>
where
    V: Value,
{
    buckets: Box<[Mutex<Bucket<V>>]>,
    mask: u32,
    used_bytes: AtomicUsize,
    listener: Option<Arc<dyn EventListener<Value = V>>>,
    closed: AtomicBool,
    stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl<V> Lru2Inner<V>
where
    V: Value,
{
    fn bucket(&self, key: &str) -> &Mutex<Bucket<V>> {
        &self.buckets[(hasher::hash_bkrd(key) & self.mask) as usize]
    }

    fn apply(&self, delta: isize) {
        if delta >= 0 {
            self.used_bytes.fetch_add(delta as usize, Ordering::Relaxed);
        } else {
            self.used_bytes
                .fetch_sub(delta.unsigned_abs(), Ordering::Relaxed);
        }
    }

    fn notify(&self, garbage: Garbage<V>) {
        if let Some(listener) = self.listener.as_ref() {
            for (event, key, value) in garbage {
                listener.on_leave(event, &key, &value);
            }
        }
    }

    fn sweep(&self) {
        let now = clock::now_unix_nanos();
        let mut reclaimed = 0;
        for bucket in self.buckets.iter() {
            let (garbage, delta) = bucket.lock().sweep(now);
            reclaimed += garbage.len();
            self.apply(delta);
            self.notify(garbage);
        }
        if reclaimed > 0 {
            tracing::trace!(count = reclaimed, "[lru2]: sweeper reclaimed entries");
        }
    }
}

/// Sharded two-level LRU store.
///
/// Keys route to a bucket by BKDR hash; each bucket holds a probationary
/// level-0 table and a protected level-1 table behind one mutex. Newly
/// admitted entries only populate level 0, so a single scan cannot flush
/// frequently used keys: those are demoted to level 1 first and promoted
/// back on their next access.
pub struct Lru2<V>
where
    V: Value,
{
    inner: Arc<Lru2Inner<V>>,
}

impl<V> Clone for Lru2<V>
where
    V: Value,
{
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> Lru2<V>
where
    V: Value,
{
    /// Create the store and launch its sweeper.
    ///
    /// Must be called within a tokio runtime; the sweeper stops on
    /// [`Store::close`] or when the last handle is dropped.
    pub fn new(config: Lru2Config<V>) -> Self {
        let mask = hasher::pow2_mask(config.bucket_count);
        let buckets = (0..=mask)
            .map(|_| Mutex::new(Bucket::new(config.cap_per_bucket, config.level2_cap)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let cleanup_interval = if config.cleanup_interval.is_zero() {
            DEFAULT_CLEANUP_INTERVAL
        } else {
            config.cleanup_interval
        };

        let (stop_tx, stop_rx) = oneshot::channel();
        let inner = Arc::new(Lru2Inner {
            buckets,
            mask,
            used_bytes: AtomicUsize::new(0),
            listener: config.listener,
            closed: AtomicBool::new(false),
            stop: Mutex::new(Some(stop_tx)),
        });

        spawn_sweeper(Arc::downgrade(&inner), cleanup_interval, stop_rx);

        Self { inner }
    }

    /// Visit every live entry, most recent first within each bucket level;
    /// stop when the visitor returns `false`.
    pub fn walk<F>(&self, mut f: F)
    where
        F: FnMut(&str, &V, i64) -> bool,
    {
        for bucket in self.inner.buckets.iter() {
            let bucket = bucket.lock();
            let mut keep_going = true;
            for level in 0..2 {
                if !keep_going {
                    break;
                }
                bucket.levels[level].walk(|key, value, expire_at| {
                    keep_going = f(key, value, expire_at);
                    keep_going
                });
            }
            if !keep_going {
                return;
            }
        }
    }
}

fn spawn_sweeper<V>(inner: Weak<Lru2Inner<V>>, period: Duration, mut stop: oneshot::Receiver<()>)
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

impl<V> Store<V> for Lru2<V>
where
    V: Value,
{
    fn get(&self, key: &str) -> Option<V> {
        let now = clock::now_unix_nanos();
        let (value, garbage, delta) = self.inner.bucket(key).lock().get(key, now);
        self.inner.apply(delta);
        self.inner.notify(garbage);
        value
    }

    fn set(&self, key: &str, value: V) {
        self.set_with_expiration(key, value, None);
    }

    fn set_with_expiration(&self, key: &str, value: V, ttl: Option<Duration>) {
        if value.weight() == 0 {
            self.delete(key);
            return;
        }
        let expire_at = clock::deadline_unix_nanos(ttl);
        let (garbage, delta) = self.inner.bucket(key).lock().set(key, value, expire_at);
        self.inner.apply(delta);
        self.inner.notify(garbage);
    }

    fn delete(&self, key: &str) -> bool {
        let (deleted, garbage, delta) = self.inner.bucket(key).lock().delete(key);
        self.inner.apply(delta);
        self.inner.notify(garbage);
        deleted
    }

    fn clear(&self) {
        for bucket in self.inner.buckets.iter() {
            let (garbage, delta) = bucket.lock().clear();
            self.inner.apply(delta);
            self.inner.notify(garbage);
        }
    }

    fn len(&self) -> usize {
        self.inner
            .buckets
            .iter()
            .map(|bucket| bucket.lock().len())
            .sum()
    }

    fn used_bytes(&self) -> usize {
        self.inner.used_bytes.load(Ordering::Relaxed)
    }

    fn max_bytes(&self) -> usize {
        // Capacity is slot-based for this engine.
        0
    }

    fn set_max_bytes(&self, _max_bytes: usize) {}

    fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Duration>)> {
        let now = clock::now_unix_nanos();
        let (value, expire_at) = self.inner.bucket(key).lock().peek(key, now)?;
        let remaining = (expire_at != clock::NEVER)
            .then(|| Duration::from_nanos(expire_at.saturating_sub(now).max(0) as u64));
        Some((value, remaining))
    }

    fn get_expiration(&self, key: &str) -> Option<SystemTime> {
        let now = clock::now_unix_nanos();
        let (_, expire_at) = self.inner.bucket(key).lock().peek(key, now)?;
        clock::deadline_to_system_time(expire_at)
    }

    fn update_expiration(&self, key: &str, ttl: Option<Duration>) -> bool {
        let expire_at = clock::deadline_unix_nanos(ttl);
        self.inner
            .bucket(key)
            .lock()
            .update_expiration(key, expire_at)
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
