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

//! End-to-end tests for the group layer with mock peers.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use pantry::{
    CacheOptions, Engine, Getter, GetterFn, Group, Peer, PeerChoice, PeerPicker, Ring, RingPicker,
};
use parking_lot::Mutex;
use rand::Rng;

fn origin_getter() -> GetterFn<fn(String) -> std::future::Ready<anyhow::Result<Bytes>>> {
    fn load(_key: String) -> std::future::Ready<anyhow::Result<Bytes>> {
        std::future::ready(Ok(Bytes::from_static(b"origin")))
    }
    GetterFn(load)
}

fn keyed_getter() -> GetterFn<fn(String) -> std::future::Ready<anyhow::Result<Bytes>>> {
    fn load(key: String) -> std::future::Ready<anyhow::Result<Bytes>> {
        std::future::ready(Ok(Bytes::from(format!("value-{key}"))))
    }
    GetterFn(load)
}

#[derive(Default)]
struct MockPeer {
    fail_gets: bool,
    store: Mutex<HashMap<String, Bytes>>,
    gets: AtomicUsize,
    sets: AtomicUsize,
    deletes: AtomicUsize,
}

#[async_trait]
impl Peer for MockPeer {
    async fn get(&self, _group: &str, key: &str) -> anyhow::Result<Bytes> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        if self.fail_gets {
            anyhow::bail!("peer unavailable");
        }
        self.store
            .lock()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow::anyhow!("key not found on peer"))
    }

    async fn set(&self, _group: &str, key: &str, value: Bytes) -> anyhow::Result<()> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.store.lock().insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, _group: &str, key: &str) -> anyhow::Result<bool> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        Ok(self.store.lock().remove(key).is_some())
    }
}

struct StaticPicker {
    choice: PeerChoice,
}

impl PeerPicker for StaticPicker {
    fn pick_peer(&self, _key: &str) -> PeerChoice {
        self.choice.clone()
    }
}

#[tokio::test]
async fn test_peer_failure_falls_back_to_origin() {
    let peer = Arc::new(MockPeer {
        fail_gets: true,
        ..Default::default()
    });
    let group = Group::builder("it-peer-fallback", origin_getter())
        .with_peers(StaticPicker {
            choice: PeerChoice::Remote(peer.clone()),
        })
        .build();

    let view = group.get("k").await.unwrap();
    assert_eq!(view.as_bytes(), b"origin");

    let stats = group.stats();
    assert_eq!(stats.local_misses, 1);
    assert_eq!(stats.peer_misses, 1);
    assert_eq!(stats.peer_hits, 0);
    assert_eq!(stats.loader_hits, 1);
    assert_eq!(peer.gets.load(Ordering::SeqCst), 1);

    group.close();
}

#[tokio::test]
async fn test_peer_hit_skips_origin() {
    let peer = Arc::new(MockPeer::default());
    peer.store
        .lock()
        .insert("k".to_string(), Bytes::from_static(b"from-peer"));

    let group = Group::builder("it-peer-hit", origin_getter())
        .with_peers(StaticPicker {
            choice: PeerChoice::Remote(peer.clone()),
        })
        .build();

    let view = group.get("k").await.unwrap();
    assert_eq!(view.as_bytes(), b"from-peer");

    let stats = group.stats();
    assert_eq!(stats.peer_hits, 1);
    assert_eq!(stats.loader_hits, 0);

    group.close();
}

#[tokio::test]
async fn test_local_ownership_short_circuits_to_origin() {
    let group = Group::builder("it-local-owner", origin_getter())
        .with_peers(StaticPicker {
            choice: PeerChoice::Local,
        })
        .build();

    let view = group.get("k").await.unwrap();
    assert_eq!(view.as_bytes(), b"origin");

    let stats = group.stats();
    assert_eq!(stats.peer_hits, 0);
    assert_eq!(stats.peer_misses, 0);
    assert_eq!(stats.loader_hits, 1);

    group.close();
}

#[tokio::test]
async fn test_write_propagation_and_loop_suppression() {
    let peer = Arc::new(MockPeer::default());
    let group = Group::builder("it-propagation", origin_getter())
        .with_peers(StaticPicker {
            choice: PeerChoice::Remote(peer.clone()),
        })
        .build();

    group.set("k", "v").unwrap();
    // Propagation is fire-and-forget; give the detached task a beat.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.sets.load(Ordering::SeqCst), 1);
    assert_eq!(
        peer.store.lock().get("k"),
        Some(&Bytes::from_static(b"v"))
    );

    // Peer-originated writes and deletes must not be propagated again.
    group.set_from_peer("k2", "v2").unwrap();
    group.delete_from_peer("k").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.sets.load(Ordering::SeqCst), 1);
    assert_eq!(peer.deletes.load(Ordering::SeqCst), 0);

    group.delete("k2").unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(peer.deletes.load(Ordering::SeqCst), 1);

    group.close();
}

#[tokio::test]
async fn test_ring_picker_routes_keys() {
    let ring = Ring::default();
    ring.add(["node-self", "node-remote"]);

    let remote = Arc::new(MockPeer {
        fail_gets: true,
        ..Default::default()
    });
    let picker = {
        let remote = Arc::clone(&remote);
        RingPicker::new(ring.clone(), "node-self", move |node: &str| {
            (node == "node-remote").then(|| remote.clone() as Arc<dyn Peer>)
        })
    };

    let group = Group::builder("it-ring-picker", origin_getter())
        .with_peers(picker)
        .build();

    for i in 0..50 {
        let view = group.get(&format!("key{i}")).await.unwrap();
        assert_eq!(view.as_bytes(), b"origin");
    }

    let stats = group.stats();
    assert_eq!(stats.loads, 50);
    assert_eq!(stats.loader_hits, 50);
    // Keys owned by the remote node tried the peer first and fell through.
    assert!(stats.peer_misses > 0);
    assert!(stats.peer_misses < 50);
    assert_eq!(peer_attempts(&remote), stats.peer_misses as usize);

    group.close();
    ring.close();
}

fn peer_attempts(peer: &MockPeer) -> usize {
    peer.gets.load(Ordering::SeqCst)
}

struct SlowOrigin {
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl Getter for SlowOrigin {
    async fn get(&self, key: &str) -> anyhow::Result<Bytes> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(Bytes::from(format!("slow-{key}")))
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_gets_are_coalesced() {
    let calls = Arc::new(AtomicUsize::new(0));
    let group = Group::builder(
        "it-singleflight",
        SlowOrigin {
            calls: Arc::clone(&calls),
        },
    )
    .build();

    let mut handles = Vec::new();
    for _ in 0..10 {
        let group = group.clone();
        handles.push(tokio::spawn(async move { group.get("hot").await }));
    }
    for handle in handles {
        let view = handle.await.unwrap().unwrap();
        assert_eq!(view.as_bytes(), b"slow-hot");
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    let stats = group.stats();
    assert_eq!(stats.loads, 10);
    assert_eq!(stats.loader_hits, 1);

    group.close();
}

#[test_log::test(tokio::test(flavor = "multi_thread"))]
async fn test_fuzzy_concurrent_workload() {
    const WORKERS: usize = 8;
    const OPS: usize = 200;
    const KEYSPACE: u32 = 100;

    let group = Group::builder("it-fuzzy", keyed_getter())
        .with_cache_options(CacheOptions {
            engine: Engine::Lru2,
            bucket_count: 8,
            cap_per_bucket: 64,
            level2_cap: 64,
            ..Default::default()
        })
        .build();

    let mut handles = Vec::new();
    for _ in 0..WORKERS {
        let group = group.clone();
        handles.push(tokio::spawn(async move {
            for _ in 0..OPS {
                // ThreadRng must not be held across an await point.
                let (key, op) = {
                    let mut rng = rand::rng();
                    (
                        format!("key{}", rng.random_range(0..KEYSPACE)),
                        rng.random_range(0..4),
                    )
                };
                match op {
                    0 => {
                        group.set(&key, format!("value-{key}")).unwrap();
                    }
                    1 => {
                        group.delete(&key).unwrap();
                    }
                    _ => {
                        // Whether served locally, or loaded from the origin,
                        // the value is always derived from the key.
                        let view = group.get(&key).await.unwrap();
                        assert_eq!(view.as_bytes(), format!("value-{key}").as_bytes());
                    }
                }
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    let stats = group.stats();
    assert!(stats.loads > 0);
    assert_eq!(stats.loader_errors, 0);

    group.close();
}
