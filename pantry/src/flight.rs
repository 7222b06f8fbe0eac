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

use std::{fmt::Debug, future::Future, panic::AssertUnwindSafe, sync::Arc};

use futures::FutureExt;
use hashbrown::{hash_map::EntryRef, HashMap};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{Error, Result};

type Notifier<V> = oneshot::Sender<Result<V>>;

/// Collapses concurrent loads for the same key into one execution.
///
/// The first caller for a key becomes the leader and runs the supplied
/// future on a detached task; callers arriving while the load is in flight
/// wait for the leader's outcome instead of starting their own. The call
/// record is removed as soon as the execution completes, so a caller
/// arriving after completion starts a fresh load.
///
/// Cancellation is not supported: once a load begins, every caller observes
/// its outcome, even if the leader's own task is dropped mid-wait.
pub struct Flight<V> {
    calls: Arc<Mutex<HashMap<String, Vec<Notifier<V>>>>>,
}

impl<V> Default for Flight<V> {
    fn default() -> Self {
        Self {
            calls: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

impl<V> Debug for Flight<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flight")
            .field("in_flight", &self.calls.lock().len())
            .finish()
    }
}

impl<V> Flight<V>
where
    V: Clone + Send + 'static,
{
    /// Create an empty coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `fut` for `key`, sharing the outcome with every concurrent caller.
    pub async fn run<F>(&self, key: &str, fut: F) -> Result<V>
    where
        F: Future<Output = Result<V>> + Send + 'static,
    {
        let waiter = {
            let mut calls = self.calls.lock();
            match calls.entry_ref(key) {
                EntryRef::Occupied(mut o) => {
                    let (tx, rx) = oneshot::channel();
                    o.get_mut().push(tx);
                    Some(rx)
                }
                EntryRef::Vacant(v) => {
                    v.insert(Vec::new());
                    None
                }
            }
        };

        if let Some(rx) = waiter {
            return match rx.await {
                Ok(result) => result,
                Err(_) => Err(Error::load(
                    key,
                    anyhow::anyhow!("in-flight load abandoned"),
                )),
            };
        }

        let calls = Arc::clone(&self.calls);
        let owned = key.to_string();
        let handle = tokio::spawn(async move {
            // A panicking loader must still release the call record, or every
            // later caller for this key would wait forever.
            let result = match AssertUnwindSafe(fut).catch_unwind().await {
                Ok(result) => result,
                Err(_) => Err(Error::load(owned.clone(), anyhow::anyhow!("load panicked"))),
            };

            let notifiers = calls.lock().remove(&owned).unwrap_or_default();
            for notifier in notifiers {
                let _ = notifier.send(result.clone());
            }
            result
        });

        match handle.await {
            Ok(result) => result,
            Err(err) => Err(Error::load(key, anyhow::anyhow!("load task failed: {err}"))),
        }
    }
}
