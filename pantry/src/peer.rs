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

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bytes::Bytes;

/// A remote node participating in the cluster.
///
/// Implementations live in the RPC transport. A transport client used for
/// write propagation must mark its `set`/`delete` requests as
/// peer-originated on the wire, so the receiving server routes them through
/// the group's `*_from_peer` entry points and no propagation loop forms.
#[async_trait]
pub trait Peer: Send + Sync + 'static {
    /// Fetch a value from the peer's group.
    async fn get(&self, group: &str, key: &str) -> anyhow::Result<Bytes>;

    /// Store a value in the peer's group.
    async fn set(&self, group: &str, key: &str, value: Bytes) -> anyhow::Result<()>;

    /// Delete a key from the peer's group. Returns whether it existed.
    async fn delete(&self, group: &str, key: &str) -> anyhow::Result<bool>;
}

/// Outcome of routing a key to its owning peer.
#[derive(Clone)]
pub enum PeerChoice {
    /// No peer is available for the key (ring empty or peers unconfigured);
    /// the caller loads locally.
    None,
    /// The local node owns the key; the caller short-circuits to the origin.
    Local,
    /// A remote peer owns the key.
    Remote(Arc<dyn Peer>),
}

impl Debug for PeerChoice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "None"),
            Self::Local => write!(f, "Local"),
            Self::Remote(_) => write!(f, "Remote"),
        }
    }
}

/// Routes keys to the peers that own them.
pub trait PeerPicker: Send + Sync + 'static {
    /// Pick the peer owning `key`.
    fn pick_peer(&self, key: &str) -> PeerChoice;
}
