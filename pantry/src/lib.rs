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

#![warn(missing_docs)]

//! A distributed in-memory group cache.
//!
//! Clients read and write byte-valued entries under named groups. Each
//! group serves hits from a local in-process store, forwards misses for
//! keys it does not own to the responsible peer, falls back to a
//! user-supplied origin loader, and propagates writes and deletes to the
//! owning peer. Peer routing uses a consistent-hash ring with
//! load-adaptive virtual nodes; duplicate concurrent loads are collapsed
//! by a single-flight coordinator.
//!
//! The RPC transport and service-registry integration live outside this
//! crate: they implement the [`Peer`] and [`PeerPicker`] contracts and
//! route peer-originated writes through the group's `*_from_peer` entry
//! points.

mod error;
mod flight;
mod group;
mod peer;
mod ring;
mod view;

/// Commonly used types, re-exported in one place.
pub mod prelude;

pub use error::{Error, Result};
pub use flight::Flight;
pub use group::{
    destroy_all_groups, destroy_group, get_group, list_groups, Getter, GetterFn, Group,
    GroupBuilder, GroupStats,
};
pub use pantry_memory::{Cache, CacheOptions, CacheStats, Engine, Store};
pub use peer::{Peer, PeerChoice, PeerPicker};
pub use ring::{HashFn, Ring, RingConfig, RingPicker};
pub use view::ByteView;
