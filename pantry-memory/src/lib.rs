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

//! In-memory store engines for pantry.
//!
//! Two interchangeable engines back the [`Cache`] facade: a bounded-bytes
//! [`lru::Lru`] with per-key TTL, and a sharded two-level [`lru2::Lru2`]
//! whose protected level gives frequently used keys a second chance under
//! scan-heavy workloads.

mod dlist;

/// The cache facade over a store engine choice.
pub mod cache;
/// Bounded-bytes LRU store.
pub mod lru;
/// Sharded two-level LRU store.
pub mod lru2;
mod store;

pub use cache::{Cache, CacheOptions, CacheStats, Engine};
pub use store::Store;
