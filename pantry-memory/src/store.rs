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

use std::time::{Duration, SystemTime};

use pantry_common::code::Value;

/// The contract shared by the interchangeable store engines.
///
/// Operations never fail: writes always succeed, evicting older entries as
/// needed. Expired entries are observed as misses and reclaimed by the
/// engine's background sweeper.
pub trait Store<V>: Send + Sync + 'static
where
    V: Value,
{
    /// Get a value, refreshing its recency.
    fn get(&self, key: &str) -> Option<V>;

    /// Set a value without expiration.
    ///
    /// A value with zero weight deletes the key.
    fn set(&self, key: &str, value: V);

    /// Set a value with an optional TTL.
    ///
    /// `None` (or a zero TTL) means the entry never expires. A value with
    /// zero weight deletes the key.
    fn set_with_expiration(&self, key: &str, value: V, ttl: Option<Duration>);

    /// Delete a key. Returns whether an entry was removed.
    fn delete(&self, key: &str) -> bool;

    /// Drop every entry, notifying the removal listener.
    fn clear(&self);

    /// Number of live entries.
    fn len(&self) -> usize;

    /// Whether the store holds no live entries.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Bytes currently accounted to live entries (key + value weights).
    fn used_bytes(&self) -> usize;

    /// The capacity bound in bytes. Zero means unbounded.
    fn max_bytes(&self) -> usize;

    /// Update the capacity bound, evicting down to it immediately.
    ///
    /// Engines with slot-based capacity ignore this.
    fn set_max_bytes(&self, max_bytes: usize);

    /// Get a value together with its remaining TTL, without refreshing
    /// recency. `None` TTL means the entry never expires.
    fn get_with_expiration(&self, key: &str) -> Option<(V, Option<Duration>)>;

    /// The wall-clock deadline of a key, if it has one.
    fn get_expiration(&self, key: &str) -> Option<SystemTime>;

    /// Replace the TTL of an existing key. `None` (or zero) clears it.
    ///
    /// Returns `false` if the key is absent.
    fn update_expiration(&self, key: &str, ttl: Option<Duration>) -> bool;

    /// Stop the background sweeper. Safe to call more than once.
    fn close(&self);
}
