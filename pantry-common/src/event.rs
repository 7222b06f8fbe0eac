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

/// Reason a cache entry left the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Event {
    /// Evicted to satisfy the capacity bound.
    Evict,
    /// Reclaimed after its TTL elapsed.
    Expire,
    /// Removed by an explicit delete.
    Remove,
    /// Dropped by a store-wide clear.
    Clear,
}

/// Trait for the customized removal listener.
///
/// The listener is invoked for every removal, after the store's internal
/// lock has been released.
pub trait EventListener: Send + Sync + 'static {
    /// Associated value type.
    type Value;

    /// Called when a cache entry leaves the store with the reason.
    #[allow(unused_variables)]
    fn on_leave(&self, reason: Event, key: &str, value: &Self::Value) {}
}
