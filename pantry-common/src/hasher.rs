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

/// BKDR multiplicative string hash.
///
/// Cheap and stable across processes, which makes it suitable for routing
/// keys to shard buckets.
pub fn hash_bkrd(key: &str) -> u32 {
    key.bytes()
        .fold(0u32, |hash, b| hash.wrapping_mul(131).wrapping_add(b as u32))
}

/// Mask covering the next power of two that holds `n` slots.
///
/// `n` is rounded up to a power of two (minimum 1); the mask is that power
/// of two minus one, ready for `hash & mask` indexing.
pub fn pow2_mask(n: usize) -> u32 {
    (n.max(1).next_power_of_two() - 1) as u32
}
