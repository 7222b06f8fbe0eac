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

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Deadline marker for entries that never expire.
pub const NEVER: i64 = i64::MAX;

/// Current unix timestamp in nanoseconds.
pub fn now_unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as i64
}

/// Absolute deadline in unix nanoseconds for a TTL.
///
/// `None` and zero TTLs both mean the entry never expires.
pub fn deadline_unix_nanos(ttl: Option<Duration>) -> i64 {
    match ttl {
        Some(ttl) if !ttl.is_zero() => now_unix_nanos().saturating_add(ttl.as_nanos() as i64),
        _ => NEVER,
    }
}

/// Convert a unix-nano deadline back into a wall-clock instant.
///
/// Returns `None` for the [`NEVER`] marker.
pub fn deadline_to_system_time(deadline: i64) -> Option<SystemTime> {
    if deadline == NEVER {
        return None;
    }
    Some(UNIX_EPOCH + Duration::from_nanos(deadline.max(0) as u64))
}
