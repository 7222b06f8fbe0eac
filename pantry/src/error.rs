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

use std::sync::Arc;

/// Group cache error.
///
/// The type is `Clone` so that every caller coalesced into one in-flight
/// load can observe the same failure; load errors share their cause through
/// an `Arc`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum Error {
    /// The operation requires a non-empty key.
    #[error("key is required")]
    KeyRequired,
    /// `set` requires a non-empty value.
    #[error("value is required")]
    ValueRequired,
    /// The group has been closed.
    #[error("cache group is closed")]
    GroupClosed,
    /// The origin loader failed for a key.
    #[error("failed to load key {key:?}: {source}")]
    Load {
        /// The key that failed to load.
        key: String,
        /// The loader's error.
        source: Arc<anyhow::Error>,
    },
}

impl Error {
    pub(crate) fn load(key: impl Into<String>, source: anyhow::Error) -> Self {
        Self::Load {
            key: key.into(),
            source: Arc::new(source),
        }
    }
}

/// Result type for group operations.
pub type Result<T> = std::result::Result<T, Error>;
