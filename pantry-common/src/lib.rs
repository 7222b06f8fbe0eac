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

//! Shared components for the pantry crates.

/// Timestamp and TTL helpers.
pub mod clock;
/// Value contract for cached entries.
pub mod code;
/// Removal events and listeners.
pub mod event;
/// String hashes used for bucket and ring routing.
pub mod hasher;
