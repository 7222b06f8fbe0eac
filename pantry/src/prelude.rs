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

//! Re-exports of the most commonly used types.

pub use pantry_common::{
    code::Value,
    event::{Event, EventListener},
};

pub use crate::{
    destroy_all_groups, destroy_group, get_group, list_groups, ByteView, Cache, CacheOptions,
    CacheStats, Engine, Error, Flight, Getter, GetterFn, Group, GroupBuilder, GroupStats, HashFn,
    Peer, PeerChoice, PeerPicker, Result, Ring, RingConfig, RingPicker, Store,
};
