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

use bytes::Bytes;

/// The contract cached values must satisfy.
///
/// Values report their weight in bytes so the stores can account memory
/// usage. A value whose weight is zero is treated as a deletion marker by
/// the store `set` operations.
pub trait Value: Send + Sync + Clone + 'static {
    /// Weight of the value in bytes.
    fn weight(&self) -> usize;
}

impl Value for Vec<u8> {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Value for Bytes {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Value for String {
    fn weight(&self) -> usize {
        self.len()
    }
}

impl Value for &'static str {
    fn weight(&self) -> usize {
        self.len()
    }
}

macro_rules! impl_value_for_primitives {
    ($( $type:ty, )*) => {
        $(
            impl Value for $type {
                fn weight(&self) -> usize {
                    std::mem::size_of::<$type>()
                }
            }
        )*
    };
}

impl_value_for_primitives! {
    u8, u16, u32, u64,
    i8, i16, i32, i64,
}
