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
use pantry_common::code::Value;

/// An immutable view over cached bytes.
///
/// Cloning is cheap and never exposes mutable access to the underlying
/// storage; callers that need an owned buffer go through [`ByteView::to_vec`],
/// which copies.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct ByteView {
    bytes: Bytes,
}

impl ByteView {
    /// Wrap an immutable byte buffer.
    pub fn new(bytes: Bytes) -> Self {
        Self { bytes }
    }

    /// Copy a slice into a new view.
    pub fn copy_from_slice(data: &[u8]) -> Self {
        Self {
            bytes: Bytes::copy_from_slice(data),
        }
    }

    /// Length of the view in bytes.
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Whether the view is empty.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Borrow the bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Defensive copy of the contents.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.to_vec()
    }

    /// The contents as a lossy UTF-8 string.
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }

    /// Unwrap into the shared byte buffer.
    pub fn into_bytes(self) -> Bytes {
        self.bytes
    }
}

impl std::fmt::Debug for ByteView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ByteView").field("len", &self.len()).finish()
    }
}

impl AsRef<[u8]> for ByteView {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl From<Bytes> for ByteView {
    fn from(bytes: Bytes) -> Self {
        Self::new(bytes)
    }
}

impl From<Vec<u8>> for ByteView {
    fn from(data: Vec<u8>) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<&[u8]> for ByteView {
    fn from(data: &[u8]) -> Self {
        Self::copy_from_slice(data)
    }
}

impl From<String> for ByteView {
    fn from(data: String) -> Self {
        Self::new(Bytes::from(data))
    }
}

impl From<&str> for ByteView {
    fn from(data: &str) -> Self {
        Self::copy_from_slice(data.as_bytes())
    }
}

impl Value for ByteView {
    fn weight(&self) -> usize {
        self.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_view() {
        let view = ByteView::from("hello");
        assert_eq!(view.len(), 5);
        assert_eq!(view.as_bytes(), b"hello");
        assert_eq!(view.to_vec(), b"hello".to_vec());
        assert_eq!(view.to_string_lossy(), "hello");
        assert_eq!(view.weight(), 5);
        assert!(!view.is_empty());
        assert!(ByteView::default().is_empty());
    }

    #[test]
    fn test_defensive_copy() {
        let view = ByteView::from("abc");
        let mut copy = view.to_vec();
        copy[0] = b'x';
        assert_eq!(view.as_bytes(), b"abc");
    }

    #[test]
    fn test_clone_shares_storage() {
        let view = ByteView::from(vec![0u8; 1024]);
        let clone = view.clone();
        assert_eq!(view, clone);
        assert_eq!(clone.len(), 1024);
    }
}
