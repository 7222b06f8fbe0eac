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

const PREV: usize = 0;
const NEXT: usize = 1;

struct Slot<T> {
    data: Option<T>,
    link: [usize; 2],
}

/// Index-linked doubly linked list.
///
/// Nodes live in a growable slab and are linked by index; slot 0 is the
/// sentinel, so links never dangle and steady-state operation does not
/// allocate per entry. Removed slots are recycled through a free list.
pub(crate) struct Dlist<T> {
    slots: Vec<Slot<T>>,
    free: Vec<usize>,
    len: usize,
}

impl<T> Dlist<T> {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot {
                data: None,
                link: [0, 0],
            }],
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the back and return the slot index.
    pub fn push_back(&mut self, data: T) -> usize {
        let idx = match self.free.pop() {
            Some(idx) => {
                self.slots[idx].data = Some(data);
                idx
            }
            None => {
                self.slots.push(Slot {
                    data: Some(data),
                    link: [0, 0],
                });
                self.slots.len() - 1
            }
        };
        self.link_back(idx);
        self.len += 1;
        idx
    }

    /// Detach a slot and recycle it.
    pub fn remove(&mut self, idx: usize) -> Option<T> {
        let data = self.slots[idx].data.take()?;
        self.unlink(idx);
        self.free.push(idx);
        self.len -= 1;
        Some(data)
    }

    /// Refresh recency: relink the slot at the back.
    pub fn move_to_back(&mut self, idx: usize) {
        if self.slots[idx].data.is_none() {
            return;
        }
        self.unlink(idx);
        self.link_back(idx);
    }

    /// Index of the front slot (the least recently used end).
    pub fn front(&self) -> Option<usize> {
        let head = self.slots[0].link[NEXT];
        (head != 0).then_some(head)
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots[idx].data.as_ref()
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots[idx].data.as_mut()
    }

    /// Iterate front to back.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> + '_ {
        let mut cur = self.slots[0].link[NEXT];
        std::iter::from_fn(move || {
            if cur == 0 {
                return None;
            }
            let idx = cur;
            cur = self.slots[idx].link[NEXT];
            self.slots[idx].data.as_ref().map(|data| (idx, data))
        })
    }

    fn link_back(&mut self, idx: usize) {
        let tail = self.slots[0].link[PREV];
        self.slots[idx].link = [tail, 0];
        self.slots[tail].link[NEXT] = idx;
        self.slots[0].link[PREV] = idx;
    }

    fn unlink(&mut self, idx: usize) {
        let [prev, next] = self.slots[idx].link;
        self.slots[prev].link[NEXT] = next;
        self.slots[next].link[PREV] = prev;
    }
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;

    fn dump(list: &Dlist<u64>) -> Vec<u64> {
        list.iter().map(|(_, v)| *v).collect_vec()
    }

    #[test]
    fn test_push_remove() {
        let mut list = Dlist::new();
        let a = list.push_back(1);
        let b = list.push_back(2);
        let c = list.push_back(3);
        assert_eq!(dump(&list), vec![1, 2, 3]);
        assert_eq!(list.len(), 3);

        assert_eq!(list.remove(b), Some(2));
        assert_eq!(dump(&list), vec![1, 3]);
        assert_eq!(list.remove(b), None);

        // The freed slot is recycled.
        let d = list.push_back(4);
        assert_eq!(d, b);
        assert_eq!(dump(&list), vec![1, 3, 4]);

        assert_eq!(list.remove(a), Some(1));
        assert_eq!(list.remove(c), Some(3));
        assert_eq!(list.remove(d), Some(4));
        assert!(list.is_empty());
        assert_eq!(list.front(), None);
    }

    #[test]
    fn test_move_to_back() {
        let mut list = Dlist::new();
        let a = list.push_back(1);
        let _b = list.push_back(2);
        let c = list.push_back(3);

        list.move_to_back(a);
        assert_eq!(dump(&list), vec![2, 3, 1]);
        assert_eq!(list.front(), Some(2));

        // Moving the back slot is a no-op.
        list.move_to_back(a);
        assert_eq!(dump(&list), vec![2, 3, 1]);

        list.move_to_back(c);
        assert_eq!(dump(&list), vec![2, 1, 3]);
    }
}
