//! Slab-backed recency list
//!
//! Doubly-linked list over a `Vec` slab with index links. Front is the
//! least-recently-used entry, back is the most-recently-used. Push, unlink,
//! and move-to-back are all O(1); vacated slots are recycled.

/// Stable handle to a node in the list
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId(u32);

struct Node<T> {
    value: T,
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

pub struct RecencyList<T> {
    slots: Vec<Option<Node<T>>>,
    free: Vec<u32>,
    head: Option<SlotId>,
    tail: Option<SlotId>,
    len: usize,
}

impl<T> RecencyList<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            head: None,
            tail: None,
            len: 0,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Append at the most-recently-used end
    pub fn push_back(&mut self, value: T) -> SlotId {
        let idx = self.alloc(value);

        if let Some(old_tail) = self.tail {
            self.link_next(old_tail, Some(idx));
            self.link_prev(idx, Some(old_tail));
        } else {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
        self.len += 1;
        idx
    }

    /// Unlink a node and hand back its value
    pub fn remove(&mut self, idx: SlotId) -> Option<T> {
        let node = self.slots.get_mut(idx.0 as usize)?.take()?;
        self.unlink(node.prev, node.next);
        self.free.push(idx.0);
        self.len -= 1;
        Some(node.value)
    }

    /// Mark a node as most recently used
    pub fn move_to_back(&mut self, idx: SlotId) {
        if self.tail == Some(idx) {
            return;
        }
        let (prev, next) = match self.node(idx) {
            Some(n) => (n.prev, n.next),
            None => return,
        };
        self.unlink(prev, next);

        let old_tail = self.tail;
        if let Some(t) = old_tail {
            self.link_next(t, Some(idx));
        }
        if let Some(node) = self.node_mut(idx) {
            node.prev = old_tail;
            node.next = None;
        }
        if self.head.is_none() {
            self.head = Some(idx);
        }
        self.tail = Some(idx);
    }

    /// Least-recently-used node
    pub fn front(&self) -> Option<(SlotId, &T)> {
        let idx = self.head?;
        self.node(idx).map(|n| (idx, &n.value))
    }

    pub fn get(&self, idx: SlotId) -> Option<&T> {
        self.node(idx).map(|n| &n.value)
    }

    pub fn get_mut(&mut self, idx: SlotId) -> Option<&mut T> {
        self.node_mut(idx).map(|n| &mut n.value)
    }

    /// Iterate from least to most recently used
    pub fn iter(&self) -> Iter<'_, T> {
        Iter {
            list: self,
            current: self.head,
        }
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.free.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    fn alloc(&mut self, value: T) -> SlotId {
        let node = Node {
            value,
            prev: None,
            next: None,
        };
        match self.free.pop() {
            Some(free) => {
                self.slots[free as usize] = Some(node);
                SlotId(free)
            }
            None => {
                self.slots.push(Some(node));
                SlotId((self.slots.len() - 1) as u32)
            }
        }
    }

    /// Splice the neighbours of a node together
    fn unlink(&mut self, prev: Option<SlotId>, next: Option<SlotId>) {
        match prev {
            Some(p) => self.link_next(p, next),
            None => self.head = next,
        }
        match next {
            Some(n) => self.link_prev(n, prev),
            None => self.tail = prev,
        }
    }

    fn link_next(&mut self, idx: SlotId, next: Option<SlotId>) {
        if let Some(node) = self.node_mut(idx) {
            node.next = next;
        }
    }

    fn link_prev(&mut self, idx: SlotId, prev: Option<SlotId>) {
        if let Some(node) = self.node_mut(idx) {
            node.prev = prev;
        }
    }

    #[inline]
    fn node(&self, idx: SlotId) -> Option<&Node<T>> {
        self.slots.get(idx.0 as usize)?.as_ref()
    }

    #[inline]
    fn node_mut(&mut self, idx: SlotId) -> Option<&mut Node<T>> {
        self.slots.get_mut(idx.0 as usize)?.as_mut()
    }
}

impl<T> Default for RecencyList<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Iter<'a, T> {
    list: &'a RecencyList<T>,
    current: Option<SlotId>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let idx = self.current?;
        let node = self.list.node(idx)?;
        self.current = node.next;
        Some((idx, &node.value))
    }
}
