use std::collections::VecDeque;

/// FIFO queue whose elements may join their group ahead of the back.
///
/// A new element is inserted right after the last queued element with the
/// same key, or at the back when there is none. Elements sharing a key thus
/// leave the queue back-to-back. Line-jumping can starve elements without
/// friends, so this suits short interactive work only.
pub struct GroupedQueue<T, K: PartialEq> {
    items: VecDeque<T>,
    key: fn(&T) -> K,
}

impl<T, K: PartialEq> GroupedQueue<T, K> {
    /// Creates an empty queue grouping elements by `key`.
    pub fn new(key: fn(&T) -> K) -> Self {
        GroupedQueue {
            items: VecDeque::new(),
            key,
        }
    }

    pub fn insert(&mut self, item: T) {
        let k = (self.key)(&item);
        match self.items.iter().rposition(|i| (self.key)(i) == k) {
            Some(pos) => self.items.insert(pos + 1, item),
            None => self.items.push_back(item),
        }
    }

    pub fn front(&self) -> Option<&T> {
        self.items.front()
    }

    pub fn pop_front(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Removes and returns the elements matching `pred`, keeping the rest in order.
    pub fn remove_if<F: Fn(&T) -> bool>(&mut self, pred: F) -> Vec<T> {
        let mut removed = Vec::new();
        let mut kept = VecDeque::with_capacity(self.items.len());
        for item in self.items.drain(..) {
            if pred(&item) {
                removed.push(item);
            } else {
                kept.push_back(item);
            }
        }
        self.items = kept;
        removed
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
