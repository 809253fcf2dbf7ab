//! Recency index over cache keys.
//!
//! A doubly linked list whose nodes live in a slab and are linked by index, plus a side index
//! from key to node. This gives O(1) "mark most recently used" and O(1) "remove least recently
//! used" without any pointer juggling.
//!
//! ```text
//!   head (MRU) ─► [k3] ◄──► [k1] ◄──► [k2] ◄── tail (LRU)
//! ```

use std::hash::Hash;

use rustc_hash::FxHashMap;

#[derive(Debug)]
struct Node<K> {
    key: K,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug)]
pub(crate) struct RecencyList<K> {
    nodes: Vec<Option<Node<K>>>,
    free: Vec<usize>,
    index: FxHashMap<K, usize>,
    head: Option<usize>,
    tail: Option<usize>,
}

impl<K> Default for RecencyList<K> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: FxHashMap::default(),
            head: None,
            tail: None,
        }
    }
}

impl<K: Clone + Eq + Hash> RecencyList<K> {
    /// Marks `key` as the most recently used one, inserting it if necessary.
    pub fn touch(&mut self, key: K) {
        if let Some(&slot) = self.index.get(&key) {
            if self.head != Some(slot) {
                self.unlink(slot);
                self.link_front(slot);
            }
            return;
        }

        let node = Node {
            key: key.clone(),
            prev: None,
            next: None,
        };
        let slot = match self.free.pop() {
            Some(slot) => {
                self.nodes[slot] = Some(node);
                slot
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.index.insert(key, slot);
        self.link_front(slot);
    }

    /// Removes and returns the least recently used key.
    pub fn pop_lru(&mut self) -> Option<K> {
        let slot = self.tail?;
        self.unlink(slot);
        let node = self.nodes[slot].take()?;
        self.free.push(slot);
        self.index.remove(&node.key);
        Some(node.key)
    }

    /// Forgets about `key`, if it is known.
    pub fn remove(&mut self, key: &K) {
        let Some(slot) = self.index.remove(key) else {
            return;
        };
        self.unlink(slot);
        self.nodes[slot] = None;
        self.free.push(slot);
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    fn node_mut(&mut self, slot: usize) -> &mut Node<K> {
        match self.nodes[slot].as_mut() {
            Some(node) => node,
            None => unreachable!("recency index points to a free slot"),
        }
    }

    fn unlink(&mut self, slot: usize) {
        let (prev, next) = {
            let node = self.node_mut(slot);
            (node.prev.take(), node.next.take())
        };
        match prev {
            Some(prev) => self.node_mut(prev).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => self.node_mut(next).prev = prev,
            None => self.tail = prev,
        }
    }

    fn link_front(&mut self, slot: usize) {
        let old_head = self.head;
        {
            let node = self.node_mut(slot);
            node.prev = None;
            node.next = old_head;
        }
        match old_head {
            Some(old_head) => self.node_mut(old_head).prev = Some(slot),
            None => self.tail = Some(slot),
        }
        self.head = Some(slot);
    }
}
