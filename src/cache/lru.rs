//! Recency Order Module
//!
//! Intrusive doubly-linked list over an arena of entries.
//!
//! Nodes live in a `Vec` slot arena and are addressed by a stable [`Handle`].
//! The list runs from least recently used (head) to most recently used (tail):
//! - `push_back` inserts at the MRU end
//! - `touch` moves a node to the MRU end
//! - `pop_front` removes the LRU node
//!
//! All three are O(1). Freed slots are recycled through a free list.

use crate::cache::CacheEntry;
use crate::error::{CacheError, Result};

// == Handle ==
/// Stable index of a node in the arena.
///
/// A handle stays valid until its node is popped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle(usize);

/// Arena slot: the entry plus its neighbours.
#[derive(Debug)]
struct Node<K, V> {
    entry: CacheEntry<K, V>,
    prev: Option<usize>,
    next: Option<usize>,
}

// == Recency List ==
/// Tracks access order for LRU eviction.
#[derive(Debug)]
pub struct RecencyList<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    /// Least recently used
    head: Option<usize>,
    /// Most recently used
    tail: Option<usize>,
    free_list: Vec<usize>,
    len: usize,
}

impl<K, V> RecencyList<K, V> {
    // == Constructor ==
    /// Creates an empty list with room for `capacity` nodes.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            nodes: Vec::with_capacity(capacity),
            head: None,
            tail: None,
            free_list: Vec::new(),
            len: 0,
        }
    }

    // == Push Back ==
    /// Inserts an entry at the most recently used end.
    pub fn push_back(&mut self, entry: CacheEntry<K, V>) -> Handle {
        let node = Node {
            entry,
            prev: self.tail,
            next: None,
        };
        let idx = self.alloc_node(node);

        match self.tail {
            Some(tail_idx) => {
                if let Some(tail) = &mut self.nodes[tail_idx] {
                    tail.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        self.len += 1;

        Handle(idx)
    }

    // == Touch ==
    /// Moves a node to the most recently used end and refreshes its timestamp.
    ///
    /// Returns false if the handle does not point at a live node.
    pub fn touch(&mut self, handle: Handle) -> bool {
        let idx = handle.0;
        match self.nodes.get_mut(idx) {
            Some(Some(node)) => node.entry.touch(),
            _ => return false,
        }

        if self.tail == Some(idx) {
            return true;
        }

        self.unlink(idx);
        let old_tail = self.tail;
        if let Some(Some(node)) = self.nodes.get_mut(idx) {
            node.prev = old_tail;
            node.next = None;
        }
        match old_tail {
            Some(tail_idx) => {
                if let Some(tail) = &mut self.nodes[tail_idx] {
                    tail.next = Some(idx);
                }
            }
            None => self.head = Some(idx),
        }
        self.tail = Some(idx);
        true
    }

    // == Pop Front ==
    /// Removes and returns the least recently used entry.
    ///
    /// Returns None if the list is empty.
    pub fn pop_front(&mut self) -> Option<CacheEntry<K, V>> {
        let idx = self.head?;
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.free_list.push(idx);
        self.len -= 1;
        Some(node.entry)
    }

    // == Remove ==
    /// Unlinks and returns the entry behind a handle.
    pub fn remove(&mut self, handle: Handle) -> Option<CacheEntry<K, V>> {
        let idx = handle.0;
        if !matches!(self.nodes.get(idx), Some(Some(_))) {
            return None;
        }
        self.unlink(idx);
        let node = self.nodes[idx].take()?;
        self.free_list.push(idx);
        self.len -= 1;
        Some(node.entry)
    }

    // == Relink ==
    /// Rebuilds the links after a fault, keeping every handle stable.
    ///
    /// Nodes reachable from the head keep their relative order; live nodes
    /// that fell off the chain are appended behind them.
    pub fn relink(&mut self) {
        let mut visited = vec![false; self.nodes.len()];
        let mut order = Vec::with_capacity(self.nodes.len());

        let mut cursor = self.head;
        while let Some(idx) = cursor {
            if idx >= visited.len() || visited[idx] {
                break;
            }
            match &self.nodes[idx] {
                Some(node) => {
                    visited[idx] = true;
                    order.push(idx);
                    cursor = node.next;
                }
                None => break,
            }
        }
        for (idx, slot) in self.nodes.iter().enumerate() {
            if slot.is_some() && !visited[idx] {
                order.push(idx);
            }
        }

        for (pos, &idx) in order.iter().enumerate() {
            if let Some(node) = &mut self.nodes[idx] {
                node.prev = pos.checked_sub(1).map(|p| order[p]);
                node.next = order.get(pos + 1).copied();
            }
        }
        self.head = order.first().copied();
        self.tail = order.last().copied();
        self.len = order.len();
        self.free_list = self
            .nodes
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx)
            .collect();
    }

    /// Drops every node.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        self.head = None;
        self.tail = None;
        self.len = 0;
    }

    // == Accessors ==
    /// Returns the entry behind a handle.
    pub fn get(&self, handle: Handle) -> Option<&CacheEntry<K, V>> {
        self.nodes
            .get(handle.0)
            .and_then(|slot| slot.as_ref())
            .map(|node| &node.entry)
    }

    /// Returns the entry behind a handle mutably.
    pub fn get_mut(&mut self, handle: Handle) -> Option<&mut CacheEntry<K, V>> {
        self.nodes
            .get_mut(handle.0)
            .and_then(|slot| slot.as_mut())
            .map(|node| &mut node.entry)
    }

    /// Returns the least recently used entry without removing it.
    pub fn peek_front(&self) -> Option<&CacheEntry<K, V>> {
        self.head.and_then(|idx| self.get(Handle(idx)))
    }

    /// Handle the next `push_back` will return.
    ///
    /// Lets a caller index the handle before the node exists.
    pub fn vacant_handle(&self) -> Handle {
        Handle(self.free_list.last().copied().unwrap_or(self.nodes.len()))
    }

    /// Returns the number of linked nodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates from least to most recently used.
    ///
    /// Stops after visiting as many nodes as the arena holds, so a corrupted
    /// cycle cannot loop forever.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            list: self,
            cursor: self.head,
            remaining: self.nodes.len(),
        }
    }

    // == Structural Check ==
    /// Verifies the links: back pointers, head/tail ends and the node count.
    pub fn check_links(&self) -> Result<()> {
        let mut prev: Option<usize> = None;
        let mut cursor = self.head;
        let mut seen = 0usize;

        while let Some(idx) = cursor {
            let node = self
                .nodes
                .get(idx)
                .and_then(|slot| slot.as_ref())
                .ok_or_else(|| fault(format!("link to vacant slot {}", idx)))?;
            if node.prev != prev {
                return Err(fault(format!("broken back link at slot {}", idx)));
            }
            seen += 1;
            if seen > self.len {
                return Err(fault("more linked nodes than recorded length".to_string()));
            }
            prev = Some(idx);
            cursor = node.next;
        }

        if prev != self.tail {
            return Err(fault("tail does not match last linked node".to_string()));
        }
        if seen != self.len {
            return Err(fault(format!(
                "walked {} nodes but length is {}",
                seen, self.len
            )));
        }
        Ok(())
    }

    fn alloc_node(&mut self, node: Node<K, V>) -> usize {
        if let Some(idx) = self.free_list.pop() {
            self.nodes[idx] = Some(node);
            idx
        } else {
            self.nodes.push(Some(node));
            self.nodes.len() - 1
        }
    }

    /// Detaches a node from its neighbours, leaving its own links stale.
    fn unlink(&mut self, idx: usize) {
        let (prev, next) = match &self.nodes[idx] {
            Some(node) => (node.prev, node.next),
            None => return,
        };

        match prev {
            Some(prev_idx) => {
                if let Some(prev_node) = &mut self.nodes[prev_idx] {
                    prev_node.next = next;
                }
            }
            None => self.head = next,
        }

        match next {
            Some(next_idx) => {
                if let Some(next_node) = &mut self.nodes[next_idx] {
                    next_node.prev = prev;
                }
            }
            None => self.tail = prev,
        }
    }
}

fn fault(message: String) -> CacheError {
    CacheError::InternalFault(format!("recency list: {}", message))
}

// == Iterator ==
/// LRU to MRU iterator over `(Handle, &CacheEntry)`.
pub struct Iter<'a, K, V> {
    list: &'a RecencyList<K, V>,
    cursor: Option<usize>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (Handle, &'a CacheEntry<K, V>);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let idx = self.cursor?;
        let node = self.list.nodes.get(idx)?.as_ref()?;
        self.remaining -= 1;
        self.cursor = node.next;
        Some((Handle(idx), &node.entry))
    }
}
