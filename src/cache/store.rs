//! Cache Store Module
//!
//! Single-threaded core combining the key index with the recency list.
//!
//! The index maps each key to a [`Handle`] in the recency list; the list owns
//! the entries. Callers synchronise access (see [`crate::cache::LruCache`]).

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;

use ahash::RandomState;
use chrono::{DateTime, Utc};
use tracing::warn;

use crate::cache::{CacheEntry, CacheStats, Eviction, Handle, RecencyList};
use crate::error::{CacheError, Result};

// == LRU Store ==
/// Key index plus recency order with a fixed entry-count capacity.
#[derive(Debug)]
pub struct LruStore<K, V> {
    /// Key to arena handle
    entries: HashMap<K, Handle, RandomState>,
    /// LRU (head) to MRU (tail)
    order: RecencyList<K, V>,
    /// Performance statistics
    stats: CacheStats,
    capacity: NonZeroUsize,
}

impl<K, V> LruStore<K, V>
where
    K: Hash + Eq + Clone,
{
    // == Constructor ==
    /// Creates an empty store that holds at most `capacity` entries.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: HashMap::with_capacity_and_hasher(capacity.get(), RandomState::new()),
            order: RecencyList::with_capacity(capacity.get()),
            stats: CacheStats::new(capacity.get()),
            capacity,
        }
    }

    // == Get ==
    /// Looks up a key and marks it most recently used.
    ///
    /// A miss leaves ordering and size untouched.
    pub fn get(&mut self, key: &K) -> Result<Option<V>>
    where
        V: Clone,
    {
        let Some(&handle) = self.entries.get(key) else {
            self.stats.record_miss();
            return Ok(None);
        };

        let value = match self.order.get(handle) {
            Some(entry) if entry.key == *key => entry.value.clone(),
            _ => return Err(dangling(handle)),
        };
        self.order.touch(handle);
        self.stats.record_hit();
        Ok(Some(value))
    }

    // == Put ==
    /// Inserts or updates a key, marking it most recently used.
    ///
    /// Updating a present key never evicts. Inserting an absent key into a
    /// full store evicts exactly one entry first and hands it to `on_evict`
    /// before anything else can fail, so a fault later in the insert cannot
    /// lose the record.
    pub fn put(&mut self, key: K, value: V, on_evict: impl FnOnce(Eviction<K, V>)) -> Result<()> {
        if let Some(&handle) = self.entries.get(&key) {
            match self.order.get_mut(handle) {
                Some(entry) if entry.key == key => {
                    entry.replace(value);
                }
                _ => return Err(dangling(handle)),
            }
            self.order.touch(handle);
            return Ok(());
        }

        if self.entries.len() >= self.capacity.get() {
            on_evict(self.evict()?);
        }

        // Index first: a panicking Hash or Eq then leaves the list untouched
        let handle = self.order.vacant_handle();
        self.entries.insert(key.clone(), handle);
        let pushed = self.order.push_back(CacheEntry::new(key, value));
        debug_assert_eq!(pushed, handle);
        self.stats.set_total_entries(self.entries.len());

        Ok(())
    }

    // == Evict ==
    /// Removes the least recently used entry from both structures.
    ///
    /// The index is updated before the list, so user `Hash`/`Eq` code runs
    /// while nothing has been removed yet. Must only be called on a non-empty
    /// store.
    pub fn evict(&mut self) -> Result<Eviction<K, V>> {
        debug_assert!(!self.order.is_empty(), "evict called on an empty store");

        let oldest = self.order.peek_front().ok_or_else(|| {
            CacheError::InternalFault("evict called on an empty store".to_string())
        })?;
        if self.entries.remove(&oldest.key).is_none() {
            return Err(CacheError::InternalFault(
                "evicted node had no index entry".to_string(),
            ));
        }
        let entry = self.order.pop_front().ok_or_else(|| {
            CacheError::InternalFault("recency list emptied during evict".to_string())
        })?;

        let sequence = self.stats.record_eviction();
        self.stats.set_total_entries(self.entries.len());
        let (key, value) = entry.into_pair();
        Ok(Eviction::new(key, value, sequence))
    }

    // == Inspection ==
    /// Checks for a key without touching its recency.
    pub fn contains(&self, key: &K) -> bool {
        self.entries.contains_key(key)
    }

    /// Returns the last access time of a key without touching it.
    pub fn peek_last_access(&self, key: &K) -> Option<DateTime<Utc>> {
        let handle = *self.entries.get(key)?;
        self.order.get(handle).map(|entry| entry.last_access)
    }

    /// Keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.order.iter().map(|(_, entry)| entry.key.clone()).collect()
    }

    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    pub fn record_fault(&mut self) {
        self.stats.record_fault();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // == Invariants ==
    /// Verifies that the index and the recency list describe the same entries.
    pub fn check_invariants(&self) -> Result<()> {
        self.order.check_links()?;

        if self.entries.len() != self.order.len() {
            return Err(CacheError::InternalFault(format!(
                "index holds {} keys but recency list holds {}",
                self.entries.len(),
                self.order.len()
            )));
        }
        if self.order.len() > self.capacity.get() {
            return Err(CacheError::InternalFault(format!(
                "{} entries exceed capacity {}",
                self.order.len(),
                self.capacity
            )));
        }
        for (handle, entry) in self.order.iter() {
            if self.entries.get(&entry.key) != Some(&handle) {
                return Err(CacheError::InternalFault(
                    "recency node not referenced by index".to_string(),
                ));
            }
        }
        Ok(())
    }

    // == Repair ==
    /// Restores the invariants after a fault.
    ///
    /// The recency list owns the entries, so it is treated as the source of
    /// truth: links are rebuilt, the index is regenerated from it, duplicate
    /// keys keep their most recent node and any overflow is trimmed from the
    /// LRU end.
    pub fn repair(&mut self) {
        if self.order.check_links().is_err() {
            self.order.relink();
        }

        let nodes: Vec<(Handle, K)> = self
            .order
            .iter()
            .map(|(handle, entry)| (handle, entry.key.clone()))
            .collect();

        self.entries.clear();
        let mut dropped = 0usize;
        for (handle, key) in nodes {
            if let Some(stale) = self.entries.insert(key, handle) {
                self.order.remove(stale);
                dropped += 1;
            }
        }
        while self.order.len() > self.capacity.get() {
            if let Some(entry) = self.order.pop_front() {
                self.entries.remove(&entry.key);
                dropped += 1;
            }
        }

        if dropped > 0 {
            warn!(dropped, "Repair discarded entries");
        }
        self.stats.set_total_entries(self.entries.len());
    }

    /// Drops everything. Last resort when repair itself fails.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.order.clear();
        self.stats.set_total_entries(0);
    }
}

fn dangling(handle: Handle) -> CacheError {
    CacheError::InternalFault(format!("index points at stale node {:?}", handle))
}
