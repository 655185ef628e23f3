//! Cache Entry Module
//!
//! Defines the record held for each resident key.

use chrono::{DateTime, Utc};

// == Cache Entry ==
/// Represents a single cached mapping with its access metadata.
#[derive(Debug, Clone)]
pub struct CacheEntry<K, V> {
    /// The key, unique within the cache
    pub key: K,
    /// The stored value
    pub value: V,
    /// Time of the last read or write touch
    pub last_access: DateTime<Utc>,
}

impl<K, V> CacheEntry<K, V> {
    // == Constructor ==
    /// Creates a new entry stamped with the current time.
    pub fn new(key: K, value: V) -> Self {
        Self {
            key,
            value,
            last_access: Utc::now(),
        }
    }

    // == Touch ==
    /// Refreshes the access timestamp.
    ///
    /// Only used for observability; recency ordering is positional.
    pub fn touch(&mut self) {
        self.last_access = Utc::now();
    }

    // == Replace ==
    /// Swaps in a new value and refreshes the timestamp, returning the old value.
    pub fn replace(&mut self, value: V) -> V {
        self.touch();
        std::mem::replace(&mut self.value, value)
    }

    /// Splits the entry into its key and value.
    pub fn into_pair(self) -> (K, V) {
        (self.key, self.value)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_entry_creation() {
        let before = Utc::now();
        let entry = CacheEntry::new("k", 1);

        assert_eq!(entry.key, "k");
        assert_eq!(entry.value, 1);
        assert!(entry.last_access >= before);
    }

    #[test]
    fn test_entry_touch_advances_timestamp() {
        let mut entry = CacheEntry::new("k", 1);
        let first = entry.last_access;

        sleep(Duration::from_millis(5));
        entry.touch();

        assert!(entry.last_access > first);
    }

    #[test]
    fn test_entry_replace() {
        let mut entry = CacheEntry::new("k", "old");
        let first = entry.last_access;

        sleep(Duration::from_millis(5));
        let old = entry.replace("new");

        assert_eq!(old, "old");
        assert_eq!(entry.value, "new");
        assert!(entry.last_access > first);
    }

    #[test]
    fn test_entry_into_pair() {
        let entry = CacheEntry::new("k".to_string(), 9);
        assert_eq!(entry.into_pair(), ("k".to_string(), 9));
    }
}
