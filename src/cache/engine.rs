//! Cache Engine Module
//!
//! Thread-safe façade over the single-threaded store.
//!
//! Every get/put runs its whole lookup, reorder and mutate sequence under one
//! `parking_lot::Mutex`. A get reorders the recency list, so there is no
//! shared-lock fast path. Eviction notifications are queued under the lock
//! and delivered in order by the dispatcher's own thread.

use std::fmt;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver};
use tracing::{debug, error, info};

use crate::cache::eviction::{ChannelObserver, EvictionDispatcher};
use crate::cache::{CacheStats, Eviction, EvictionObserver, LruStore, SubscriptionId};
use crate::config::Config;
use crate::error::{CacheError, Result};

// == LRU Cache ==
/// Bounded, thread-safe LRU cache.
///
/// Share it between threads with `Arc<LruCache<K, V>>`.
pub struct LruCache<K, V> {
    store: Mutex<LruStore<K, V>>,
    dispatcher: EvictionDispatcher<K, V>,
    capacity: NonZeroUsize,
}

impl<K, V> LruCache<K, V>
where
    K: Hash + Eq + Clone + fmt::Debug,
    V: Clone,
{
    // == Constructors ==
    /// Creates a cache holding at most `capacity` entries.
    ///
    /// # Errors
    /// `InvalidConfiguration` if `capacity` is zero.
    pub fn new(capacity: usize) -> Result<Self> {
        let capacity = NonZeroUsize::new(capacity).ok_or_else(|| {
            CacheError::InvalidConfiguration("capacity must be greater than zero".to_string())
        })?;
        Ok(Self::with_capacity(capacity))
    }

    /// Creates a cache from an already validated capacity.
    pub fn with_capacity(capacity: NonZeroUsize) -> Self {
        debug!(capacity = capacity.get(), "LRU cache created");
        Self {
            store: Mutex::new(LruStore::new(capacity)),
            dispatcher: EvictionDispatcher::new(),
            capacity,
        }
    }

    /// Creates a cache sized by the given configuration.
    pub fn from_config(config: &Config) -> Self {
        Self::with_capacity(config.capacity())
    }

    // == Get ==
    /// Returns a clone of the value for `key` and marks it most recently used.
    ///
    /// A miss, or a contained internal fault, returns `None` and leaves the
    /// cache unchanged.
    pub fn get(&self, key: &K) -> Option<V> {
        self.with_store("get", |store| store.get(key)).flatten()
    }

    // == Put ==
    /// Inserts or updates `key`, marking it most recently used.
    ///
    /// Inserting an absent key into a full cache evicts the least recently
    /// used entry and queues its notification; observers run later on the
    /// delivery thread, never on the caller. Updating a present key never
    /// evicts. A contained internal fault makes the call a logged no-op, but
    /// an eviction that already happened is still notified.
    pub fn put(&self, key: K, value: V) {
        self.with_store("put", |store| {
            store.put(key, value, |eviction| {
                info!(key = ?eviction.key, sequence = eviction.sequence, "Evicted entry");
                self.dispatcher.enqueue(eviction);
            })
        });
    }

    // == Inspection ==
    // None of these touch recency.

    /// Returns true if `key` is resident.
    pub fn contains(&self, key: &K) -> bool {
        self.store.lock().contains(key)
    }

    /// Returns when `key` was last read or written.
    pub fn peek_last_access(&self, key: &K) -> Option<DateTime<Utc>> {
        self.store.lock().peek_last_access(key)
    }

    /// Snapshot of resident keys from least to most recently used.
    pub fn keys(&self) -> Vec<K> {
        self.store.lock().keys()
    }

    pub fn len(&self) -> usize {
        self.store.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.store.lock().is_empty()
    }

    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }

    /// Returns current cache statistics, including observer faults.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.store.lock().stats();
        stats.faults += self.dispatcher.faults();
        stats
    }

    /// Verifies the structural invariants.
    ///
    /// Holds the cache lock for the duration, so concurrent callers are paused
    /// and the check sees a quiescent state.
    pub fn check_invariants(&self) -> Result<()> {
        self.store.lock().check_invariants()
    }

    // == Subscriptions ==
    /// Registers an eviction observer.
    ///
    /// The first subscription starts the delivery thread. Evictions that
    /// happen before any observer is registered are not recorded.
    pub fn subscribe<O>(&self, observer: O) -> SubscriptionId
    where
        K: Send + 'static,
        V: Send + 'static,
        O: EvictionObserver<K, V> + 'static,
    {
        self.dispatcher.subscribe(Arc::new(observer))
    }

    /// Removes an observer. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.dispatcher.unsubscribe(id)
    }

    /// Returns a channel receiving every future eviction in order.
    ///
    /// The subscription is dropped automatically once the receiver is.
    pub fn subscribe_channel(&self) -> UnboundedReceiver<Eviction<K, V>>
    where
        K: Send + 'static,
        V: Send + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        self.dispatcher.subscribe(Arc::new(ChannelObserver::new(tx)));
        rx
    }

    pub fn observer_count(&self) -> usize {
        self.dispatcher.observer_count()
    }

    /// Blocks until every eviction that happened before this call has been
    /// delivered to the observers.
    ///
    /// Returns immediately when called from inside an observer.
    pub fn flush_notifications(&self) {
        self.dispatcher.flush();
    }

    /// Evictions queued but not yet delivered.
    pub fn pending_notifications(&self) -> usize {
        self.dispatcher.pending()
    }

    // == Fault Containment ==
    /// Runs `op` under the cache lock, containing errors and panics.
    ///
    /// On a fault the store is repaired before the lock is released and
    /// `None` is returned.
    fn with_store<T>(
        &self,
        operation: &'static str,
        op: impl FnOnce(&mut LruStore<K, V>) -> Result<T>,
    ) -> Option<T> {
        let mut store = self.store.lock();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| op(&mut store)))
            .unwrap_or_else(|payload| Err(CacheError::from_panic(payload)));

        match outcome {
            Ok(value) => Some(value),
            Err(err) => {
                error!(operation, error = %err, "Contained internal fault");
                store.record_fault();
                let repaired = panic::catch_unwind(AssertUnwindSafe(|| store.repair()));
                if repaired.is_err() {
                    error!(operation, "Repair failed, clearing cache");
                    store.clear();
                }
                None
            }
        }
    }
}

impl<K, V> fmt::Debug for LruCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LruCache")
            .field("capacity", &self.capacity)
            .field("observers", &self.dispatcher.observer_count())
            .finish_non_exhaustive()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::hash::Hasher;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn recorder<K, V>(cache: &LruCache<K, V>) -> Arc<parking_lot::Mutex<Vec<K>>>
    where
        K: Hash + Eq + Clone + fmt::Debug + Send + 'static,
        V: Clone + Send + 'static,
    {
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        cache.subscribe(move |e: &Eviction<K, V>| sink.lock().push(e.key.clone()));
        seen
    }

    #[test]
    fn test_construct_rejects_zero() {
        let result: Result<LruCache<u32, u32>> = LruCache::new(0);
        assert!(matches!(result, Err(CacheError::InvalidConfiguration(_))));
    }

    #[test]
    fn test_get_put_roundtrip() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a", 1);

        assert_eq!(cache.get(&"a"), Some(1));
        assert_eq!(cache.get(&"b"), None);
        assert_eq!(cache.len(), 1);
        assert!(!cache.is_empty());
    }

    #[test]
    fn test_lru_correctness() {
        let cache = LruCache::new(3).unwrap();
        let evicted = recorder(&cache);

        cache.put("A", 1);
        cache.put("B", 2);
        cache.put("C", 3);
        cache.get(&"A");
        cache.put("D", 4);
        cache.flush_notifications();

        assert_eq!(*evicted.lock(), vec!["B"]);
        assert!(cache.contains(&"A"));
        assert!(cache.contains(&"C"));
        assert!(cache.contains(&"D"));
        assert_eq!(cache.keys(), vec!["C", "A", "D"]);
    }

    #[test]
    fn test_update_refreshes_without_evicting() {
        let cache = LruCache::new(2).unwrap();
        let evicted = recorder(&cache);

        cache.put("a", 1);
        cache.put("b", 2);
        cache.put("a", 10);
        cache.flush_notifications();

        assert!(evicted.lock().is_empty());
        assert_eq!(cache.get(&"a"), Some(10));

        cache.put("c", 3);
        cache.flush_notifications();
        assert_eq!(*evicted.lock(), vec!["b"]);
    }

    #[test]
    fn test_miss_does_not_reorder() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a", 1);
        cache.put("b", 2);
        let before = cache.keys();

        assert_eq!(cache.get(&"zzz"), None);

        assert_eq!(cache.keys(), before);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_observer_sees_entry_already_gone() {
        let cache = Arc::new(LruCache::new(1).unwrap());
        let handle = Arc::downgrade(&cache);
        let was_resident = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = Arc::clone(&was_resident);

        // Re-entering the cache from an observer must not deadlock
        cache.subscribe(move |e: &Eviction<&'static str, u32>| {
            if let Some(cache) = handle.upgrade() {
                sink.lock().push(cache.contains(&e.key));
                cache.flush_notifications();
            }
        });

        cache.put("a", 1);
        cache.put("b", 2);
        cache.flush_notifications();

        assert_eq!(*was_resident.lock(), vec![false]);
    }

    #[test]
    fn test_unsubscribe_stops_notifications() {
        let cache = LruCache::new(1).unwrap();
        let seen = Arc::new(parking_lot::Mutex::new(0u32));
        let sink = Arc::clone(&seen);
        let id = cache.subscribe(move |_: &Eviction<u32, u32>| *sink.lock() += 1);

        cache.put(1, 1);
        cache.put(2, 2);
        cache.flush_notifications();
        assert!(cache.unsubscribe(id));
        cache.put(3, 3);
        cache.flush_notifications();

        assert_eq!(*seen.lock(), 1);
        assert_eq!(cache.observer_count(), 0);
    }

    #[test]
    fn test_peek_last_access_tracks_touches() {
        let cache = LruCache::new(2).unwrap();
        cache.put("a", 1);
        let first = cache.peek_last_access(&"a").unwrap();

        std::thread::sleep(std::time::Duration::from_millis(5));
        cache.get(&"a");

        assert!(cache.peek_last_access(&"a").unwrap() > first);
        assert!(cache.peek_last_access(&"b").is_none());
    }

    /// Key whose hash panics for one poisoned value.
    #[derive(Debug, Clone, PartialEq, Eq)]
    struct Flaky(u32);

    impl Hash for Flaky {
        fn hash<H: Hasher>(&self, state: &mut H) {
            if self.0 == 13 {
                panic!("unlucky key");
            }
            self.0.hash(state);
        }
    }

    #[test]
    fn test_internal_fault_is_contained() {
        let cache = LruCache::new(2).unwrap();
        cache.put(Flaky(1), "one");

        // Neither call propagates the panic
        cache.put(Flaky(13), "thirteen");
        assert_eq!(cache.get(&Flaky(13)), None);

        assert_eq!(cache.get(&Flaky(1)), Some("one"));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().faults, 2);
        cache.check_invariants().unwrap();

        // Still usable afterwards
        cache.put(Flaky(2), "two");
        cache.put(Flaky(3), "three");
        assert_eq!(cache.keys(), vec![Flaky(2), Flaky(3)]);
    }

    /// Key whose hash panics once the shared budget runs out.
    #[derive(Debug, Clone)]
    struct Metered {
        id: u32,
        budget: Arc<AtomicUsize>,
    }

    impl PartialEq for Metered {
        fn eq(&self, other: &Self) -> bool {
            self.id == other.id
        }
    }

    impl Eq for Metered {}

    impl Hash for Metered {
        fn hash<H: Hasher>(&self, state: &mut H) {
            if self.budget.fetch_sub(1, Ordering::SeqCst) == 0 {
                panic!("hash budget exhausted");
            }
            self.id.hash(state);
        }
    }

    #[test]
    fn test_eviction_notified_when_insert_faults() {
        let budget = Arc::new(AtomicUsize::new(usize::MAX));
        let key = |id| Metered { id, budget: Arc::clone(&budget) };
        let cache = LruCache::new(1).unwrap();
        let evicted = recorder(&cache);
        cache.put(key(1), "one");

        // Lookup and evict spend the budget; indexing key 9 panics
        budget.store(2, Ordering::SeqCst);
        cache.put(key(9), "nine");
        budget.store(usize::MAX, Ordering::SeqCst);
        cache.flush_notifications();

        let ids: Vec<u32> = evicted.lock().iter().map(|k| k.id).collect();
        assert_eq!(ids, vec![1]);
        let stats = cache.stats();
        assert_eq!(stats.evictions, 1);
        assert_eq!(stats.faults, 1);
        assert!(!cache.contains(&key(9)));
        assert!(cache.is_empty());
        cache.check_invariants().unwrap();
    }

    #[test]
    fn test_observer_panic_counts_as_fault() {
        let cache = LruCache::new(1).unwrap();
        cache.subscribe(|_: &Eviction<u32, u32>| panic!("observer failed"));

        cache.put(1, 1);
        cache.put(2, 2);
        cache.flush_notifications();

        assert_eq!(cache.get(&2), Some(2));
        assert_eq!(cache.stats().faults, 1);
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_from_config() {
        let config = Config::new(NonZeroUsize::new(5).unwrap());
        let cache: LruCache<u8, u8> = LruCache::from_config(&config);
        assert_eq!(cache.capacity().get(), 5);
    }

    #[test]
    fn test_debug_format() {
        let cache: LruCache<u8, u8> = LruCache::new(4).unwrap();
        let text = format!("{:?}", cache);
        assert!(text.contains("capacity: 4"));
    }
}
