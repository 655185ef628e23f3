//! Cache Module
//!
//! Bounded LRU cache with ordered eviction notifications.

mod engine;
mod entry;
mod eviction;
mod lru;
mod stats;
mod store;


// Re-export public types
pub use engine::LruCache;
pub(crate) use entry::CacheEntry;
pub use eviction::{Eviction, EvictionObserver, SubscriptionId};
pub(crate) use lru::{Handle, RecencyList};
pub use stats::CacheStats;
pub(crate) use store::LruStore;
