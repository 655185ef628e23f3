//! sync_lru - A bounded, thread-safe LRU cache
//!
//! Evicts the least recently used entry once a fixed entry count is reached
//! and notifies observers of each eviction, in order, after the entry is gone.

pub mod cache;
pub mod config;
pub mod error;
pub mod tasks;

pub use cache::{CacheStats, Eviction, EvictionObserver, LruCache, SubscriptionId};
pub use config::Config;
pub use error::{CacheError, Result};
pub use tasks::spawn_eviction_logger;
