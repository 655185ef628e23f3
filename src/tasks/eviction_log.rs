//! Eviction Logger Task
//!
//! Background task that logs every eviction received from
//! [`LruCache::subscribe_channel`](crate::cache::LruCache::subscribe_channel).

use std::fmt::Debug;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::cache::Eviction;

/// Spawns a task that drains an eviction channel and logs each record.
///
/// The task ends once every sender is gone, i.e. when the cache that owns the
/// subscription is dropped.
///
/// # Returns
/// A JoinHandle resolving to the number of evictions seen.
///
/// # Example
/// ```ignore
/// let cache = LruCache::<String, String>::new(100)?;
/// let logger = spawn_eviction_logger(cache.subscribe_channel());
/// // Later, during shutdown:
/// drop(cache);
/// let seen = logger.await?;
/// ```
pub fn spawn_eviction_logger<K, V>(mut rx: UnboundedReceiver<Eviction<K, V>>) -> JoinHandle<u64>
where
    K: Debug + Send + 'static,
    V: Send + 'static,
{
    tokio::spawn(async move {
        info!("Starting eviction logger task");

        let mut seen = 0u64;
        while let Some(eviction) = rx.recv().await {
            seen += 1;
            info!(
                key = ?eviction.key,
                sequence = eviction.sequence,
                evicted_at = %eviction.evicted_at,
                "Eviction delivered"
            );
        }

        debug!("Eviction channel closed after {} records", seen);
        seen
    })
}
