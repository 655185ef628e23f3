//! sync_lru demo driver
//!
//! Builds a cache from the environment, logs evictions from a background
//! task and runs a short get/put scenario.

use anyhow::Context;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use sync_lru::{spawn_eviction_logger, Config, LruCache};

/// Main entry point for the demo.
///
/// # Sequence
/// 1. Initialize tracing subscriber for logging
/// 2. Load configuration from environment variables
/// 3. Create the cache and start the eviction logger task
/// 4. Fill the cache, touch one entry, overflow it
/// 5. Print statistics, drop the cache and wait for the logger to drain
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Defaults to "info" level, can be overridden with RUST_LOG env var
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sync_lru=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().context("loading configuration")?;
    info!("Configuration loaded: capacity={}", config.capacity());

    let cache: LruCache<String, usize> = LruCache::from_config(&config);
    let logger = spawn_eviction_logger(cache.subscribe_channel());

    let names = ["One", "Two", "Three"];
    for (value, name) in (1..).zip(names) {
        cache.put(name.to_string(), value);
    }

    if let Some(value) = cache.get(&"One".to_string()) {
        info!("Read One = {}", value);
    }

    // Overflow the configured capacity by exactly one entry
    let overflow = config.capacity().get().saturating_sub(names.len()) + 1;
    for i in 0..overflow {
        cache.put(format!("Extra{}", i), extra_value(i));
    }

    info!("Resident keys (LRU first): {:?}", cache.keys());
    let stats = serde_json::to_string_pretty(&cache.stats()).context("serializing stats")?;
    println!("{}", stats);

    drop(cache);
    let delivered = logger.await.context("eviction logger task failed")?;
    info!("Eviction logger drained {} records", delivered);

    Ok(())
}

/// Value stored for the `i`th overflow entry.
fn extra_value(i: usize) -> usize {
    100usize.saturating_add(i)
}
