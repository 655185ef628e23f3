//! Background Tasks Module
//!
//! Contains tasks that run alongside the cache.
//!
//! # Tasks
//! - Eviction logger: drains an eviction channel and logs each record

mod eviction_log;

pub use eviction_log::spawn_eviction_logger;
