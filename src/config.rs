//! Configuration Module
//!
//! Handles loading cache configuration from environment variables.

use std::env;
use std::num::NonZeroUsize;

use crate::error::{CacheError, Result};

/// Capacity used when `CACHE_CAPACITY` is not set.
pub const DEFAULT_CAPACITY: NonZeroUsize = match NonZeroUsize::new(1000) {
    Some(capacity) => capacity,
    None => unreachable!(),
};

/// Cache configuration parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    capacity: NonZeroUsize,
}

impl Config {
    /// Creates a Config with an already validated capacity.
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self { capacity }
    }

    /// Creates a new Config by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `CACHE_CAPACITY` - Maximum number of resident entries (default: 1000)
    ///
    /// # Errors
    /// `InvalidConfiguration` when `CACHE_CAPACITY` is set but is not a
    /// positive integer.
    pub fn from_env() -> Result<Self> {
        match env::var("CACHE_CAPACITY") {
            Ok(raw) => Self::from_capacity_str(&raw),
            Err(_) => Ok(Self::default()),
        }
    }

    /// Parses a capacity the way `from_env` does.
    pub fn from_capacity_str(raw: &str) -> Result<Self> {
        let parsed: i64 = raw.trim().parse().map_err(|_| {
            CacheError::InvalidConfiguration(format!(
                "capacity must be a positive integer, got {:?}",
                raw
            ))
        })?;
        Ok(Self::new(validate_capacity(parsed)?))
    }

    /// Maximum number of entries the cache can hold.
    pub fn capacity(&self) -> NonZeroUsize {
        self.capacity
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
        }
    }
}

// == Capacity Validation ==
/// Accepts only strictly positive capacities.
pub fn validate_capacity(raw: i64) -> Result<NonZeroUsize> {
    usize::try_from(raw)
        .ok()
        .and_then(NonZeroUsize::new)
        .ok_or_else(|| {
            CacheError::InvalidConfiguration(format!(
                "capacity must be greater than zero, got {}",
                raw
            ))
        })
}
