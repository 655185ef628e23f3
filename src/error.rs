//! Error types for the cache
//!
//! Provides unified error handling using thiserror.

use thiserror::Error;

// == Cache Error Enum ==
/// Unified error type for the cache.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    /// Capacity (or another construction parameter) is not acceptable
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Unexpected failure inside a get/put/evict sequence
    #[error("Internal fault: {0}")]
    InternalFault(String),
}

impl CacheError {
    /// Builds an `InternalFault` from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic".to_string()
        };
        CacheError::InternalFault(format!("panic: {}", message))
    }
}

// == Result Type Alias ==
/// Convenience Result type for the cache.
pub type Result<T> = std::result::Result<T, CacheError>;
