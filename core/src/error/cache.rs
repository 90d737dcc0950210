//! Validation and cache-subsystem error types.
//!
//! These are the concrete error types nested inside the top-level [`crate::error::Error`]
//! enum via `#[from]`. Keeping them as their own small enums (rather than flattening every
//! variant into `Error` directly) lets call sites match on `ValidationError` or `CacheError`
//! without pulling in the whole taxonomy.

use std::fmt;

/// Errors raised validating inputs to `Store::set`, `Query` construction, or dependency
/// registration, before any state is mutated.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    /// Key failed the `[A-Za-z0-9:_-]{1,255}` pattern.
    InvalidKey {
        /// The rejected key.
        key: String,
        /// Why it was rejected (empty, too long, bad characters).
        reason: String,
    },
    /// A duration-valued field (`staleTime`, `cacheTime`, `maxAge`, ...) was negative.
    NegativeDuration {
        /// The field name.
        field: &'static str,
    },
    /// `isSecure=true` was set without a positive `maxAge`.
    SecureWithoutMaxAge {
        /// The key being written.
        key: String,
    },
    /// Registering a dependency would create a self-loop or cycle in the parent/child graph.
    CircularDependency {
        /// The key whose registration was rejected.
        key: String,
    },
    /// `set` was called with empty or otherwise unrepresentable data.
    EmptyData {
        /// The key being written.
        key: String,
    },
    /// A cache entry's encoded size exceeds the configured per-entry or store-wide budget.
    EntryTooLarge {
        /// The cache key.
        key: String,
        /// The actual size of the entry, in bytes.
        size: usize,
        /// The maximum allowed size, in bytes.
        max_size: usize,
    },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey { key, reason } => {
                write!(f, "invalid key '{key}': {reason}")
            }
            Self::NegativeDuration { field } => {
                write!(f, "duration field '{field}' must be non-negative")
            }
            Self::SecureWithoutMaxAge { key } => {
                write!(f, "secure entry '{key}' requires a positive maxAge")
            }
            Self::CircularDependency { key } => {
                write!(f, "registering '{key}' as a dependency would create a cycle")
            }
            Self::EmptyData { key } => {
                write!(f, "entry '{key}' has no representable data")
            }
            Self::EntryTooLarge {
                key,
                size,
                max_size,
            } => {
                write!(
                    f,
                    "cache entry too large: key='{key}', size={size}, max_size={max_size}"
                )
            }
        }
    }
}

/// Errors internal to the cache store's bookkeeping: (de)serialization of persisted
/// entries, eviction, and configuration sanity.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CacheError {
    /// Failed to serialize a cache entry for persistence.
    SerializationFailed {
        /// The cache key.
        key: String,
        /// The serialization error message.
        error: String,
    },
    /// Failed to deserialize a persisted entry.
    DeserializationFailed {
        /// The cache key.
        key: String,
        /// The deserialization error message.
        error: String,
    },
    /// Eviction could not free enough space (every candidate is still referenced).
    EvictionFailed {
        /// Why eviction gave up.
        reason: String,
    },
    /// A `CacheConfig` field holds an invalid value.
    InvalidConfiguration {
        /// The configuration field that is invalid.
        field: String,
        /// The invalid value, stringified.
        value: String,
    },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SerializationFailed { key, error } => {
                write!(f, "failed to serialize cache entry '{key}': {error}")
            }
            Self::DeserializationFailed { key, error } => {
                write!(f, "failed to deserialize cache entry '{key}': {error}")
            }
            Self::EvictionFailed { reason } => {
                write!(f, "cache eviction failed: {reason}")
            }
            Self::InvalidConfiguration { field, value } => {
                write!(f, "invalid cache configuration: field='{field}', value='{value}'")
            }
        }
    }
}
