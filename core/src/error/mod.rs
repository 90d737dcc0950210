//! Error types for the cache/query/mutation engine.

pub mod cache;

pub use cache::{CacheError, ValidationError};

/// Result type alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type returned by `Store`, `Query`, `Mutation`, `OfflineQueue`, and
/// `Registry` operations.
///
/// `FetcherError` is the one variant that is not generic: the engine only needs to know
/// that a user-supplied fetcher or mutation handler failed, not the concrete error type,
/// so it is boxed as `dyn std::error::Error`.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input failed validation before any state was mutated.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// The operation was cancelled cooperatively; this variant is never surfaced to user
    /// `onError` callbacks, only used internally to short-circuit a fetch in flight.
    #[error("operation cancelled")]
    Cancelled,

    /// A per-fetch timeout or a per-key lock acquisition timeout elapsed.
    #[error("timed out: {0}")]
    Timeout(String),

    /// The circuit breaker guarding this key's fetcher is open; the call failed fast.
    #[error("circuit breaker open")]
    CircuitOpen,

    /// A user-supplied fetcher or mutation handler returned an error.
    #[error("fetcher failed: {0}")]
    Fetcher(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// A persistence provider operation (write/read/remove) failed. These are logged and
    /// swallowed by the store; in-memory correctness is unaffected.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A persisted entry could not be decoded and was removed from disk.
    #[error("failed to decode persisted entry '{key}': {reason}")]
    Decode {
        /// The cache key whose persisted record was unreadable.
        key: String,
        /// The underlying decode failure.
        reason: String,
    },

    /// Reconstructing the Registry/Client with a different configuration without an
    /// explicit reset. Fatal misuse; the caller must reset first.
    #[error("configuration conflict: {0}")]
    ConfigurationConflict(String),

    /// Internal cache bookkeeping error (serialization, eviction, configuration).
    #[error("{0}")]
    Cache(#[from] CacheError),
}

impl Error {
    /// Construct a [`Error::Fetcher`] from any boxed, send+sync error.
    pub fn fetcher<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Fetcher(Box::new(err))
    }

    /// Whether a failed operation carrying this error should be retried with backoff.
    ///
    /// Used by [`crate::retry::RetryPolicy`] and the circuit breaker to decide whether a
    /// failure counts toward the failure threshold.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        match self {
            Error::Timeout(_) | Error::CircuitOpen | Error::Fetcher(_) => true,
            Error::Cache(cache_err) => matches!(
                cache_err,
                CacheError::EvictionFailed { .. } | CacheError::SerializationFailed { .. }
            ),
            Error::Validation(_)
            | Error::Cancelled
            | Error::Persistence(_)
            | Error::Decode { .. }
            | Error::ConfigurationConflict(_) => false,
        }
    }

    /// True for [`Error::Cancelled`] — call sites use this to confirm a cancellation is
    /// never mistakenly forwarded to a user `onError` callback.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }

    /// True if this is a [`Error::Cache`] variant.
    #[must_use]
    pub fn is_cache_error(&self) -> bool {
        matches!(self, Error::Cache(_))
    }

    /// Get the [`CacheError`] if this is one.
    #[must_use]
    pub fn as_cache_error(&self) -> Option<&CacheError> {
        match self {
            Error::Cache(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_is_not_recoverable() {
        let err: Error = ValidationError::InvalidKey {
            key: "".to_string(),
            reason: "empty".to_string(),
        }
        .into();
        assert!(!err.is_recoverable());
    }

    #[test]
    fn cache_error_from_conversion() {
        let err: Error = CacheError::EvictionFailed {
            reason: "all referenced".to_string(),
        }
        .into();
        assert!(err.is_cache_error());
        assert!(err.is_recoverable());
    }

    #[test]
    fn fetcher_helper_boxes_any_error() {
        #[derive(Debug, thiserror::Error)]
        #[error("boom")]
        struct Boom;

        let err = Error::fetcher(Boom);
        assert!(matches!(err, Error::Fetcher(_)));
        assert!(err.is_recoverable());
    }

    #[test]
    fn cancelled_is_never_recoverable_or_reported() {
        let err = Error::Cancelled;
        assert!(err.is_cancelled());
        assert!(!err.is_recoverable());
    }
}
