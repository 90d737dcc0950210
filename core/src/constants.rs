//! Global constants for fasq-core
//!
//! Centralizes the default values named in the cache/query/mutation
//! configuration surface so they have one place to live and change.

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    // Store budgets
    pub const MAX_CACHE_SIZE_BYTES: u64 = 50 * 1024 * 1024; // 50 MiB
    pub const MAX_ENTRIES: usize = 1000;
    pub const EVICTION_TARGET_RATIO: f64 = 0.9;
    pub const DEFAULT_STALE_TIME: Duration = Duration::from_secs(0);
    pub const DEFAULT_CACHE_TIME: Duration = Duration::from_secs(5 * 60);

    // Hot-set
    pub const HOT_CACHE_SIZE: usize = 50;
    pub const PROMOTION_THRESHOLD: u64 = 3;

    // Garbage collection
    pub const GC_INTERVAL: Duration = Duration::from_secs(30);
    pub const PERSISTENCE_GC_INTERVAL: Duration = Duration::from_secs(5 * 60);
    pub const DISPOSAL_DELAY: Duration = Duration::from_secs(5);

    // Fetch / retry
    pub const MAX_RETRIES: u32 = 3;
    pub const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(1);
    pub const RETRY_BACKOFF_MULTIPLIER: f64 = 2.0;
    pub const LOCK_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

    // Performance thresholds
    pub const ISOLATE_POOL_SIZE: usize = 2;
    pub const DEFAULT_ISOLATE_THRESHOLD_BYTES: usize = 100 * 1024;
    pub const SLOW_QUERY_THRESHOLD_MS: u64 = 1000;
    pub const MEMORY_WARNING_THRESHOLD_BYTES: u64 = 10 * 1024 * 1024;

    // Circuit breaker
    pub const CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
    pub const CIRCUIT_OPEN_TIMEOUT: Duration = Duration::from_secs(30);
    pub const CIRCUIT_HALF_OPEN_TEST_PERIOD: Duration = Duration::from_secs(10);

    // Offline queue
    pub const OFFLINE_QUEUE_RETRY_CAP: u32 = 5;
    pub const OFFLINE_QUEUE_FILE_NAME: &str = "fasq_offline_queue.json";
}

/// Key validation
pub mod key {
    pub const MAX_KEY_LENGTH: usize = 255;
    pub const KEY_PATTERN: &str = r"^[A-Za-z0-9:_-]+$";
}

/// Log field names shared across spans emitted by the engine.
pub mod logging {
    pub const FIELD_KEY: &str = "key";
    pub const FIELD_CORRELATION_ID: &str = "correlation_id";
    pub const FIELD_MUTATION_TYPE: &str = "mutation_type";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        assert!(defaults::MAX_ENTRIES > 0);
        assert!(defaults::EVICTION_TARGET_RATIO > 0.0 && defaults::EVICTION_TARGET_RATIO < 1.0);
        assert!(defaults::HOT_CACHE_SIZE > 0);
        assert!(defaults::PROMOTION_THRESHOLD > 0);
    }

    #[test]
    fn key_pattern_matches_expected_charset() {
        let re = regex::Regex::new(key::KEY_PATTERN).unwrap();
        assert!(re.is_match("users:42"));
        assert!(!re.is_match("users/42"));
        assert!(!re.is_match(""));
    }
}
