//! Configuration structs for the store, queries, mutations, and persistence.
//!
//! Plain `#[derive(Clone, Debug)]` structs with a `Default` impl carrying the documented
//! defaults, and `with_*` builder methods where callers commonly override one field.

use crate::constants::defaults;
use std::time::Duration;

/// Eviction policy used when the store is over its size or entry-count budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EvictionPolicy {
    /// Evict the least-recently-accessed entries first.
    #[default]
    Lru,
    /// Evict the least-frequently-accessed entries first, ties broken by recency.
    Lfu,
    /// Evict the oldest-created entries first.
    Fifo,
}

/// Performance-related tuning knobs nested under [`CacheConfig`].
#[derive(Debug, Clone)]
pub struct PerformanceConfig {
    /// Capacity of the hot-set LRU.
    pub hot_cache_size: usize,
    /// Size of the worker pool used to offload heavy data transforms.
    pub isolate_pool_size: usize,
    /// Entry size, in bytes, above which a transform is offloaded to the worker pool.
    pub default_isolate_threshold_bytes: usize,
    /// Query duration, in milliseconds, above which a slow-query metric fires.
    pub slow_query_threshold_ms: u64,
    /// Store size, in bytes, above which a memory-pressure warning fires.
    pub memory_warning_threshold_bytes: u64,
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            hot_cache_size: defaults::HOT_CACHE_SIZE,
            isolate_pool_size: defaults::ISOLATE_POOL_SIZE,
            default_isolate_threshold_bytes: defaults::DEFAULT_ISOLATE_THRESHOLD_BYTES,
            slow_query_threshold_ms: defaults::SLOW_QUERY_THRESHOLD_MS,
            memory_warning_threshold_bytes: defaults::MEMORY_WARNING_THRESHOLD_BYTES,
        }
    }
}

/// Top-level cache store configuration.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum total size of all entries, in bytes, before eviction kicks in.
    pub max_cache_size: u64,
    /// Maximum number of entries before eviction kicks in.
    pub max_entries: usize,
    /// Default `staleTime` applied when a query doesn't specify one.
    pub default_stale_time: Duration,
    /// Default `cacheTime` (GC idle threshold) applied when a query doesn't specify one.
    pub default_cache_time: Duration,
    /// Which policy picks eviction candidates.
    pub eviction_policy: EvictionPolicy,
    /// Whether to react to OS/runtime memory-pressure signals by running an eager GC pass.
    pub enable_memory_pressure: bool,
    /// Performance tuning sub-config.
    pub performance: PerformanceConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_cache_size: defaults::MAX_CACHE_SIZE_BYTES,
            max_entries: defaults::MAX_ENTRIES,
            default_stale_time: defaults::DEFAULT_STALE_TIME,
            default_cache_time: defaults::DEFAULT_CACHE_TIME,
            eviction_policy: EvictionPolicy::default(),
            enable_memory_pressure: true,
            performance: PerformanceConfig::default(),
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    #[must_use]
    pub fn with_max_cache_size(mut self, max_cache_size: u64) -> Self {
        self.max_cache_size = max_cache_size;
        self
    }

    #[must_use]
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Size, in bytes, that the store should not exceed after an eviction pass settles.
    #[must_use]
    pub fn eviction_target_size(&self) -> u64 {
        (self.max_cache_size as f64 * defaults::EVICTION_TARGET_RATIO) as u64
    }
}

/// Performance knobs nested under [`QueryOptions`].
#[derive(Debug, Clone)]
pub struct QueryPerformanceOptions {
    /// Whether to record fetch-timing and hit/miss metrics for this query.
    pub enable_metrics: bool,
    /// Per-fetch timeout. `None` disables the timeout.
    pub fetch_timeout_ms: Option<u64>,
    /// Whether large results are automatically routed through the worker pool.
    pub auto_isolate: bool,
    /// Override of [`PerformanceConfig::default_isolate_threshold_bytes`] for this query.
    pub isolate_threshold: Option<usize>,
    /// Maximum retry attempts for a failed fetch.
    pub max_retries: u32,
    /// Initial backoff delay before the first retry.
    pub initial_retry_delay: Duration,
    /// Multiplier applied to the backoff delay after each retry.
    pub retry_backoff_multiplier: f64,
}

impl Default for QueryPerformanceOptions {
    fn default() -> Self {
        Self {
            enable_metrics: true,
            fetch_timeout_ms: None,
            auto_isolate: false,
            isolate_threshold: None,
            max_retries: defaults::MAX_RETRIES,
            initial_retry_delay: defaults::INITIAL_RETRY_DELAY,
            retry_backoff_multiplier: defaults::RETRY_BACKOFF_MULTIPLIER,
        }
    }
}

/// Per-query options.
#[derive(Debug, Clone)]
pub struct QueryOptions {
    /// Whether the query is allowed to run at all (disabled queries never auto-fetch).
    pub enabled: bool,
    /// Override of the store's default stale time.
    pub stale_time: Option<Duration>,
    /// Override of the store's default cache time.
    pub cache_time: Option<Duration>,
    /// Force a refetch every time a new subscriber mounts, even if the entry is fresh.
    pub refetch_on_mount: bool,
    /// Whether successful results should be written as secure (non-persisted, TTL-bound).
    pub is_secure: bool,
    /// Required when `is_secure` is set: the entry's mandatory TTL.
    pub max_age: Option<Duration>,
    /// Arbitrary metadata forwarded to observer snapshots.
    pub meta: Option<serde_json::Value>,
    /// Performance sub-options.
    pub performance: QueryPerformanceOptions,
    /// Name of a registered circuit breaker gating this query's fetcher.
    pub circuit_breaker: Option<String>,
}

impl Default for QueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: None,
            cache_time: None,
            refetch_on_mount: false,
            is_secure: false,
            max_age: None,
            meta: None,
            performance: QueryPerformanceOptions::default(),
            circuit_breaker: None,
        }
    }
}

impl QueryOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_stale_time(mut self, stale_time: Duration) -> Self {
        self.stale_time = Some(stale_time);
        self
    }

    #[must_use]
    pub fn with_cache_time(mut self, cache_time: Duration) -> Self {
        self.cache_time = Some(cache_time);
        self
    }

    #[must_use]
    pub fn secure(mut self, max_age: Duration) -> Self {
        self.is_secure = true;
        self.max_age = Some(max_age);
        self
    }
}

/// Priority for an offline-queued mutation; higher values drain first.
pub type MutationPriority = i32;

/// Per-mutation options.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    /// Whether this mutation should be durably queued instead of failing outright while
    /// the network is offline.
    pub queue_when_offline: bool,
    /// Override of the global retry count for this mutation's inline execution.
    pub max_retries: Option<u32>,
    /// Priority used to order replay within the offline queue; higher drains first.
    pub priority: MutationPriority,
    /// Arbitrary metadata forwarded to observer snapshots.
    pub meta: Option<serde_json::Value>,
}

/// Per-infinite-query options.
#[derive(Debug, Clone)]
pub struct InfiniteQueryOptions {
    /// Whether the query is allowed to auto-fetch.
    pub enabled: bool,
    /// Override of the store's default stale time.
    pub stale_time: Option<Duration>,
    /// Override of the store's default cache time.
    pub cache_time: Option<Duration>,
    /// Force a refetch of the first page every time a new subscriber mounts.
    pub refetch_on_mount: bool,
    /// Caps the number of retained pages; must be > 0 when set.
    pub max_pages: Option<usize>,
}

impl Default for InfiniteQueryOptions {
    fn default() -> Self {
        Self {
            enabled: true,
            stale_time: None,
            cache_time: None,
            refetch_on_mount: false,
            max_pages: None,
        }
    }
}

/// Persistence subsystem options.
#[derive(Debug, Clone)]
pub struct PersistenceOptions {
    /// Whether persistence is enabled at all.
    pub enabled: bool,
    /// Interval between persistence-GC reconciliation passes.
    pub gc_interval: Duration,
}

impl Default for PersistenceOptions {
    fn default() -> Self {
        Self {
            enabled: false,
            gc_interval: defaults::PERSISTENCE_GC_INTERVAL,
        }
    }
}
