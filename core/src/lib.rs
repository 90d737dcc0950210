#![allow(clippy::cast_precision_loss)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::missing_docs_in_private_items)]
#![allow(clippy::cast_possible_wrap)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::redundant_closure_for_method_calls)]
#![allow(clippy::unused_self)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::assigning_clones)]
#![allow(clippy::borrowed_box)]
#![allow(clippy::float_cmp)]
#![allow(clippy::ref_option)]

//! # fasq-core
//!
//! An asynchronous query/mutation cache engine: a client-side data layer for applications
//! that fetch remote data and need staleness tracking, background revalidation,
//! deduplication, pagination, and resilient offline mutations without hand-rolling all of
//! it per call site.
//!
//! ## Core Concepts
//!
//! - [`store`]: the keyed entry store — staleness/TTL tracking, refcounting, a hot-set,
//!   size/count-budgeted eviction, and an encrypted-persistence contract.
//! - [`query`]: a per-key fetch state machine with subscriber refcounting, stale-while-
//!   revalidate background refetch, cooperative cancellation, and request deduplication.
//! - [`infinite_query`]: the paginated variant of [`query`] — an ordered page list driven by
//!   `getNextPageParam`/`getPreviousPageParam` callbacks.
//! - [`mutation`]: a one-shot write operation with lifecycle callbacks and an optional
//!   durable offline-queue fallback.
//! - [`offline_queue`]: the durable, priority-ordered queue mutations fall back to while the
//!   network is unreachable, replayed on reconnect.
//! - [`registry`]: the application-facing client tying the above together — cached query/
//!   infinite-query handles, named circuit breakers, invalidation, prefetch, manual cache
//!   writes, and observers.
//!
//! ## Supporting modules
//!
//! - [`config`]: configuration structs for the store, queries, mutations, and persistence.
//! - [`entry`]: a single stored value plus its staleness/TTL/refcount bookkeeping.
//! - [`key`]: validated cache keys.
//! - [`eviction`]: policy-driven eviction candidate ordering and budget selection.
//! - [`hotset`]: a small promoted-entry LRU sitting in front of the main store.
//! - [`circuit_breaker`]: a named failure-tripped breaker guarding a query's fetcher.
//! - [`cancellation`]: cooperative cancellation tokens with parent/child propagation.
//! - [`providers`]: the persistence/encryption/keystore provider contracts.
//! - [`network_status`]: an observable online/offline flag that drains the offline queue on
//!   reconnect.
//! - [`observer`]: a sink for query/mutation state transitions (devtools, metrics, tests).
//! - [`retry`]: exponential backoff with jitter for recoverable fetch failures.
//! - [`error`]: the crate's error types.
//! - [`constants`]: default values and validation constants shared across modules.
//! - [`tracing`]: structured logging helpers (correlation IDs, subscriber init).
//!
//! ## Quick Start
//!
//! ```no_run
//! use fasq_core::config::{CacheConfig, QueryOptions};
//! use fasq_core::key::Key;
//! use fasq_core::registry::Registry;
//! use futures::future::BoxFuture;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let registry = Registry::new(CacheConfig::default()).unwrap();
//! let query = registry.get_query(
//!     Key::new("users:1").unwrap(),
//!     QueryOptions::new(),
//!     |_token| Box::pin(async move { Ok(42i32) }) as BoxFuture<'static, fasq_core::Result<i32>>,
//! );
//! query.subscribe().await.unwrap();
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Every fallible operation returns [`Result<T>`]; see [`Error`] for the full set of
//! variants and which ones are treated as retryable.
//!
//! ```no_run
//! use fasq_core::Result;
//!
//! async fn example() -> Result<()> {
//!     Ok(())
//! }
//! ```

pub mod cancellation;
pub mod circuit_breaker;
pub mod config;
pub mod constants;
pub mod entry;
pub mod error;
pub mod eviction;
pub mod hotset;
pub mod infinite_query;
pub mod key;
pub mod mutation;
pub mod network_status;
pub mod observer;
pub mod offline_queue;
pub mod providers;
pub mod query;
pub mod registry;
pub mod retry;
pub mod store;
pub mod tracing;

pub use cancellation::CancellationToken;
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use config::{
    CacheConfig, EvictionPolicy, InfiniteQueryOptions, MutationOptions, MutationPriority,
    PersistenceOptions, QueryOptions, QueryPerformanceOptions,
};
pub use entry::Entry;
pub use error::{CacheError, Error, Result, ValidationError};
pub use infinite_query::{InfiniteQuery, InfiniteQueryState, Page};
pub use key::Key;
pub use mutation::{Mutation, MutationCallbacks, MutationState, MutationStatus};
pub use network_status::NetworkStatus;
pub use observer::{Observer, Transition};
pub use offline_queue::{OfflineMutationEntry, OfflineQueue};
pub use providers::{EncryptionProvider, FilesystemPersistenceProvider, KeystoreProvider, PersistenceProvider};
pub use query::{Query, QueryState, QueryStatus};
pub use registry::Registry;
pub use store::{CacheMetrics, CacheMetricsSnapshot, SetOptions, Store};
