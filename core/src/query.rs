//! The query controller: a per-key fetch state machine with subscriber refcounting,
//! background refetch, cancellation, and request deduplication.
//!
//! State is broadcast over a single `tokio::sync::watch` channel holding the latest
//! snapshot, so a late subscriber sees the current state immediately instead of waiting for
//! the next transition.

use crate::cancellation::CancellationToken;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::QueryOptions;
use crate::constants::defaults;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::retry::{RetryConfig, RetryPolicy};
use crate::store::{SetOptions, Store};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

/// Lifecycle status of a [`Query`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

/// A point-in-time snapshot of a query's state, broadcast to subscribers.
#[derive(Debug, Clone)]
pub struct QueryState<T> {
    pub status: QueryStatus,
    pub data: Option<T>,
    pub error: Option<String>,
    pub is_fetching: bool,
    pub is_stale: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl<T> QueryState<T> {
    fn idle() -> Self {
        Self {
            status: QueryStatus::Idle,
            data: None,
            error: None,
            is_fetching: false,
            is_stale: true,
            updated_at: None,
        }
    }
}

impl<T> Default for QueryState<T> {
    fn default() -> Self {
        Self::idle()
    }
}

type Fetcher<T> = Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync>;

/// A query's fetch function, key, and subscriber/lifecycle bookkeeping.
///
/// Cheap to clone: all state lives behind `Arc`s, so clones refer to the same underlying
/// query (the way `Query` handles are shared between whatever owns the registry entry and
/// whatever a caller holds after `Registry::get_query`).
#[derive(Clone)]
pub struct Query<T> {
    key: Key,
    store: Store,
    options: QueryOptions,
    fetcher: Fetcher<T>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    state_tx: Arc<watch::Sender<QueryState<T>>>,
    subscriber_count: Arc<AtomicU32>,
    fetch_lock: Arc<AsyncMutex<()>>,
    cancel_token: Arc<std::sync::Mutex<CancellationToken>>,
    disposal_generation: Arc<AtomicU64>,
}

impl<T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static> Query<T> {
    /// Build a new query bound to `key`. `fetcher` is called with a fresh cancellation token
    /// for each fetch attempt.
    #[must_use]
    pub fn new(
        key: Key,
        store: Store,
        options: QueryOptions,
        fetcher: Fetcher<T>,
        circuit_breaker: Option<Arc<CircuitBreaker>>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(QueryState::idle());
        Self {
            key,
            store,
            options,
            fetcher,
            circuit_breaker,
            state_tx: Arc::new(state_tx),
            subscriber_count: Arc::new(AtomicU32::new(0)),
            fetch_lock: Arc::new(AsyncMutex::new(())),
            cancel_token: Arc::new(std::sync::Mutex::new(CancellationToken::new())),
            disposal_generation: Arc::new(AtomicU64::new(0)),
        }
    }

    #[must_use]
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// A `watch::Receiver` carrying the current state and every future transition.
    #[must_use]
    pub fn subscribe_to_state(&self) -> watch::Receiver<QueryState<T>> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> QueryState<T> {
        self.state_tx.borrow().clone()
    }

    /// Register a subscriber: bumps the store's refcount for this key (blocking eviction)
    /// and cancels any pending disposal. Triggers an initial fetch if `refetchOnMount` is set
    /// or nothing has ever been fetched.
    pub async fn subscribe(&self) -> Result<()> {
        self.subscriber_count.fetch_add(1, Ordering::SeqCst);
        self.disposal_generation.fetch_add(1, Ordering::SeqCst);
        self.acquire_store_ref();

        let should_fetch = self.options.refetch_on_mount || !self.store.is_fresh(&self.key);
        if self.options.enabled && should_fetch {
            self.fetch(false).await?;
        }
        Ok(())
    }

    /// Unregister a subscriber. Once the last subscriber leaves, schedules disposal after
    /// [`defaults::DISPOSAL_DELAY`]; a resubscribe before the delay elapses cancels it.
    pub fn unsubscribe(&self) {
        let previous = self.subscriber_count.fetch_sub(1, Ordering::SeqCst);
        self.release_store_ref();
        if previous != 1 {
            return;
        }

        let generation = self.disposal_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let query = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(defaults::DISPOSAL_DELAY).await;
            if query.disposal_generation.load(Ordering::SeqCst) != generation {
                return;
            }
            if query.subscriber_count.load(Ordering::SeqCst) == 0 {
                debug!(key = %query.key, "disposing query: no subscribers reattached before delay elapsed");
                query.cancel();
            }
        });
    }

    /// Best-effort cold-miss hydration from the persistence provider, if one is configured.
    /// Swallows provider/decode errors: a miss here just means the fetch falls through to
    /// the network the way an ordinary cold key would.
    async fn restore_from_persistence(&self) -> Option<T> {
        let options = SetOptions {
            stale_time: self.options.stale_time,
            cache_time: self.options.cache_time,
            is_secure: self.options.is_secure,
            max_age: self.options.max_age,
        };
        match self.store.restore_from_persistence::<T>(&self.key, options).await {
            Ok(value) => value,
            Err(e) => {
                warn!(key = %self.key, error = %e, "failed to restore cached value from persistence");
                None
            }
        }
    }

    fn acquire_store_ref(&self) {
        self.store.acquire_ref(&self.key);
    }

    fn release_store_ref(&self) {
        self.store.release_ref(&self.key);
    }

    /// Cancel any in-flight fetch for this query.
    pub fn cancel(&self) {
        self.cancel_token.lock().unwrap().cancel();
    }

    #[must_use]
    pub fn subscriber_count(&self) -> u32 {
        self.subscriber_count.load(Ordering::SeqCst)
    }

    /// Run the fetch algorithm: skip if disabled, skip if fresh and not invalidated unless
    /// `force_refetch`, dedup concurrent callers, retry with backoff, and publish the
    /// resulting state transition.
    pub async fn fetch(&self, force_refetch: bool) -> Result<()> {
        if !self.options.enabled {
            return Ok(());
        }

        let had_prior_data = self.current_state().data.is_some();

        if !force_refetch && !self.store.is_invalidated(&self.key) {
            let cached = match self.store.get::<T>(&self.key) {
                Some(cached) => Some(cached),
                None => self.restore_from_persistence().await,
            };
            if let Some(cached) = cached {
                let is_fresh = self.store.is_fresh(&self.key);
                if is_fresh {
                    self.publish_success(cached, false);
                    return Ok(());
                }
                // stale-while-revalidate: show the cached value immediately, refetch in
                // the background.
                self.publish_success(cached, true);
            }
        }

        let _permit = self.fetch_lock.lock().await;

        let token = {
            let mut guard = self.cancel_token.lock().unwrap();
            *guard = CancellationToken::new();
            guard.clone()
        };

        self.mark_fetching();

        let key = self.key.clone();
        let timeout_key = self.key.clone();
        let fetcher = self.fetcher.clone();
        let circuit_breaker = self.circuit_breaker.clone();
        let fetch_timeout = self.options.performance.fetch_timeout_ms.map(Duration::from_millis);
        let mut retry = RetryPolicy::with_config(RetryConfig {
            max_retries: self.options.performance.max_retries,
            base_delay: self.options.performance.initial_retry_delay,
            ..RetryConfig::default()
        });

        let result = self
            .store
            .deduplicate(&key, move || {
                let fetcher = fetcher.clone();
                let token = token.clone();
                let circuit_breaker = circuit_breaker.clone();
                let mut retry = retry;
                let timeout_key = timeout_key.clone();
                async move {
                    retry
                        .execute(move || {
                            let fetcher = fetcher.clone();
                            let token = token.clone();
                            let circuit_breaker = circuit_breaker.clone();
                            let timeout_key = timeout_key.clone();
                            async move {
                                let do_fetch = || {
                                    let fetcher = fetcher.clone();
                                    let token = token.clone();
                                    async move {
                                        if token.is_cancelled() {
                                            return Err(Error::Cancelled);
                                        }
                                        tokio::select! {
                                            biased;
                                            _ = token.cancelled() => Err(Error::Cancelled),
                                            result = fetcher(token.clone()) => result,
                                        }
                                    }
                                };

                                let attempt = async {
                                    match circuit_breaker {
                                        Some(ref breaker) => breaker.call(do_fetch).await,
                                        None => do_fetch().await,
                                    }
                                };

                                match fetch_timeout {
                                    Some(duration) => match tokio::time::timeout(duration, attempt).await {
                                        Ok(result) => result,
                                        Err(_) => {
                                            token.cancel();
                                            Err(Error::Timeout(format!(
                                                "fetch for '{timeout_key}' timed out after {}ms",
                                                duration.as_millis()
                                            )))
                                        }
                                    },
                                    None => attempt.await,
                                }
                            }
                        })
                        .await
                }
            })
            .await;

        match result {
            Ok(data) => {
                self.store.set(
                    &key,
                    data.clone(),
                    SetOptions {
                        stale_time: self.options.stale_time,
                        cache_time: self.options.cache_time,
                        is_secure: self.options.is_secure,
                        max_age: self.options.max_age,
                    },
                )?;
                self.publish_success(data, false);
                Ok(())
            }
            Err(Error::Cancelled) => {
                debug!(key = %self.key, "fetch cancelled");
                self.clear_fetching();
                Ok(())
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "fetch failed");
                if had_prior_data {
                    self.publish_background_refetch_error(e.to_string());
                } else {
                    self.publish_error(e.to_string());
                }
                Err(e)
            }
        }
    }

    fn mark_fetching(&self) {
        self.state_tx.send_modify(|state| {
            state.is_fetching = true;
            if state.status == QueryStatus::Idle {
                state.status = QueryStatus::Loading;
            }
        });
    }

    fn clear_fetching(&self) {
        self.state_tx.send_modify(|state| {
            state.is_fetching = false;
        });
    }

    fn publish_success(&self, data: T, still_fetching: bool) {
        let now = Utc::now();
        let _ = self.state_tx.send(QueryState {
            status: QueryStatus::Success,
            data: Some(data),
            error: None,
            is_fetching: still_fetching,
            is_stale: !self.store.is_fresh(&self.key),
            updated_at: Some(now),
        });
    }

    /// Publish an initial-load failure: no prior value ever existed for this key, so the
    /// error is all there is to show.
    fn publish_error(&self, error: String) {
        self.state_tx.send_modify(|state| {
            state.status = QueryStatus::Error;
            state.data = None;
            state.error = Some(error);
            state.is_fetching = false;
            state.is_stale = true;
        });
    }

    /// Publish a background-refetch failure while preserving the last successful value:
    /// status stays `Success`, data is untouched, the error surfaces alongside it rather than
    /// blanking the view.
    fn publish_background_refetch_error(&self, error: String) {
        self.state_tx.send_modify(|state| {
            state.error = Some(error);
            state.is_fetching = false;
            state.is_stale = true;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use std::sync::atomic::AtomicUsize;

    fn key(s: &str) -> Key {
        Key::new(s).unwrap()
    }

    fn make_query(calls: Arc<AtomicUsize>, succeed: bool) -> Query<i32> {
        let store = Store::new(CacheConfig::default());
        let fetcher: Fetcher<i32> = Arc::new(move |_token| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                if succeed {
                    Ok(42)
                } else {
                    Err(Error::fetcher(DummyError))
                }
            })
        });
        Query::new(key("k"), store, QueryOptions::new(), fetcher, None)
    }

    #[tokio::test]
    async fn successful_fetch_publishes_success_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = make_query(calls.clone(), true);
        query.fetch(false).await.unwrap();

        let state = query.current_state();
        assert_eq!(state.status, QueryStatus::Success);
        assert_eq!(state.data, Some(42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fresh_cached_value_skips_refetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Store::new(CacheConfig::default());
        let fetcher: Fetcher<i32> = Arc::new({
            let calls = calls.clone();
            move |_token| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
            }
        });
        let options = QueryOptions::new().with_stale_time(std::time::Duration::from_secs(60));
        let query = Query::new(key("k"), store, options, fetcher, None);

        query.fetch(false).await.unwrap();
        query.fetch(false).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn disabled_query_never_fetches() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Store::new(CacheConfig::default());
        let fetcher: Fetcher<i32> = Arc::new({
            let calls = calls.clone();
            move |_token| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                })
            }
        });
        let mut options = QueryOptions::new();
        options.enabled = false;
        let query = Query::new(key("k"), store, options, fetcher, None);

        query.fetch(false).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_fetch_publishes_error_state() {
        let calls = Arc::new(AtomicUsize::new(0));
        let store = Store::new(CacheConfig::default());
        let fetcher: Fetcher<i32> = Arc::new(move |_token| {
            let calls = calls.clone();
            Box::pin(async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err(Error::fetcher(DummyError))
            })
        });
        let mut options = QueryOptions::new();
        options.performance.max_retries = 0;
        let query = Query::new(key("k"), store, options, fetcher, None);

        let result = query.fetch(false).await;
        assert!(result.is_err());
        let state = query.current_state();
        assert_eq!(state.status, QueryStatus::Error);
        assert!(state.error.is_some());
    }

    #[tokio::test]
    async fn subscribe_and_unsubscribe_track_refcount() {
        let calls = Arc::new(AtomicUsize::new(0));
        let query = make_query(calls, true);
        query.subscribe().await.unwrap();
        assert_eq!(query.subscriber_count(), 1);
        query.unsubscribe();
        assert_eq!(query.subscriber_count(), 0);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("dummy")]
    struct DummyError;
}
