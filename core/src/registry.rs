//! The registry: the single entry point an application holds. Owns the store, the cached
//! `Query`/`InfiniteQuery` handles keyed by cache key, named circuit breakers, the offline
//! mutation queue, and the observer list.
//!
//! One `Arc`-backed handle, cheap to clone, constructed once and threaded through the
//! application.

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::config::{CacheConfig, InfiniteQueryOptions, MutationOptions, QueryOptions};
use crate::error::{Error, Result};
use crate::infinite_query::{InfiniteQuery, Page};
use crate::key::Key;
use crate::mutation::{Mutation, MutationCallbacks};
use crate::network_status::NetworkStatus;
use crate::observer::{Observer, Transition};
use crate::offline_queue::OfflineQueue;
use crate::providers::PersistenceProvider;
use crate::query::{Query, QueryState};
use futures::future::BoxFuture;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type ErasedObserver = Arc<dyn Observer<serde_json::Value, serde_json::Value>>;

/// A type-erased "refetch this key's query" closure, registered per key in [`Registry::get_query`]
/// so invalidation can kick a live query's refetch without the registry knowing its concrete
/// value type.
type RefetchTrigger = Arc<dyn Fn() -> BoxFuture<'static, ()> + Send + Sync>;

/// A fingerprint of the fields of [`CacheConfig`] that affect stored data's shape. Two
/// registries built from configs with the same fingerprint are interchangeable; a mismatch
/// means the caller is trying to silently swap cache semantics out from under live state.
fn config_fingerprint(config: &CacheConfig) -> u64 {
    use std::hash::{Hash, Hasher};
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    config.max_cache_size.hash(&mut hasher);
    config.max_entries.hash(&mut hasher);
    config.default_stale_time.hash(&mut hasher);
    config.default_cache_time.hash(&mut hasher);
    (config.eviction_policy as u8).hash(&mut hasher);
    config.enable_memory_pressure.hash(&mut hasher);
    config.performance.hot_cache_size.hash(&mut hasher);
    hasher.finish()
}

static ACTIVE_FINGERPRINT: SyncMutex<Option<u64>> = SyncMutex::new(None);

struct Inner {
    store: crate::store::Store,
    queries: SyncRwLock<HashMap<Key, Arc<dyn Any + Send + Sync>>>,
    refetch_triggers: SyncRwLock<HashMap<Key, RefetchTrigger>>,
    infinite_queries: SyncRwLock<HashMap<Key, Arc<dyn Any + Send + Sync>>>,
    circuit_breakers: SyncRwLock<HashMap<String, Arc<CircuitBreaker>>>,
    offline_queue: Option<Arc<OfflineQueue>>,
    network_status: Arc<NetworkStatus>,
    observers: SyncRwLock<Vec<ErasedObserver>>,
}

/// The application-facing client. Cheap to clone; all state lives behind `Arc`s.
#[derive(Clone)]
pub struct Registry {
    inner: Arc<Inner>,
}

impl Registry {
    /// Build a registry backed by an in-memory-only store (no persistence, no offline
    /// queue).
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::build(config, None, None)
    }

    /// Build a registry with a persistence provider for the store and a durable offline
    /// mutation queue.
    pub fn with_persistence(
        config: CacheConfig,
        persistence: Arc<dyn PersistenceProvider>,
        offline_queue: Arc<OfflineQueue>,
    ) -> Result<Self> {
        Self::build(config, Some(persistence), Some(offline_queue))
    }

    fn build(
        config: CacheConfig,
        persistence: Option<Arc<dyn PersistenceProvider>>,
        offline_queue: Option<Arc<OfflineQueue>>,
    ) -> Result<Self> {
        let fingerprint = config_fingerprint(&config);
        {
            let mut active = ACTIVE_FINGERPRINT.lock();
            match *active {
                Some(existing) if existing != fingerprint => {
                    return Err(Error::ConfigurationConflict(
                        "registry already initialized with a different cache configuration; \
                         call Registry::reset_for_testing() before reconstructing with a new one"
                            .to_string(),
                    ));
                }
                _ => *active = Some(fingerprint),
            }
        }

        let store = match &persistence {
            Some(p) => crate::store::Store::with_persistence(config, Some(p.clone())),
            None => crate::store::Store::new(config),
        };
        if persistence.is_some() {
            store.start_persistence_gc(crate::constants::defaults::PERSISTENCE_GC_INTERVAL);
        }

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                queries: SyncRwLock::new(HashMap::new()),
                refetch_triggers: SyncRwLock::new(HashMap::new()),
                infinite_queries: SyncRwLock::new(HashMap::new()),
                circuit_breakers: SyncRwLock::new(HashMap::new()),
                network_status: Arc::new(NetworkStatus::new(true, offline_queue.clone())),
                offline_queue,
                observers: SyncRwLock::new(Vec::new()),
            }),
        })
    }

    /// Clear all process-wide registry state. Test-only: lets a test suite construct
    /// multiple registries with different configurations across test cases.
    pub fn reset_for_testing() {
        *ACTIVE_FINGERPRINT.lock() = None;
    }

    #[must_use]
    pub fn store(&self) -> &crate::store::Store {
        &self.inner.store
    }

    #[must_use]
    pub fn metrics(&self) -> crate::store::CacheMetricsSnapshot {
        self.inner.store.metrics()
    }

    /// Configure the encryption provider and key used for persisted entries. A no-op if the
    /// registry has no persistence provider.
    pub fn configure_encryption(
        &self,
        provider: Arc<dyn crate::providers::EncryptionProvider>,
        key: String,
    ) {
        self.inner.store.configure_encryption(provider, key);
    }

    /// Register a named circuit breaker so `QueryOptions::circuit_breaker` can reference it
    /// by name.
    pub fn register_circuit_breaker(&self, name: impl Into<String>, config: CircuitBreakerConfig) {
        self.inner
            .circuit_breakers
            .write()
            .insert(name.into(), Arc::new(CircuitBreaker::new(config)));
    }

    fn resolve_circuit_breaker(&self, options: &QueryOptions) -> Option<Arc<CircuitBreaker>> {
        options
            .circuit_breaker
            .as_ref()
            .and_then(|name| self.inner.circuit_breakers.read().get(name).cloned())
    }

    /// Get the existing query bound to `key`, or build and cache a new one from `fetcher`.
    /// A key reused with an incompatible `T` is a programming error, not a soft failure: it
    /// panics the way any mismatched `downcast` against a type-erased cache does.
    pub fn get_query<T, F>(
        &self,
        key: Key,
        options: QueryOptions,
        fetcher: F,
    ) -> Arc<Query<T>>
    where
        T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
        F: Fn(crate::cancellation::CancellationToken) -> BoxFuture<'static, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        if let Some(existing) = self.inner.queries.read().get(&key) {
            return existing
                .clone()
                .downcast::<Query<T>>()
                .expect("query key reused with a different value type");
        }

        let circuit_breaker = self.resolve_circuit_breaker(&options);
        let query = Arc::new(Query::new(
            key.clone(),
            self.inner.store.clone(),
            options,
            Arc::new(fetcher),
            circuit_breaker,
        ));
        self.inner
            .queries
            .write()
            .insert(key.clone(), query.clone() as Arc<dyn Any + Send + Sync>);
        self.register_refetch_trigger(key.clone(), query.clone());
        self.spawn_observer_forwarding(key, query.clone());
        query
    }

    /// Register the closure invalidation uses to kick a refetch on `query` without knowing
    /// its concrete value type. Only refetches if `query` still has subscribers: an
    /// invalidated query nobody is watching is refetched lazily on its next subscribe instead.
    fn register_refetch_trigger<T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static>(
        &self,
        key: Key,
        query: Arc<Query<T>>,
    ) {
        let trigger: RefetchTrigger = Arc::new(move || {
            let query = query.clone();
            let key = key.clone();
            Box::pin(async move {
                if query.subscriber_count() == 0 {
                    return;
                }
                if let Err(e) = query.fetch(true).await {
                    warn!(%key, error = %e, "invalidation-triggered refetch failed");
                }
            })
        });
        self.inner
            .refetch_triggers
            .write()
            .insert(key, trigger);
    }

    /// Kick a refetch of `key`'s live query, if one is registered and still subscribed to.
    fn trigger_refetch(&self, key: &Key) {
        let trigger = self.inner.refetch_triggers.read().get(key).cloned();
        if let Some(trigger) = trigger {
            tokio::spawn(trigger());
        }
    }

    /// Forward every state transition of `query` to registered observers for as long as the
    /// query's `watch` sender is alive (i.e. the query itself hasn't been dropped).
    fn spawn_observer_forwarding<T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static>(
        &self,
        key: Key,
        query: Arc<Query<T>>,
    ) {
        let registry = self.clone();
        let mut rx = query.subscribe_to_state();
        let mut previous = rx.borrow().clone();
        tokio::spawn(async move {
            loop {
                if rx.changed().await.is_err() {
                    return;
                }
                if registry.observer_count() == 0 {
                    previous = rx.borrow().clone();
                    continue;
                }
                let current = rx.borrow().clone();
                registry.notify_query_transition(&key, Some(&previous), &current);
                previous = current;
            }
        });
    }

    #[must_use]
    pub fn has_query(&self, key: &Key) -> bool {
        self.inner.queries.read().contains_key(key)
    }

    #[must_use]
    pub fn query_count(&self) -> usize {
        self.inner.queries.read().len()
    }

    pub fn remove_query(&self, key: &Key) {
        self.inner.queries.write().remove(key);
        self.inner.refetch_triggers.write().remove(key);
        self.inner.store.remove(key);
    }

    /// Get the existing infinite query bound to `key`, or build and cache a new one.
    #[allow(clippy::type_complexity)]
    pub fn get_infinite_query<TParam, TData, F, N, P>(
        &self,
        key: Key,
        options: InfiniteQueryOptions,
        fetcher: F,
        get_next_page_param: N,
        get_previous_page_param: Option<P>,
    ) -> Arc<InfiniteQuery<TParam, TData>>
    where
        TParam: Clone + Send + Sync + 'static,
        TData: Clone + Send + Sync + 'static,
        F: Fn(TParam) -> BoxFuture<'static, Result<TData>> + Send + Sync + 'static,
        N: Fn(&[Page<TParam, TData>]) -> Option<TParam> + Send + Sync + 'static,
        P: Fn(&[Page<TParam, TData>]) -> Option<TParam> + Send + Sync + 'static,
    {
        if let Some(existing) = self.inner.infinite_queries.read().get(&key) {
            return existing
                .clone()
                .downcast::<InfiniteQuery<TParam, TData>>()
                .expect("infinite query key reused with a different value type");
        }

        let query = Arc::new(InfiniteQuery::new(
            options,
            Arc::new(fetcher),
            Arc::new(get_next_page_param),
            get_previous_page_param.map(|p| Arc::new(p) as Arc<dyn Fn(&[Page<TParam, TData>]) -> Option<TParam> + Send + Sync>),
        ));
        self.inner
            .infinite_queries
            .write()
            .insert(key, query.clone() as Arc<dyn Any + Send + Sync>);
        query
    }

    pub fn remove_infinite_query(&self, key: &Key) {
        self.inner.infinite_queries.write().remove(key);
        self.inner.store.remove(key);
    }

    /// Build a [`Mutation`] wired to this registry's offline queue (if configured).
    #[must_use]
    pub fn create_mutation<TVariables, TData>(
        &self,
        mutation_type: impl Into<String>,
        handler: Arc<
            dyn Fn(TVariables) -> BoxFuture<'static, Result<TData>> + Send + Sync,
        >,
        options: MutationOptions,
        callbacks: MutationCallbacks<TVariables, TData>,
    ) -> Mutation<TVariables, TData>
    where
        TVariables: Clone + serde::Serialize + Send + Sync + 'static,
        TData: Clone + Send + Sync + 'static,
    {
        Mutation::new(
            mutation_type,
            handler,
            options,
            callbacks,
            self.inner.offline_queue.clone(),
        )
    }

    #[must_use]
    pub fn network_status(&self) -> Arc<NetworkStatus> {
        self.inner.network_status.clone()
    }

    pub fn invalidate_query(&self, key: &Key) {
        self.inner.store.invalidate(key);
        self.trigger_refetch(key);
    }

    pub fn invalidate_queries(&self, keys: &[Key]) {
        for key in keys {
            self.inner.store.invalidate(key);
            self.trigger_refetch(key);
        }
    }

    pub fn invalidate_queries_with_prefix(&self, prefix: &str) {
        self.inner.store.invalidate_with_prefix(prefix);
        let matching: Vec<Key> = self
            .inner
            .refetch_triggers
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &matching {
            self.trigger_refetch(key);
        }
    }

    pub fn invalidate_queries_where(&self, pred: impl Fn(&Key) -> bool) {
        self.inner.store.invalidate_where(&pred);
        let matching: Vec<Key> = self
            .inner
            .refetch_triggers
            .read()
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();
        for key in &matching {
            self.trigger_refetch(key);
        }
    }

    /// Manually seed cache data for `key` without going through a query's fetcher.
    pub fn set_query_data<T: Clone + Send + Sync + serde::Serialize + 'static>(
        &self,
        key: &Key,
        data: T,
        options: crate::store::SetOptions,
    ) -> Result<()> {
        self.inner.store.set(key, data, options)
    }

    #[must_use]
    pub fn get_query_data<T: Clone + Send + Sync + 'static>(&self, key: &Key) -> Option<T> {
        self.inner.store.get(key)
    }

    /// Force an immediate fetch for `key`, skipping it if the cached value is already fresh.
    ///
    /// Unlike [`Registry::get_query`], this never caches the resulting `Query` in the
    /// registry: `fetcher` runs once through a transient query bound to the shared store, so
    /// `key`'s value ends up cached for whatever query is registered for it later, and the
    /// transient query itself is dropped once the fetch completes.
    pub async fn prefetch_query<T, F>(
        &self,
        key: &Key,
        options: QueryOptions,
        fetcher: F,
    ) -> Result<()>
    where
        T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
        F: Fn(crate::cancellation::CancellationToken) -> BoxFuture<'static, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        if self.inner.store.is_fresh(key) {
            debug!(%key, "prefetch_query: cached value already fresh, skipping");
            return Ok(());
        }

        let circuit_breaker = self.resolve_circuit_breaker(&options);
        let query = Query::new(
            key.clone(),
            self.inner.store.clone(),
            options,
            Arc::new(fetcher),
            circuit_breaker,
        );
        query.fetch(false).await
    }

    /// Prefetch every key in `keys` concurrently, continuing past individual failures and
    /// logging them. `fetcher` is called once per key to build that key's fetch function.
    pub async fn prefetch_queries<T, F, Fut>(
        &self,
        keys: &[Key],
        options: QueryOptions,
        fetcher: impl Fn(Key) -> F,
    ) where
        T: Clone + Send + Sync + serde::Serialize + serde::de::DeserializeOwned + 'static,
        F: Fn(crate::cancellation::CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        let fetches = keys.iter().map(|key| {
            let key = key.clone();
            let options = options.clone();
            let key_fetcher = fetcher(key.clone());
            async move {
                if let Err(e) = self
                    .prefetch_query(&key, options, move |token| Box::pin(key_fetcher(token)))
                    .await
                {
                    warn!(%key, error = %e, "prefetch failed");
                }
            }
        });
        futures::future::join_all(fetches).await;
    }

    /// Drop every cached query/infinite-query handle and every stored entry. Does not touch
    /// the offline queue.
    pub fn clear(&self) {
        self.inner.queries.write().clear();
        self.inner.infinite_queries.write().clear();
        self.inner.store.clear();
    }

    /// Clear only secure (non-persisted) entries, e.g. when the application is
    /// backgrounded/detached and session-bound data should not outlive the session.
    pub fn clear_secure(&self) {
        self.inner.store.clear_secure();
    }

    pub fn add_observer(&self, observer: ErasedObserver) {
        self.inner.observers.write().push(observer);
    }

    pub fn remove_observers(&self) {
        self.inner.observers.write().clear();
    }

    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.inner.observers.read().len()
    }

    /// Notify every registered observer of a query state transition, converting the typed
    /// state to `serde_json::Value` so observers don't need to be generic over every
    /// concrete query type in the registry.
    pub fn notify_query_transition<T: serde::Serialize>(
        &self,
        key: &Key,
        previous: Option<&QueryState<T>>,
        current: &QueryState<T>,
    ) {
        let Ok(current_value) = serde_json::to_value(StateView {
            status: format!("{:?}", current.status),
            data: current.data.as_ref(),
            error: current.error.clone(),
        }) else {
            return;
        };
        let previous_value = previous.and_then(|p| {
            serde_json::to_value(StateView {
                status: format!("{:?}", p.status),
                data: p.data.as_ref(),
                error: p.error.clone(),
            })
            .ok()
        });

        let current_state = QueryState {
            status: current.status,
            data: Some(current_value),
            error: current.error.clone(),
            is_fetching: current.is_fetching,
            is_stale: current.is_stale,
            updated_at: current.updated_at,
        };
        let previous_state = previous.map(|p| QueryState {
            status: p.status,
            data: previous_value,
            error: p.error.clone(),
            is_fetching: p.is_fetching,
            is_stale: p.is_stale,
            updated_at: p.updated_at,
        });

        let transition = Transition {
            key: key.as_str().to_string(),
            previous: previous_state,
            current: current_state,
            meta: None,
        };

        for observer in self.inner.observers.read().iter() {
            match current.status {
                crate::query::QueryStatus::Loading => observer.on_query_loading(&transition),
                crate::query::QueryStatus::Success => observer.on_query_success(&transition),
                crate::query::QueryStatus::Error => observer.on_query_error(&transition),
                crate::query::QueryStatus::Idle => {}
            }
            if !current.is_fetching {
                observer.on_query_settled(&transition);
            }
        }
    }
}

#[derive(serde::Serialize)]
struct StateView<'a, T> {
    status: String,
    data: Option<&'a T>,
    error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CacheConfig;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn key(s: &str) -> Key {
        Key::new(s).unwrap()
    }

    fn fresh_config(tag: u64) -> CacheConfig {
        CacheConfig::new().with_max_entries(100 + tag as usize)
    }

    #[test]
    #[serial]
    fn reconstructing_with_a_different_config_without_reset_errors() {
        Registry::reset_for_testing();
        let _a = Registry::new(fresh_config(1)).unwrap();
        let b = Registry::new(fresh_config(2));
        assert!(matches!(b, Err(Error::ConfigurationConflict(_))));
        Registry::reset_for_testing();
    }

    #[test]
    #[serial]
    fn reconstructing_with_the_same_config_succeeds() {
        Registry::reset_for_testing();
        let _a = Registry::new(fresh_config(3)).unwrap();
        let b = Registry::new(fresh_config(3));
        assert!(b.is_ok());
        Registry::reset_for_testing();
    }

    #[tokio::test]
    #[serial]
    async fn get_query_caches_by_key() {
        Registry::reset_for_testing();
        let registry = Registry::new(fresh_config(4)).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let make_fetcher = || {
            let calls = calls.clone();
            move |_token: crate::cancellation::CancellationToken| {
                let calls = calls.clone();
                Box::pin(async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(1)
                }) as BoxFuture<'static, Result<i32>>
            }
        };

        let q1 = registry.get_query(key("users:1"), QueryOptions::new(), make_fetcher());
        let q2 = registry.get_query(key("users:1"), QueryOptions::new(), make_fetcher());
        assert_eq!(registry.query_count(), 1);
        assert!(Arc::ptr_eq(&q1, &q2));
        Registry::reset_for_testing();
    }

    #[test]
    #[serial]
    fn set_and_get_query_data_round_trip() {
        Registry::reset_for_testing();
        let registry = Registry::new(fresh_config(5)).unwrap();
        registry
            .set_query_data(&key("users:1"), 99, crate::store::SetOptions::default())
            .unwrap();
        assert_eq!(registry.get_query_data::<i32>(&key("users:1")), Some(99));
        Registry::reset_for_testing();
    }

    #[test]
    #[serial]
    fn clear_secure_only_drops_secure_entries() {
        Registry::reset_for_testing();
        let registry = Registry::new(fresh_config(6)).unwrap();
        registry
            .set_query_data(
                &key("secure:1"),
                1,
                crate::store::SetOptions {
                    is_secure: true,
                    max_age: Some(std::time::Duration::from_secs(60)),
                    ..Default::default()
                },
            )
            .unwrap();
        registry
            .set_query_data(&key("plain:1"), 2, crate::store::SetOptions::default())
            .unwrap();
        registry.clear_secure();
        assert_eq!(registry.get_query_data::<i32>(&key("secure:1")), None);
        assert_eq!(registry.get_query_data::<i32>(&key("plain:1")), Some(2));
        Registry::reset_for_testing();
    }
}
