//! The cache store: a keyed entry map with size/count budgets, deduplication, per-key
//! locks, a hot-set, and optional encrypted persistence.
//!
//! Entries are type-erased (`Arc<dyn Any + Send + Sync>`) so one store can hold values for
//! many unrelated keys behind a single hashed key space, with arbitrary `T: Clone + 'static`
//! per entry.

use crate::config::CacheConfig;
use crate::constants::defaults;
use crate::entry::Entry;
use crate::error::{Error, Result, ValidationError};
use crate::eviction::{order_candidates, select_for_budget, EvictionCandidate};
use crate::hotset::HotSet;
use crate::key::Key;
use crate::providers::{EncryptionProvider, PersistenceProvider};
use chrono::Utc;
use parking_lot::{Mutex as SyncMutex, RwLock as SyncRwLock};
use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Mutex as AsyncMutex};
use tracing::{debug, warn};

type AnyValue = Arc<dyn Any + Send + Sync>;
type StoredEntry = Entry<AnyValue>;

/// Hit/miss/eviction counters for the store, exposed for observability.
#[derive(Debug, Default)]
pub struct CacheMetrics {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub evictions: AtomicU64,
    pub eviction_failures: AtomicU64,
    pub persistence_failures: AtomicU64,
}

impl CacheMetrics {
    #[must_use]
    pub fn snapshot(&self) -> CacheMetricsSnapshot {
        CacheMetricsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            eviction_failures: self.eviction_failures.load(Ordering::Relaxed),
            persistence_failures: self.persistence_failures.load(Ordering::Relaxed),
        }
    }
}

/// A point-in-time copy of [`CacheMetrics`]'s counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheMetricsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub eviction_failures: u64,
    pub persistence_failures: u64,
}

/// Options accepted by [`Store::set`].
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    pub stale_time: Option<Duration>,
    pub cache_time: Option<Duration>,
    pub is_secure: bool,
    pub max_age: Option<Duration>,
}

type DedupOutcome = Arc<std::result::Result<AnyValue, String>>;

/// The encryption provider plus the active key used to encrypt/decrypt persisted bytes.
struct EncryptionContext {
    provider: Arc<dyn EncryptionProvider>,
    key: String,
}

struct Inner {
    config: SyncRwLock<CacheConfig>,
    entries: SyncRwLock<HashMap<Key, StoredEntry>>,
    tombstones: SyncRwLock<HashSet<Key>>,
    hot_set: SyncMutex<HotSet<AnyValue>>,
    key_locks: SyncMutex<HashMap<Key, Arc<AsyncMutex<()>>>>,
    in_flight: SyncMutex<HashMap<Key, broadcast::Sender<DedupOutcome>>>,
    metrics: CacheMetrics,
    persistence: Option<Arc<dyn PersistenceProvider>>,
    encryption: SyncRwLock<Option<EncryptionContext>>,
}

/// The shared cache store. Cheap to clone (an `Arc` handle); clones refer to the same
/// underlying state.
#[derive(Clone)]
pub struct Store {
    inner: Arc<Inner>,
}

impl Store {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self::with_persistence(config, None)
    }

    #[must_use]
    pub fn with_persistence(
        config: CacheConfig,
        persistence: Option<Arc<dyn PersistenceProvider>>,
    ) -> Self {
        let hot_set = HotSet::new(
            config.performance.hot_cache_size,
            defaults::PROMOTION_THRESHOLD,
        );
        Self {
            inner: Arc::new(Inner {
                config: SyncRwLock::new(config),
                entries: SyncRwLock::new(HashMap::new()),
                tombstones: SyncRwLock::new(HashSet::new()),
                hot_set: SyncMutex::new(hot_set),
                key_locks: SyncMutex::new(HashMap::new()),
                in_flight: SyncMutex::new(HashMap::new()),
                metrics: CacheMetrics::default(),
                persistence,
                encryption: SyncRwLock::new(None),
            }),
        }
    }

    /// Configure the encryption provider and active key used to encrypt bytes on the way to
    /// persistence, and decrypt them on the way back. A store with no persistence provider
    /// ignores this (there is nothing to encrypt).
    pub fn configure_encryption(&self, provider: Arc<dyn EncryptionProvider>, key: String) {
        *self.inner.encryption.write() = Some(EncryptionContext { provider, key });
    }

    /// Spawn a periodic task that reconciles the persistence provider's stored keys against
    /// the in-memory store, removing persisted entries whose in-memory counterpart has been
    /// GC'd or evicted. Runs [`Self::gc`] first each tick so the reconciliation reflects the
    /// latest idle/cacheTime collection.
    pub fn start_persistence_gc(&self, interval: Duration) {
        if self.inner.persistence.is_none() {
            return;
        }
        let store = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                store.gc();
                if let Err(e) = store.reconcile_persistence().await {
                    warn!(error = %e, "persistence gc reconciliation failed");
                }
            }
        });
    }

    /// Remove persisted entries whose key is no longer present in memory (nor tombstoned,
    /// which still represents a logically live-but-stale key).
    async fn reconcile_persistence(&self) -> Result<()> {
        let Some(provider) = self.inner.persistence.clone() else {
            return Ok(());
        };
        let persisted_keys = provider.get_all_keys().await?;
        let stale: Vec<String> = {
            let entries = self.inner.entries.read();
            let tombstones = self.inner.tombstones.read();
            persisted_keys
                .into_iter()
                .filter(|k| {
                    let key = Key::new(k.as_str());
                    match key {
                        Ok(key) => !entries.contains_key(&key) && !tombstones.contains(&key),
                        Err(_) => false,
                    }
                })
                .collect()
        };
        if stale.is_empty() {
            return Ok(());
        }
        debug!(count = stale.len(), "removing stale persisted entries");
        provider.remove_multiple(&stale).await
    }

    #[must_use]
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }

    #[must_use]
    pub fn config(&self) -> CacheConfig {
        self.inner.config.read().clone()
    }

    fn lock_for(&self, key: &Key) -> Arc<AsyncMutex<()>> {
        self.inner
            .key_locks
            .lock()
            .entry(key.clone())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    /// Run `f` under a per-key critical section, with a [`defaults::LOCK_ACQUIRE_TIMEOUT`]
    /// acquisition timeout.
    pub async fn with_lock<F, Fut, T>(&self, key: &Key, f: F) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let lock = self.lock_for(key);
        let guard = tokio::time::timeout(defaults::LOCK_ACQUIRE_TIMEOUT, lock.lock())
            .await
            .map_err(|_| Error::Timeout(format!("lock acquisition for '{key}' timed out")))?;
        let result = f().await;
        drop(guard);
        result
    }

    /// Look up `key`. Consults the hot-set first, then the main map. A secure-expired
    /// entry is removed and reported as absent.
    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &Key) -> Option<T> {
        let now = Utc::now();

        {
            let mut hot_set = self.inner.hot_set.lock();
            if let Some(value) = hot_set.get(key) {
                if let Some(typed) = value.downcast_ref::<T>() {
                    let typed = typed.clone();
                    drop(hot_set);
                    self.inner.metrics.hits.fetch_add(1, Ordering::Relaxed);
                    self.touch(key, now);
                    return Some(typed);
                }
            }
        }

        let mut entries = self.inner.entries.write();
        let Some(entry) = entries.get_mut(key) else {
            self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        if entry.is_expired(now) {
            entries.remove(key);
            self.inner.hot_set.lock().remove(key);
            self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        entry.record_access(now);
        let access_count = entry.access_count();
        let value = entry.data().clone();
        let Some(typed) = value.downcast_ref::<T>().cloned() else {
            self.inner.metrics.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };
        drop(entries);

        self.inner
            .hot_set
            .lock()
            .maybe_promote(key, access_count, &value);
        self.inner.metrics.hits.fetch_add(1, Ordering::Relaxed);
        Some(typed)
    }

    fn touch(&self, key: &Key, now: chrono::DateTime<Utc>) {
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry.record_access(now);
        }
    }

    /// Write `data` under `key`, replacing any existing entry, then trigger eviction if
    /// the store is over budget.
    pub fn set<T: Clone + Send + Sync + serde::Serialize + 'static>(
        &self,
        key: &Key,
        data: T,
        options: SetOptions,
    ) -> Result<()> {
        if options.is_secure && options.max_age.is_none() {
            return Err(ValidationError::SecureWithoutMaxAge {
                key: key.to_string(),
            }
            .into());
        }

        let encoded = serde_json::to_vec(&data).ok();
        let size_bytes = encoded.as_ref().map_or(0, |b| b.len() as u64);
        let (now, expires_at) = self.insert_entry(key, data, &options, size_bytes)?;

        if !options.is_secure {
            if let Some(encoded) = encoded {
                self.schedule_persist(key.clone(), encoded, now, expires_at);
            }
        }

        self.evict_if_needed();
        Ok(())
    }

    /// Shared entry-insertion logic between [`Self::set`] and [`Self::restore_from_persistence`]:
    /// validates nothing (the caller already has), writes the hot-set/main-map entry, and
    /// clears any tombstone. Returns `(now, expires_at)` for the caller's own bookkeeping.
    fn insert_entry<T: Clone + Send + Sync + 'static>(
        &self,
        key: &Key,
        data: T,
        options: &SetOptions,
        size_bytes: u64,
    ) -> Result<(chrono::DateTime<Utc>, Option<chrono::DateTime<Utc>>)> {
        let config = self.config();
        let stale_time = options.stale_time.unwrap_or(config.default_stale_time);
        let cache_time = options.cache_time.unwrap_or(config.default_cache_time);

        let now = Utc::now();
        let expires_at = if options.is_secure {
            options.max_age.map(|age| now + to_chrono(age))
        } else {
            None
        };

        let boxed: AnyValue = Arc::new(data);
        {
            let mut entries = self.inner.entries.write();
            match entries.get_mut(key) {
                Some(existing) => existing.replace(
                    boxed.clone(),
                    true,
                    now,
                    stale_time,
                    cache_time,
                    options.is_secure,
                    expires_at,
                    size_bytes,
                ),
                None => {
                    entries.insert(
                        key.clone(),
                        Entry::new(
                            boxed.clone(),
                            true,
                            now,
                            stale_time,
                            cache_time,
                            options.is_secure,
                            expires_at,
                            size_bytes,
                        ),
                    );
                }
            }
        }
        self.inner.hot_set.lock().update(key, boxed);
        self.inner.tombstones.write().remove(key);
        Ok((now, expires_at))
    }

    /// Restore `key` from the persistence provider into memory, if one is configured, the key
    /// has a persisted blob, and nothing is already cached in memory for it. Decrypts first
    /// when encryption is configured. Returns the restored value, if any.
    pub async fn restore_from_persistence<T>(&self, key: &Key, options: SetOptions) -> Result<Option<T>>
    where
        T: Clone + Send + Sync + serde::de::DeserializeOwned + 'static,
    {
        if self.inner.entries.read().contains_key(key) {
            return Ok(None);
        }
        let Some(provider) = self.inner.persistence.clone() else {
            return Ok(None);
        };
        let Some(raw) = provider.retrieve(key.as_str()).await? else {
            return Ok(None);
        };
        let decrypted = match self.inner.encryption.read().as_ref() {
            Some(ctx) => ctx.provider.decrypt(&raw, &ctx.key)?,
            None => raw,
        };
        let size_bytes = decrypted.len() as u64;
        let value: T = serde_json::from_slice(&decrypted).map_err(|e| Error::Decode {
            key: key.to_string(),
            reason: e.to_string(),
        })?;
        self.insert_entry(key, value.clone(), &options, size_bytes)?;
        Ok(Some(value))
    }

    fn schedule_persist(
        &self,
        key: Key,
        payload: Vec<u8>,
        created_at: chrono::DateTime<Utc>,
        expires_at: Option<chrono::DateTime<Utc>>,
    ) {
        let Some(provider) = self.inner.persistence.clone() else {
            return;
        };
        let inner = self.inner.clone();
        let encryption = self.inner.encryption.read().as_ref().map(|ctx| EncryptionContext {
            provider: ctx.provider.clone(),
            key: ctx.key.clone(),
        });
        tokio::spawn(async move {
            let bytes = match encryption {
                Some(ctx) => match ctx.provider.encrypt(&payload, &ctx.key) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        inner
                            .metrics
                            .persistence_failures
                            .fetch_add(1, Ordering::Relaxed);
                        warn!(key = %key, error = %e, "encryption failed, skipping persistence write");
                        return;
                    }
                },
                None => payload,
            };
            if let Err(e) = provider.persist(key.as_str(), bytes, created_at, expires_at).await {
                inner
                    .metrics
                    .persistence_failures
                    .fetch_add(1, Ordering::Relaxed);
                warn!(key = %key, error = %e, "persistence write failed, in-memory entry unaffected");
            }
        });
    }

    pub fn remove(&self, key: &Key) {
        self.inner.entries.write().remove(key);
        self.inner.hot_set.lock().remove(key);
        if let Some(provider) = self.inner.persistence.clone() {
            let key = key.clone();
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.remove(key.as_str()).await {
                    inner
                        .metrics
                        .persistence_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(key = %key, error = %e, "failed to remove persisted entry");
                }
            });
        }
    }

    pub fn clear(&self) {
        self.inner.entries.write().clear();
        self.inner.hot_set.lock().clear();
        self.inner.tombstones.write().clear();
        if let Some(provider) = self.inner.persistence.clone() {
            let inner = self.inner.clone();
            tokio::spawn(async move {
                if let Err(e) = provider.clear().await {
                    inner
                        .metrics
                        .persistence_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "failed to clear persisted entries");
                }
            });
        }
    }

    /// Remove only secure entries (used on app-paused/detached lifecycle transitions).
    pub fn clear_secure(&self) {
        let mut entries = self.inner.entries.write();
        let secure_keys: Vec<Key> = entries
            .iter()
            .filter(|(_, e)| e.is_secure())
            .map(|(k, _)| k.clone())
            .collect();
        for key in &secure_keys {
            entries.remove(key);
            self.inner.hot_set.lock().remove(key);
        }
    }

    pub fn invalidate(&self, key: &Key) {
        self.inner.tombstones.write().insert(key.clone());
    }

    /// Lazily invalidate every key with the given prefix: mark, don't walk and remove.
    pub fn invalidate_with_prefix(&self, prefix: &str) {
        let keys: Vec<Key> = self
            .inner
            .entries
            .read()
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        let mut tombstones = self.inner.tombstones.write();
        tombstones.extend(keys);
    }

    pub fn invalidate_where(&self, pred: impl Fn(&Key) -> bool) {
        let keys: Vec<Key> = self
            .inner
            .entries
            .read()
            .keys()
            .filter(|k| pred(k))
            .cloned()
            .collect();
        let mut tombstones = self.inner.tombstones.write();
        tombstones.extend(keys);
    }

    #[must_use]
    pub fn is_invalidated(&self, key: &Key) -> bool {
        self.inner.tombstones.read().contains(key)
    }

    /// Run `fetcher` for `key`, coalescing concurrent calls so at most one underlying
    /// invocation is observed.
    pub async fn deduplicate<T, F, Fut>(&self, key: &Key, fetcher: F) -> Result<T>
    where
        T: Clone + Send + Sync + 'static,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut receiver = {
            let mut in_flight = self.inner.in_flight.lock();
            if let Some(sender) = in_flight.get(key) {
                Some(sender.subscribe())
            } else {
                let (tx, _rx) = broadcast::channel(1);
                in_flight.insert(key.clone(), tx);
                None
            }
        };

        if let Some(ref mut rx) = receiver {
            return match rx.recv().await {
                Ok(outcome) => downcast_outcome(outcome),
                Err(_) => Err(Error::Persistence(
                    "in-flight fetch sender dropped before completing".to_string(),
                )),
            };
        }

        let result = fetcher().await;
        let outcome: DedupOutcome = Arc::new(match &result {
            Ok(value) => Ok(Arc::new(value.clone()) as AnyValue),
            Err(e) => Err(e.to_string()),
        });

        let sender = self.inner.in_flight.lock().remove(key);
        if let Some(sender) = sender {
            let _ = sender.send(outcome);
        }

        result
    }

    /// Eviction pass: if over `maxCacheSize` (byte budget) or `maxEntries` (count budget),
    /// evict by policy until both budgets are satisfied. Entries still referenced are
    /// skipped; if pressure can't be relieved the store stays over budget rather than block
    /// writes or evict a referenced entry out from under a live subscriber.
    pub fn evict_if_needed(&self) {
        let config = self.config();
        let (count, total_size, candidates) = {
            let entries = self.inner.entries.read();
            let candidates: Vec<EvictionCandidate> = entries
                .iter()
                .map(|(key, entry)| EvictionCandidate {
                    key: key.clone(),
                    created_at: entry.created_at(),
                    last_accessed_at: entry.last_accessed_at(),
                    access_count: entry.access_count(),
                    reference_count: entry.reference_count(),
                    size_bytes: entry.size_bytes(),
                })
                .collect();
            let total_size: u64 = candidates.iter().map(|c| c.size_bytes).sum();
            (entries.len(), total_size, candidates)
        };

        if config.enable_memory_pressure
            && total_size > config.performance.memory_warning_threshold_bytes
        {
            warn!(
                total_size,
                threshold = config.performance.memory_warning_threshold_bytes,
                "cache store memory pressure threshold exceeded"
            );
        }

        let over_count = count > config.max_entries;
        let over_size = total_size > config.max_cache_size;
        if !over_count && !over_size {
            return;
        }

        let ordered = order_candidates(config.eviction_policy, candidates);
        let mut selected: Vec<Key> = Vec::new();
        if over_count {
            let to_evict = count - config.max_entries;
            selected.extend(ordered.iter().take(to_evict).map(|c| c.key.clone()));
        }
        if over_size {
            let bytes_to_free = total_size.saturating_sub(config.eviction_target_size());
            for key in select_for_budget(&ordered, bytes_to_free) {
                if !selected.contains(&key) {
                    selected.push(key);
                }
            }
        }

        if selected.is_empty() {
            self.inner
                .metrics
                .eviction_failures
                .fetch_add(1, Ordering::Relaxed);
            warn!("eviction pressure could not be relieved: every candidate is referenced");
            return;
        }

        let mut entries = self.inner.entries.write();
        for key in &selected {
            entries.remove(key);
            self.inner.hot_set.lock().remove(key);
            self.inner
                .metrics
                .evictions
                .fetch_add(1, Ordering::Relaxed);
        }
        debug!(evicted = selected.len(), "eviction pass complete");
    }

    /// GC pass: remove every entry with `shouldGC(now)`, including its persisted copy if one
    /// exists.
    pub fn gc(&self) {
        let now = Utc::now();
        let to_remove: Vec<Key> = self
            .inner
            .entries
            .read()
            .iter()
            .filter(|(_, entry)| entry.should_gc(now))
            .map(|(key, _)| key.clone())
            .collect();

        if to_remove.is_empty() {
            return;
        }
        let mut entries = self.inner.entries.write();
        for key in &to_remove {
            entries.remove(key);
            self.inner.hot_set.lock().remove(key);
        }
        drop(entries);
        debug!(collected = to_remove.len(), "gc pass complete");

        if let Some(provider) = self.inner.persistence.clone() {
            let inner = self.inner.clone();
            let removed_keys: Vec<String> = to_remove.iter().map(|k| k.as_str().to_string()).collect();
            tokio::spawn(async move {
                if let Err(e) = provider.remove_multiple(&removed_keys).await {
                    inner
                        .metrics
                        .persistence_failures
                        .fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "failed to remove persisted entries collected by gc");
                }
            });
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.entries.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.entries.read().is_empty()
    }

    /// `true` if `key` is present and still within its `staleTime`. Absent keys are never
    /// fresh.
    #[must_use]
    pub fn is_fresh(&self, key: &Key) -> bool {
        self.inner
            .entries
            .read()
            .get(key)
            .is_some_and(|entry| entry.is_fresh(Utc::now()))
    }

    /// Bump a key's subscriber refcount, blocking it from eviction. A no-op if the key has
    /// no entry yet (a `Query` may subscribe before its first successful fetch).
    pub fn acquire_ref(&self, key: &Key) {
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry.acquire();
        }
    }

    /// Release a previously-acquired subscriber reference.
    pub fn release_ref(&self, key: &Key) {
        if let Some(entry) = self.inner.entries.write().get_mut(key) {
            entry.release();
        }
    }
}

fn downcast_outcome<T: Clone + Send + Sync + 'static>(outcome: DedupOutcome) -> Result<T> {
    match outcome.as_ref() {
        Ok(value) => value
            .downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| Error::Persistence("dedup outcome type mismatch".to_string())),
        Err(msg) => Err(Error::Persistence(msg.clone())),
    }
}

fn to_chrono(d: Duration) -> chrono::Duration {
    chrono::Duration::from_std(d).unwrap_or(chrono::Duration::zero())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn key(s: &str) -> Key {
        Key::new(s).unwrap()
    }

    #[test]
    fn set_then_get_round_trips() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("k"), 42i32, SetOptions::default()).unwrap();
        assert_eq!(store.get::<i32>(&key("k")), Some(42));
    }

    #[test]
    fn get_missing_key_is_none() {
        let store = Store::new(CacheConfig::default());
        assert_eq!(store.get::<i32>(&key("missing")), None);
    }

    #[test]
    fn secure_without_max_age_is_rejected() {
        let store = Store::new(CacheConfig::default());
        let opts = SetOptions {
            is_secure: true,
            ..SetOptions::default()
        };
        let err = store.set(&key("secret"), "s", opts).unwrap_err();
        assert!(matches!(err, Error::Validation(ValidationError::SecureWithoutMaxAge { .. })));
    }

    #[test]
    fn secure_entry_expires_after_max_age() {
        let store = Store::new(CacheConfig::default());
        let opts = SetOptions {
            is_secure: true,
            max_age: Some(Duration::from_millis(1)),
            ..SetOptions::default()
        };
        store.set(&key("s"), "secret", opts).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        assert_eq!(store.get::<&str>(&key("s")), None);
    }

    #[test]
    fn remove_drops_entry() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("k"), 1i32, SetOptions::default()).unwrap();
        store.remove(&key("k"));
        assert_eq!(store.get::<i32>(&key("k")), None);
    }

    #[test]
    fn clear_drops_all_entries() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("a"), 1i32, SetOptions::default()).unwrap();
        store.set(&key("b"), 2i32, SetOptions::default()).unwrap();
        store.clear();
        assert_eq!(store.len(), 0);
    }

    #[test]
    fn clear_secure_only_removes_secure_entries() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("plain"), 1i32, SetOptions::default()).unwrap();
        store
            .set(
                &key("secret"),
                "s",
                SetOptions {
                    is_secure: true,
                    max_age: Some(Duration::from_secs(30)),
                    ..SetOptions::default()
                },
            )
            .unwrap();
        store.clear_secure();
        assert_eq!(store.get::<i32>(&key("plain")), Some(1));
        assert_eq!(store.get::<&str>(&key("secret")), None);
    }

    #[test]
    fn invalidate_marks_key_without_removing_it() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("k"), 1i32, SetOptions::default()).unwrap();
        store.invalidate(&key("k"));
        assert!(store.is_invalidated(&key("k")));
        // lazy invalidation: the value is still physically present until a Query refetches
        assert_eq!(store.get::<i32>(&key("k")), Some(1));
    }

    #[test]
    fn invalidate_with_prefix_marks_matching_keys() {
        let store = Store::new(CacheConfig::default());
        store.set(&key("users:1"), 1i32, SetOptions::default()).unwrap();
        store.set(&key("posts:1"), 2i32, SetOptions::default()).unwrap();
        store.invalidate_with_prefix("users:");
        assert!(store.is_invalidated(&key("users:1")));
        assert!(!store.is_invalidated(&key("posts:1")));
    }

    #[tokio::test]
    async fn deduplicate_coalesces_concurrent_fetchers() {
        let store = Store::new(CacheConfig::default());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let store = store.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                store
                    .deduplicate(&key("users"), || {
                        let calls = calls.clone();
                        async move {
                            calls.fetch_add(1, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(50)).await;
                            Ok::<_, Error>(vec!["a".to_string(), "b".to_string()])
                        }
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        for result in results {
            assert_eq!(result, vec!["a".to_string(), "b".to_string()]);
        }
    }

    #[tokio::test]
    async fn with_lock_serializes_access() {
        let store = Store::new(CacheConfig::default());
        let counter = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..10 {
            let store = store.clone();
            let counter = counter.clone();
            handles.push(tokio::spawn(async move {
                store
                    .with_lock(&key("k"), || {
                        let counter = counter.clone();
                        async move {
                            let before = counter.load(Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(1)).await;
                            counter.store(before + 1, Ordering::SeqCst);
                            Ok::<_, Error>(())
                        }
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn eviction_respects_max_entries() {
        let config = CacheConfig::new().with_max_entries(2);
        let store = Store::new(config);
        store.set(&key("a"), 1i32, SetOptions::default()).unwrap();
        store.set(&key("b"), 2i32, SetOptions::default()).unwrap();
        store.set(&key("c"), 3i32, SetOptions::default()).unwrap();
        assert!(store.len() <= 2);
    }

    #[test]
    fn referenced_entries_survive_eviction_pressure() {
        let config = CacheConfig::new().with_max_entries(1);
        let store = Store::new(config);
        store.set(&key("a"), 1i32, SetOptions::default()).unwrap();
        {
            let mut entries = store.inner.entries.write();
            entries.get_mut(&key("a")).unwrap().acquire();
        }
        store.set(&key("b"), 2i32, SetOptions::default()).unwrap();
        // "a" is referenced, so it cannot be evicted; store goes over budget instead.
        assert_eq!(store.get::<i32>(&key("a")), Some(1));
    }
}
