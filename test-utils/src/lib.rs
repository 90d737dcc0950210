//! # Test Utilities
//!
//! Shared test fixtures for exercising `fasq-core` without each test hand-rolling a
//! fetcher, an `Entry`, or a fake provider.
//!
//! Provides:
//! - Cache entry / config / option builders
//! - In-memory fake [`PersistenceProvider`], [`EncryptionProvider`], [`KeystoreProvider`]
//! - Fetcher/handler constructors with call counting for dedup and retry assertions

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use fasq_core::cancellation::CancellationToken;
use fasq_core::config::{CacheConfig, QueryOptions};
use fasq_core::entry::Entry;
use fasq_core::error::{Error, Result};
use fasq_core::providers::{EncryptionProvider, KeystoreProvider, PersistenceProvider};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Build an [`Entry`] as of now with the given staleness/cache windows, zero access count.
#[must_use]
pub fn test_entry<T>(data: T, stale_time: std::time::Duration, cache_time: std::time::Duration) -> Entry<T> {
    Entry::new(data, true, Utc::now(), stale_time, cache_time, false, None)
}

/// A [`CacheConfig`] tuned small for fast eviction-pressure tests.
#[must_use]
pub fn small_cache_config(max_entries: usize) -> CacheConfig {
    CacheConfig::new()
        .with_max_entries(max_entries)
        .with_max_cache_size(1024 * 1024)
}

/// [`QueryOptions`] with an immediate stale time (every fetch is considered stale).
#[must_use]
pub fn always_stale_options() -> QueryOptions {
    QueryOptions::new()
}

/// [`QueryOptions`] that never go stale within the test's lifetime.
#[must_use]
pub fn never_stale_options() -> QueryOptions {
    QueryOptions::new().with_stale_time(std::time::Duration::from_secs(3600))
}

/// A call-counted fetcher that always succeeds with `value`.
#[must_use]
pub fn counting_ok_fetcher<T>(
    value: T,
) -> (
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync>,
    Arc<AtomicUsize>,
)
where
    T: Clone + Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_fetcher = calls.clone();
    let fetcher = Arc::new(move |_token: CancellationToken| {
        let value = value.clone();
        let calls = calls_for_fetcher.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(value)
        }) as BoxFuture<'static, Result<T>>
    });
    (fetcher, calls)
}

/// A call-counted fetcher that always fails with [`DummyFetchError`].
#[must_use]
pub fn counting_err_fetcher<T>() -> (
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync>,
    Arc<AtomicUsize>,
)
where
    T: Send + Sync + 'static,
{
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_for_fetcher = calls.clone();
    let fetcher = Arc::new(move |_token: CancellationToken| {
        let calls = calls_for_fetcher.clone();
        Box::pin(async move {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::fetcher(DummyFetchError))
        }) as BoxFuture<'static, Result<T>>
    });
    (fetcher, calls)
}

/// A fetcher that fails `failures_before_success` times, then succeeds with `value` —
/// useful for exercising retry policies without waiting on a real flaky dependency.
#[must_use]
pub fn flaky_fetcher<T>(
    value: T,
    failures_before_success: usize,
) -> Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<T>> + Send + Sync>
where
    T: Clone + Send + Sync + 'static,
{
    let attempts = Arc::new(AtomicUsize::new(0));
    Arc::new(move |_token: CancellationToken| {
        let value = value.clone();
        let attempts = attempts.clone();
        Box::pin(async move {
            let attempt = attempts.fetch_add(1, Ordering::SeqCst);
            if attempt < failures_before_success {
                Err(Error::fetcher(DummyFetchError))
            } else {
                Ok(value)
            }
        })
    })
}

#[derive(Debug, thiserror::Error)]
#[error("dummy fetch failure")]
pub struct DummyFetchError;

/// An in-memory [`PersistenceProvider`] backed by a `tokio::sync::Mutex<HashMap<..>>`
/// instead of the filesystem, so persistence behavior can be asserted without touching
/// disk.
#[derive(Default)]
pub struct InMemoryPersistenceProvider {
    records: Mutex<HashMap<String, (Vec<u8>, DateTime<Utc>, Option<DateTime<Utc>>)>>,
}

impl InMemoryPersistenceProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn contains(&self, key: &str) -> bool {
        self.records.lock().await.contains_key(key)
    }
}

#[async_trait]
impl PersistenceProvider for InMemoryPersistenceProvider {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn persist(
        &self,
        key: &str,
        bytes: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        self.records
            .lock()
            .await
            .insert(key.to_string(), (bytes, created_at, expires_at));
        Ok(())
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.records.lock().await.get(key).map(|(bytes, ..)| bytes.clone()))
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.records.lock().await.remove(key);
        Ok(())
    }

    async fn remove_multiple(&self, keys: &[String]) -> Result<()> {
        let mut records = self.records.lock().await;
        for key in keys {
            records.remove(key);
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        Ok(self.records.lock().await.keys().cloned().collect())
    }

    async fn clear(&self) -> Result<()> {
        self.records.lock().await.clear();
        Ok(())
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

/// A no-op [`EncryptionProvider`] that passes bytes through unchanged — lets persistence
/// tests exercise the encrypt/decrypt call sites without a real cipher.
pub struct IdentityEncryptionProvider;

impl EncryptionProvider for IdentityEncryptionProvider {
    fn encrypt(&self, bytes: &[u8], _key: &str) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decrypt(&self, bytes: &[u8], _key: &str) -> Result<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn is_valid_key(&self, key: &str) -> bool {
        !key.is_empty()
    }
}

/// A [`KeystoreProvider`] that hands back a fixed, in-memory key — no platform keychain
/// involved.
pub struct StaticKeystoreProvider {
    key: Mutex<Option<String>>,
}

impl StaticKeystoreProvider {
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: Mutex::new(Some(key.into())),
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            key: Mutex::new(None),
        }
    }
}

#[async_trait]
impl KeystoreProvider for StaticKeystoreProvider {
    async fn init(&self) -> Result<()> {
        Ok(())
    }

    async fn get_encryption_key(&self) -> Result<Option<String>> {
        Ok(self.key.lock().await.clone())
    }

    async fn generate_and_store_key(&self) -> Result<String> {
        let generated = uuid::Uuid::new_v4().to_string();
        *self.key.lock().await = Some(generated.clone());
        Ok(generated)
    }

    async fn dispose(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_entry_round_trips_data() {
        let entry = test_entry(42, Duration::from_secs(0), Duration::from_secs(60));
        assert_eq!(*entry.data(), 42);
        assert!(entry.has_value());
    }

    #[tokio::test]
    async fn counting_ok_fetcher_counts_invocations() {
        let (fetcher, calls) = counting_ok_fetcher(7);
        let result = fetcher(CancellationToken::new()).await.unwrap();
        assert_eq!(result, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn flaky_fetcher_succeeds_after_configured_failures() {
        let fetcher = flaky_fetcher(1, 2);
        assert!(fetcher(CancellationToken::new()).await.is_err());
        assert!(fetcher(CancellationToken::new()).await.is_err());
        assert_eq!(fetcher(CancellationToken::new()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn in_memory_persistence_provider_round_trips() {
        let provider = InMemoryPersistenceProvider::new();
        provider
            .persist("k", vec![1, 2, 3], Utc::now(), None)
            .await
            .unwrap();
        assert!(provider.contains("k").await);
        let retrieved = provider.retrieve("k").await.unwrap();
        assert_eq!(retrieved, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn static_keystore_provider_generates_and_returns_key() {
        let keystore = StaticKeystoreProvider::empty();
        assert!(keystore.get_encryption_key().await.unwrap().is_none());
        let generated = keystore.generate_and_store_key().await.unwrap();
        assert_eq!(keystore.get_encryption_key().await.unwrap(), Some(generated));
    }
}
