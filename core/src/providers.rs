//! Pluggable persistence, encryption, and keystore contracts.
//!
//! Concrete encryption/keystore backends are intentionally out of scope here — this module
//! only defines the trait contracts the store depends on, plus one filesystem-backed
//! [`PersistenceProvider`]: periodic background task, `parking_lot::RwLock`-guarded state,
//! `tokio::time::interval`.

use crate::error::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Resolves and stores the symmetric key used to encrypt persisted entries.
#[async_trait]
pub trait KeystoreProvider: Send + Sync {
    /// Initialize the keystore (open a platform keychain, mount a secret store, ...).
    async fn init(&self) -> Result<()>;

    /// Fetch the current encryption key, if one has been generated.
    async fn get_encryption_key(&self) -> Result<Option<String>>;

    /// Generate a new key, persist it in the keystore, and return it.
    async fn generate_and_store_key(&self) -> Result<String>;

    /// Release any held resources.
    async fn dispose(&self) -> Result<()>;
}

/// Encrypts and decrypts the serialized bytes written to a [`PersistenceProvider`].
pub trait EncryptionProvider: Send + Sync {
    fn encrypt(&self, bytes: &[u8], key: &str) -> Result<Vec<u8>>;
    fn decrypt(&self, bytes: &[u8], key: &str) -> Result<Vec<u8>>;
    fn is_valid_key(&self, key: &str) -> bool;
}

/// Durable blob storage for encrypted, serialized cache entries.
#[async_trait]
pub trait PersistenceProvider: Send + Sync {
    async fn init(&self) -> Result<()>;

    /// Persist `bytes` under `key`. `expires_at` is stored alongside for the
    /// persistence-GC reconciliation pass; it is opaque to the provider otherwise.
    async fn persist(
        &self,
        key: &str,
        bytes: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()>;

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>>;

    async fn remove(&self, key: &str) -> Result<()>;

    async fn remove_multiple(&self, keys: &[String]) -> Result<()>;

    async fn get_all_keys(&self) -> Result<Vec<String>>;

    async fn clear(&self) -> Result<()>;

    async fn dispose(&self) -> Result<()>;
}

/// One persisted record as written to disk by [`FilesystemPersistenceProvider`].
///
/// The actual entry payload plus the fields needed to validate it on reload without
/// decrypting.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
struct PersistedRecord {
    bytes: Vec<u8>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
}

/// A [`PersistenceProvider`] backed by one file per key under a durable per-app directory.
///
/// Resolves its root directory the way the offline queue does: a per-app data directory
/// via `dirs::data_dir()`, falling back to the system temp directory on platforms where
/// that is unavailable.
pub struct FilesystemPersistenceProvider {
    root: PathBuf,
}

impl FilesystemPersistenceProvider {
    /// Build a provider rooted at `app_name`'s durable data directory.
    #[must_use]
    pub fn new(app_name: &str) -> Self {
        let root = dirs::data_dir()
            .map(|dir| dir.join(app_name).join("cache"))
            .unwrap_or_else(|| std::env::temp_dir().join(app_name).join("cache"));
        Self { root }
    }

    /// Build a provider rooted at an explicit directory (tests use this with a
    /// `tempfile::TempDir`).
    #[must_use]
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        // Keys are already validated against `[A-Za-z0-9:_-]`, which contains no path
        // separators, so this is safe to use directly as a filename.
        self.root.join(format!("{key}.json"))
    }
}

#[async_trait]
impl PersistenceProvider for FilesystemPersistenceProvider {
    async fn init(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Persistence(format!("failed to create cache dir: {e}")))
    }

    async fn persist(
        &self,
        key: &str,
        bytes: Vec<u8>,
        created_at: DateTime<Utc>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let record = PersistedRecord {
            bytes,
            created_at,
            expires_at,
        };
        let encoded = serde_json::to_vec(&record)
            .map_err(|e| Error::Persistence(format!("failed to encode record for '{key}': {e}")))?;
        let path = self.path_for(key);
        tokio::fs::write(&path, encoded)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write '{}': {e}", path.display())))
    }

    async fn retrieve(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key);
        match tokio::fs::read(&path).await {
            Ok(raw) => {
                let record: PersistedRecord = serde_json::from_slice(&raw).map_err(|e| {
                    Error::Decode {
                        key: key.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                Ok(Some(record.bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Persistence(format!(
                "failed to read '{}': {e}",
                path.display()
            ))),
        }
    }

    async fn remove(&self, key: &str) -> Result<()> {
        let path = self.path_for(key);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "failed to remove '{}': {e}",
                path.display()
            ))),
        }
    }

    async fn remove_multiple(&self, keys: &[String]) -> Result<()> {
        for key in keys {
            if let Err(e) = self.remove(key).await {
                warn!(key, error = %e, "failed to remove persisted entry during batch removal");
            }
        }
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<Vec<String>> {
        let mut keys = Vec::new();
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(keys),
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "failed to list '{}': {e}",
                    self.root.display()
                )))
            }
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Persistence(format!("failed to iterate cache dir: {e}")))?
        {
            if let Some(stem) = Path::new(&entry.file_name())
                .file_stem()
                .and_then(|s| s.to_str())
            {
                keys.push(stem.to_string());
            }
        }
        Ok(keys)
    }

    async fn clear(&self) -> Result<()> {
        let keys = self.get_all_keys().await?;
        self.remove_multiple(&keys).await
    }

    async fn dispose(&self) -> Result<()> {
        debug!("disposing filesystem persistence provider");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn provider() -> (TempDir, FilesystemPersistenceProvider) {
        let dir = TempDir::new().unwrap();
        let provider = FilesystemPersistenceProvider::at(dir.path());
        (dir, provider)
    }

    #[tokio::test]
    async fn persist_and_retrieve_round_trips() {
        let (_dir, provider) = provider();
        provider.init().await.unwrap();
        provider
            .persist("users:1", b"hello".to_vec(), Utc::now(), None)
            .await
            .unwrap();

        let bytes = provider.retrieve("users:1").await.unwrap();
        assert_eq!(bytes, Some(b"hello".to_vec()));
    }

    #[tokio::test]
    async fn retrieve_missing_key_returns_none() {
        let (_dir, provider) = provider();
        provider.init().await.unwrap();
        assert_eq!(provider.retrieve("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let (_dir, provider) = provider();
        provider.init().await.unwrap();
        provider
            .persist("k", b"v".to_vec(), Utc::now(), None)
            .await
            .unwrap();
        provider.remove("k").await.unwrap();
        provider.remove("k").await.unwrap();
        assert_eq!(provider.retrieve("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn get_all_keys_lists_persisted_entries() {
        let (_dir, provider) = provider();
        provider.init().await.unwrap();
        provider.persist("a", b"1".to_vec(), Utc::now(), None).await.unwrap();
        provider.persist("b", b"2".to_vec(), Utc::now(), None).await.unwrap();

        let mut keys = provider.get_all_keys().await.unwrap();
        keys.sort();
        assert_eq!(keys, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn clear_removes_everything() {
        let (_dir, provider) = provider();
        provider.init().await.unwrap();
        provider.persist("a", b"1".to_vec(), Utc::now(), None).await.unwrap();
        provider.clear().await.unwrap();
        assert!(provider.get_all_keys().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn corrupt_record_surfaces_decode_error() {
        let (dir, provider) = provider();
        provider.init().await.unwrap();
        tokio::fs::write(dir.path().join("bad.json"), b"not json")
            .await
            .unwrap();

        let err = provider.retrieve("bad").await.unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }
}
