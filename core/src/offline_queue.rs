//! Durable offline mutation queue: mutations made while the network is unreachable are
//! appended here instead of failing, then replayed in priority order once connectivity
//! returns.
//!
//! Persisted as one JSON file the way [`crate::providers::FilesystemPersistenceProvider`]
//! persists cache entries — a per-app data directory via `dirs::data_dir()`, falling back to
//! the system temp directory — except the whole queue lives in a single file
//! (`fasq_offline_queue.json`) since it must be read back and replayed as an ordered list on
//! startup, not looked up by key.

use crate::config::MutationPriority;
use crate::constants::defaults;
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{Mutex as AsyncMutex, RwLock};
use tracing::{debug, info, warn};

/// One durably-queued mutation awaiting replay.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct OfflineMutationEntry {
    pub id: String,
    /// The cache key (if any) this mutation is logically associated with, for observers.
    pub owner_key: String,
    /// Explicit type identity used to look up a replay handler — see [`Mutation`]'s doc
    /// comment on why this is a name rather than a function reference.
    ///
    /// [`Mutation`]: crate::mutation::Mutation
    pub mutation_type: String,
    pub variables: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub priority: MutationPriority,
}

type ReplayHandler = Arc<dyn Fn(serde_json::Value) -> BoxFuture<'static, Result<()>> + Send + Sync>;

struct Inner {
    path: PathBuf,
    entries: RwLock<Vec<OfflineMutationEntry>>,
    handlers: RwLock<HashMap<String, ReplayHandler>>,
    write_lock: AsyncMutex<()>,
    retry_cap: u32,
}

/// The durable offline mutation queue.
pub struct OfflineQueue {
    inner: Arc<Inner>,
}

impl OfflineQueue {
    /// A queue rooted at `app_name`'s durable data directory.
    #[must_use]
    pub fn new(app_name: &str) -> Self {
        let root = dirs::data_dir()
            .map(|dir| dir.join(app_name))
            .unwrap_or_else(|| std::env::temp_dir().join(app_name));
        Self::at(root.join(defaults::OFFLINE_QUEUE_FILE_NAME))
    }

    /// A queue rooted at an explicit file path (tests use this with a `tempfile::TempDir`).
    #[must_use]
    pub fn at(path: PathBuf) -> Self {
        Self {
            inner: Arc::new(Inner {
                path,
                entries: RwLock::new(Vec::new()),
                handlers: RwLock::new(HashMap::new()),
                write_lock: AsyncMutex::new(()),
                retry_cap: defaults::OFFLINE_QUEUE_RETRY_CAP,
            }),
        }
    }

    /// Load any previously-persisted entries from disk. A missing file is not an error: the
    /// queue simply starts empty.
    pub async fn load(&self) -> Result<()> {
        match tokio::fs::read(&self.inner.path).await {
            Ok(raw) => {
                let entries: Vec<OfflineMutationEntry> = serde_json::from_slice(&raw)
                    .map_err(|e| Error::Decode {
                        key: self.inner.path.display().to_string(),
                        reason: e.to_string(),
                    })?;
                *self.inner.entries.write().await = entries;
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::Persistence(format!(
                "failed to read offline queue: {e}"
            ))),
        }
    }

    /// Register the handler invoked to replay mutations of `mutation_type`.
    pub async fn register_handler(&self, mutation_type: impl Into<String>, handler: ReplayHandler) {
        self.inner
            .handlers
            .write()
            .await
            .insert(mutation_type.into(), handler);
    }

    /// Append `entry` and persist. Entries are kept sorted by descending priority, ties
    /// broken by insertion (FIFO) order.
    pub async fn enqueue(&self, entry: OfflineMutationEntry) -> Result<()> {
        {
            let mut entries = self.inner.entries.write().await;
            entries.push(entry);
            entries.sort_by(|a, b| b.priority.cmp(&a.priority));
        }
        self.persist().await
    }

    pub async fn remove(&self, id: &str) -> Result<()> {
        {
            let mut entries = self.inner.entries.write().await;
            entries.retain(|e| e.id != id);
        }
        self.persist().await
    }

    pub async fn clear(&self) -> Result<()> {
        self.inner.entries.write().await.clear();
        self.persist().await
    }

    #[must_use]
    pub async fn len(&self) -> usize {
        self.inner.entries.read().await.len()
    }

    #[must_use]
    pub async fn is_empty(&self) -> bool {
        self.inner.entries.read().await.is_empty()
    }

    async fn persist(&self) -> Result<()> {
        let _guard = self.inner.write_lock.lock().await;
        let entries = self.inner.entries.read().await.clone();
        let encoded = serde_json::to_vec(&entries)
            .map_err(|e| Error::Persistence(format!("failed to encode offline queue: {e}")))?;
        if let Some(parent) = self.inner.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Persistence(format!("failed to create queue dir: {e}")))?;
        }
        tokio::fs::write(&self.inner.path, encoded)
            .await
            .map_err(|e| Error::Persistence(format!("failed to write offline queue: {e}")))
    }

    /// Replay every queued entry whose `mutation_type` has a registered handler, in priority
    /// order. Processing halts as soon as any entry has reached the retry cap: that entry is
    /// left in the queue (not dropped) and entries behind it are left untouched until it is
    /// resolved, rather than being silently skipped over.
    pub async fn process_queue(&self) -> Result<()> {
        let pending: Vec<OfflineMutationEntry> = self.inner.entries.read().await.clone();
        for entry in pending {
            if self.process_one(entry).await == ProcessOutcome::Halted {
                break;
            }
        }
        Ok(())
    }

    /// Replay only entries of one `mutation_type` (used after registering a handler late, or
    /// to retry a specific mutation kind without draining the whole queue). Subject to the
    /// same halt-on-retry-cap behavior as [`Self::process_queue`], scoped to this type.
    pub async fn process_queue_by_type(&self, mutation_type: &str) -> Result<()> {
        let pending: Vec<OfflineMutationEntry> = self
            .inner
            .entries
            .read()
            .await
            .iter()
            .filter(|e| e.mutation_type == mutation_type)
            .cloned()
            .collect();
        for entry in pending {
            if self.process_one(entry).await == ProcessOutcome::Halted {
                break;
            }
        }
        Ok(())
    }

    async fn process_one(&self, entry: OfflineMutationEntry) -> ProcessOutcome {
        if entry.attempts >= self.inner.retry_cap {
            warn!(
                id = %entry.id,
                mutation_type = %entry.mutation_type,
                "offline mutation reached the retry cap, halting queue processing"
            );
            return ProcessOutcome::Halted;
        }

        let handler = self.inner.handlers.read().await.get(&entry.mutation_type).cloned();
        let Some(handler) = handler else {
            debug!(mutation_type = %entry.mutation_type, "no handler registered yet, leaving queued");
            return ProcessOutcome::Continue;
        };

        match handler(entry.variables.clone()).await {
            Ok(()) => {
                info!(id = %entry.id, mutation_type = %entry.mutation_type, "replayed offline mutation");
                let _ = self.remove(&entry.id).await;
                ProcessOutcome::Continue
            }
            Err(e) => {
                warn!(id = %entry.id, mutation_type = %entry.mutation_type, error = %e, "offline mutation replay failed");
                let mut entries = self.inner.entries.write().await;
                if let Some(stored) = entries.iter_mut().find(|x| x.id == entry.id) {
                    stored.attempts += 1;
                    stored.last_error = Some(e.to_string());
                }
                drop(entries);
                let _ = self.persist().await;
                ProcessOutcome::Continue
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessOutcome {
    Continue,
    Halted,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    fn queue() -> (TempDir, OfflineQueue) {
        let dir = TempDir::new().unwrap();
        let queue = OfflineQueue::at(dir.path().join("queue.json"));
        (dir, queue)
    }

    fn entry(id: &str, priority: MutationPriority) -> OfflineMutationEntry {
        OfflineMutationEntry {
            id: id.to_string(),
            owner_key: "users:1".to_string(),
            mutation_type: "update_user".to_string(),
            variables: serde_json::json!({ "name": "a" }),
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            priority,
        }
    }

    #[tokio::test]
    async fn enqueue_persists_and_reloads() {
        let (_dir, queue) = queue();
        queue.enqueue(entry("1", 0)).await.unwrap();
        assert_eq!(queue.len().await, 1);

        let reloaded = OfflineQueue::at(queue.inner.path.clone());
        reloaded.load().await.unwrap();
        assert_eq!(reloaded.len().await, 1);
    }

    #[tokio::test]
    async fn higher_priority_entries_sort_first() {
        let (_dir, queue) = queue();
        queue.enqueue(entry("low", 0)).await.unwrap();
        queue.enqueue(entry("high", 10)).await.unwrap();

        let entries = queue.inner.entries.read().await.clone();
        assert_eq!(entries[0].id, "high");
    }

    #[tokio::test]
    async fn process_queue_removes_entry_on_success() {
        let (_dir, queue) = queue();
        queue.enqueue(entry("1", 0)).await.unwrap();
        queue
            .register_handler("update_user", Arc::new(|_vars| Box::pin(async { Ok(()) })))
            .await;

        queue.process_queue().await.unwrap();
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn failed_replay_increments_attempts_and_keeps_entry() {
        let (_dir, queue) = queue();
        queue.enqueue(entry("1", 0)).await.unwrap();
        queue
            .register_handler(
                "update_user",
                Arc::new(|_vars| Box::pin(async { Err(Error::fetcher(DummyError)) })),
            )
            .await;

        queue.process_queue().await.unwrap();
        let entries = queue.inner.entries.read().await.clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].attempts, 1);
        assert!(entries[0].last_error.is_some());
    }

    #[tokio::test]
    async fn processing_halts_once_an_entry_exceeds_the_retry_cap() {
        let (_dir, queue) = queue();
        let mut capped = entry("1", 0);
        capped.attempts = defaults::OFFLINE_QUEUE_RETRY_CAP;
        queue.enqueue(capped).await.unwrap();
        queue.enqueue(entry("2", 0)).await.unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_handler = calls.clone();
        queue
            .register_handler(
                "update_user",
                Arc::new(move |_vars| {
                    calls_for_handler.fetch_add(1, Ordering::SeqCst);
                    Box::pin(async { Ok(()) })
                }),
            )
            .await;

        queue.process_queue().await.unwrap();

        assert_eq!(queue.len().await, 2, "capped entry stays queued, entry behind it is untouched");
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[derive(Debug, thiserror::Error)]
    #[error("dummy")]
    struct DummyError;
}
