//! Observable network connectivity flag.
//!
//! A thin `tokio::sync::watch` wrapper (the same broadcast idiom `Query` and `Mutation` use
//! for state) that de-duplicates repeated reports of the same state and, on an
//! offline-to-online transition, drains the [`crate::offline_queue::OfflineQueue`].

use crate::offline_queue::OfflineQueue;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

/// Tracks whether the network is currently reachable and triggers offline-queue replay on
/// reconnect.
pub struct NetworkStatus {
    tx: watch::Sender<bool>,
    offline_queue: Option<Arc<OfflineQueue>>,
}

impl NetworkStatus {
    #[must_use]
    pub fn new(initially_online: bool, offline_queue: Option<Arc<OfflineQueue>>) -> Self {
        let (tx, _rx) = watch::channel(initially_online);
        Self { tx, offline_queue }
    }

    #[must_use]
    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }

    /// Report a connectivity reading. A reading equal to the current state is a no-op; an
    /// offline-to-online transition spawns a queue-drain pass.
    pub fn report(&self, online: bool) {
        let was_online = *self.tx.borrow();
        if was_online == online {
            return;
        }
        let _ = self.tx.send(online);

        if online {
            info!("network back online, draining offline mutation queue");
            if let Some(queue) = self.offline_queue.clone() {
                tokio::spawn(async move {
                    if let Err(e) = queue.process_queue().await {
                        tracing::warn!(error = %e, "offline queue drain failed");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_reports_do_not_emit_a_transition() {
        let status = NetworkStatus::new(true, None);
        let mut rx = status.subscribe();
        status.report(true);
        assert!(rx.has_changed().is_ok_and(|changed| !changed));
    }

    #[test]
    fn offline_to_online_updates_is_online() {
        let status = NetworkStatus::new(false, None);
        assert!(!status.is_online());
        status.report(true);
        assert!(status.is_online());
    }

    #[tokio::test]
    async fn reconnect_drains_offline_queue() {
        let dir = tempfile::TempDir::new().unwrap();
        let queue = Arc::new(OfflineQueue::at(dir.path().join("queue.json")));
        queue
            .enqueue(crate::offline_queue::OfflineMutationEntry {
                id: "1".to_string(),
                owner_key: "k".to_string(),
                mutation_type: "noop".to_string(),
                variables: serde_json::json!({}),
                created_at: chrono::Utc::now(),
                attempts: 0,
                last_error: None,
                priority: 0,
            })
            .await
            .unwrap();
        queue
            .register_handler("noop", Arc::new(|_v| Box::pin(async { Ok(()) })))
            .await;

        let status = NetworkStatus::new(false, Some(queue.clone()));
        status.report(true);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert!(queue.is_empty().await);
    }
}
