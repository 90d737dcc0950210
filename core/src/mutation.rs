//! The mutation controller: a one-shot write operation with an optional durable offline
//! queue fallback.
//!
//! Mirrors `Query`'s state-machine idiom (`tokio::sync::watch` snapshot, same lifecycle
//! callback shape) but without caching or subscriber refcounting — a mutation fires once
//! per call and reports Idle/Loading/Success/Error/Queued.

use crate::config::MutationOptions;
use crate::error::{Error, Result};
use crate::offline_queue::{OfflineMutationEntry, OfflineQueue};
use chrono::Utc;
use futures::future::BoxFuture;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

/// Lifecycle status of a [`Mutation`] invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutationStatus {
    Idle,
    Loading,
    Success,
    Error,
    /// Offline and `queueWhenOffline` is set: durably queued for later replay.
    Queued,
}

#[derive(Debug, Clone)]
pub struct MutationState<T> {
    pub status: MutationStatus,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> Default for MutationState<T> {
    fn default() -> Self {
        Self {
            status: MutationStatus::Idle,
            data: None,
            error: None,
        }
    }
}

type Handler<TVariables, TData> =
    Arc<dyn Fn(TVariables) -> BoxFuture<'static, Result<TData>> + Send + Sync>;

/// Optional lifecycle callbacks invoked around a mutation's execution.
pub struct MutationCallbacks<TVariables, TData> {
    pub on_mutate: Option<Arc<dyn Fn(&TVariables) + Send + Sync>>,
    pub on_success: Option<Arc<dyn Fn(&TData, &TVariables) + Send + Sync>>,
    pub on_error: Option<Arc<dyn Fn(&Error, &TVariables) + Send + Sync>>,
    pub on_queued: Option<Arc<dyn Fn(&TVariables) + Send + Sync>>,
}

impl<TVariables, TData> Default for MutationCallbacks<TVariables, TData> {
    fn default() -> Self {
        Self {
            on_mutate: None,
            on_success: None,
            on_error: None,
            on_queued: None,
        }
    }
}

/// A registered mutation type: its handler, options, and callbacks. `mutation_type` is the
/// explicit identity used for offline-queue replay — handlers are looked up by this name
/// rather than by comparing function pointers, since closures aren't reliably comparable or
/// reconstructible across a process restart.
pub struct Mutation<TVariables, TData> {
    mutation_type: String,
    handler: Handler<TVariables, TData>,
    options: MutationOptions,
    callbacks: MutationCallbacks<TVariables, TData>,
    offline_queue: Option<Arc<OfflineQueue>>,
    state_tx: Arc<watch::Sender<MutationState<TData>>>,
}

impl<TVariables, TData> Mutation<TVariables, TData>
where
    TVariables: Clone + serde::Serialize + Send + Sync + 'static,
    TData: Clone + Send + Sync + 'static,
{
    #[must_use]
    pub fn new(
        mutation_type: impl Into<String>,
        handler: Handler<TVariables, TData>,
        options: MutationOptions,
        callbacks: MutationCallbacks<TVariables, TData>,
        offline_queue: Option<Arc<OfflineQueue>>,
    ) -> Self {
        let (state_tx, _rx) = watch::channel(MutationState::default());
        Self {
            mutation_type: mutation_type.into(),
            handler,
            options,
            callbacks,
            offline_queue,
            state_tx: Arc::new(state_tx),
        }
    }

    #[must_use]
    pub fn subscribe_to_state(&self) -> watch::Receiver<MutationState<TData>> {
        self.state_tx.subscribe()
    }

    #[must_use]
    pub fn current_state(&self) -> MutationState<TData> {
        self.state_tx.borrow().clone()
    }

    /// Run the mutation. If the network is offline and `queue_when_offline` is set, the
    /// variables are durably queued instead of invoked inline and `Queued` is published.
    pub async fn mutate(
        &self,
        variables: TVariables,
        network_online: bool,
    ) -> Result<Option<TData>> {
        if let Some(on_mutate) = &self.callbacks.on_mutate {
            on_mutate(&variables);
        }

        if !network_online && self.options.queue_when_offline {
            return self.enqueue_offline(variables).await.map(|()| None);
        }

        self.state_tx.send_modify(|state| {
            state.status = MutationStatus::Loading;
        });

        match (self.handler)(variables.clone()).await {
            Ok(data) => {
                if let Some(on_success) = &self.callbacks.on_success {
                    on_success(&data, &variables);
                }
                self.state_tx.send_replace(MutationState {
                    status: MutationStatus::Success,
                    data: Some(data.clone()),
                    error: None,
                });
                Ok(Some(data))
            }
            Err(e) => {
                if let Some(on_error) = &self.callbacks.on_error {
                    on_error(&e, &variables);
                }
                self.state_tx.send_replace(MutationState {
                    status: MutationStatus::Error,
                    data: None,
                    error: Some(e.to_string()),
                });
                Err(e)
            }
        }
    }

    async fn enqueue_offline(&self, variables: TVariables) -> Result<()> {
        let Some(queue) = &self.offline_queue else {
            return Err(Error::ConfigurationConflict(
                "queue_when_offline is set but no offline queue was configured".to_string(),
            ));
        };

        let payload = serde_json::to_value(&variables)
            .map_err(|e| Error::Persistence(format!("failed to encode mutation variables: {e}")))?;

        let entry = OfflineMutationEntry {
            id: uuid::Uuid::new_v4().to_string(),
            owner_key: self.mutation_type.clone(),
            mutation_type: self.mutation_type.clone(),
            variables: payload,
            created_at: Utc::now(),
            attempts: 0,
            last_error: None,
            priority: self.options.priority,
        };

        queue.enqueue(entry).await?;
        if let Some(on_queued) = &self.callbacks.on_queued {
            on_queued(&variables);
        }
        self.state_tx.send_modify(|state| {
            state.status = MutationStatus::Queued;
        });
        debug!(mutation_type = %self.mutation_type, "mutation queued for offline replay");
        Ok(())
    }
}
