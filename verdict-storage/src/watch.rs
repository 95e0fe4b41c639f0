//! Change notifications
//!
//! Observers are registered per entity kind. Each watch owns a dispatcher
//! task that delivers `started` first, then one callback per committed
//! mutation in commit order, then `ended` once the watch is closed. A
//! handler never sees two events concurrently.

use crate::model::{decode, Model};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use verdict_core::{EntityKind, StorageError, VerdictError, VerdictResult};

/// Kind of committed mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Created,
    Updated,
}

/// A committed mutation, carrying the post-commit entity snapshot.
#[derive(Debug, Clone)]
pub struct Notification {
    pub kind: EntityKind,
    pub action: Action,
    pub model: Arc<Value>,
}

/// Observer lifecycle hooks. Every hook defaults to a no-op.
#[async_trait]
pub trait EventHandler<M: Model>: Send + 'static {
    /// The watch is installed.
    async fn started(&mut self, _watch_id: u64) {}

    /// A model was created.
    async fn created(&mut self, _model: M) {}

    /// A model was updated.
    async fn updated(&mut self, _model: M) {}

    /// A notification could not be delivered.
    async fn error(&mut self, _error: VerdictError) {}

    /// The watch is closed. No further hooks run.
    async fn ended(&mut self) {}
}

// ============================================================================
// REGISTRY
// ============================================================================

type Subscriber = (u64, mpsc::UnboundedSender<Notification>);

/// Registered watches, keyed by entity kind.
#[derive(Debug, Default)]
pub struct WatchRegistry {
    next_id: AtomicU64,
    watches: Mutex<HashMap<EntityKind, Vec<Subscriber>>>,
}

impl WatchRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Install a handler for models of kind `M::KIND`.
    ///
    /// Must be called from within a tokio runtime; the dispatcher runs as a
    /// task on it.
    pub fn register<M: Model, H: EventHandler<M>>(
        self: &Arc<Self>,
        handler: H,
    ) -> VerdictResult<WatchHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| StorageError::WatchFailed {
            reason: e.to_string(),
        })?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        let (tx, rx) = mpsc::unbounded_channel();
        self.watches
            .lock()
            .unwrap()
            .entry(M::KIND)
            .or_default()
            .push((id, tx));
        let task = runtime.spawn(deliver::<M, H>(id, handler, rx));
        tracing::debug!(watch_id = id, kind = %M::KIND, "Watch started");
        Ok(WatchHandle {
            id,
            kind: M::KIND,
            registry: Arc::clone(self),
            task,
        })
    }

    /// Queue notifications for every watch of the matching kind.
    pub fn dispatch(&self, notifications: Vec<Notification>) {
        if notifications.is_empty() {
            return;
        }
        let watches = self.watches.lock().unwrap();
        for notification in notifications {
            let Some(subscribers) = watches.get(&notification.kind) else {
                continue;
            };
            for (id, tx) in subscribers {
                if tx.send(notification.clone()).is_err() {
                    tracing::warn!(watch_id = id, "Watch dispatcher gone, notification dropped");
                }
            }
        }
    }

    /// Number of open watches for a kind.
    pub fn watch_count(&self, kind: EntityKind) -> usize {
        self.watches
            .lock()
            .unwrap()
            .get(&kind)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn remove(&self, kind: EntityKind, id: u64) {
        if let Some(subscribers) = self.watches.lock().unwrap().get_mut(&kind) {
            subscribers.retain(|(watch_id, _)| *watch_id != id);
        }
    }
}

async fn deliver<M: Model, H: EventHandler<M>>(
    id: u64,
    mut handler: H,
    mut rx: mpsc::UnboundedReceiver<Notification>,
) {
    handler.started(id).await;
    while let Some(notification) = rx.recv().await {
        match decode::<M>(notification.model.as_ref().clone()) {
            Ok(model) => match notification.action {
                Action::Created => handler.created(model).await,
                Action::Updated => handler.updated(model).await,
            },
            Err(e) => handler.error(e).await,
        }
    }
    handler.ended().await;
    tracing::debug!(watch_id = id, kind = %M::KIND, "Watch ended");
}

// ============================================================================
// HANDLE
// ============================================================================

/// An installed watch. Dropping the handle leaves the watch running.
#[derive(Debug)]
pub struct WatchHandle {
    id: u64,
    kind: EntityKind,
    registry: Arc<WatchRegistry>,
    task: JoinHandle<()>,
}

impl WatchHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    /// Close the watch and wait for the handler's `ended` hook to finish.
    /// Notifications already queued are delivered first.
    pub async fn end(self) -> VerdictResult<()> {
        self.registry.remove(self.kind, self.id);
        self.task.await.map_err(|e| {
            StorageError::WatchFailed {
                reason: e.to_string(),
            }
            .into()
        })
    }
}
