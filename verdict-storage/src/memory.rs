//! In-memory inventory store
//!
//! One table per entity kind, guarded by a single async mutex. A transaction
//! owns the mutex guard for its whole life and stages writes in an overlay;
//! commit folds the overlay into the tables and queues notifications before
//! releasing the guard, so watches observe mutations in commit order.

use crate::model::{decode, encode, Model};
use crate::watch::{Action, EventHandler, Notification, WatchHandle, WatchRegistry};
use crate::{InventoryStore, ListOptions};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::OwnedMutexGuard;
use verdict_core::{EntityId, EntityKind, StorageError, VerdictResult};

#[derive(Debug, Default)]
struct Tables {
    tables: HashMap<EntityKind, BTreeMap<EntityId, Value>>,
}

impl Tables {
    fn get(&self, kind: EntityKind, id: &str) -> Option<&Value> {
        self.tables.get(&kind).and_then(|t| t.get(id))
    }

    fn contains(&self, kind: EntityKind, id: &str) -> bool {
        self.get(kind, id).is_some()
    }

    fn put(&mut self, kind: EntityKind, id: EntityId, value: Value) {
        self.tables.entry(kind).or_default().insert(id, value);
    }

    fn iter(&self, kind: EntityKind) -> impl Iterator<Item = (&EntityId, &Value)> {
        self.tables.get(&kind).into_iter().flat_map(|t| t.iter())
    }
}

#[derive(Debug, Default)]
struct Counters {
    commits: AtomicU64,
    rollbacks: AtomicU64,
    updates: AtomicU64,
}

#[derive(Debug, Default)]
struct Faults {
    failing_updates: Mutex<HashSet<EntityId>>,
    fail_next_commit: AtomicBool,
}

// ============================================================================
// TRANSACTION
// ============================================================================

/// Transaction over an [`InMemoryStore`]. Holds the store lock until it is
/// committed, rolled back or dropped.
pub struct MemoryTx {
    guard: OwnedMutexGuard<Tables>,
    overlay: HashMap<(EntityKind, EntityId), Value>,
    changes: Vec<Notification>,
    counters: Arc<Counters>,
    open: bool,
}

impl MemoryTx {
    fn get(&self, kind: EntityKind, id: &str) -> Option<&Value> {
        self.overlay
            .get(&(kind, id.to_string()))
            .or_else(|| self.guard.get(kind, id))
    }
}

impl Drop for MemoryTx {
    fn drop(&mut self) {
        if self.open {
            self.counters.rollbacks.fetch_add(1, Ordering::Relaxed);
            tracing::trace!(staged = self.changes.len(), "Transaction rolled back");
        }
    }
}

impl std::fmt::Debug for MemoryTx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTx")
            .field("staged", &self.changes.len())
            .field("open", &self.open)
            .finish()
    }
}

// ============================================================================
// STORE
// ============================================================================

/// In-memory store with revision auto-increment, transactions, watches and
/// fault injection for tests.
#[derive(Debug)]
pub struct InMemoryStore {
    tables: Arc<tokio::sync::Mutex<Tables>>,
    watches: Arc<WatchRegistry>,
    counters: Arc<Counters>,
    faults: Faults,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self {
            tables: Arc::new(tokio::sync::Mutex::new(Tables::default())),
            watches: WatchRegistry::new(),
            counters: Arc::new(Counters::default()),
            faults: Faults::default(),
        }
    }
}

impl InMemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent update of `id` fail until faults are cleared.
    pub fn fail_updates_for(&self, id: impl Into<EntityId>) {
        self.faults.failing_updates.lock().unwrap().insert(id.into());
    }

    /// Make the next commit fail. The transaction is rolled back.
    pub fn fail_next_commit(&self) {
        self.faults.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Remove all injected faults.
    pub fn clear_faults(&self) {
        self.faults.failing_updates.lock().unwrap().clear();
        self.faults.fail_next_commit.store(false, Ordering::SeqCst);
    }

    /// Number of committed transactions.
    pub fn commit_count(&self) -> u64 {
        self.counters.commits.load(Ordering::Relaxed)
    }

    /// Number of transactions rolled back, explicitly or by drop.
    pub fn rollback_count(&self) -> u64 {
        self.counters.rollbacks.load(Ordering::Relaxed)
    }

    /// Number of successful inserts and updates, transactional or not.
    pub fn update_count(&self) -> u64 {
        self.counters.updates.load(Ordering::Relaxed)
    }

    /// Number of models of a kind.
    pub async fn count(&self, kind: EntityKind) -> usize {
        self.tables.lock().await.iter(kind).count()
    }

    /// Number of open watches of a kind.
    pub fn watch_count(&self, kind: EntityKind) -> usize {
        self.watches.watch_count(kind)
    }

    /// Bump the revision of a copy of `model` and encode it. The caller's
    /// model is only touched once the write is certain to be staged.
    fn prepare<M: Model>(
        &self,
        exists: bool,
        model: &M,
        action: Action,
    ) -> VerdictResult<(M, Value)> {
        let id = model.pk().to_string();
        match action {
            Action::Created if exists => {
                return Err(StorageError::AlreadyExists { kind: M::KIND, id }.into());
            }
            Action::Updated if !exists => {
                return Err(StorageError::NotFound { kind: M::KIND, id }.into());
            }
            _ => {}
        }
        if self.faults.failing_updates.lock().unwrap().contains(&id) {
            return Err(StorageError::UpdateFailed {
                kind: M::KIND,
                id,
                reason: "injected update failure".to_string(),
            }
            .into());
        }
        let mut next = model.clone();
        next.set_revision(model.revision() + 1);
        let value = encode(&next)?;
        Ok((next, value))
    }

    async fn write<M: Model>(&self, model: &mut M, action: Action) -> VerdictResult<()> {
        let mut tables = self.tables.lock().await;
        let exists = tables.contains(M::KIND, model.pk());
        let (next, value) = self.prepare(exists, model, action)?;
        let notification = Notification {
            kind: M::KIND,
            action,
            model: Arc::new(value.clone()),
        };
        tables.put(M::KIND, next.pk().to_string(), value);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        self.watches.dispatch(vec![notification]);
        drop(tables);
        *model = next;
        Ok(())
    }
}

fn not_found<M: Model>(id: &str) -> StorageError {
    StorageError::NotFound {
        kind: M::KIND,
        id: id.to_string(),
    }
}

#[async_trait]
impl InventoryStore for InMemoryStore {
    type Tx = MemoryTx;

    async fn begin(&self) -> VerdictResult<MemoryTx> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        Ok(MemoryTx {
            guard,
            overlay: HashMap::new(),
            changes: Vec::new(),
            counters: Arc::clone(&self.counters),
            open: true,
        })
    }

    async fn commit(&self, mut tx: MemoryTx) -> VerdictResult<()> {
        if self.faults.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(StorageError::TransactionFailed {
                reason: "injected commit failure".to_string(),
            }
            .into());
        }
        for ((kind, id), value) in std::mem::take(&mut tx.overlay) {
            tx.guard.put(kind, id, value);
        }
        tx.open = false;
        self.counters.commits.fetch_add(1, Ordering::Relaxed);
        let changes = std::mem::take(&mut tx.changes);
        tracing::trace!(changes = changes.len(), "Transaction committed");
        self.watches.dispatch(changes);
        Ok(())
    }

    async fn rollback(&self, tx: MemoryTx) -> VerdictResult<()> {
        drop(tx);
        Ok(())
    }

    async fn get<M: Model>(&self, id: &str) -> VerdictResult<M> {
        let tables = self.tables.lock().await;
        let value = tables.get(M::KIND, id).ok_or_else(|| not_found::<M>(id))?;
        decode(value.clone())
    }

    async fn list<M: Model>(&self, options: &ListOptions) -> VerdictResult<Vec<M>> {
        let tables = self.tables.lock().await;
        tables
            .iter(M::KIND)
            .filter(|(_, value)| options.matches(value))
            .map(|(_, value)| decode(value.clone()))
            .collect()
    }

    async fn insert<M: Model>(&self, model: &mut M) -> VerdictResult<()> {
        self.write(model, Action::Created).await
    }

    async fn update<M: Model>(&self, model: &mut M) -> VerdictResult<()> {
        self.write(model, Action::Updated).await
    }

    async fn tx_get<M: Model>(&self, tx: &mut MemoryTx, id: &str) -> VerdictResult<M> {
        let value = tx.get(M::KIND, id).ok_or_else(|| not_found::<M>(id))?;
        decode(value.clone())
    }

    async fn tx_list<M: Model>(
        &self,
        tx: &mut MemoryTx,
        options: &ListOptions,
    ) -> VerdictResult<Vec<M>> {
        tx.guard
            .iter(M::KIND)
            .map(|(id, stored)| {
                tx.overlay
                    .get(&(M::KIND, id.clone()))
                    .unwrap_or(stored)
            })
            .filter(|value| options.matches(value))
            .map(|value| decode(value.clone()))
            .collect()
    }

    async fn tx_update<M: Model>(&self, tx: &mut MemoryTx, model: &mut M) -> VerdictResult<()> {
        let exists = tx.get(M::KIND, model.pk()).is_some();
        let (next, value) = self.prepare(exists, model, Action::Updated)?;
        tx.changes.push(Notification {
            kind: M::KIND,
            action: Action::Updated,
            model: Arc::new(value.clone()),
        });
        tx.overlay.insert((M::KIND, next.pk().to_string()), value);
        self.counters.updates.fetch_add(1, Ordering::Relaxed);
        *model = next;
        Ok(())
    }

    fn watch<M: Model, H: EventHandler<M>>(&self, handler: H) -> VerdictResult<WatchHandle> {
        self.watches.register::<M, H>(handler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use verdict_core::{fields, FilterExpr, Host, VerdictError, Vm};

    fn vm(id: &str, host: &str) -> Vm {
        Vm {
            id: id.to_string(),
            host: host.to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_first_revision() {
        let store = InMemoryStore::new();
        let mut v = vm("vm-1", "h1");
        store.insert(&mut v).await.unwrap();
        assert_eq!(v.revision, 1);
        let stored: Vm = store.get("vm-1").await.unwrap();
        assert_eq!(stored.revision, 1);
    }

    #[tokio::test]
    async fn test_insert_duplicate_fails() {
        let store = InMemoryStore::new();
        store.insert(&mut vm("vm-1", "h1")).await.unwrap();
        let err = store.insert(&mut vm("vm-1", "h1")).await.unwrap_err();
        assert!(matches!(
            err,
            VerdictError::Storage(StorageError::AlreadyExists { .. })
        ));
    }

    #[tokio::test]
    async fn test_update_increments_supplied_revision() {
        let store = InMemoryStore::new();
        let mut v = vm("vm-1", "h1");
        store.insert(&mut v).await.unwrap();
        store.update(&mut v).await.unwrap();
        assert_eq!(v.revision, 2);

        // The increment applies to the revision carried by the caller's model.
        v.revision -= 1;
        store.update(&mut v).await.unwrap();
        let stored: Vm = store.get("vm-1").await.unwrap();
        assert_eq!(stored.revision, 2);
    }

    #[tokio::test]
    async fn test_update_missing_fails() {
        let store = InMemoryStore::new();
        let err = store.update(&mut vm("ghost", "h1")).await.unwrap_err();
        assert!(matches!(err, VerdictError::Storage(StorageError::NotFound { .. })));
    }

    #[tokio::test]
    async fn test_list_with_predicate() {
        let store = InMemoryStore::new();
        store.insert(&mut vm("vm-1", "h1")).await.unwrap();
        store.insert(&mut vm("vm-2", "h2")).await.unwrap();
        store.insert(&mut vm("vm-3", "h1")).await.unwrap();
        let on_h1: Vec<Vm> = store
            .list(&ListOptions::filtered(FilterExpr::eq(fields::HOST, "h1")))
            .await
            .unwrap();
        let ids: Vec<_> = on_h1.iter().map(|v| v.id.as_str()).collect();
        assert_eq!(ids, vec!["vm-1", "vm-3"]);
        let hosts: Vec<Host> = store.list(&ListOptions::all()).await.unwrap();
        assert!(hosts.is_empty());
    }

    #[tokio::test]
    async fn test_tx_reads_own_writes_and_commits() {
        let store = InMemoryStore::new();
        store.insert(&mut vm("vm-1", "h1")).await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let mut v: Vm = store.tx_get(&mut tx, "vm-1").await.unwrap();
        v.revision_validated = 0;
        v.name = "staged".to_string();
        store.tx_update(&mut tx, &mut v).await.unwrap();
        let seen: Vm = store.tx_get(&mut tx, "vm-1").await.unwrap();
        assert_eq!(seen.name, "staged");
        let listed: Vec<Vm> = store.tx_list(&mut tx, &ListOptions::all()).await.unwrap();
        assert_eq!(listed[0].name, "staged");
        store.commit(tx).await.unwrap();

        let stored: Vm = store.get("vm-1").await.unwrap();
        assert_eq!(stored.name, "staged");
        assert_eq!(stored.revision, 2);
        assert_eq!(store.commit_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_tx_rolls_back() {
        let store = InMemoryStore::new();
        store.insert(&mut vm("vm-1", "h1")).await.unwrap();
        {
            let mut tx = store.begin().await.unwrap();
            let mut v: Vm = store.tx_get(&mut tx, "vm-1").await.unwrap();
            v.name = "lost".to_string();
            store.tx_update(&mut tx, &mut v).await.unwrap();
        }
        let stored: Vm = store.get("vm-1").await.unwrap();
        assert_eq!(stored.name, "");
        assert_eq!(stored.revision, 1);
        assert_eq!(store.rollback_count(), 1);
    }

    #[tokio::test]
    async fn test_injected_update_failure_leaves_model_untouched() {
        let store = InMemoryStore::new();
        let mut v = vm("vm-1", "h1");
        store.insert(&mut v).await.unwrap();
        store.fail_updates_for("vm-1");
        let err = store.update(&mut v).await.unwrap_err();
        assert!(matches!(
            err,
            VerdictError::Storage(StorageError::UpdateFailed { .. })
        ));
        assert_eq!(v.revision, 1);
        store.clear_faults();
        store.update(&mut v).await.unwrap();
        assert_eq!(v.revision, 2);
    }

    #[tokio::test]
    async fn test_injected_commit_failure_discards_writes() {
        let store = InMemoryStore::new();
        store.insert(&mut vm("vm-1", "h1")).await.unwrap();
        store.fail_next_commit();
        let mut tx = store.begin().await.unwrap();
        let mut v: Vm = store.tx_get(&mut tx, "vm-1").await.unwrap();
        v.name = "lost".to_string();
        store.tx_update(&mut tx, &mut v).await.unwrap();
        assert!(store.commit(tx).await.is_err());

        let stored: Vm = store.get("vm-1").await.unwrap();
        assert_eq!(stored.revision, 1);
        assert_eq!(store.commit_count(), 0);
        assert_eq!(store.rollback_count(), 1);
    }
}
