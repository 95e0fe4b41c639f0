//! Verdict Storage - Versioned Inventory Store
//!
//! The contract the validation engine consumes from the inventory store:
//! point reads, predicate-filtered listing, transactions, revision
//! auto-increment on every mutation and post-commit change notifications.
//! [`InMemoryStore`] is the reference implementation.

mod memory;
mod model;
mod watch;

pub use memory::{InMemoryStore, MemoryTx};
pub use model::{decode, encode, Model};
pub use watch::{Action, EventHandler, Notification, WatchHandle, WatchRegistry};

use async_trait::async_trait;
use serde_json::Value;
use verdict_core::{FilterExpr, VerdictResult};

// ============================================================================
// LIST OPTIONS
// ============================================================================

/// Options for list queries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ListOptions {
    /// Only models matching the predicate are returned. `None` matches all.
    pub predicate: Option<FilterExpr>,
}

impl ListOptions {
    /// Match every model.
    pub fn all() -> Self {
        Self::default()
    }

    /// Match models satisfying `predicate`.
    pub fn filtered(predicate: FilterExpr) -> Self {
        Self {
            predicate: Some(predicate),
        }
    }

    /// Evaluate against a stored model.
    pub fn matches(&self, stored: &Value) -> bool {
        self.predicate
            .as_ref()
            .map(|p| p.matches(stored))
            .unwrap_or(true)
    }
}

// ============================================================================
// STORE CONTRACT
// ============================================================================

/// Versioned entity store.
///
/// ## Revisions
///
/// `insert` and `update` (and `tx_update`) increment the revision of the
/// *supplied* model by one and persist the result, writing the new revision
/// back into the caller's model. Application code never assigns revisions,
/// except to compensate for this increment on a self-caused mutation.
///
/// ## Transactions
///
/// `begin` returns a transaction; operations prefixed `tx_` run inside it and
/// observe its staged writes. `commit` applies every staged write atomically
/// and then notifies watches. `rollback` (or dropping the transaction)
/// discards them. While a transaction is open, other operations wait for it,
/// so a task holding a transaction must only use the `tx_` operations.
///
/// ## Ordering
///
/// `list` returns models in store-native order, which callers must not rely on.
#[async_trait]
pub trait InventoryStore: Send + Sync + 'static {
    /// Transaction type. Dropping it without committing rolls it back.
    type Tx: Send;

    async fn begin(&self) -> VerdictResult<Self::Tx>;

    async fn commit(&self, tx: Self::Tx) -> VerdictResult<()>;

    async fn rollback(&self, tx: Self::Tx) -> VerdictResult<()>;

    /// Fetch a model by primary key.
    ///
    /// Returns `StorageError::NotFound` if it does not exist.
    async fn get<M: Model>(&self, id: &str) -> VerdictResult<M>;

    /// List models matching the options.
    async fn list<M: Model>(&self, options: &ListOptions) -> VerdictResult<Vec<M>>;

    /// Insert a new model.
    ///
    /// Returns `StorageError::AlreadyExists` if the key is taken.
    async fn insert<M: Model>(&self, model: &mut M) -> VerdictResult<()>;

    /// Update an existing model.
    ///
    /// Returns `StorageError::NotFound` if it does not exist.
    async fn update<M: Model>(&self, model: &mut M) -> VerdictResult<()>;

    async fn tx_get<M: Model>(&self, tx: &mut Self::Tx, id: &str) -> VerdictResult<M>;

    async fn tx_list<M: Model>(
        &self,
        tx: &mut Self::Tx,
        options: &ListOptions,
    ) -> VerdictResult<Vec<M>>;

    async fn tx_update<M: Model>(&self, tx: &mut Self::Tx, model: &mut M) -> VerdictResult<()>;

    /// Install an observer for models of kind `M::KIND`.
    fn watch<M: Model, H: EventHandler<M>>(&self, handler: H) -> VerdictResult<WatchHandle>;
}
