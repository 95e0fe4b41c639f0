//! Error types for verdict operations

use crate::{EntityId, EntityKind};
use thiserror::Error;

/// Storage layer errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Entity not found: {kind} with id {id}")]
    NotFound { kind: EntityKind, id: EntityId },

    #[error("Entity already exists: {kind} with id {id}")]
    AlreadyExists { kind: EntityKind, id: EntityId },

    #[error("Update failed for {kind} with id {id}: {reason}")]
    UpdateFailed {
        kind: EntityKind,
        id: EntityId,
        reason: String,
    },

    #[error("Transaction failed: {reason}")]
    TransactionFailed { reason: String },

    #[error("Decode failed for {kind}: {reason}")]
    Decode { kind: EntityKind, reason: String },

    #[error("Watch failed: {reason}")]
    WatchFailed { reason: String },
}

/// Policy agent errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Policy agent not started")]
    AgentNotStarted,

    #[error("Policy agent queue full (capacity {capacity})")]
    QueueFull { capacity: usize },

    #[error("Validation task canceled")]
    Canceled,

    #[error("Policy version unavailable: {reason}")]
    VersionUnavailable { reason: String },

    #[error("Workload for VM {vm_id} could not be built: {reason}")]
    WorkloadFailed { vm_id: EntityId, reason: String },

    #[error("Evaluation of {path} failed: {reason}")]
    EvaluationFailed { path: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all verdict errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum VerdictError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for verdict operations.
pub type VerdictResult<T> = Result<T, VerdictError>;

// =============================================================================
// TESTS
// =============================================================================
