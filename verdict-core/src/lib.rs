//! Verdict Core - Inventory Entity Types
//!
//! Data structures shared by the store, the policy agent and the validation
//! engine. Behavior here is limited to small predicates over entity state.

pub mod config;
pub mod constants;
mod entities;
mod enums;
mod error;
mod filter;
mod identity;

pub use config::{AgentConfig, ValidationConfig};
pub use entities::{
    fields, Cluster, Concern, Disk, DiskAttachment, DiskProfile, EntityRef, Host, Nic,
    NicProfile, Provider, Vm,
};
pub use enums::EntityKind;
pub use error::{ConfigError, PolicyError, StorageError, VerdictError, VerdictResult};
pub use filter::{FilterExpr, FilterOperator, Operand};
pub use identity::{EntityId, PolicyVersion, Revision, Timestamp};
