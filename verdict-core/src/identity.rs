//! Identity and versioning types for inventory entities

use chrono::{DateTime, Utc};

/// Entity identifier as assigned by the virtualization platform.
pub type EntityId = String;

/// Store-assigned, per-entity mutation counter.
pub type Revision = i64;

/// Identifier of the policy bundle that produced a verdict.
pub type PolicyVersion = i64;

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;
