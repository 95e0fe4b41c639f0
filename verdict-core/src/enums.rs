//! Enum types for inventory entities

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// ENTITY KIND
// ============================================================================

/// Entity kind discriminator. The store keeps one table per kind and
/// watches are registered per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Vm,
    Host,
    Cluster,
    Disk,
    NicProfile,
    DiskProfile,
}

impl EntityKind {
    /// All kinds, in table order.
    pub const ALL: [EntityKind; 6] = [
        EntityKind::Vm,
        EntityKind::Host,
        EntityKind::Cluster,
        EntityKind::Disk,
        EntityKind::NicProfile,
        EntityKind::DiskProfile,
    ];
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let value = match self {
            EntityKind::Vm => "VM",
            EntityKind::Host => "Host",
            EntityKind::Cluster => "Cluster",
            EntityKind::Disk => "Disk",
            EntityKind::NicProfile => "NICProfile",
            EntityKind::DiskProfile => "DiskProfile",
        };
        write!(f, "{}", value)
    }
}
