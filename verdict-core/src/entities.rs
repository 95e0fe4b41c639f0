//! Core entity structures
//!
//! Only the fields that take part in the validation lifecycle or in the
//! workload document handed to the policy agent are mirrored here.

use crate::{EntityId, EntityKind, PolicyVersion, Revision};
use serde::{Deserialize, Serialize};

/// Stored field names usable in filter expressions.
pub mod fields {
    pub const ID: &str = "id";
    pub const REVISION: &str = "revision";
    pub const REVISION_VALIDATED: &str = "revision_validated";
    pub const POLICY_VERSION: &str = "policy_version";
    pub const HOST: &str = "host";
    pub const CLUSTER: &str = "cluster";
    pub const PROFILE: &str = "profile";
}

/// Reference to an entity by kind and ID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn vm(id: impl Into<EntityId>) -> Self {
        Self {
            kind: EntityKind::Vm,
            id: id.into(),
        }
    }
}

/// A single policy finding attached to a VM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concern {
    pub category: String,
    pub label: String,
    pub assessment: String,
}

impl Concern {
    pub fn new(
        category: impl Into<String>,
        label: impl Into<String>,
        assessment: impl Into<String>,
    ) -> Self {
        Self {
            category: category.into(),
            label: label.into(),
            assessment: assessment.into(),
        }
    }
}

// ============================================================================
// VIRTUAL MACHINE
// ============================================================================

/// Virtual machine - the subject of validation.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Vm {
    pub id: EntityId,
    pub name: String,
    pub description: String,
    /// Assigned by the store on every mutation.
    pub revision: Revision,
    pub cluster: EntityId,
    pub host: EntityId,
    /// Revision as of the last committed verdict. Zero forces revalidation.
    pub revision_validated: Revision,
    pub policy_version: PolicyVersion,
    pub guest_name: String,
    pub cpu_sockets: i16,
    pub cpu_cores: i16,
    pub memory: i64,
    pub status: String,
    pub ha_enabled: bool,
    pub nics: Vec<Nic>,
    pub disk_attachments: Vec<DiskAttachment>,
    /// Overwritten wholesale by each committed verdict.
    pub concerns: Vec<Concern>,
}

impl Vm {
    /// Whether the current revision has been validated.
    pub fn validated(&self) -> bool {
        self.revision_validated == self.revision
    }

    /// Whether any NIC references the NIC profile.
    pub fn uses_nic_profile(&self, profile_id: &str) -> bool {
        self.nics.iter().any(|nic| nic.profile == profile_id)
    }

    /// Whether any disk attachment references a disk accepted by `affected`.
    pub fn attaches_any(&self, mut affected: impl FnMut(&str) -> bool) -> bool {
        self.disk_attachments.iter().any(|da| affected(&da.disk))
    }
}

/// VM network interface.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Nic {
    pub id: EntityId,
    pub name: String,
    pub interface: String,
    pub plugged: bool,
    /// NIC profile reference.
    pub profile: EntityId,
}

/// VM disk attachment.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskAttachment {
    pub id: EntityId,
    pub interface: String,
    pub scsi_reservation: bool,
    /// Disk reference.
    pub disk: EntityId,
}

// ============================================================================
// CONTAINMENT AND REFERENCED ENTITIES
// ============================================================================

/// Hypervisor host. Contains VMs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Host {
    pub id: EntityId,
    pub name: String,
    pub revision: Revision,
    pub cluster: EntityId,
    pub product_name: String,
    pub product_version: String,
    pub in_maintenance: bool,
    pub cpu_sockets: i16,
    pub cpu_cores: i16,
}

/// Cluster. Contains hosts.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Cluster {
    pub id: EntityId,
    pub name: String,
    pub revision: Revision,
    pub data_center: EntityId,
    pub ha_reservation: bool,
    pub ksm_enabled: bool,
}

/// Virtual disk.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Disk {
    pub id: EntityId,
    pub name: String,
    pub revision: Revision,
    pub shared: bool,
    /// Disk profile reference.
    pub profile: EntityId,
    pub storage_domain: EntityId,
    pub status: String,
    pub provisioned_size: i64,
}

/// vNIC profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NicProfile {
    pub id: EntityId,
    pub name: String,
    pub revision: Revision,
    pub network: EntityId,
    pub port_mirroring: bool,
    pub network_filter: String,
    pub qos: String,
}

/// Disk profile.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DiskProfile {
    pub id: EntityId,
    pub name: String,
    pub revision: Revision,
    pub storage_domain: EntityId,
    pub qos: String,
}

// ============================================================================
// PROVIDER
// ============================================================================

/// The provider instance whose inventory is mirrored. Attached to every
/// workload so rules can reason about the source platform.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Provider {
    pub namespace: String,
    pub name: String,
    pub uid: String,
    pub provider_type: String,
}

impl Provider {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            uid: String::new(),
            provider_type: "ovirt".to_string(),
        }
    }
}
