//! Workload assembly
//!
//! The document a VM is evaluated against: the VM itself plus the entities it
//! references, linked to the owning provider.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use verdict_core::{
    Cluster, Disk, DiskProfile, Host, NicProfile, PolicyError, Provider, StorageError,
    VerdictError, VerdictResult, Vm,
};
use verdict_policy::WorkloadSource;
use verdict_storage::{InventoryStore, Model};

/// Host expanded with its cluster.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadHost {
    pub host: Host,
    pub cluster: Option<Cluster>,
}

/// Disk expanded with its profile.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkloadDisk {
    pub disk: Disk,
    pub profile: Option<DiskProfile>,
}

/// Input document for VM rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Workload {
    pub self_link: String,
    pub vm: Vm,
    pub host: Option<WorkloadHost>,
    pub cluster: Option<Cluster>,
    pub nic_profiles: Vec<NicProfile>,
    pub disks: Vec<WorkloadDisk>,
    pub provider: Provider,
}

/// Builds [`Workload`] documents from the store.
pub struct VmWorkloadBuilder<S> {
    store: Arc<S>,
    provider: Provider,
}

impl<S: InventoryStore> VmWorkloadBuilder<S> {
    pub fn new(store: Arc<S>, provider: Provider) -> Self {
        Self { store, provider }
    }

    /// Assemble the workload for a VM. Unknown references are left out; an
    /// unknown VM is an error.
    pub async fn build(&self, vm_id: &str) -> VerdictResult<Workload> {
        let vm: Vm = self.store.get(vm_id).await.map_err(|e| failed(vm_id, &e))?;
        self.expand(vm).await.map_err(|e| failed(vm_id, &e))
    }

    async fn expand(&self, vm: Vm) -> VerdictResult<Workload> {
        let host = match self.lookup::<Host>(&vm.host).await? {
            Some(host) => {
                let cluster = self.lookup::<Cluster>(&host.cluster).await?;
                Some(WorkloadHost { host, cluster })
            }
            None => None,
        };
        let cluster = self.lookup::<Cluster>(&vm.cluster).await?;

        let mut nic_profiles: Vec<NicProfile> = Vec::new();
        for nic in &vm.nics {
            if nic_profiles.iter().any(|p| p.id == nic.profile) {
                continue;
            }
            if let Some(profile) = self.lookup::<NicProfile>(&nic.profile).await? {
                nic_profiles.push(profile);
            }
        }

        let mut disks = Vec::with_capacity(vm.disk_attachments.len());
        for attachment in &vm.disk_attachments {
            if let Some(disk) = self.lookup::<Disk>(&attachment.disk).await? {
                let profile = self.lookup::<DiskProfile>(&disk.profile).await?;
                disks.push(WorkloadDisk { disk, profile });
            }
        }

        Ok(Workload {
            self_link: format!(
                "/providers/{}/{}/workloads/{}",
                self.provider.provider_type, self.provider.uid, vm.id
            ),
            vm,
            host,
            cluster,
            nic_profiles,
            disks,
            provider: self.provider.clone(),
        })
    }

    async fn lookup<M: Model>(&self, id: &str) -> VerdictResult<Option<M>> {
        if id.is_empty() {
            return Ok(None);
        }
        match self.store.get::<M>(id).await {
            Ok(model) => Ok(Some(model)),
            Err(VerdictError::Storage(StorageError::NotFound { .. })) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

fn failed(vm_id: &str, error: &VerdictError) -> VerdictError {
    PolicyError::WorkloadFailed {
        vm_id: vm_id.to_string(),
        reason: error.to_string(),
    }
    .into()
}

#[async_trait]
impl<S: InventoryStore> WorkloadSource for VmWorkloadBuilder<S> {
    async fn workload(&self, vm_id: &str) -> VerdictResult<Value> {
        let workload = self.build(vm_id).await?;
        serde_json::to_value(&workload).map_err(|e| {
            PolicyError::WorkloadFailed {
                vm_id: vm_id.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }
}
