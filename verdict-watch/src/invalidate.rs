//! Cascading invalidators
//!
//! When a cluster, host, NIC profile or disk profile is updated, the VMs that
//! depend on it are marked for revalidation by setting `revision_validated`
//! to [`REVALIDATE`]. Nothing is submitted here; the VM update notification
//! or the next scan picks the VMs up.
//!
//! Each invalidation runs in one transaction and any failure abandons it
//! whole. A cluster invalidates its hosts one transaction per host.

use crate::metrics::ValidationMetrics;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use verdict_core::constants::REVALIDATE;
use verdict_core::{
    fields, Cluster, Disk, DiskProfile, EntityId, FilterExpr, Host, NicProfile, VerdictError,
    VerdictResult, Vm,
};
use verdict_storage::{EventHandler, InventoryStore, ListOptions};

// ============================================================================
// PROCEDURES
// ============================================================================

async fn revalidate<S: InventoryStore>(
    store: &S,
    tx: &mut S::Tx,
    vms: Vec<Vm>,
) -> VerdictResult<usize> {
    let count = vms.len();
    for mut vm in vms {
        vm.revision_validated = REVALIDATE;
        store.tx_update(tx, &mut vm).await?;
    }
    Ok(count)
}

/// Mark every VM on the host for revalidation. Returns the number of VMs.
pub async fn invalidate_host<S: InventoryStore>(store: &S, host_id: &str) -> VerdictResult<usize> {
    let mut tx = store.begin().await?;
    let options = ListOptions::filtered(FilterExpr::eq(fields::HOST, host_id));
    let vms: Vec<Vm> = store.tx_list(&mut tx, &options).await?;
    let count = revalidate(store, &mut tx, vms).await?;
    store.commit(tx).await?;
    Ok(count)
}

/// Invalidate every host in the cluster, one transaction per host. A failed
/// host is logged and skipped. Returns the number of VMs marked.
pub async fn invalidate_cluster<S: InventoryStore>(
    store: &S,
    cluster_id: &str,
    metrics: &ValidationMetrics,
) -> VerdictResult<usize> {
    let options = ListOptions::filtered(FilterExpr::eq(fields::CLUSTER, cluster_id));
    let hosts: Vec<Host> = store.list(&options).await?;
    let mut count = 0;
    for host in &hosts {
        match invalidate_host(store, &host.id).await {
            Ok(n) => count += n,
            Err(e) => {
                tracing::error!(host_id = %host.id, error = %e, "Host invalidation failed");
                ValidationMetrics::incr(&metrics.store_failures);
            }
        }
    }
    Ok(count)
}

/// Mark every VM with a NIC on the profile for revalidation.
pub async fn invalidate_nic_profile<S: InventoryStore>(
    store: &S,
    profile_id: &str,
) -> VerdictResult<usize> {
    let mut tx = store.begin().await?;
    let vms: Vec<Vm> = store.tx_list(&mut tx, &ListOptions::all()).await?;
    let vms: Vec<Vm> = vms
        .into_iter()
        .filter(|vm| vm.uses_nic_profile(profile_id))
        .collect();
    let count = revalidate(store, &mut tx, vms).await?;
    store.commit(tx).await?;
    Ok(count)
}

/// Mark every VM attached to a disk on the profile for revalidation.
pub async fn invalidate_disk_profile<S: InventoryStore>(
    store: &S,
    profile_id: &str,
) -> VerdictResult<usize> {
    let mut tx = store.begin().await?;
    let options = ListOptions::filtered(FilterExpr::eq(fields::PROFILE, profile_id));
    let disks: Vec<Disk> = store.tx_list(&mut tx, &options).await?;
    let affected: HashSet<EntityId> = disks.into_iter().map(|d| d.id).collect();
    if affected.is_empty() {
        store.rollback(tx).await?;
        return Ok(0);
    }
    let vms: Vec<Vm> = store.tx_list(&mut tx, &ListOptions::all()).await?;
    let vms: Vec<Vm> = vms
        .into_iter()
        .filter(|vm| vm.attaches_any(|disk| affected.contains(disk)))
        .collect();
    let count = revalidate(store, &mut tx, vms).await?;
    store.commit(tx).await?;
    Ok(count)
}

fn record(metrics: &ValidationMetrics, kind: &str, id: &str, result: VerdictResult<usize>) {
    match result {
        Ok(count) => {
            ValidationMetrics::add(&metrics.vms_invalidated, count as u64);
            tracing::debug!(kind, id, vms = count, "Dependent VMs invalidated");
        }
        Err(e) => {
            ValidationMetrics::incr(&metrics.store_failures);
            tracing::error!(kind, id, error = %e, "Invalidation failed");
        }
    }
}

// ============================================================================
// HANDLERS
// ============================================================================

/// Invalidates the VMs of every host in an updated cluster.
pub struct ClusterEventHandler<S> {
    store: Arc<S>,
    metrics: Arc<ValidationMetrics>,
}

impl<S: InventoryStore> ClusterEventHandler<S> {
    pub fn new(store: Arc<S>, metrics: Arc<ValidationMetrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler<Cluster> for ClusterEventHandler<S> {
    async fn updated(&mut self, cluster: Cluster) {
        let result = invalidate_cluster(self.store.as_ref(), &cluster.id, &self.metrics).await;
        record(&self.metrics, "Cluster", &cluster.id, result);
    }

    async fn error(&mut self, error: VerdictError) {
        tracing::error!(error = %error, "Cluster watch error");
    }
}

/// Invalidates the VMs on an updated host.
pub struct HostEventHandler<S> {
    store: Arc<S>,
    metrics: Arc<ValidationMetrics>,
}

impl<S: InventoryStore> HostEventHandler<S> {
    pub fn new(store: Arc<S>, metrics: Arc<ValidationMetrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler<Host> for HostEventHandler<S> {
    async fn updated(&mut self, host: Host) {
        let result = invalidate_host(self.store.as_ref(), &host.id).await;
        record(&self.metrics, "Host", &host.id, result);
    }

    async fn error(&mut self, error: VerdictError) {
        tracing::error!(error = %error, "Host watch error");
    }
}

/// Invalidates the VMs with NICs on an updated profile.
pub struct NicProfileEventHandler<S> {
    store: Arc<S>,
    metrics: Arc<ValidationMetrics>,
}

impl<S: InventoryStore> NicProfileEventHandler<S> {
    pub fn new(store: Arc<S>, metrics: Arc<ValidationMetrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler<NicProfile> for NicProfileEventHandler<S> {
    async fn updated(&mut self, profile: NicProfile) {
        let result = invalidate_nic_profile(self.store.as_ref(), &profile.id).await;
        record(&self.metrics, "NICProfile", &profile.id, result);
    }

    async fn error(&mut self, error: VerdictError) {
        tracing::error!(error = %error, "NIC profile watch error");
    }
}

/// Invalidates the VMs with disks on an updated profile.
pub struct DiskProfileEventHandler<S> {
    store: Arc<S>,
    metrics: Arc<ValidationMetrics>,
}

impl<S: InventoryStore> DiskProfileEventHandler<S> {
    pub fn new(store: Arc<S>, metrics: Arc<ValidationMetrics>) -> Self {
        Self { store, metrics }
    }
}

#[async_trait]
impl<S: InventoryStore> EventHandler<DiskProfile> for DiskProfileEventHandler<S> {
    async fn updated(&mut self, profile: DiskProfile) {
        let result = invalidate_disk_profile(self.store.as_ref(), &profile.id).await;
        record(&self.metrics, "DiskProfile", &profile.id, result);
    }

    async fn error(&mut self, error: VerdictError) {
        tracing::error!(error = %error, "Disk profile watch error");
    }
}
