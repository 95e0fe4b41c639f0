//! Verdict Watch - Validation Reconciliation
//!
//! Keeps the policy verdict of every VM in the inventory current. The VM
//! coordinator submits VMs to the policy agent as they change and rescans
//! the store periodically; the harvester writes verdicts back in batches;
//! the invalidators mark VMs stale when something they depend on changes.
//!
//! ```text
//! Cluster ──► Host ──┐
//! NICProfile ────────┼──► revision_validated = 0 ──► VM watch ──► agent
//! DiskProfile ───────┘                                  ▲           │
//!                                        scan (interval)┘           ▼
//!                                                 harvester ◄── results
//! ```

mod coordinator;
mod dedup;
mod harvest;
mod invalidate;
mod metrics;
mod workload;

pub use coordinator::{stale_vms, VmEventHandler};
pub use dedup::{ReportedEvent, ReportedEvents};
pub use harvest::{commit_if_current, CommitDecision, Harvester};
pub use invalidate::{
    invalidate_cluster, invalidate_disk_profile, invalidate_host, invalidate_nic_profile,
    ClusterEventHandler, DiskProfileEventHandler, HostEventHandler, NicProfileEventHandler,
};
pub use metrics::{ValidationMetrics, ValidationSnapshot};
pub use workload::{VmWorkloadBuilder, Workload, WorkloadDisk, WorkloadHost};

use std::sync::Arc;
use verdict_core::{
    Cluster, DiskProfile, Host, NicProfile, Provider, ValidationConfig, VerdictResult, Vm,
};
use verdict_policy::PolicyAgent;
use verdict_storage::{InventoryStore, WatchHandle};

/// The installed validation watches for one provider.
///
/// # Example
/// ```ignore
/// let agent = Arc::new(WorkerAgent::new(opa, AgentConfig::from_env()));
/// agent.start()?;
/// let config = ValidationConfig::from_env();
/// let watches = ValidationWatches::start(store, agent, provider, config).await?;
/// // ...
/// watches.stop().await?;
/// ```
pub struct ValidationWatches {
    handles: Vec<WatchHandle>,
    metrics: Arc<ValidationMetrics>,
}

impl ValidationWatches {
    /// Install the VM coordinator and the four invalidators.
    ///
    /// If any watch cannot be installed, the ones already installed are
    /// ended before the error is returned.
    pub async fn start<S: InventoryStore, A: PolicyAgent>(
        store: Arc<S>,
        agent: Arc<A>,
        provider: Provider,
        config: ValidationConfig,
    ) -> VerdictResult<Self> {
        config.validate()?;
        let metrics = Arc::new(ValidationMetrics::new());
        let mut handles = Vec::with_capacity(5);

        let installed = Self::install(&store, agent, provider, config, &metrics, &mut handles);
        if let Err(e) = installed {
            tracing::error!(error = %e, installed = handles.len(), "Validation watch setup failed");
            for handle in handles.into_iter().rev() {
                if let Err(end_err) = handle.end().await {
                    tracing::warn!(error = %end_err, "Watch end failed during rollback");
                }
            }
            return Err(e);
        }

        tracing::info!(watches = handles.len(), "Validation watches started");
        Ok(Self { handles, metrics })
    }

    fn install<S: InventoryStore, A: PolicyAgent>(
        store: &Arc<S>,
        agent: Arc<A>,
        provider: Provider,
        config: ValidationConfig,
        metrics: &Arc<ValidationMetrics>,
        handles: &mut Vec<WatchHandle>,
    ) -> VerdictResult<()> {
        handles.push(store.watch::<Vm, _>(VmEventHandler::new(
            Arc::clone(store),
            agent,
            provider,
            config,
            Arc::clone(metrics),
        ))?);
        handles.push(store.watch::<Cluster, _>(ClusterEventHandler::new(
            Arc::clone(store),
            Arc::clone(metrics),
        ))?);
        handles.push(store.watch::<Host, _>(HostEventHandler::new(
            Arc::clone(store),
            Arc::clone(metrics),
        ))?);
        handles.push(store.watch::<NicProfile, _>(NicProfileEventHandler::new(
            Arc::clone(store),
            Arc::clone(metrics),
        ))?);
        handles.push(store.watch::<DiskProfile, _>(DiskProfileEventHandler::new(
            Arc::clone(store),
            Arc::clone(metrics),
        ))?);
        Ok(())
    }

    pub fn metrics(&self) -> &Arc<ValidationMetrics> {
        &self.metrics
    }

    /// End every watch, invalidators first. The VM watch stops its scan and
    /// harvest loops before returning. Returns the first failure.
    pub async fn stop(self) -> VerdictResult<()> {
        let mut first_err = None;
        for handle in self.handles.into_iter().rev() {
            let kind = handle.kind();
            if let Err(e) = handle.end().await {
                tracing::error!(kind = %kind, error = %e, "Watch end failed");
                first_err.get_or_insert(e);
            }
        }
        tracing::info!("Validation watches stopped");
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
