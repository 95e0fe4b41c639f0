//! VM validation coordinator
//!
//! Validation must never hold up the store. Two paths submit VMs to the
//! policy agent:
//!
//! - Change notifications: a created or updated VM that is not validated is
//!   submitted at once. This is best effort; a failed submission is only
//!   logged.
//! - Periodic scan: every search interval the store is searched for VMs whose
//!   revision is not validated or whose verdict came from another policy
//!   version. This guarantees every VM is eventually validated.
//!
//! Each event-path submission is reported to the scan loop, and the next scan
//! skips a VM reported at its current revision. Reports are cleared after
//! every scan.

use crate::dedup::{ReportedEvent, ReportedEvents};
use crate::harvest::Harvester;
use crate::metrics::ValidationMetrics;
use crate::workload::VmWorkloadBuilder;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use verdict_core::{
    fields, EntityRef, FilterExpr, PolicyVersion, Provider, ValidationConfig, VerdictError,
    VerdictResult, Vm,
};
use verdict_policy::{PolicyAgent, Task, WorkloadSource};
use verdict_storage::{EventHandler, InventoryStore, ListOptions};

/// Predicate matching VMs whose verdict is stale against `version`.
pub fn stale_vms(version: PolicyVersion) -> FilterExpr {
    FilterExpr::or(vec![
        FilterExpr::ne_field(fields::REVISION, fields::REVISION_VALIDATED),
        FilterExpr::ne(fields::POLICY_VERSION, version),
    ])
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// Builds validation tasks and hands them to the agent.
struct Submitter<A> {
    agent: Arc<A>,
    rule_path: String,
    workload: Arc<dyn WorkloadSource>,
    results: mpsc::Sender<Task>,
    context: watch::Receiver<bool>,
    metrics: Arc<ValidationMetrics>,
}

impl<A: PolicyAgent> Submitter<A> {
    fn canceled(&self) -> bool {
        *self.context.borrow()
    }

    fn submit(&self, vm: &Vm) -> VerdictResult<()> {
        let task = Task::new(
            self.rule_path.clone(),
            EntityRef::vm(vm.id.clone()),
            vm.revision,
            Arc::clone(&self.workload),
            self.results.clone(),
            self.context.clone(),
        );
        match self.agent.submit(task) {
            Ok(()) => {
                ValidationMetrics::incr(&self.metrics.submitted);
                tracing::trace!(vm_id = %vm.id, revision = vm.revision, "VM task submitted");
                Ok(())
            }
            Err(e) => {
                ValidationMetrics::incr(&self.metrics.submit_failures);
                tracing::error!(vm_id = %vm.id, error = %e, "VM task (submit) failed");
                Err(e)
            }
        }
    }
}

impl<A> Clone for Submitter<A> {
    fn clone(&self) -> Self {
        Self {
            agent: Arc::clone(&self.agent),
            rule_path: self.rule_path.clone(),
            workload: Arc::clone(&self.workload),
            results: self.results.clone(),
            context: self.context.clone(),
            metrics: Arc::clone(&self.metrics),
        }
    }
}

// ============================================================================
// SCAN LOOP
// ============================================================================

struct ScanLoop<S, A> {
    store: Arc<S>,
    submitter: Submitter<A>,
    interval: Duration,
    reported: ReportedEvents,
}

impl<S: InventoryStore, A: PolicyAgent> ScanLoop<S, A> {
    async fn run(
        mut self,
        mut reports: mpsc::Receiver<ReportedEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Scan loop started");
        self.scan().await;
        self.reported.reset();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                report = reports.recv() => match report {
                    Some(event) => self.reported.record(event),
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
            if self.reported.since_last_scan() >= self.interval {
                self.scan().await;
                self.reported.reset();
            }
        }
        tracing::info!("Scan loop stopped");
    }

    /// Submit every stale VM not already reported at its current revision.
    async fn scan(&mut self) {
        tracing::debug!("List VMs that need to be validated");
        let metrics = &self.submitter.metrics;
        let version = match self.submitter.agent.current_version().await {
            Ok(version) => version,
            Err(e) => {
                tracing::error!(error = %e, "Policy version unavailable, scan skipped");
                ValidationMetrics::incr(&metrics.scans_skipped);
                return;
            }
        };
        if self.submitter.canceled() {
            return;
        }
        let options = ListOptions::filtered(stale_vms(version));
        let stale: Vec<Vm> = match self.store.list(&options).await {
            Ok(vms) => vms,
            Err(e) => {
                tracing::error!(error = %e, "List VM failed");
                ValidationMetrics::incr(&metrics.store_failures);
                return;
            }
        };
        ValidationMetrics::incr(&metrics.scans);
        let mut submitted = 0usize;
        for vm in &stale {
            if self.submitter.canceled() {
                break;
            }
            if self.reported.suppresses(&vm.id, vm.revision) {
                continue;
            }
            if self.submitter.submit(vm).is_ok() {
                submitted += 1;
            }
        }
        tracing::debug!(
            stale = stale.len(),
            submitted,
            policy_version = version,
            "VM scan completed"
        );
    }
}

// ============================================================================
// EVENT HANDLER
// ============================================================================

struct Running<A> {
    submitter: Submitter<A>,
    shutdown: watch::Sender<bool>,
    reports: mpsc::Sender<ReportedEvent>,
    loops: Vec<JoinHandle<()>>,
}

/// Watches VMs and keeps their verdicts current.
pub struct VmEventHandler<S, A> {
    store: Arc<S>,
    agent: Arc<A>,
    provider: Provider,
    config: ValidationConfig,
    metrics: Arc<ValidationMetrics>,
    running: Option<Running<A>>,
}

impl<S: InventoryStore, A: PolicyAgent> VmEventHandler<S, A> {
    pub fn new(
        store: Arc<S>,
        agent: Arc<A>,
        provider: Provider,
        config: ValidationConfig,
        metrics: Arc<ValidationMetrics>,
    ) -> Self {
        Self {
            store,
            agent,
            provider,
            config,
            metrics,
            running: None,
        }
    }

    /// Validate from a change notification.
    fn changed(&self, vm: Vm) {
        let Some(running) = &self.running else {
            return;
        };
        if running.submitter.canceled() || vm.validated() {
            return;
        }
        if running.submitter.submit(&vm).is_ok() {
            running.report(&vm, &self.metrics);
        }
    }
}

impl<A> Running<A> {
    /// Tell the scan loop about an event-path submission. Never waits; a full
    /// or closed channel only costs a redundant submission on the next scan.
    fn report(&self, vm: &Vm, metrics: &ValidationMetrics) {
        let event = ReportedEvent {
            id: vm.id.clone(),
            revision: vm.revision,
        };
        match self.reports.try_send(event) {
            Ok(()) => ValidationMetrics::incr(&metrics.reported),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::debug!(vm_id = %vm.id, "Report channel full, report dropped");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }
}

#[async_trait]
impl<S: InventoryStore, A: PolicyAgent> EventHandler<Vm> for VmEventHandler<S, A> {
    async fn started(&mut self, watch_id: u64) {
        tracing::info!(watch_id, provider = %self.provider.name, "VM watch started");
        let (shutdown, context) = watch::channel(false);
        let (results, results_rx) = mpsc::channel(self.config.result_capacity);
        let (reports, reports_rx) = mpsc::channel(self.config.report_capacity);
        let workload: Arc<dyn WorkloadSource> = Arc::new(VmWorkloadBuilder::new(
            Arc::clone(&self.store),
            self.provider.clone(),
        ));
        let submitter = Submitter {
            agent: Arc::clone(&self.agent),
            rule_path: self.config.rule_path.clone(),
            workload,
            results,
            context: context.clone(),
            metrics: Arc::clone(&self.metrics),
        };
        let scan = ScanLoop {
            store: Arc::clone(&self.store),
            submitter: submitter.clone(),
            interval: self.config.search_interval,
            reported: ReportedEvents::new(),
        };
        let harvester = Harvester::new(
            Arc::clone(&self.store),
            &self.config,
            Arc::clone(&self.metrics),
        );
        let loops = vec![
            tokio::spawn(scan.run(reports_rx, context.clone())),
            tokio::spawn(harvester.run(results_rx, context)),
        ];
        self.running = Some(Running {
            submitter,
            shutdown,
            reports,
            loops,
        });
    }

    async fn created(&mut self, vm: Vm) {
        self.changed(vm);
    }

    async fn updated(&mut self, vm: Vm) {
        self.changed(vm);
    }

    async fn error(&mut self, error: VerdictError) {
        tracing::error!(error = %error, "VM watch error");
    }

    /// Cancel, close the channels and wait for both loops to stop.
    async fn ended(&mut self) {
        tracing::info!(provider = %self.provider.name, "VM watch ended");
        let Some(Running {
            submitter,
            shutdown,
            reports,
            loops,
        }) = self.running.take()
        else {
            return;
        };
        shutdown.send_replace(true);
        drop(reports);
        drop(submitter);
        for handle in loops {
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "Validation loop panicked");
            }
        }
    }
}
