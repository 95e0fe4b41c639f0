//! Result harvester
//!
//! Completed validation tasks are collected into micro-batches and each
//! batch is committed in one store transaction. The flush delay starts long
//! and drops to the short delay once a result is waiting; a batch is flushed
//! when the time since the last flush reaches the current delay or the batch
//! reaches its cap.
//!
//! A verdict is only written when the VM is still at the revision the task
//! was submitted for. Writing it bumps the revision, so the stored revision
//! is decremented first; after commit `revision == revision_validated`.

use crate::metrics::ValidationMetrics;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use verdict_core::{Revision, ValidationConfig, Vm};
use verdict_policy::{Task, Verdict};
use verdict_storage::InventoryStore;

// ============================================================================
// COMMIT DECISION
// ============================================================================

/// Outcome of checking a verdict against the latest stored VM.
#[derive(Debug, Clone, PartialEq)]
pub enum CommitDecision {
    /// The VM to write, verdict applied and revision compensated.
    Applied(Vm),
    /// The VM moved on after the task was submitted.
    Discarded { snapshot: Revision, latest: Revision },
}

/// Apply `verdict` to `latest` if it is still at the `snapshot` revision.
pub fn commit_if_current(snapshot: Revision, mut latest: Vm, verdict: &Verdict) -> CommitDecision {
    if latest.revision != snapshot {
        return CommitDecision::Discarded {
            snapshot,
            latest: latest.revision,
        };
    }
    latest.policy_version = verdict.version;
    latest.revision_validated = latest.revision;
    latest.concerns = verdict.concerns.clone();
    latest.revision -= 1;
    CommitDecision::Applied(latest)
}

// ============================================================================
// HARVESTER
// ============================================================================

/// Commits task results to the store.
pub struct Harvester<S> {
    store: Arc<S>,
    metrics: Arc<ValidationMetrics>,
    max_batch: usize,
    short_delay: Duration,
    long_delay: Duration,
}

impl<S: InventoryStore> Harvester<S> {
    pub fn new(store: Arc<S>, config: &ValidationConfig, metrics: Arc<ValidationMetrics>) -> Self {
        Self {
            store,
            metrics,
            max_batch: config.max_batch,
            short_delay: config.harvest_short_delay,
            long_delay: config.harvest_long_delay,
        }
    }

    /// Collect results until shutdown or until every result sender is gone.
    /// An unflushed batch is dropped; its VMs stay stale.
    pub async fn run(self, mut results: mpsc::Receiver<Task>, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(
            max_batch = self.max_batch,
            short_delay_ms = self.short_delay.as_millis() as u64,
            "Harvest loop started"
        );
        let mut delay = self.long_delay;
        let mut batch: Vec<Task> = Vec::new();
        let mut mark = Instant::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                task = results.recv() => match task {
                    Some(task) => {
                        batch.push(task);
                        delay = self.short_delay;
                    }
                    None => break,
                },
                _ = shutdown.changed() => break,
            }
            if mark.elapsed() >= delay || batch.len() >= self.max_batch {
                self.apply(std::mem::take(&mut batch)).await;
                delay = self.long_delay;
                mark = Instant::now();
            }
        }
        if !batch.is_empty() {
            tracing::debug!(dropped = batch.len(), "Unflushed results dropped");
        }
        tracing::info!("Harvest loop stopped");
    }

    /// Commit one batch in a single transaction. Returns the number of
    /// verdicts written.
    pub async fn apply(&self, batch: Vec<Task>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        tracing::debug!(batch = batch.len(), "VM batch completed");
        let mut tx = match self.store.begin().await {
            Ok(tx) => tx,
            Err(e) => {
                tracing::error!(error = %e, "Begin tx failed");
                ValidationMetrics::incr(&self.metrics.store_failures);
                return 0;
            }
        };

        let mut applied = 0;
        for task in &batch {
            let verdict = match &task.outcome {
                Some(Ok(verdict)) => verdict,
                Some(Err(e)) => {
                    tracing::info!(vm_id = %task.entity.id, error = %e, "VM validation failed");
                    ValidationMetrics::incr(&self.metrics.evaluation_failures);
                    continue;
                }
                None => {
                    tracing::warn!(vm_id = %task.entity.id, "Task posted without outcome");
                    continue;
                }
            };
            let latest: Vm = match self.store.tx_get(&mut tx, &task.entity.id).await {
                Ok(vm) => vm,
                Err(e) => {
                    tracing::error!(vm_id = %task.entity.id, error = %e, "VM (get) failed");
                    ValidationMetrics::incr(&self.metrics.store_failures);
                    continue;
                }
            };
            let mut vm = match commit_if_current(task.revision, latest, verdict) {
                CommitDecision::Applied(vm) => vm,
                CommitDecision::Discarded { snapshot, latest } => {
                    tracing::debug!(
                        vm_id = %task.entity.id,
                        snapshot,
                        latest,
                        "VM changed during validation, verdict discarded"
                    );
                    ValidationMetrics::incr(&self.metrics.verdicts_discarded);
                    continue;
                }
            };
            if let Err(e) = self.store.tx_update(&mut tx, &mut vm).await {
                tracing::error!(vm_id = %vm.id, error = %e, "VM update failed");
                ValidationMetrics::incr(&self.metrics.store_failures);
                continue;
            }
            applied += 1;
            tracing::trace!(
                vm_id = %vm.id,
                revision = vm.revision,
                duration_ms = task.duration().map(|d| d.num_milliseconds()),
                "VM validated"
            );
        }

        if let Err(e) = self.store.commit(tx).await {
            tracing::error!(error = %e, "Tx commit failed");
            ValidationMetrics::incr(&self.metrics.store_failures);
            return 0;
        }
        ValidationMetrics::incr(&self.metrics.batches_flushed);
        ValidationMetrics::add(&self.metrics.verdicts_applied, applied as u64);
        applied
    }
}


#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Applied decisions always land on the validated revision after the
        /// store's increment; any mismatch is discarded.
        #[test]
        fn prop_commit_if_current(snapshot in 1i64..10_000, latest in 1i64..10_000, version in 0i64..100) {
            let stored = Vm { id: "vm".to_string(), revision: latest, ..Default::default() };
            match commit_if_current(snapshot, stored, &Verdict::new(Vec::new(), version)) {
                CommitDecision::Applied(vm) => {
                    prop_assert_eq!(snapshot, latest);
                    prop_assert_eq!(vm.revision + 1, vm.revision_validated);
                    prop_assert_eq!(vm.revision_validated, snapshot);
                    prop_assert_eq!(vm.policy_version, version);
                }
                CommitDecision::Discarded { .. } => prop_assert_ne!(snapshot, latest),
            }
        }
    }
}
