//! Validation metrics

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters shared by every handler of one provider.
#[derive(Debug, Default)]
pub struct ValidationMetrics {
    /// Tasks accepted by the policy agent
    pub submitted: AtomicU64,

    /// Tasks the policy agent refused
    pub submit_failures: AtomicU64,

    /// Event-path validations reported to the scan loop
    pub reported: AtomicU64,

    /// Completed scans
    pub scans: AtomicU64,

    /// Scans abandoned because the policy version was unavailable
    pub scans_skipped: AtomicU64,

    /// Committed harvest transactions
    pub batches_flushed: AtomicU64,

    /// Verdicts written to VMs
    pub verdicts_applied: AtomicU64,

    /// Verdicts dropped because the VM changed after submission
    pub verdicts_discarded: AtomicU64,

    /// Tasks that completed with an error
    pub evaluation_failures: AtomicU64,

    /// Store reads, writes or commits that failed
    pub store_failures: AtomicU64,

    /// VMs marked for revalidation by a cascading invalidator
    pub vms_invalidated: AtomicU64,
}

impl ValidationMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> ValidationSnapshot {
        ValidationSnapshot {
            submitted: self.submitted.load(Ordering::Relaxed),
            submit_failures: self.submit_failures.load(Ordering::Relaxed),
            reported: self.reported.load(Ordering::Relaxed),
            scans: self.scans.load(Ordering::Relaxed),
            scans_skipped: self.scans_skipped.load(Ordering::Relaxed),
            batches_flushed: self.batches_flushed.load(Ordering::Relaxed),
            verdicts_applied: self.verdicts_applied.load(Ordering::Relaxed),
            verdicts_discarded: self.verdicts_discarded.load(Ordering::Relaxed),
            evaluation_failures: self.evaluation_failures.load(Ordering::Relaxed),
            store_failures: self.store_failures.load(Ordering::Relaxed),
            vms_invalidated: self.vms_invalidated.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of validation metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationSnapshot {
    pub submitted: u64,
    pub submit_failures: u64,
    pub reported: u64,
    pub scans: u64,
    pub scans_skipped: u64,
    pub batches_flushed: u64,
    pub verdicts_applied: u64,
    pub verdicts_discarded: u64,
    pub evaluation_failures: u64,
    pub store_failures: u64,
    pub vms_invalidated: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_reflects_counters() {
        let metrics = ValidationMetrics::new();
        ValidationMetrics::incr(&metrics.submitted);
        ValidationMetrics::add(&metrics.vms_invalidated, 3);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submitted, 1);
        assert_eq!(snapshot.vms_invalidated, 3);
        assert_eq!(snapshot.scans, 0);
    }
}
