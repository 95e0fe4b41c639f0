//! Reported-event bookkeeping for the scan loop
//!
//! Owned by the scan loop alone. Records VMs already submitted through the
//! event path so the next scan does not submit them again at the same
//! revision.

use std::collections::HashMap;
use std::time::Duration;
use tokio::time::Instant;
use verdict_core::{EntityId, Revision};

/// A VM submitted for validation from a change notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportedEvent {
    pub id: EntityId,
    pub revision: Revision,
}

/// Reported events since the last scan.
#[derive(Debug)]
pub struct ReportedEvents {
    reported: HashMap<EntityId, Revision>,
    last_scan: Instant,
}

impl Default for ReportedEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportedEvents {
    pub fn new() -> Self {
        Self {
            reported: HashMap::new(),
            last_scan: Instant::now(),
        }
    }

    /// Remember a reported event. A later report for the same VM replaces
    /// the earlier one.
    pub fn record(&mut self, event: ReportedEvent) {
        self.reported.insert(event.id, event.revision);
    }

    /// Whether a scan should skip the VM: only when it was reported at
    /// exactly this revision.
    pub fn suppresses(&self, id: &str, revision: Revision) -> bool {
        self.reported.get(id) == Some(&revision)
    }

    /// Forget all reports and restart the scan clock.
    pub fn reset(&mut self) {
        self.reported.clear();
        self.last_scan = Instant::now();
    }

    pub fn since_last_scan(&self) -> Duration {
        self.last_scan.elapsed()
    }

    pub fn len(&self) -> usize {
        self.reported.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reported.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(id: &str, revision: Revision) -> ReportedEvent {
        ReportedEvent {
            id: id.to_string(),
            revision,
        }
    }

    #[test]
    fn test_suppresses_only_same_revision() {
        let mut reported = ReportedEvents::new();
        reported.record(event("vm-x", 5));
        assert!(reported.suppresses("vm-x", 5));
        assert!(!reported.suppresses("vm-x", 6));
        assert!(!reported.suppresses("vm-y", 5));
    }

    #[test]
    fn test_latest_report_wins() {
        let mut reported = ReportedEvents::new();
        reported.record(event("vm-x", 5));
        reported.record(event("vm-x", 6));
        assert_eq!(reported.len(), 1);
        assert!(reported.suppresses("vm-x", 6));
        assert!(!reported.suppresses("vm-x", 5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_clears_and_restarts_clock() {
        let mut reported = ReportedEvents::new();
        reported.record(event("vm-x", 5));
        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(reported.since_last_scan(), Duration::from_secs(30));
        reported.reset();
        assert!(reported.is_empty());
        assert_eq!(reported.since_last_scan(), Duration::ZERO);
    }
}

#[cfg(test)]
mod prop_tests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// A report suppresses exactly the reported revision.
        #[test]
        fn prop_suppression_is_exact(reported_at in 1i64..1000, current in 1i64..1000) {
            let mut reported = ReportedEvents::new();
            reported.record(ReportedEvent { id: "vm".to_string(), revision: reported_at });
            prop_assert_eq!(reported.suppresses("vm", current), reported_at == current);
        }
    }
}
