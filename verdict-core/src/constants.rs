//! Constants for the validation engine
//!
//! Centralizing defaults makes them easy to find, modify, and test.

use crate::Revision;

// ============================================================================
// PERIODIC SCAN
// ============================================================================

/// Default interval between full scans for stale VMs (10 minutes)
pub const DEFAULT_SEARCH_INTERVAL_SECS: u64 = 600;

/// Default capacity of the reported-event channel
pub const DEFAULT_REPORT_CAPACITY: usize = 1024;

// ============================================================================
// HARVEST
// ============================================================================

/// Maximum number of task results committed in one transaction
pub const MAX_BATCH: usize = 1024;

/// Flush delay once a result is waiting (1 second)
pub const DEFAULT_HARVEST_SHORT_DELAY_MS: u64 = 1000;

/// Flush delay while idle (1 hour)
pub const DEFAULT_HARVEST_LONG_DELAY_SECS: u64 = 3600;

/// Default capacity of the task result channel
pub const DEFAULT_RESULT_CAPACITY: usize = 1024;

// ============================================================================
// POLICY AGENT
// ============================================================================

/// Rule evaluated for every VM
pub const DEFAULT_RULE_PATH: &str = "/v1/data/io/konveyor/forklift/ovirt/validate";

/// Default number of concurrent evaluation workers
pub const DEFAULT_AGENT_WORKERS: usize = 10;

/// Default capacity of the agent's submission queue
pub const DEFAULT_AGENT_QUEUE_CAPACITY: usize = 1024;

// ============================================================================
// REVALIDATION
// ============================================================================

/// `revision_validated` value that never equals a real revision, forcing
/// revalidation.
pub const REVALIDATE: Revision = 0;
