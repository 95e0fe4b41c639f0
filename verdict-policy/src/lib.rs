//! Verdict Policy - Policy Evaluation Agent
//!
//! Interfaces to the external policy evaluator and the agent that runs
//! validation tasks against it. The rule language and the transport to the
//! evaluator are left to [`Evaluator`] implementations.

mod agent;
mod task;

pub use agent::WorkerAgent;
pub use task::{Task, TaskOutcome};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use verdict_core::{Concern, PolicyVersion, VerdictResult};

// ============================================================================
// VERDICT
// ============================================================================

/// Result of one policy evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Verdict {
    /// Findings, in evaluator order.
    pub concerns: Vec<Concern>,
    /// Policy bundle that produced the findings.
    pub version: PolicyVersion,
}

impl Verdict {
    pub fn new(concerns: Vec<Concern>, version: PolicyVersion) -> Self {
        Self { concerns, version }
    }
}

// ============================================================================
// COLLABORATOR TRAITS
// ============================================================================

/// Builds the document a rule is evaluated against.
#[async_trait]
pub trait WorkloadSource: Send + Sync + 'static {
    async fn workload(&self, vm_id: &str) -> VerdictResult<Value>;
}

/// The external policy evaluator.
///
/// # Example
/// ```ignore
/// struct OpaClient { /* ... */ }
///
/// #[async_trait]
/// impl Evaluator for OpaClient {
///     async fn evaluate(&self, path: &str, input: &Value) -> VerdictResult<Verdict> {
///         // POST input to path
///     }
///     async fn version(&self) -> VerdictResult<PolicyVersion> {
///         // Read the bundle revision
///     }
/// }
/// ```
#[async_trait]
pub trait Evaluator: Send + Sync + 'static {
    /// Evaluate the rule at `path` against `input`.
    async fn evaluate(&self, path: &str, input: &Value) -> VerdictResult<Verdict>;

    /// Currently advertised policy bundle version.
    async fn version(&self) -> VerdictResult<PolicyVersion>;
}

/// Accepts validation tasks and eventually posts each one, completed, to
/// its result sink.
#[async_trait]
pub trait PolicyAgent: Send + Sync + 'static {
    /// Currently advertised policy bundle version.
    async fn current_version(&self) -> VerdictResult<PolicyVersion>;

    /// Hand a task to the agent without waiting for it to run.
    ///
    /// # Errors
    /// * `PolicyError::AgentNotStarted` - the agent is not running
    /// * `PolicyError::QueueFull` - the agent cannot accept more work now
    fn submit(&self, task: Task) -> VerdictResult<()>;
}
