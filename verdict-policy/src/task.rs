//! Validation task

use crate::{Verdict, WorkloadSource};
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use uuid::Uuid;
use verdict_core::{EntityRef, Revision, Timestamp, VerdictError, VerdictResult};

/// Outcome of a completed task.
pub type TaskOutcome = VerdictResult<Verdict>;

/// A request to validate one entity at one revision.
///
/// The coordinator creates the task, the agent completes it and posts it to
/// `result`, and the harvester consumes it.
pub struct Task {
    pub id: Uuid,
    /// Rule to evaluate.
    pub path: String,
    pub entity: EntityRef,
    /// Entity revision when the task was created.
    pub revision: Revision,
    pub workload: Arc<dyn WorkloadSource>,
    /// Result sink.
    pub result: mpsc::Sender<Task>,
    /// Becomes `true` when the submitter shuts down.
    pub context: watch::Receiver<bool>,
    pub submitted_at: Option<Timestamp>,
    pub completed_at: Option<Timestamp>,
    pub outcome: Option<TaskOutcome>,
}

impl Task {
    pub fn new(
        path: impl Into<String>,
        entity: EntityRef,
        revision: Revision,
        workload: Arc<dyn WorkloadSource>,
        result: mpsc::Sender<Task>,
        context: watch::Receiver<bool>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            path: path.into(),
            entity,
            revision,
            workload,
            result,
            context,
            submitted_at: None,
            completed_at: None,
            outcome: None,
        }
    }

    /// Whether the submitter has shut down.
    pub fn canceled(&self) -> bool {
        *self.context.borrow()
    }

    pub fn mark_submitted(&mut self) {
        self.submitted_at = Some(Utc::now());
    }

    /// Record the outcome and stamp the completion time.
    pub fn complete(&mut self, outcome: TaskOutcome) {
        self.completed_at = Some(Utc::now());
        self.outcome = Some(outcome);
    }

    /// Submission to completion. `None` until both are stamped.
    pub fn duration(&self) -> Option<chrono::Duration> {
        match (self.submitted_at, self.completed_at) {
            (Some(submitted), Some(completed)) => Some(completed - submitted),
            _ => None,
        }
    }

    /// The failure, if the task completed with one.
    pub fn error(&self) -> Option<&VerdictError> {
        self.outcome.as_ref().and_then(|o| o.as_ref().err())
    }

    /// The verdict, if the task completed successfully.
    pub fn verdict(&self) -> Option<&Verdict> {
        self.outcome.as_ref().and_then(|o| o.as_ref().ok())
    }

    /// Deliver the task to its result sink. A closed sink means the
    /// submitter is gone; the task is dropped.
    pub async fn post(self) {
        let sink = self.result.clone();
        if let Err(e) = sink.send(self).await {
            tracing::trace!(vm_id = %e.0.entity.id, "Result sink closed, task dropped");
        }
    }
}

impl std::fmt::Debug for Task {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("entity", &self.entity)
            .field("revision", &self.revision)
            .field("submitted_at", &self.submitted_at)
            .field("completed_at", &self.completed_at)
            .field("outcome", &self.outcome)
            .finish()
    }
}
