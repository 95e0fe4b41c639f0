//! Worker-pool policy agent
//!
//! Submitted tasks wait in a bounded queue drained by a fixed number of
//! workers. Each worker builds the workload, evaluates it and posts the
//! completed task to the task's result sink.

use crate::{Evaluator, PolicyAgent, Task};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use verdict_core::{AgentConfig, PolicyError, PolicyVersion, VerdictError, VerdictResult};

struct Running {
    queue: mpsc::Sender<Task>,
    workers: Vec<JoinHandle<()>>,
}

/// Policy agent running tasks on a pool of tokio workers.
pub struct WorkerAgent<E> {
    evaluator: Arc<E>,
    config: AgentConfig,
    running: Mutex<Option<Running>>,
}

impl<E: Evaluator> WorkerAgent<E> {
    pub fn new(evaluator: E, config: AgentConfig) -> Self {
        Self::with_shared(Arc::new(evaluator), config)
    }

    /// Create an agent over an evaluator the caller keeps a handle to.
    pub fn with_shared(evaluator: Arc<E>, config: AgentConfig) -> Self {
        Self {
            evaluator,
            config,
            running: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    pub fn is_started(&self) -> bool {
        self.running.lock().unwrap().is_some()
    }

    /// Spawn the workers. Starting a started agent does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) -> VerdictResult<()> {
        self.config.validate()?;
        let mut running = self.running.lock().unwrap();
        if running.is_some() {
            return Ok(());
        }
        let (queue, rx) = mpsc::channel(self.config.queue_capacity);
        let rx = Arc::new(tokio::sync::Mutex::new(rx));
        let workers = (0..self.config.workers)
            .map(|worker| tokio::spawn(work(worker, Arc::clone(&self.evaluator), Arc::clone(&rx))))
            .collect();
        *running = Some(Running { queue, workers });
        tracing::info!(
            workers = self.config.workers,
            queue_capacity = self.config.queue_capacity,
            "Policy agent started"
        );
        Ok(())
    }

    /// Stop accepting tasks and wait for the workers to drain the queue.
    pub async fn stop(&self) {
        let Some(Running { queue, workers }) = self.running.lock().unwrap().take() else {
            return;
        };
        drop(queue);
        for worker in workers {
            if let Err(e) = worker.await {
                tracing::error!(error = %e, "Policy worker panicked");
            }
        }
        tracing::info!("Policy agent stopped");
    }
}

async fn work<E: Evaluator>(
    worker: usize,
    evaluator: Arc<E>,
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<Task>>>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(mut task) = next else {
            break;
        };
        if task.canceled() {
            tracing::debug!(worker, vm_id = %task.entity.id, "Task canceled before evaluation");
            continue;
        }
        let outcome = match task.workload.workload(&task.entity.id).await {
            Ok(input) => evaluator.evaluate(&task.path, &input).await,
            Err(e) => Err(e),
        };
        if let Err(e) = &outcome {
            tracing::debug!(worker, vm_id = %task.entity.id, error = %e, "Evaluation failed");
        }
        task.complete(outcome);
        task.post().await;
    }
    tracing::trace!(worker, "Policy worker exited");
}

#[async_trait]
impl<E: Evaluator> PolicyAgent for WorkerAgent<E> {
    async fn current_version(&self) -> VerdictResult<PolicyVersion> {
        self.evaluator.version().await
    }

    fn submit(&self, mut task: Task) -> VerdictResult<()> {
        let running = self.running.lock().unwrap();
        let Some(Running { queue, .. }) = running.as_ref() else {
            return Err(PolicyError::AgentNotStarted.into());
        };
        task.mark_submitted();
        queue.try_send(task).map_err(|e| {
            let err = match e {
                mpsc::error::TrySendError::Full(_) => PolicyError::QueueFull {
                    capacity: self.config.queue_capacity,
                },
                mpsc::error::TrySendError::Closed(_) => PolicyError::AgentNotStarted,
            };
            VerdictError::from(err)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Verdict, WorkloadSource};
    use serde_json::{json, Value};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::watch;
    use verdict_core::{Concern, EntityRef};

    struct Echo {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Evaluator for Echo {
        async fn evaluate(&self, path: &str, input: &Value) -> VerdictResult<Verdict> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if input["fail"] == json!(true) {
                return Err(PolicyError::EvaluationFailed {
                    path: path.to_string(),
                    reason: "rejected".to_string(),
                }
                .into());
            }
            Ok(Verdict::new(
                vec![Concern::new("Warning", "echo", input["id"].to_string())],
                9,
            ))
        }

        async fn version(&self) -> VerdictResult<PolicyVersion> {
            Ok(9)
        }
    }

    struct Input;

    #[async_trait]
    impl WorkloadSource for Input {
        async fn workload(&self, vm_id: &str) -> VerdictResult<Value> {
            Ok(json!({ "id": vm_id, "fail": vm_id == "bad" }))
        }
    }

    fn echo() -> Arc<Echo> {
        Arc::new(Echo {
            calls: AtomicUsize::new(0),
        })
    }

    fn task(id: &str, sink: &mpsc::Sender<Task>, context: &watch::Receiver<bool>) -> Task {
        Task::new(
            "/v1/data/validate",
            EntityRef::vm(id),
            1,
            Arc::new(Input),
            sink.clone(),
            context.clone(),
        )
    }

    #[tokio::test]
    async fn test_submit_before_start_fails() {
        let agent = WorkerAgent::new(
            Echo {
                calls: AtomicUsize::new(0),
            },
            AgentConfig::default(),
        );
        let (sink, _rx) = mpsc::channel(1);
        let (_cancel, context) = watch::channel(false);
        let err = agent.submit(task("vm-1", &sink, &context)).unwrap_err();
        assert_eq!(err, VerdictError::Policy(PolicyError::AgentNotStarted));
    }

    #[tokio::test]
    async fn test_tasks_complete_and_post() {
        let agent = WorkerAgent::with_shared(echo(), AgentConfig::default());
        agent.start().unwrap();
        let (sink, mut rx) = mpsc::channel(4);
        let (_cancel, context) = watch::channel(false);
        agent.submit(task("vm-1", &sink, &context)).unwrap();
        agent.submit(task("bad", &sink, &context)).unwrap();

        let mut done = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        done.sort_by(|a, b| a.entity.id.cmp(&b.entity.id));
        assert!(matches!(
            done[0].error(),
            Some(VerdictError::Policy(PolicyError::EvaluationFailed { .. }))
        ));
        let verdict = done[1].verdict().unwrap();
        assert_eq!(verdict.version, 9);
        assert_eq!(verdict.concerns.len(), 1);
        assert!(done[1].duration().is_some());
        assert_eq!(agent.current_version().await.unwrap(), 9);
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_queue_full_rejects_without_waiting() {
        let agent = WorkerAgent::new(
            Echo {
                calls: AtomicUsize::new(0),
            },
            AgentConfig {
                workers: 1,
                queue_capacity: 1,
            },
        );
        agent.start().unwrap();
        let (sink, _rx) = mpsc::channel(8);
        let (_cancel, context) = watch::channel(false);
        // Current-thread runtime: workers cannot run until this test yields.
        agent.submit(task("vm-1", &sink, &context)).unwrap();
        let err = agent.submit(task("vm-2", &sink, &context)).unwrap_err();
        assert_eq!(
            err,
            VerdictError::Policy(PolicyError::QueueFull { capacity: 1 })
        );
        agent.stop().await;
    }

    #[tokio::test]
    async fn test_canceled_tasks_are_skipped() {
        let evaluator = echo();
        let agent = WorkerAgent::with_shared(Arc::clone(&evaluator), AgentConfig::default());
        agent.start().unwrap();
        let (sink, mut rx) = mpsc::channel(4);
        let (cancel, context) = watch::channel(false);
        cancel.send_replace(true);
        agent.submit(task("vm-1", &sink, &context)).unwrap();
        agent.stop().await;
        drop(sink);
        assert!(rx.recv().await.is_none());
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_then_submit_fails() {
        let agent = WorkerAgent::new(
            Echo {
                calls: AtomicUsize::new(0),
            },
            AgentConfig::default(),
        );
        agent.start().unwrap();
        assert!(agent.is_started());
        agent.stop().await;
        assert!(!agent.is_started());
        let (sink, _rx) = mpsc::channel(1);
        let (_cancel, context) = watch::channel(false);
        assert!(agent.submit(task("vm-1", &sink, &context)).is_err());
    }
}
