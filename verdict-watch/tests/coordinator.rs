//! VM coordinator: event path, periodic scan and shutdown

use std::sync::Arc;
use std::time::Duration;
use verdict_core::{EntityKind, Vm};
use verdict_policy::Verdict;
use verdict_storage::{InventoryStore, WatchHandle};
use verdict_test_utils::{assertions, fixtures, init_tracing, InMemoryStore, RecordingAgent};
use verdict_watch::{ValidationMetrics, VmEventHandler};

struct Harness {
    store: Arc<InMemoryStore>,
    agent: Arc<RecordingAgent>,
    metrics: Arc<ValidationMetrics>,
    handle: WatchHandle,
}

impl Harness {
    /// Install the VM watch without letting it run.
    fn install(store: Arc<InMemoryStore>, agent: RecordingAgent) -> Self {
        init_tracing();
        let agent = Arc::new(agent);
        let metrics = Arc::new(ValidationMetrics::new());
        let handler = VmEventHandler::new(
            Arc::clone(&store),
            Arc::clone(&agent),
            fixtures::provider(),
            fixtures::fast_config(),
            Arc::clone(&metrics),
        );
        let handle = store.watch::<Vm, _>(handler).unwrap();
        Self {
            store,
            agent,
            metrics,
            handle,
        }
    }

    async fn start(store: Arc<InMemoryStore>, agent: RecordingAgent) -> Self {
        let harness = Self::install(store, agent);
        settle().await;
        harness
    }
}

/// Let every ready task run before the clock moves.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(1)).await;
}

#[tokio::test(start_paused = true)]
async fn test_initial_scan_submits_only_stale_vms() {
    let store = fixtures::inventory(1).await.unwrap();
    store
        .insert(&mut fixtures::vm("vm-new", "h1", &[], &[]))
        .await
        .unwrap();

    let h = Harness::start(store, RecordingAgent::new(1)).await;

    assert_eq!(h.agent.submissions(), vec![("vm-new".to_string(), 1)]);
    assert_eq!(h.metrics.snapshot().scans, 1);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_vm_created_before_started_is_also_found_by_initial_scan() {
    let h = Harness::install(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1));

    // Queued ahead of the watch starting: the event path submits it and the
    // initial scan, which reads no reports, submits it again.
    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &[], &[]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.agent.submissions_of("vm-9"), 2);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.scans, 1);
    assert_eq!(snapshot.reported, 1);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_created_vm_is_submitted_and_reported() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    assert!(h.agent.submissions().is_empty());

    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &["np1"], &[]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.agent.submissions(), vec![("vm-9".to_string(), 1)]);
    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.submitted, 1);
    assert_eq!(snapshot.reported, 1);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_validated_update_is_ignored() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;

    // Stored revision becomes 2, matching revision_validated.
    let mut vm: Vm = h.store.get("vm-1").await.unwrap();
    vm.revision_validated = 2;
    h.store.update(&mut vm).await.unwrap();
    settle().await;

    assert!(h.agent.submissions().is_empty());
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scan_skips_vm_reported_at_same_revision() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &[], &[]))
        .await
        .unwrap();
    settle().await;

    // Past one search interval; the task is still held by the agent so the
    // VM remains stale.
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(h.metrics.snapshot().scans, 2);
    assert_eq!(h.agent.submissions_of("vm-9"), 1);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_scan_resubmits_after_revision_moved() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &[], &[]))
        .await
        .unwrap();
    settle().await;

    // Move to a new revision without the event path submitting it: mark it
    // validated, then change the policy so the scan still finds it.
    let mut vm: Vm = h.store.get("vm-9").await.unwrap();
    vm.revision_validated = vm.revision + 1;
    h.store.update(&mut vm).await.unwrap();
    h.agent.set_version(2);
    tokio::time::sleep(Duration::from_secs(11)).await;

    assert_eq!(
        h.agent.submissions().iter().filter(|(id, _)| id == "vm-9").cloned().collect::<Vec<_>>(),
        vec![("vm-9".to_string(), 1), ("vm-9".to_string(), 2)]
    );
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_policy_version_change_resubmits_every_vm() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    h.agent.set_version(2);

    tokio::time::sleep(Duration::from_secs(11)).await;

    let mut submitted: Vec<String> = h.agent.submissions().into_iter().map(|(id, _)| id).collect();
    submitted.sort();
    assert_eq!(submitted, vec!["vm-1", "vm-2", "vm-3"]);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_submit_failure_is_not_reported() {
    let agent = RecordingAgent::new(1);
    agent.set_reject(true);
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), agent).await;

    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &[], &[]))
        .await
        .unwrap();
    settle().await;

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.submit_failures, 1);
    assert_eq!(snapshot.reported, 0);
    assert_eq!(snapshot.submitted, 0);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_version_unavailable_skips_scan() {
    let agent = RecordingAgent::new(1);
    agent.set_version_unavailable(true);
    let store = fixtures::inventory(1).await.unwrap();
    store
        .insert(&mut fixtures::vm("vm-new", "h1", &[], &[]))
        .await
        .unwrap();

    let h = Harness::start(store, agent).await;

    let snapshot = h.metrics.snapshot();
    assert_eq!(snapshot.scans, 0);
    assert_eq!(snapshot.scans_skipped, 1);
    assert!(h.agent.submissions().is_empty());
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_completed_task_is_harvested_without_resubmission() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    h.store
        .insert(&mut fixtures::vm("vm-9", "h2", &[], &["d2"]))
        .await
        .unwrap();
    settle().await;

    assert_eq!(h.agent.complete_all(Verdict::new(Vec::new(), 1)).await, 1);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let vm: Vm = h.store.get("vm-9").await.unwrap();
    assertions::assert_validated(&vm, 1);
    assert_eq!(h.agent.submissions_of("vm-9"), 1);
    assert_eq!(h.metrics.snapshot().verdicts_applied, 1);
    h.handle.end().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_end_cancels_outstanding_tasks() {
    let h = Harness::start(fixtures::inventory(1).await.unwrap(), RecordingAgent::new(1)).await;
    h.store
        .insert(&mut fixtures::vm("vm-9", "h1", &[], &[]))
        .await
        .unwrap();
    settle().await;

    h.handle.end().await.unwrap();

    assert_eq!(h.store.watch_count(EntityKind::Vm), 0);
    let tasks = h.agent.take();
    assert_eq!(tasks.len(), 1);
    assert!(tasks[0].canceled());

    // Nothing is listening for results any more.
    let scans = h.metrics.snapshot().scans;
    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(h.metrics.snapshot().scans, scans);
}
