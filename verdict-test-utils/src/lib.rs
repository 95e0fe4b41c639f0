//! Verdict Test Utilities
//!
//! Shared test infrastructure for the Verdict workspace:
//! - Scripted policy evaluator and a recording policy agent
//! - Inventory fixtures for common topologies
//! - Proptest generators for entity types
//! - Custom assertions for verdict state

// Re-export the in-memory store from its source crate
pub use verdict_storage::InMemoryStore;

// Re-export core types for convenience
pub use verdict_core::{
    AgentConfig, Cluster, Concern, Disk, DiskAttachment, DiskProfile, EntityKind, EntityRef, Host,
    Nic, NicProfile, PolicyError, PolicyVersion, Provider, Revision, StorageError,
    ValidationConfig, VerdictError, VerdictResult, Vm,
};
pub use verdict_policy::{Evaluator, PolicyAgent, Task, Verdict};

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Mutex;

/// Install a test-friendly tracing subscriber honouring `RUST_LOG`. Safe to
/// call from every test.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// SCRIPTED EVALUATOR
// ============================================================================

/// Evaluator returning a fixed verdict, with per-VM failures.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    version: AtomicI64,
    concerns: Mutex<Vec<Concern>>,
    failing: Mutex<HashSet<String>>,
    version_unavailable: AtomicBool,
    evaluated: Mutex<Vec<String>>,
}

impl ScriptedEvaluator {
    pub fn new(version: PolicyVersion) -> Self {
        Self {
            version: AtomicI64::new(version),
            concerns: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            version_unavailable: AtomicBool::new(false),
            evaluated: Mutex::new(Vec::new()),
        }
    }

    /// Advertise a new policy bundle version.
    pub fn set_version(&self, version: PolicyVersion) {
        self.version.store(version, Ordering::SeqCst);
    }

    /// Concerns returned by every successful evaluation.
    pub fn set_concerns(&self, concerns: Vec<Concern>) {
        *self.concerns.lock().unwrap() = concerns;
    }

    /// Fail every evaluation of the VM.
    pub fn fail_for(&self, vm_id: impl Into<String>) {
        self.failing.lock().unwrap().insert(vm_id.into());
    }

    /// Make `version()` fail.
    pub fn set_version_unavailable(&self, unavailable: bool) {
        self.version_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// VM ids evaluated so far, in evaluation order.
    pub fn evaluated(&self) -> Vec<String> {
        self.evaluated.lock().unwrap().clone()
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, path: &str, input: &Value) -> VerdictResult<Verdict> {
        let vm_id = input["vm"]["id"].as_str().unwrap_or_default().to_string();
        self.evaluated.lock().unwrap().push(vm_id.clone());
        if self.failing.lock().unwrap().contains(&vm_id) {
            return Err(PolicyError::EvaluationFailed {
                path: path.to_string(),
                reason: format!("scripted failure for {vm_id}"),
            }
            .into());
        }
        Ok(Verdict::new(
            self.concerns.lock().unwrap().clone(),
            self.version.load(Ordering::SeqCst),
        ))
    }

    async fn version(&self) -> VerdictResult<PolicyVersion> {
        if self.version_unavailable.load(Ordering::SeqCst) {
            return Err(PolicyError::VersionUnavailable {
                reason: "scripted".to_string(),
            }
            .into());
        }
        Ok(self.version.load(Ordering::SeqCst))
    }
}

// ============================================================================
// RECORDING AGENT
// ============================================================================

/// Policy agent that holds submitted tasks until the test completes them.
#[derive(Debug)]
pub struct RecordingAgent {
    version: AtomicI64,
    version_unavailable: AtomicBool,
    reject: AtomicBool,
    tasks: Mutex<Vec<Task>>,
    submissions: Mutex<Vec<(String, Revision)>>,
}

impl RecordingAgent {
    pub fn new(version: PolicyVersion) -> Self {
        Self {
            version: AtomicI64::new(version),
            version_unavailable: AtomicBool::new(false),
            reject: AtomicBool::new(false),
            tasks: Mutex::new(Vec::new()),
            submissions: Mutex::new(Vec::new()),
        }
    }

    pub fn set_version(&self, version: PolicyVersion) {
        self.version.store(version, Ordering::SeqCst);
    }

    /// Make `current_version()` fail.
    pub fn set_version_unavailable(&self, unavailable: bool) {
        self.version_unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Refuse every submission with `QueueFull`.
    pub fn set_reject(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// Every accepted submission as `(vm_id, revision)`, in order. Not
    /// cleared by [`take`](Self::take).
    pub fn submissions(&self) -> Vec<(String, Revision)> {
        self.submissions.lock().unwrap().clone()
    }

    /// Number of accepted submissions of a VM.
    pub fn submissions_of(&self, vm_id: &str) -> usize {
        self.submissions
            .lock()
            .unwrap()
            .iter()
            .filter(|(id, _)| id == vm_id)
            .count()
    }

    /// Remove and return the tasks waiting for completion.
    pub fn take(&self) -> Vec<Task> {
        std::mem::take(&mut *self.tasks.lock().unwrap())
    }

    /// Complete every waiting task with `verdict` and post it. Returns the
    /// number of tasks posted.
    pub async fn complete_all(&self, verdict: Verdict) -> usize {
        let tasks = self.take();
        let count = tasks.len();
        for mut task in tasks {
            task.complete(Ok(verdict.clone()));
            task.post().await;
        }
        count
    }
}

#[async_trait]
impl PolicyAgent for RecordingAgent {
    async fn current_version(&self) -> VerdictResult<PolicyVersion> {
        if self.version_unavailable.load(Ordering::SeqCst) {
            return Err(PolicyError::VersionUnavailable {
                reason: "scripted".to_string(),
            }
            .into());
        }
        Ok(self.version.load(Ordering::SeqCst))
    }

    fn submit(&self, mut task: Task) -> VerdictResult<()> {
        if self.reject.load(Ordering::SeqCst) {
            return Err(PolicyError::QueueFull { capacity: 0 }.into());
        }
        task.mark_submitted();
        self.submissions
            .lock()
            .unwrap()
            .push((task.entity.id.clone(), task.revision));
        self.tasks.lock().unwrap().push(task);
        Ok(())
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    use super::*;
    use proptest::prelude::*;

    /// Generate a VM id.
    pub fn arb_vm_id() -> impl Strategy<Value = String> {
        "vm-[a-z0-9]{1,8}"
    }

    /// Generate a stored revision (always positive).
    pub fn arb_revision() -> impl Strategy<Value = Revision> {
        1i64..100_000
    }

    /// Generate a policy version.
    pub fn arb_policy_version() -> impl Strategy<Value = PolicyVersion> {
        0i64..1_000
    }

    /// Generate a single concern.
    pub fn arb_concern() -> impl Strategy<Value = Concern> {
        (
            prop_oneof![Just("Critical"), Just("Warning"), Just("Information")],
            "[a-zA-Z ]{1,40}",
            "[a-zA-Z .]{0,80}",
        )
            .prop_map(|(category, label, assessment)| Concern::new(category, label, assessment))
    }

    /// Generate a concern list.
    pub fn arb_concerns() -> impl Strategy<Value = Vec<Concern>> {
        prop::collection::vec(arb_concern(), 0..6)
    }

    /// Generate a VM with an arbitrary verdict state.
    pub fn arb_vm() -> impl Strategy<Value = Vm> {
        (
            arb_vm_id(),
            arb_revision(),
            arb_policy_version(),
            arb_concerns(),
            any::<bool>(),
        )
            .prop_flat_map(|(id, revision, policy_version, concerns, validated)| {
                let revision_validated = if validated {
                    Just(revision).boxed()
                } else {
                    (0..revision).boxed()
                };
                (
                    Just(id),
                    Just(revision),
                    revision_validated,
                    Just(policy_version),
                    Just(concerns),
                )
            })
            .prop_map(|(id, revision, revision_validated, policy_version, concerns)| Vm {
                id,
                revision,
                revision_validated,
                policy_version,
                concerns,
                ..Default::default()
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    /// Development configuration with a small batch cap, for tests on paused
    /// time.
    pub fn fast_config() -> ValidationConfig {
        ValidationConfig {
            search_interval: Duration::from_secs(10),
            max_batch: 16,
            harvest_long_delay: Duration::from_secs(30),
            ..ValidationConfig::development()
        }
    }

    pub fn provider() -> Provider {
        let mut provider = Provider::new("konveyor-forklift", "ovirt-test");
        provider.uid = "3d0b6c1e".to_string();
        provider
    }

    pub fn cluster(id: &str) -> Cluster {
        Cluster {
            id: id.to_string(),
            name: format!("cluster {id}"),
            ..Default::default()
        }
    }

    pub fn host(id: &str, cluster: &str) -> Host {
        Host {
            id: id.to_string(),
            name: format!("host {id}"),
            cluster: cluster.to_string(),
            ..Default::default()
        }
    }

    pub fn nic_profile(id: &str) -> NicProfile {
        NicProfile {
            id: id.to_string(),
            name: format!("vnic {id}"),
            ..Default::default()
        }
    }

    pub fn disk_profile(id: &str) -> DiskProfile {
        DiskProfile {
            id: id.to_string(),
            name: format!("disk profile {id}"),
            ..Default::default()
        }
    }

    pub fn disk(id: &str, profile: &str) -> Disk {
        Disk {
            id: id.to_string(),
            name: format!("disk {id}"),
            profile: profile.to_string(),
            ..Default::default()
        }
    }

    /// A VM on `host` with one NIC per profile and one attachment per disk.
    pub fn vm(id: &str, host: &str, nic_profiles: &[&str], disks: &[&str]) -> Vm {
        Vm {
            id: id.to_string(),
            name: format!("vm {id}"),
            host: host.to_string(),
            nics: nic_profiles
                .iter()
                .enumerate()
                .map(|(i, profile)| Nic {
                    id: format!("{id}-nic{i}"),
                    profile: profile.to_string(),
                    ..Default::default()
                })
                .collect(),
            disk_attachments: disks
                .iter()
                .enumerate()
                .map(|(i, disk)| DiskAttachment {
                    id: format!("{id}-da{i}"),
                    disk: disk.to_string(),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        }
    }

    /// Mark a VM validated at the revision the store assigns on its next
    /// insert or update.
    pub fn validated(mut vm: Vm, policy_version: PolicyVersion) -> Vm {
        vm.revision_validated = vm.revision + 1;
        vm.policy_version = policy_version;
        vm
    }

    /// Populate a store with:
    ///
    /// ```text
    /// c1 ─ h1 ─ vm-1 (np1, d1)
    ///    └ h2 ─ vm-2 (d2)
    /// c2 ─ h3 ─ vm-3 (np2)
    /// d1 ∈ dp1, d2 ∈ dp2
    /// ```
    ///
    /// Every VM is stored validated against `policy_version`.
    pub async fn inventory(policy_version: PolicyVersion) -> VerdictResult<Arc<InMemoryStore>> {
        use verdict_storage::InventoryStore;

        let store = Arc::new(InMemoryStore::new());
        for id in ["c1", "c2"] {
            store.insert(&mut cluster(id)).await?;
        }
        for (id, c) in [("h1", "c1"), ("h2", "c1"), ("h3", "c2")] {
            store.insert(&mut host(id, c)).await?;
        }
        for id in ["np1", "np2"] {
            store.insert(&mut nic_profile(id)).await?;
        }
        for id in ["dp1", "dp2"] {
            store.insert(&mut disk_profile(id)).await?;
        }
        for (id, p) in [("d1", "dp1"), ("d2", "dp2")] {
            store.insert(&mut disk(id, p)).await?;
        }
        let vms = [
            vm("vm-1", "h1", &["np1"], &["d1"]),
            vm("vm-2", "h2", &[], &["d2"]),
            vm("vm-3", "h3", &["np2"], &[]),
        ];
        for vm in vms {
            store.insert(&mut validated(vm, policy_version)).await?;
        }
        Ok(store)
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    use super::*;

    /// Assert that a result failed with a storage error.
    pub fn assert_storage_error<T: std::fmt::Debug>(result: &VerdictResult<T>) {
        assert!(
            matches!(result, Err(VerdictError::Storage(_))),
            "Expected storage error, got {:?}",
            result
        );
    }

    /// Assert that a result failed with a policy error.
    pub fn assert_policy_error<T: std::fmt::Debug>(result: &VerdictResult<T>) {
        assert!(
            matches!(result, Err(VerdictError::Policy(_))),
            "Expected policy error, got {:?}",
            result
        );
    }

    /// Assert that a VM carries a current verdict from `policy_version`.
    pub fn assert_validated(vm: &Vm, policy_version: PolicyVersion) {
        assert_eq!(
            vm.revision, vm.revision_validated,
            "VM {} not validated at its revision",
            vm.id
        );
        assert_eq!(
            vm.policy_version, policy_version,
            "VM {} validated against the wrong policy",
            vm.id
        );
    }

    /// Assert that a VM has been marked for revalidation.
    pub fn assert_invalidated(vm: &Vm) {
        assert_eq!(
            vm.revision_validated,
            verdict_core::constants::REVALIDATE,
            "VM {} not marked for revalidation",
            vm.id
        );
        assert!(!vm.validated(), "VM {} still reads as validated", vm.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use verdict_storage::InventoryStore;

    #[tokio::test]
    async fn test_inventory_vms_start_validated() {
        let store = fixtures::inventory(4).await.unwrap();
        let vm: Vm = store.get("vm-1").await.unwrap();
        assertions::assert_validated(&vm, 4);
        assert_eq!(vm.revision, 1);
        assert_eq!(store.count(EntityKind::Host).await, 3);
    }

    #[tokio::test]
    async fn test_scripted_evaluator_failure() {
        let evaluator = ScriptedEvaluator::new(2);
        evaluator.fail_for("vm-1");
        let input = serde_json::json!({ "vm": { "id": "vm-1" } });
        let result = evaluator.evaluate("/v1/validate", &input).await;
        assertions::assert_policy_error(&result);
        assert_eq!(evaluator.evaluated(), vec!["vm-1".to_string()]);
    }

    proptest! {
        #[test]
        fn prop_arb_vm_revision_bounds(vm in generators::arb_vm()) {
            prop_assert!(vm.revision_validated <= vm.revision);
            prop_assert!(vm.revision > 0);
        }
    }
}
