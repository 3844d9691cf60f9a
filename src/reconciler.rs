//! Reconciler for one VM.
//!
//! This module ties observation, reference checks, planning and execution
//! together. `plan` never mutates anything; `apply` creates the VM when it
//! has no remote id yet, validates the whole update plan before the first
//! mutation, then records what the control plane computed in the state
//! store. `destroy` powers the VM off and deletes it.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{AssignedIds, ConfigHasher, TowerConfig, VmSpec};
use crate::context::Context;
use crate::error::{ApiError, ConfigError, PowerError, Result, TaskError, TowerError};
use crate::planner::{assigned_ids, PlanExecutor, VmCreatePlan, VmUpdatePlan};
use crate::retry::{retry, RetryOptions, DEFAULT_INITIAL_BACKOFF};
use crate::state::{
    generate_holder_id, AppliedAccount, ReconcileHistoryEntry, StateStore, VmState,
};
use crate::tower::{
    task_ids, ControlPlane, ObservedVm, PowerController, PowerOperation, PowerState,
    ReferenceResolver, StoragePolicyCache, TaskTracker, VmObserver, VmStatus,
};

/// Reconciler for maintaining the desired state of a VM.
pub struct VmReconciler<S: StateStore> {
    /// Control plane, for creating and deleting VMs.
    api: Arc<dyn ControlPlane>,
    /// Retry policy for single requests.
    retry: RetryOptions,
    /// State store.
    state_store: S,
    /// VM observer.
    observer: VmObserver,
    /// Reference checker.
    resolver: ReferenceResolver,
    /// Power transitions outside of a plan.
    power: PowerController,
    /// Task waiting outside of a plan.
    tracker: TaskTracker,
    /// Plan executor.
    executor: PlanExecutor,
    /// Configuration hasher.
    hasher: ConfigHasher,
}

/// What `plan` found to do.
#[derive(Debug, Clone)]
pub enum ReconcilePlan {
    /// The VM does not exist yet.
    Create(VmCreatePlan),
    /// The VM exists and is moved to its desired state.
    Update(VmUpdatePlan),
}

impl ReconcilePlan {
    /// Returns true when nothing would change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Create(_) => false,
            Self::Update(plan) => plan.is_empty(),
        }
    }
}

/// Result of an apply.
#[derive(Debug, serde::Serialize)]
pub struct ReconciliationResult {
    /// Reconciled VM.
    pub vm_id: String,
    /// Whether the VM was created by this apply.
    pub created: bool,
    /// Hash of the applied configuration.
    pub config_hash: String,
    /// Planned actions that were applied.
    pub actions: Vec<String>,
    /// Executed steps.
    pub steps: Vec<String>,
    /// Status after the apply.
    pub final_status: VmStatus,
    /// Final state after reconciliation.
    #[serde(skip)]
    pub final_state: Option<VmState>,
}

impl<S: StateStore> VmReconciler<S> {
    /// Creates a reconciler using the connection settings in `tower`.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>, state_store: S, tower: &TowerConfig) -> Self {
        let retry = RetryOptions::new(tower.max_retries, DEFAULT_INITIAL_BACKOFF);
        let poll_interval = Duration::from_secs(tower.poll_interval_secs);
        let tracker = TaskTracker::new(Arc::clone(&api))
            .with_poll_interval(poll_interval)
            .with_retry(retry);
        let policies = Arc::new(StoragePolicyCache::new(retry));

        Self {
            retry,
            state_store,
            observer: VmObserver::new(Arc::clone(&api), policies, retry),
            resolver: ReferenceResolver::new(Arc::clone(&api), retry),
            power: PowerController::new(Arc::clone(&api), tracker.clone()),
            executor: PlanExecutor::new(Arc::clone(&api), tracker.clone(), poll_interval),
            api,
            tracker,
            hasher: ConfigHasher::new(),
        }
    }

    /// Returns the state store.
    pub const fn state_store(&self) -> &S {
        &self.state_store
    }

    /// Returns the remote id of the VM described by `spec`: the configured
    /// one, or the one recorded when this tool created it.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the VM has not been created yet.
    pub async fn vm_id(&self, spec: &VmSpec) -> Result<String> {
        let state = self.state_store.load(state_key(spec)?).await?;
        target_id(spec, state.as_ref()).ok_or_else(|| {
            ConfigError::validation("vm has not been created yet, run apply first", "vm.id").into()
        })
    }

    /// Computes the plan for `spec` without changing anything.
    ///
    /// # Errors
    ///
    /// Returns an observation error, unresolved references, or every
    /// validation failure of the plan.
    pub async fn plan(&self, ctx: &Context, spec: &VmSpec) -> Result<ReconcilePlan> {
        let state = self.state_store.load(state_key(spec)?).await?;
        let Some(vm_id) = target_id(spec, state.as_ref()) else {
            self.resolver.verify(ctx, spec).await?;
            return Ok(ReconcilePlan::Create(VmCreatePlan::build(spec)?));
        };

        let spec = spec.for_vm(&vm_id, assigned(state.as_ref()));
        let observed = self.observer.observe(ctx, &vm_id).await?;
        let plan = self.plan_against(ctx, &spec, &observed, state.as_ref()).await?;
        Ok(ReconcilePlan::Update(plan))
    }

    async fn plan_against(
        &self,
        ctx: &Context,
        spec: &VmSpec,
        observed: &ObservedVm,
        state: Option<&VmState>,
    ) -> Result<VmUpdatePlan> {
        self.resolver.verify(ctx, spec).await?;
        let applied_account = state.and_then(VmState::account_fingerprint);
        let plan = VmUpdatePlan::build(spec, observed, applied_account)?;
        debug!("Plan for vm {}: {} action(s)", plan.vm_id, plan.action_count());
        Ok(plan)
    }

    /// Moves the VM to `spec`, creating it first when it has no id.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is locked, planning fails (nothing is
    /// mutated then), or a step fails. A failed step is recorded in the
    /// state history when state exists.
    pub async fn apply(&self, ctx: &Context, spec: &VmSpec) -> Result<ReconciliationResult> {
        let key = state_key(spec)?;
        info!("Starting reconciliation for vm {key}");

        let lock = self.state_store.acquire_lock(key, &generate_holder_id()).await?;
        let outcome = self.apply_locked(ctx, key, spec).await;
        if let Err(err) = self.state_store.release_lock(key, &lock.lock_id).await {
            warn!("Failed to release state lock {}: {err}", lock.lock_id);
        }
        outcome
    }

    async fn apply_locked(
        &self,
        ctx: &Context,
        key: &str,
        spec: &VmSpec,
    ) -> Result<ReconciliationResult> {
        let mut state = self.state_store.load(key).await?;
        let mut created_actions = Vec::new();
        let vm_id = match target_id(spec, state.as_ref()) {
            Some(vm_id) => vm_id,
            None => {
                let (new_state, actions) = self.create(ctx, key, spec).await?;
                let vm_id = new_state.vm_id.clone();
                state = Some(new_state);
                created_actions = actions;
                vm_id
            }
        };
        let created = !created_actions.is_empty();
        let spec = spec.for_vm(&vm_id, assigned(state.as_ref()));

        let observed = self.observer.observe(ctx, &vm_id).await?;
        let plan = self.plan_against(ctx, &spec, &observed, state.as_ref()).await?;
        let actions: Vec<String> = plan.actions.iter().map(ToString::to_string).collect();

        let executed = match self.executor.execute(ctx, &plan).await {
            Ok(executed) => executed,
            Err(err) => {
                error!("Reconciliation of vm {vm_id} failed: {err}");
                if let Some(mut state) = state {
                    state.add_history(ReconcileHistoryEntry::failed(
                        &plan.config_hash,
                        actions,
                        err.to_string(),
                    ));
                    if let Err(save_err) = self.state_store.save(key, &state).await {
                        warn!("Failed to record the failed apply: {save_err}");
                    }
                }
                return Err(err);
            }
        };

        let final_observed = if executed.is_noop() {
            observed
        } else {
            self.observer.observe(ctx, &vm_id).await?
        };

        let mut state = state.unwrap_or_else(|| VmState::new(&final_observed, &plan.config_hash));
        state.record_observation(&final_observed, &plan.config_hash);
        if let Some(account) = &spec.guest_os_account {
            state.guest_os_account = Some(AppliedAccount {
                username: account.username.clone(),
                fingerprint: self.hasher.fingerprint_account(account),
            });
        }
        if !actions.is_empty() {
            state.add_history(ReconcileHistoryEntry::new(&plan.config_hash, actions.clone()));
        }
        self.state_store.save(key, &state).await?;

        let mut all_actions = created_actions;
        all_actions.extend(actions);
        info!(
            "Reconciliation of vm {vm_id} complete: {} action(s), {} step(s)",
            all_actions.len(),
            executed.steps.len()
        );
        Ok(ReconciliationResult {
            vm_id,
            created,
            config_hash: plan.config_hash,
            actions: all_actions,
            steps: executed.steps.iter().map(|s| s.step.to_string()).collect(),
            final_status: final_observed.status(),
            final_state: Some(state),
        })
    }

    /// Creates the VM described by `spec` and records it under `key`.
    ///
    /// The new id is saved as soon as the control plane returns it, so an
    /// interrupted wait never leads to a second VM. A creation task that
    /// fails leaves no VM behind and its record is removed.
    async fn create(
        &self,
        ctx: &Context,
        key: &str,
        spec: &VmSpec,
    ) -> Result<(VmState, Vec<String>)> {
        self.resolver.verify(ctx, spec).await?;
        let plan = VmCreatePlan::build(spec)?;
        let actions: Vec<String> = plan.actions.iter().map(ToString::to_string).collect();
        info!("Creating vm {} in cluster {}", plan.input.name, plan.input.cluster_id);

        let records = retry(ctx, &self.retry, || self.api.create_vm(&plan.input)).await?;
        let Some(record) = records.first() else {
            return Err(ApiError::invalid_response("create-vm", "no vm in response").into());
        };
        let vm_id = record.data.id.clone();
        let pending = ObservedVm {
            vm: record.data.clone(),
            disks: Vec::new(),
            cd_roms: Vec::new(),
            nics: Vec::new(),
        };
        self.state_store
            .save(key, &VmState::new(&pending, &plan.config_hash))
            .await?;

        if let Err(err) = self.tracker.wait_for_tasks(ctx, &task_ids(&records)).await {
            if matches!(err, TowerError::Task(TaskError::Failed { .. })) {
                self.state_store.remove(key).await?;
            }
            return Err(err);
        }

        let observed = self.observer.observe(ctx, &vm_id).await?;
        let mut state = VmState::new(&observed, &plan.config_hash);
        state.assigned = assigned_ids(&observed);
        state.add_history(ReconcileHistoryEntry::new(&plan.config_hash, actions.clone()));
        self.state_store.save(key, &state).await?;
        info!("Created vm {vm_id}");
        Ok((state, actions))
    }

    /// Powers the VM described by `spec` off and deletes it, then forgets
    /// its state. Returns the deleted id, `None` if there was no VM.
    ///
    /// # Errors
    ///
    /// Returns an error if the state is locked, or the power-off or delete
    /// request or task fails.
    pub async fn destroy(&self, ctx: &Context, spec: &VmSpec) -> Result<Option<String>> {
        let key = state_key(spec)?;
        let lock = self.state_store.acquire_lock(key, &generate_holder_id()).await?;
        let outcome = self.destroy_locked(ctx, key, spec).await;
        if let Err(err) = self.state_store.release_lock(key, &lock.lock_id).await {
            warn!("Failed to release state lock {}: {err}", lock.lock_id);
        }
        outcome
    }

    async fn destroy_locked(
        &self,
        ctx: &Context,
        key: &str,
        spec: &VmSpec,
    ) -> Result<Option<String>> {
        let state = self.state_store.load(key).await?;
        let Some(vm_id) = target_id(spec, state.as_ref()) else {
            info!("No vm recorded for {key}, nothing to destroy");
            return Ok(None);
        };

        let vm = match self.observer.fetch_vm(ctx, &vm_id).await {
            Ok(vm) => vm,
            Err(TowerError::Api(ApiError::NotFound { .. })) => {
                warn!("vm {vm_id} is already gone");
                self.state_store.remove(key).await?;
                return Ok(Some(vm_id));
            }
            Err(err) => return Err(err),
        };

        if matches!(vm.status, VmStatus::Running | VmStatus::Suspended) {
            self.power.execute(ctx, &vm_id, &PowerOperation::PowerOff).await?;
        }

        info!("Deleting vm {vm_id}");
        let records = retry(ctx, &self.retry, || self.api.delete_vm(&vm_id)).await?;
        self.tracker.wait_for_tasks(ctx, &task_ids(&records)).await?;
        self.state_store.remove(key).await?;
        info!("Deleted vm {vm_id}");
        Ok(Some(vm_id))
    }

    /// Reads the VM with all of its sub-resources.
    ///
    /// # Errors
    ///
    /// Returns the observation error.
    pub async fn status(&self, ctx: &Context, vm_id: &str) -> Result<ObservedVm> {
        self.observer.observe(ctx, vm_id).await
    }

    /// Moves `vm_id` to `desired` outside of a plan.
    ///
    /// # Errors
    ///
    /// Returns [`PowerError::InvalidState`] if the VM has no power state,
    /// or the transition error.
    pub async fn power(
        &self,
        ctx: &Context,
        vm_id: &str,
        desired: PowerState,
        force: bool,
        host_id: Option<&str>,
    ) -> Result<()> {
        let vm = self.observer.fetch_vm(ctx, vm_id).await?;
        let Some(current) = vm.status.power_state() else {
            return Err(PowerError::InvalidState {
                vm_id: vm_id.to_string(),
                status: vm.status.to_string(),
                action: "cannot change status",
            }
            .into());
        };
        self.power
            .transition(ctx, vm_id, current, desired, force, host_id)
            .await
    }

    /// Waits for the given remote tasks.
    ///
    /// # Errors
    ///
    /// Returns the first task failure or the polling error.
    pub async fn wait_tasks(&self, ctx: &Context, task_ids: &[String]) -> Result<()> {
        self.tracker.wait_for_tasks(ctx, task_ids).await
    }
}

impl<S: StateStore> std::fmt::Debug for VmReconciler<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmReconciler")
            .field("backend", &self.state_store.backend_type())
            .field("executor", &self.executor)
            .finish_non_exhaustive()
    }
}

fn state_key(spec: &VmSpec) -> Result<&str> {
    spec.state_key().ok_or_else(|| {
        ConfigError::validation("either vm.id or vm.name must be set", "vm.id").into()
    })
}

/// The configured id wins over the recorded one.
fn target_id(spec: &VmSpec, state: Option<&VmState>) -> Option<String> {
    spec.id
        .clone()
        .or_else(|| state.map(|s| s.vm_id.clone()))
}

fn assigned(state: Option<&VmState>) -> &AssignedIds {
    static NONE: AssignedIds = AssignedIds {
        cd_roms: BTreeMap::new(),
        nics: Vec::new(),
    };
    state.map_or(&NONE, |s| &s.assigned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::LocalStateStore;
    use crate::tower::{
        IdRef, MockControlPlane, Task, TaskFilter, TaskStatus, Vlan, Vm, VmUpdateEffect,
        VmUpdateInput, WithTask,
    };
    use serde_json::json;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn vm(memory: u64) -> Vm {
        serde_json::from_value(json!({
            "id": "vm-1",
            "name": "web-1",
            "status": "RUNNING",
            "vm_tools_status": "RUNNING",
            "vcpu": 2,
            "cpu": { "cores": 2, "sockets": 1 },
            "memory": memory,
        }))
        .expect("valid vm")
    }

    fn spec(memory: u64) -> VmSpec {
        VmSpec {
            id: Some(String::from("vm-1")),
            memory: Some(memory),
            ..VmSpec::default()
        }
    }

    fn task(id: &str) -> Task {
        Task {
            id: id.to_string(),
            status: TaskStatus::Succeeded,
            error_message: None,
            resource_id: None,
            resource_mutation: None,
            local_created_at: None,
        }
    }

    /// Every queried task id has succeeded; resource tasks are not visible.
    fn tasks_succeed(api: &mut MockControlPlane) {
        api.expect_query_tasks().returning(|filter| {
            Ok(match filter {
                TaskFilter::IdIn(ids) => ids.iter().map(|id| task(id)).collect(),
                TaskFilter::LatestForResource { .. } => Vec::new(),
            })
        });
    }

    fn reconciler(api: MockControlPlane, dir: &TempDir) -> VmReconciler<LocalStateStore> {
        VmReconciler::new(
            Arc::new(api),
            LocalStateStore::new(dir.path()),
            &TowerConfig::new("http://tower.local"),
        )
    }

    fn observable(api: &mut MockControlPlane, memory: Arc<AtomicU64>) {
        api.expect_get_vm()
            .returning(move |_| Ok(Some(vm(memory.load(Ordering::SeqCst)))));
        api.expect_list_vm_disks().returning(|_| Ok(Vec::new()));
        api.expect_list_vm_nics().returning(|_| Ok(Vec::new()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_updates_and_records_state() {
        let memory = Arc::new(AtomicU64::new(1024));
        let mut api = MockControlPlane::new();
        observable(&mut api, Arc::clone(&memory));
        let applied = Arc::clone(&memory);
        api.expect_update_vm()
            .times(1)
            .returning(move |_: &str, data: &VmUpdateInput, _: &VmUpdateEffect| {
                if let Some(m) = data.memory {
                    applied.store(m, Ordering::SeqCst);
                }
                Ok(())
            });
        api.expect_query_tasks().returning(|_| {
            Ok(vec![Task {
                resource_id: Some(String::from("vm-1")),
                resource_mutation: Some(String::from("updateVm")),
                ..task("t1")
            }])
        });
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);

        let result = reconciler
            .apply(&Context::background(), &spec(2048))
            .await
            .expect("apply succeeds");

        assert!(!result.created);
        assert_eq!(result.steps, vec![String::from("update vm")]);
        let state = reconciler
            .state_store()
            .load("vm-1")
            .await
            .expect("load")
            .expect("state saved");
        assert_eq!(state.vm.memory, 2048);
        assert_eq!(state.config_hash, result.config_hash);
        assert_eq!(state.history.len(), 1);
        assert!(reconciler
            .state_store()
            .lock_info("vm-1")
            .await
            .expect("lock info")
            .is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_second_apply_is_a_noop() {
        let memory = Arc::new(AtomicU64::new(2048));
        let mut api = MockControlPlane::new();
        observable(&mut api, memory);
        api.expect_update_vm().never();
        api.expect_power().never();
        api.expect_create_vm().never();
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);

        let result = assert_ok!(reconciler.apply(&Context::background(), &spec(2048)).await);

        assert!(result.actions.is_empty());
        assert!(result.steps.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_plan_mutates_nothing() {
        let mut api = MockControlPlane::new();
        observable(&mut api, Arc::new(AtomicU64::new(1024)));
        api.expect_update_vm().never();
        api.expect_power().never();
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);
        let spec = VmSpec {
            vcpu: Some(6),
            cpu_cores: Some(4),
            ..spec(4096)
        };

        let err = reconciler
            .apply(&Context::background(), &spec)
            .await
            .expect_err("plan is invalid");

        assert!(matches!(err, TowerError::Reconcile(_)));
        assert!(reconciler.state_store().load("vm-1").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_locked_state_blocks_apply() {
        let api = MockControlPlane::new();
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);
        reconciler
            .state_store()
            .acquire_lock("vm-1", "other-run")
            .await
            .expect("lock");

        let err = reconciler
            .apply(&Context::background(), &spec(2048))
            .await
            .expect_err("locked");

        assert!(err.to_string().contains("other-run"));
    }

    #[tokio::test]
    async fn test_power_rejects_vm_without_power_state() {
        let mut api = MockControlPlane::new();
        api.expect_get_vm().returning(|_| {
            Ok(Some(
                serde_json::from_value(json!({ "id": "vm-1", "name": "web-1", "status": "DELETED" }))
                    .expect("valid vm"),
            ))
        });
        api.expect_power().never();
        let dir = TempDir::new().expect("temp dir");

        let err = reconciler(api, &dir)
            .power(&Context::background(), "vm-1", PowerState::Running, false, None)
            .await
            .expect_err("deleted vm");

        assert!(matches!(err, TowerError::Power(PowerError::InvalidState { .. })));
    }

    fn new_vm_spec() -> VmSpec {
        serde_yaml::from_str(
            "name: web-1\ncluster_id: c1\nvcpu: 2\nmemory: 1024\nnics:\n  - vlan_id: vlan-a\n",
        )
        .expect("valid spec")
    }

    fn created_vm() -> Vm {
        serde_json::from_value(json!({
            "id": "vm-9",
            "name": "web-1",
            "status": "STOPPED",
            "vcpu": 2,
            "cpu": { "cores": 1, "sockets": 2 },
            "memory": 1024,
        }))
        .expect("valid vm")
    }

    #[tokio::test(start_paused = true)]
    async fn test_apply_creates_missing_vm_once() {
        let mut api = MockControlPlane::new();
        api.expect_get_vlan().returning(|id| {
            Ok(Some(Vlan {
                id: id.to_string(),
                name: String::new(),
            }))
        });
        api.expect_create_vm().times(1).returning(|input| {
            assert_eq!(input.name, "web-1");
            assert_eq!(input.vm_nics.len(), 1);
            Ok(vec![WithTask {
                task_id: Some(String::from("t-create")),
                data: created_vm(),
            }])
        });
        tasks_succeed(&mut api);
        api.expect_get_vm().returning(|_| Ok(Some(created_vm())));
        api.expect_list_vm_disks().returning(|_| Ok(Vec::new()));
        api.expect_list_vm_nics().returning(|_| {
            Ok(vec![serde_json::from_value(json!({
                "id": "nic-1",
                "vlan": { "id": "vlan-a" },
                "enabled": true,
                "model": "VIRTIO",
                "order": 0,
            }))
            .expect("valid nic")])
        });
        api.expect_update_vm().never();
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);
        let ctx = Context::background();

        let result = reconciler.apply(&ctx, &new_vm_spec()).await.expect("created");

        assert!(result.created);
        assert_eq!(result.vm_id, "vm-9");
        assert_eq!(result.actions.len(), 2);
        let state = reconciler
            .state_store()
            .load("web-1")
            .await
            .expect("load")
            .expect("state saved under the name");
        assert_eq!(state.vm_id, "vm-9");
        assert_eq!(state.assigned.nics, vec![String::from("nic-1")]);

        let again = reconciler.apply(&ctx, &new_vm_spec()).await.expect("second apply");
        assert!(!again.created);
        assert!(again.actions.is_empty());
        assert_eq!(reconciler.vm_id(&new_vm_spec()).await.expect("known"), "vm-9");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_create_task_forgets_the_vm() {
        let mut api = MockControlPlane::new();
        api.expect_create_vm().times(1).returning(|_| {
            Ok(vec![WithTask {
                task_id: Some(String::from("t-create")),
                data: created_vm(),
            }])
        });
        api.expect_query_tasks().returning(|_| {
            Ok(vec![Task {
                status: TaskStatus::Failed,
                error_message: Some(String::from("no space left in cluster")),
                ..task("t-create")
            }])
        });
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);
        let spec = VmSpec {
            nics: None,
            ..new_vm_spec()
        };

        let err = reconciler
            .apply(&Context::background(), &spec)
            .await
            .expect_err("task failed");

        assert_eq!(err.to_string(), "no space left in cluster");
        assert!(reconciler.state_store().load("web-1").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_plan_for_unknown_vm_is_a_create() {
        let mut api = MockControlPlane::new();
        api.expect_get_vlan().returning(|id| {
            Ok(Some(Vlan {
                id: id.to_string(),
                name: String::new(),
            }))
        });
        api.expect_get_vm().never();
        api.expect_create_vm().never();
        let dir = TempDir::new().expect("temp dir");

        let plan = reconciler(api, &dir)
            .plan(&Context::background(), &new_vm_spec())
            .await
            .expect("plan");

        assert!(matches!(plan, ReconcilePlan::Create(ref p) if p.input.cluster_id == "c1"));
        assert!(!plan.is_empty());
    }

    #[tokio::test]
    async fn test_status_of_uncreated_vm_is_an_error() {
        let dir = TempDir::new().expect("temp dir");

        let err = reconciler(MockControlPlane::new(), &dir)
            .vm_id(&new_vm_spec())
            .await
            .expect_err("not created");

        assert!(err.to_string().contains("vm.id"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_destroy_powers_off_then_deletes() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut api = MockControlPlane::new();
        api.expect_get_vm().returning(|_| Ok(Some(vm(1024))));
        let log = Arc::clone(&calls);
        api.expect_power().times(1).returning(move |_, op| {
            log.lock().expect("log").push(op.endpoint());
            Ok(vec![WithTask {
                task_id: Some(String::from("t-off")),
                data: vm(1024),
            }])
        });
        let log = Arc::clone(&calls);
        api.expect_delete_vm().times(1).returning(move |id| {
            log.lock().expect("log").push("delete-vm");
            Ok(vec![WithTask {
                task_id: Some(String::from("t-delete")),
                data: IdRef::new(id),
            }])
        });
        tasks_succeed(&mut api);
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);
        let observed = ObservedVm {
            vm: vm(1024),
            disks: Vec::new(),
            cd_roms: Vec::new(),
            nics: Vec::new(),
        };
        reconciler
            .state_store()
            .save("vm-1", &VmState::new(&observed, "h"))
            .await
            .expect("seed state");

        let deleted = reconciler
            .destroy(&Context::background(), &spec(1024))
            .await
            .expect("destroyed");

        assert_eq!(deleted.as_deref(), Some("vm-1"));
        assert_eq!(*calls.lock().expect("log"), vec!["poweroff-vm", "delete-vm"]);
        assert!(reconciler.state_store().load("vm-1").await.expect("load").is_none());
    }

    #[tokio::test]
    async fn test_destroy_of_gone_vm_forgets_state() {
        let mut api = MockControlPlane::new();
        api.expect_get_vm().returning(|_| Ok(None));
        api.expect_delete_vm().never();
        let dir = TempDir::new().expect("temp dir");
        let reconciler = reconciler(api, &dir);

        let deleted = reconciler
            .destroy(&Context::background(), &spec(1024))
            .await
            .expect("nothing left to delete");

        assert_eq!(deleted.as_deref(), Some("vm-1"));
    }

    #[tokio::test]
    async fn test_destroy_without_vm_does_nothing() {
        let mut api = MockControlPlane::new();
        api.expect_get_vm().never();
        api.expect_delete_vm().never();
        let dir = TempDir::new().expect("temp dir");

        let deleted = reconciler(api, &dir)
            .destroy(&Context::background(), &new_vm_spec())
            .await
            .expect("no-op");

        assert!(deleted.is_none());
    }
}
