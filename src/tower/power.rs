//! Power-state transitions.
//!
//! A requested power state maps onto at most one remote operation. The
//! mapping is total over the three states: every pair either yields an
//! operation, is already satisfied, or is rejected before anything is sent.

use std::fmt;
use std::sync::Arc;
use tracing::info;

use crate::context::Context;
use crate::error::{PowerError, Result};
use crate::retry::retry;

use super::api::ControlPlane;
use super::tasks::TaskTracker;
use super::types::{task_ids, PowerState};

/// A remote power operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PowerOperation {
    /// Boot a stopped VM, optionally on a given host.
    Start {
        /// Host to start on; the scheduler picks one when absent.
        host_id: Option<String>,
    },
    /// Resume a suspended VM.
    Resume,
    /// Hard power off.
    PowerOff,
    /// Graceful guest shutdown.
    Shutdown,
    /// Suspend to memory.
    Suspend,
}

impl PowerOperation {
    /// REST operation name.
    #[must_use]
    pub const fn endpoint(&self) -> &'static str {
        match self {
            Self::Start { .. } => "start-vm",
            Self::Resume => "resume-vm",
            Self::PowerOff => "poweroff-vm",
            Self::Shutdown => "shut-down-vm",
            Self::Suspend => "suspend-vm",
        }
    }

    /// Power state the VM ends up in.
    #[must_use]
    pub const fn target(&self) -> PowerState {
        match self {
            Self::Start { .. } | Self::Resume => PowerState::Running,
            Self::PowerOff | Self::Shutdown => PowerState::Stopped,
            Self::Suspend => PowerState::Suspended,
        }
    }
}

impl fmt::Display for PowerOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Start { host_id: Some(host) } => write!(f, "start on {host}"),
            Self::Start { host_id: None } => write!(f, "start"),
            Self::Resume => write!(f, "resume"),
            Self::PowerOff => write!(f, "poweroff"),
            Self::Shutdown => write!(f, "shutdown"),
            Self::Suspend => write!(f, "suspend"),
        }
    }
}

/// Selects the operation moving a VM from `current` to `desired`.
///
/// Returns `Ok(None)` when the VM is already in the desired state.
///
/// # Errors
///
/// Returns [`PowerError::InvalidTransition`] when no single operation
/// performs the change.
pub fn select_operation(
    current: PowerState,
    desired: PowerState,
    force: bool,
    host_id: Option<&str>,
) -> std::result::Result<Option<PowerOperation>, PowerError> {
    use PowerState::{Running, Stopped, Suspended};

    let op = match (current, desired) {
        (a, b) if a == b => return Ok(None),
        (Stopped, Running) => PowerOperation::Start {
            host_id: host_id.map(String::from),
        },
        (Suspended, Running) => PowerOperation::Resume,
        (Running, Stopped) if force => PowerOperation::PowerOff,
        (Running, Stopped) => PowerOperation::Shutdown,
        (Running, Suspended) => PowerOperation::Suspend,
        (current, requested) => {
            return Err(PowerError::InvalidTransition {
                current: current.to_string(),
                requested: requested.to_string(),
            });
        }
    };
    Ok(Some(op))
}

/// Submits power operations and waits for them.
#[derive(Clone)]
pub struct PowerController {
    api: Arc<dyn ControlPlane>,
    tracker: TaskTracker,
}

impl PowerController {
    /// Creates a controller.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>, tracker: TaskTracker) -> Self {
        Self { api, tracker }
    }

    /// Moves `vm_id` from `current` to `desired`, waiting for completion.
    ///
    /// Nothing is submitted when the states already match or the
    /// transition is rejected.
    ///
    /// # Errors
    ///
    /// Returns an error if the transition is invalid, submission fails or
    /// any spawned task fails.
    pub async fn transition(
        &self,
        ctx: &Context,
        vm_id: &str,
        current: PowerState,
        desired: PowerState,
        force: bool,
        host_id: Option<&str>,
    ) -> Result<()> {
        match select_operation(current, desired, force, host_id)? {
            Some(op) => self.execute(ctx, vm_id, &op).await,
            None => Ok(()),
        }
    }

    /// Submits `op` for `vm_id` and waits for every task it spawned.
    ///
    /// # Errors
    ///
    /// Returns an error if submission fails or any spawned task fails.
    pub async fn execute(&self, ctx: &Context, vm_id: &str, op: &PowerOperation) -> Result<()> {
        info!("Submitting {op} for vm {vm_id}");
        let records = retry(ctx, self.tracker.retry_options(), || self.api.power(vm_id, op)).await?;
        let ids = task_ids(&records);
        self.tracker.wait_for_tasks(ctx, &ids).await?;
        info!("vm {vm_id} is now {}", op.target());
        Ok(())
    }
}

impl fmt::Debug for PowerController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PowerController")
            .field("tracker", &self.tracker)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TowerError;
    use crate::tower::api::MockControlPlane;
    use crate::tower::types::{Task, TaskStatus, Vm, WithTask};
    use serde_json::json;
    use PowerState::{Running, Stopped, Suspended};

    fn vm_record(task: &str) -> WithTask<Vm> {
        WithTask {
            task_id: Some(task.to_string()),
            data: serde_json::from_value(json!({ "id": "vm-1", "name": "web-1" }))
                .expect("valid vm"),
        }
    }

    #[test]
    fn test_transition_table_is_total() {
        for current in PowerState::ALL {
            for desired in PowerState::ALL {
                let res = select_operation(current, desired, false, None);
                match (current, desired) {
                    (a, b) if a == b => assert_eq!(res.ok(), Some(None)),
                    (Stopped, Running) => {
                        assert_eq!(res.ok(), Some(Some(PowerOperation::Start { host_id: None })));
                    }
                    (Suspended, Running) => assert_eq!(res.ok(), Some(Some(PowerOperation::Resume))),
                    (Running, Stopped) => assert_eq!(res.ok(), Some(Some(PowerOperation::Shutdown))),
                    (Running, Suspended) => assert_eq!(res.ok(), Some(Some(PowerOperation::Suspend))),
                    _ => assert!(matches!(res, Err(PowerError::InvalidTransition { .. }))),
                }
            }
        }
    }

    #[test]
    fn test_force_selects_poweroff() {
        let op = select_operation(Running, Stopped, true, None).expect("valid transition");
        assert_eq!(op, Some(PowerOperation::PowerOff));
    }

    #[test]
    fn test_start_is_pinned_to_host() {
        let op = select_operation(Stopped, Running, false, Some("host-1")).expect("valid transition");
        assert_eq!(
            op,
            Some(PowerOperation::Start {
                host_id: Some(String::from("host-1"))
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_stopped_to_suspended_makes_no_call() {
        let mut api = MockControlPlane::new();
        api.expect_power().never();
        api.expect_query_tasks().never();
        let api: Arc<dyn ControlPlane> = Arc::new(api);
        let controller = PowerController::new(Arc::clone(&api), TaskTracker::new(api));

        let err = controller
            .transition(&Context::background(), "vm-1", Stopped, Suspended, false, None)
            .await
            .expect_err("transition is invalid");

        assert!(matches!(err, TowerError::Power(PowerError::InvalidTransition { .. })));
        assert!(err.to_string().contains("STOPPED"));
        assert!(err.to_string().contains("SUSPENDED"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_transition_waits_for_all_tasks() {
        let mut api = MockControlPlane::new();
        api.expect_power()
            .withf(|vm_id: &str, op: &PowerOperation| vm_id == "vm-1" && *op == PowerOperation::Suspend)
            .times(1)
            .returning(|_, _| Ok(vec![vm_record("t1"), vm_record("t2")]));
        api.expect_query_tasks().times(1).returning(|_| {
            Ok(["t1", "t2"]
                .iter()
                .map(|id| Task {
                    id: (*id).to_string(),
                    status: TaskStatus::Succeeded,
                    error_message: None,
                    resource_id: None,
                    resource_mutation: None,
                    local_created_at: None,
                })
                .collect())
        });
        let api: Arc<dyn ControlPlane> = Arc::new(api);
        let controller = PowerController::new(Arc::clone(&api), TaskTracker::new(api));

        controller
            .transition(&Context::background(), "vm-1", Running, Suspended, false, None)
            .await
            .expect("suspend succeeds");
    }
}
