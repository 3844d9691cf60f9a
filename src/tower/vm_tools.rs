//! Guest-agent attributes and temporary power-on.
//!
//! Static NIC addressing, hostname, DNS servers and the guest OS account are
//! applied by the guest agent, which only runs while the VM is powered on.
//! A stopped VM is started for the change and powered off again afterwards,
//! whatever the outcome of the change.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::context::{Context, ContextError};
use crate::error::{PowerError, Result, TowerError};
use crate::retry::retry;

use super::api::ControlPlane;
use super::observer::fetch_vm;
use super::power::{PowerController, PowerOperation};
use super::tasks::{TaskTracker, UPDATE_VM_MUTATION};
use super::types::{Vm, VmStatus, VmToolsStatus, VmUpdateEffect, VmUpdateInput};

/// Hard limit for the guest agent to come up.
pub const VM_TOOLS_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Budget for powering a temporarily started VM back off.
pub const RESTORE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Attribute changes applied through the guest agent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VmToolsUpdate {
    /// Hostname and NIC changes.
    pub data: VmUpdateInput,
    /// Guest OS account change.
    pub effect: VmUpdateEffect,
    /// Comma-separated DNS servers, sent in a second mutation.
    pub dns_servers: Option<String>,
}

impl VmToolsUpdate {
    /// Returns true when nothing needs the guest agent.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.effect.is_empty() && self.dns_servers.is_none()
    }
}

/// What to do once a temporary power-on is over.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "a temporary power-on must be released"]
pub enum PowerRestore {
    /// The VM was already running.
    Nothing,
    /// The VM was started and has to be powered off again.
    PowerOff {
        /// VM to power off.
        vm_id: String,
    },
}

/// Applies guest-agent attributes.
#[derive(Clone)]
pub struct VmToolsConfigurer {
    api: Arc<dyn ControlPlane>,
    power: PowerController,
    tracker: TaskTracker,
    poll_interval: Duration,
    tools_timeout: Duration,
}

impl VmToolsConfigurer {
    /// Creates a configurer.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>, power: PowerController, tracker: TaskTracker) -> Self {
        Self {
            api,
            power,
            tracker,
            poll_interval: super::tasks::DEFAULT_POLL_INTERVAL,
            tools_timeout: VM_TOOLS_TIMEOUT,
        }
    }

    /// Sets the delay between guest-agent status checks.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Powers `vm_id` on if it is stopped.
    ///
    /// # Errors
    ///
    /// Returns [`PowerError::InvalidState`] without any power operation if
    /// the VM is neither running nor stopped, or the start error.
    pub async fn power_on_temporarily(&self, ctx: &Context, vm_id: &str) -> Result<PowerRestore> {
        let vm = fetch_vm(ctx, &self.api, self.tracker.retry_options(), vm_id).await?;
        match vm.status {
            VmStatus::Running => Ok(PowerRestore::Nothing),
            VmStatus::Stopped => {
                info!("Starting vm {vm_id} temporarily");
                let start = PowerOperation::Start {
                    host_id: vm.host.map(|h| h.id),
                };
                self.power.execute(ctx, vm_id, &start).await?;
                Ok(PowerRestore::PowerOff {
                    vm_id: vm_id.to_string(),
                })
            }
            status => Err(PowerError::InvalidState {
                vm_id: vm_id.to_string(),
                status: status.to_string(),
                action: "cannot start temporary",
            }
            .into()),
        }
    }

    /// Undoes a temporary power-on.
    ///
    /// Runs under its own deadline so that a cancelled caller still gets
    /// the VM powered off.
    ///
    /// # Errors
    ///
    /// Returns the power-off error.
    pub async fn release(&self, restore: PowerRestore) -> Result<()> {
        match restore {
            PowerRestore::Nothing => Ok(()),
            PowerRestore::PowerOff { vm_id } => {
                info!("Powering vm {vm_id} off again");
                let ctx = Context::background().with_timeout(RESTORE_TIMEOUT);
                self.power.execute(&ctx, &vm_id, &PowerOperation::PowerOff).await
            }
        }
    }

    /// Runs `change` while `vm_id` is powered on, then restores the power
    /// state it started in.
    ///
    /// The restore runs exactly once on every path after a successful
    /// power-on, including a failed or cancelled change.
    ///
    /// # Errors
    ///
    /// Returns the power-on error, the change error, the restore error, or
    /// both of the latter joined.
    pub async fn apply_with_temporary_power_on<T, F, Fut>(
        &self,
        ctx: &Context,
        vm_id: &str,
        change: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let restore = self.power_on_temporarily(ctx, vm_id).await?;
        let outcome = change().await;
        let released = self.release(restore).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(err), Ok(())) => Err(err),
            (Ok(_), Err(restore_err)) => Err(restore_err),
            (Err(err), Err(restore_err)) => {
                warn!("Restoring power state of {vm_id} failed too: {restore_err}");
                Err(err.join(restore_err))
            }
        }
    }

    /// Polls until the guest agent of `vm_id` reports running.
    ///
    /// # Errors
    ///
    /// Returns [`TowerError::Timeout`] when the agent is not up within the
    /// hard limit, or the caller's context error.
    pub async fn wait_vm_tools_running(&self, ctx: &Context, vm_id: &str) -> Result<Vm> {
        let bounded = ctx.with_timeout(self.tools_timeout);
        let outcome = self.poll_vm_tools(&bounded, vm_id).await;

        match outcome {
            Err(TowerError::Context(ContextError::DeadlineExceeded)) if ctx.err().is_none() => {
                Err(TowerError::Timeout {
                    vm_id: vm_id.to_string(),
                    expected: String::from("vm tools running"),
                })
            }
            other => other,
        }
    }

    async fn poll_vm_tools(&self, ctx: &Context, vm_id: &str) -> Result<Vm> {
        loop {
            let vm = fetch_vm(ctx, &self.api, self.tracker.retry_options(), vm_id).await?;
            if vm.vm_tools_status == VmToolsStatus::Running {
                debug!("vm tools of {vm_id} are running");
                return Ok(vm);
            }
            debug!("vm tools of {vm_id} are {:?}", vm.vm_tools_status);
            ctx.sleep(self.poll_interval).await?;
        }
    }

    /// Applies `update` to a running VM: waits for the guest agent, sends
    /// the attribute mutation, then the DNS mutation.
    ///
    /// # Errors
    ///
    /// Returns the first failing step's error.
    pub async fn apply_attributes(
        &self,
        ctx: &Context,
        vm_id: &str,
        update: &VmToolsUpdate,
    ) -> Result<()> {
        self.wait_vm_tools_running(ctx, vm_id).await?;

        if !update.data.is_empty() || !update.effect.is_empty() {
            self.update_vm(ctx, vm_id, &update.data, &update.effect).await?;
        }

        if let Some(dns) = &update.dns_servers {
            let data = VmUpdateInput {
                dns_servers: Some(dns.clone()),
                ..VmUpdateInput::default()
            };
            self.update_vm(ctx, vm_id, &data, &VmUpdateEffect::default()).await?;
        }
        Ok(())
    }

    /// Applies `update`, powering the VM on for the duration if needed.
    ///
    /// # Errors
    ///
    /// See [`VmToolsConfigurer::apply_with_temporary_power_on`].
    pub async fn configure(&self, ctx: &Context, vm_id: &str, update: &VmToolsUpdate) -> Result<()> {
        if update.is_empty() {
            return Ok(());
        }
        self.apply_with_temporary_power_on(ctx, vm_id, || self.apply_attributes(ctx, vm_id, update))
            .await
    }

    async fn update_vm(
        &self,
        ctx: &Context,
        vm_id: &str,
        data: &VmUpdateInput,
        effect: &VmUpdateEffect,
    ) -> Result<()> {
        retry(ctx, self.tracker.retry_options(), || {
            self.api.update_vm(vm_id, data, effect)
        })
        .await?;
        self.tracker
            .wait_for_resource_task(ctx, vm_id, UPDATE_VM_MUTATION)
            .await
    }
}

impl std::fmt::Debug for VmToolsConfigurer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmToolsConfigurer")
            .field("poll_interval", &self.poll_interval)
            .field("tools_timeout", &self.tools_timeout)
            .finish_non_exhaustive()
    }
}
