//! Plan executor for applying VM update plans.
//!
//! Steps run strictly in order: the basic `updateVm` mutation and its task,
//! the guest-agent attributes under a temporary power-on, then the power
//! transition. The first failing step stops the run.

use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{error, info};

use crate::context::Context;
use crate::error::Result;
use crate::retry::retry;
use crate::tower::{
    ControlPlane, PowerController, PowerOperation, TaskTracker, VmToolsConfigurer,
    VmUpdateEffect, UPDATE_VM_MUTATION,
};

use super::plan::VmUpdatePlan;

/// Executor for VM update plans.
#[derive(Clone)]
pub struct PlanExecutor {
    api: Arc<dyn ControlPlane>,
    tracker: TaskTracker,
    power: PowerController,
    vm_tools: VmToolsConfigurer,
}

/// A step of plan execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// Basic attributes and sub-resources.
    BasicUpdate,
    /// Guest-agent attributes.
    VmTools,
    /// Power transition.
    Power(PowerOperation),
}

/// A completed step.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Step that ran.
    pub step: Step,
    /// Wall time spent, including task polling.
    pub duration: Duration,
}

/// Result of executing a plan.
#[derive(Debug, Clone, Default)]
pub struct ExecutionResult {
    /// Completed steps in execution order.
    pub steps: Vec<StepResult>,
}

impl PlanExecutor {
    /// Creates an executor sharing `tracker` with its power controller and
    /// guest-agent configurer.
    #[must_use]
    pub fn new(api: Arc<dyn ControlPlane>, tracker: TaskTracker, poll_interval: Duration) -> Self {
        let power = PowerController::new(Arc::clone(&api), tracker.clone());
        let vm_tools = VmToolsConfigurer::new(Arc::clone(&api), power.clone(), tracker.clone())
            .with_poll_interval(poll_interval);
        Self {
            api,
            tracker,
            power,
            vm_tools,
        }
    }

    /// Executes `plan`.
    ///
    /// # Errors
    ///
    /// Returns the error of the first failing step.
    pub async fn execute(&self, ctx: &Context, plan: &VmUpdatePlan) -> Result<ExecutionResult> {
        info!("Executing update plan with {} actions", plan.action_count());
        let mut result = ExecutionResult::default();

        if !plan.basic.is_empty() {
            let started = Instant::now();
            self.run_step(&Step::BasicUpdate, self.basic_update(ctx, plan)).await?;
            result.record(Step::BasicUpdate, started);
        }

        if !plan.vm_tools.is_empty() {
            let started = Instant::now();
            let step = self.vm_tools.configure(ctx, &plan.vm_id, &plan.vm_tools);
            self.run_step(&Step::VmTools, step).await?;
            result.record(Step::VmTools, started);
        }

        if let Some(op) = &plan.power {
            let started = Instant::now();
            let step = Step::Power(op.clone());
            self.run_step(&step, self.power.execute(ctx, &plan.vm_id, op)).await?;
            result.record(step, started);
        }

        info!("Plan for vm {} applied in {} step(s)", plan.vm_id, result.steps.len());
        Ok(result)
    }

    async fn basic_update(&self, ctx: &Context, plan: &VmUpdatePlan) -> Result<()> {
        let effect = VmUpdateEffect::default();
        retry(ctx, self.tracker.retry_options(), || {
            self.api.update_vm(&plan.vm_id, &plan.basic, &effect)
        })
        .await?;
        self.tracker
            .wait_for_resource_task(ctx, &plan.vm_id, UPDATE_VM_MUTATION)
            .await
    }

    async fn run_step<F>(&self, step: &Step, fut: F) -> Result<()>
    where
        F: std::future::Future<Output = Result<()>>,
    {
        info!("Running step {step}");
        fut.await.inspect_err(|e| error!("Step {step} failed: {e}"))
    }
}

impl std::fmt::Debug for PlanExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlanExecutor")
            .field("tracker", &self.tracker)
            .field("vm_tools", &self.vm_tools)
            .finish_non_exhaustive()
    }
}

impl ExecutionResult {
    fn record(&mut self, step: Step, started: Instant) {
        self.steps.push(StepResult {
            step,
            duration: started.elapsed(),
        });
    }

    /// Returns true when nothing had to be done.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.steps.is_empty()
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BasicUpdate => write!(f, "update vm"),
            Self::VmTools => write!(f, "configure vm tools"),
            Self::Power(op) => write!(f, "power {op}"),
        }
    }
}
