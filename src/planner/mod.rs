//! Planning module for VM updates.
//!
//! This module handles the comparison between desired and observed states,
//! generating update plans and applying them, and the creation of VMs that
//! do not exist yet.

mod cpu;
mod create;
mod diff;
mod executor;
mod plan;

pub use cpu::{resolve_cpu, ResolvedCpu};
pub use create::{assigned_ids, VmCreatePlan};
pub use diff::{diff_cd_roms, diff_disks, diff_nics, BootOrdered, DiskBatch, NicBatch, OperationBatch};
pub use executor::{ExecutionResult, PlanExecutor, Step, StepResult};
pub use plan::{ActionType, PlannedAction, VmUpdatePlan};
