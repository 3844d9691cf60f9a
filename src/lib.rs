// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::missing_const_for_fn)] // Force const when possible
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::module_inception)]    // Module with same name as crate warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::shadow_unrelated)]    // Shadowing unrelated variables warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Tower VM Reconcile
//!
//! A declarative, idempotent reconciler for CloudTower virtual machines.
//!
//! ## Overview
//!
//! `towerctl` creates a VM, or moves an existing one, towards a desired
//! state written in YAML:
//!
//! - CPU, memory, name, description and HA flags
//! - Disks, CD-ROM drives and NICs, diffed against what is attached
//! - Hostname, DNS, static IPs and guest accounts through the guest agent
//! - The power state, last
//!
//! `towerctl destroy` powers the VM off and deletes it.
//!
//! ## Architecture
//!
//! 1. **Desired State**: Defined in `towerctl.yaml`
//! 2. **Observed State**: Queried from the CloudTower API
//! 3. **Plan**: Every change is computed and validated before anything mutates
//! 4. **Execution**: Steps run in order, each waiting for its remote tasks
//!
//! ## Modules
//!
//! - [`config`]: Configuration parsing and validation
//! - [`context`]: Cancellation and deadlines
//! - [`retry`]: Retry with exponential backoff
//! - [`tower`]: Control-plane client, task tracking and power transitions
//! - [`planner`]: Sub-resource diffs and plan execution
//! - [`state`]: Local state of the last apply
//! - [`reconciler`]: Observe, plan, apply
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! tower:
//!   endpoint: https://tower.example.com
//!
//! vm:
//!   id: ckx0vm000001
//!   vcpu: 4
//!   cpu_sockets: 2
//!   memory: 8589934592
//!   status: RUNNING
//!   nics:
//!     - vlan_id: ckx0vlan0001
//!       ip_address: 10.0.0.15
//!       subnet_mask: 255.255.255.0
//!       gateway: 10.0.0.1
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod cli;
pub mod config;
pub mod context;
pub mod error;
pub mod planner;
pub mod reconciler;
pub mod retry;
pub mod state;
pub mod tower;

// ============================================================================
// Re-exports
// ============================================================================

pub use cli::{Cli, Commands, OutputFormatter};
pub use config::{ConfigHasher, ConfigParser, ConfigValidator, ReconcileConfig, VmSpec};
pub use context::Context;
pub use error::{Result, TowerError};
pub use planner::{PlanExecutor, VmCreatePlan, VmUpdatePlan};
pub use reconciler::{ReconcilePlan, ReconciliationResult, VmReconciler};
pub use retry::{retry, RetryOptions};
pub use state::{LocalStateStore, StateStore, VmState};
pub use tower::{ControlPlane, PowerController, TaskTracker, TowerClient, VmToolsConfigurer};
