//! State management module for the VM reconciliation engine.
//!
//! This module provides persistent state storage for reconciled VMs: the
//! attributes the control plane computed after the last apply, the applied
//! guest OS account fingerprint and a short apply history.

mod local;
mod lock;
mod store;
mod types;

pub use local::LocalStateStore;
pub use lock::{generate_holder_id, LockInfo, LOCK_EXPIRY_SECS};
pub use store::StateStore;
pub use types::{
    AppliedAccount, ComputedVm, ReconcileHistoryEntry, VmState, MAX_HISTORY, STATE_VERSION,
};
