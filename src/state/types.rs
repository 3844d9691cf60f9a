//! State types for tracking reconciled VMs.
//!
//! These types record the observed state of a VM after each apply, used for
//! reporting and to keep guest OS credentials idempotent.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::AssignedIds;
use crate::tower::{CpuTopology, ObservedCdRom, ObservedDisk, ObservedVm, VmNic, VmStatus};

/// Current version of the state format.
pub const STATE_VERSION: &str = "1.0";

/// Maximum number of history entries kept.
pub const MAX_HISTORY: usize = 50;

/// The recorded state of one VM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmState {
    /// State format version.
    pub version: String,
    /// Remote VM id.
    pub vm_id: String,
    /// Hash of the last applied configuration.
    pub config_hash: String,
    /// Observed VM attributes.
    pub vm: ComputedVm,
    /// Fingerprint of the last applied guest OS account.
    #[serde(default)]
    pub guest_os_account: Option<AppliedAccount>,
    /// Sub-resource ids assigned when this tool created the VM.
    #[serde(default)]
    pub assigned: AssignedIds,
    /// When the state was last updated.
    pub last_updated: DateTime<Utc>,
    /// Reconciliation history (recent entries).
    #[serde(default)]
    pub history: Vec<ReconcileHistoryEntry>,
}

/// VM attributes computed by the control plane after an apply.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ComputedVm {
    /// Display name.
    pub name: String,
    /// Status.
    pub status: VmStatus,
    /// Virtual CPU count.
    pub vcpu: u32,
    /// CPU topology.
    pub cpu: Option<CpuTopology>,
    /// Memory in bytes.
    pub memory: u64,
    /// Guest hostname.
    pub hostname: Option<String>,
    /// Guest DNS servers.
    pub dns_servers: Vec<String>,
    /// Disks.
    pub disks: Vec<ObservedDisk>,
    /// CD-ROM drives.
    pub cd_roms: Vec<ObservedCdRom>,
    /// NICs.
    pub nics: Vec<VmNic>,
}

/// Guest OS account applied through the guest agent.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AppliedAccount {
    /// Account name.
    pub username: String,
    /// SHA-256 fingerprint of the credentials.
    pub fingerprint: String,
}

/// A single entry in the reconciliation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileHistoryEntry {
    /// When the apply finished.
    pub timestamp: DateTime<Utc>,
    /// Configuration hash at time of apply.
    pub config_hash: String,
    /// Planned actions.
    pub actions: Vec<String>,
    /// Whether the apply succeeded.
    pub success: bool,
    /// Optional error message.
    #[serde(default)]
    pub error: Option<String>,
}

impl VmState {
    /// Creates a state record from an observed snapshot.
    #[must_use]
    pub fn new(observed: &ObservedVm, config_hash: &str) -> Self {
        Self {
            version: String::from(STATE_VERSION),
            vm_id: observed.vm.id.clone(),
            config_hash: config_hash.to_string(),
            vm: ComputedVm::from(observed),
            guest_os_account: None,
            assigned: AssignedIds::default(),
            last_updated: Utc::now(),
            history: Vec::new(),
        }
    }

    /// Replaces the computed attributes with a newer observation.
    pub fn record_observation(&mut self, observed: &ObservedVm, config_hash: &str) {
        self.vm = ComputedVm::from(observed);
        config_hash.clone_into(&mut self.config_hash);
        self.last_updated = Utc::now();
    }

    /// Adds a history entry, keeping at most [`MAX_HISTORY`].
    pub fn add_history(&mut self, entry: ReconcileHistoryEntry) {
        self.history.push(entry);
        if self.history.len() > MAX_HISTORY {
            let excess = self.history.len() - MAX_HISTORY;
            self.history.drain(..excess);
        }
    }

    /// Fingerprint of the applied guest OS account, if any.
    #[must_use]
    pub fn account_fingerprint(&self) -> Option<&str> {
        self.guest_os_account
            .as_ref()
            .map(|a| a.fingerprint.as_str())
    }
}

impl From<&ObservedVm> for ComputedVm {
    fn from(observed: &ObservedVm) -> Self {
        let vm = &observed.vm;
        Self {
            name: vm.name.clone(),
            status: vm.status,
            vcpu: vm.vcpu,
            cpu: vm.cpu,
            memory: vm.memory,
            hostname: vm.hostname.clone(),
            dns_servers: vm.dns_servers.clone(),
            disks: observed.disks.clone(),
            cd_roms: observed.cd_roms.clone(),
            nics: observed.nics.clone(),
        }
    }
}

impl ReconcileHistoryEntry {
    /// Creates a successful history entry.
    #[must_use]
    pub fn new(config_hash: &str, actions: Vec<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            config_hash: config_hash.to_string(),
            actions,
            success: true,
            error: None,
        }
    }

    /// Creates a failed history entry.
    #[must_use]
    pub fn failed(config_hash: &str, actions: Vec<String>, error: String) -> Self {
        Self {
            success: false,
            error: Some(error),
            ..Self::new(config_hash, actions)
        }
    }
}

impl std::fmt::Display for ReconcileHistoryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let status = if self.success { "ok" } else { "failed" };
        write!(
            f,
            "{} {} ({} action(s))",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            status,
            self.actions.len()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tower::Vm;
    use serde_json::json;

    fn observed() -> ObservedVm {
        let vm: Vm = serde_json::from_value(json!({
            "id": "vm-1",
            "name": "web-1",
            "status": "RUNNING",
            "vcpu": 2,
            "memory": 1024,
        }))
        .expect("valid vm");
        ObservedVm {
            vm,
            disks: Vec::new(),
            cd_roms: Vec::new(),
            nics: Vec::new(),
        }
    }

    #[test]
    fn test_state_from_observation() {
        let state = VmState::new(&observed(), "abc");

        assert_eq!(state.vm_id, "vm-1");
        assert_eq!(state.vm.status, VmStatus::Running);
        assert_eq!(state.version, STATE_VERSION);
        assert!(state.account_fingerprint().is_none());
    }

    #[test]
    fn test_history_is_bounded() {
        let mut state = VmState::new(&observed(), "abc");
        for i in 0..(MAX_HISTORY + 5) {
            state.add_history(ReconcileHistoryEntry::new(&i.to_string(), Vec::new()));
        }

        assert_eq!(state.history.len(), MAX_HISTORY);
        assert_eq!(state.history[0].config_hash, "5");
    }

    #[test]
    fn test_state_round_trips_through_json() {
        let mut state = VmState::new(&observed(), "abc");
        state.guest_os_account = Some(AppliedAccount {
            username: String::from("root"),
            fingerprint: String::from("f00"),
        });

        let text = serde_json::to_string(&state).expect("serializes");
        let loaded: VmState = serde_json::from_str(&text).expect("deserializes");

        assert_eq!(loaded.vm, state.vm);
        assert_eq!(loaded.account_fingerprint(), Some("f00"));
    }
}
