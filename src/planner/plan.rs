//! VM update plan types and construction.
//!
//! A plan is computed purely from the desired spec and an observed
//! snapshot. Building it performs every check that can fail, so an apply
//! that starts executing a plan never stops on a validation error halfway.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::config::{ConfigHasher, VmSpec};
use crate::error::{PowerError, Result, TowerError};
use crate::tower::{
    select_operation, CpuTopology, DiskCreateInput, DiskType, DiskUpdateInput, IdRef,
    NicCreateInput, NicUpdateInput, ObservedVm, PowerOperation, PowerState, VmStatus,
    VmToolsUpdate, VmUpdateEffect, VmUpdateInput,
};

use super::cpu::resolve_cpu;
use super::diff::{diff_cd_roms, diff_disks, diff_nics, DiskBatch, NicBatch};

/// A complete update plan for one VM.
#[derive(Debug, Clone)]
pub struct VmUpdatePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Target VM.
    pub vm_id: String,
    /// Hash of the desired spec this plan is based on.
    pub config_hash: String,
    /// Status the VM was observed in.
    pub observed_status: VmStatus,
    /// Attributes and sub-resources applied without the guest agent.
    pub basic: VmUpdateInput,
    /// Attributes applied through the guest agent.
    pub vm_tools: VmToolsUpdate,
    /// Power operation run last.
    pub power: Option<PowerOperation>,
    /// Planned actions, for display.
    pub actions: Vec<PlannedAction>,
}

/// A single planned action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAction {
    /// Action type.
    pub action_type: ActionType,
    /// Resource the action applies to.
    pub resource: String,
    /// Reason for this action.
    pub reason: String,
}

/// Types of actions in a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionType {
    /// Add a sub-resource.
    Create,
    /// Change a VM attribute or sub-resource.
    Update,
    /// Remove a sub-resource.
    Delete,
    /// Apply attributes through the guest agent.
    Configure,
    /// Change the power state.
    Power,
}

impl VmUpdatePlan {
    /// Builds a plan moving `observed` towards `spec`.
    ///
    /// `applied_account` is the fingerprint of the guest OS account applied
    /// by an earlier run, if any; an unchanged account is not re-applied.
    ///
    /// # Errors
    ///
    /// Returns every validation failure found, aggregated: diff errors,
    /// invalid CPU topology, guest-agent work on a VM that cannot be powered
    /// on, and invalid power transitions.
    pub fn build(spec: &VmSpec, observed: &ObservedVm, applied_account: Option<&str>) -> Result<Self> {
        let hasher = ConfigHasher::new();
        let vm = &observed.vm;
        let mut errors: Vec<TowerError> = Vec::new();
        let mut actions = Vec::new();
        let mut basic = VmUpdateInput::default();
        let mut vm_tools = VmToolsUpdate::default();

        if let Some(name) = spec.name.as_ref().filter(|n| **n != vm.name) {
            basic.name = Some(name.clone());
            actions.push(PlannedAction::update("vm", format!("name {} -> {name}", vm.name)));
        }
        if let Some(memory) = spec.memory.filter(|m| *m != vm.memory) {
            basic.memory = Some(memory);
            actions.push(PlannedAction::update("vm", format!("memory {} -> {memory}", vm.memory)));
        }
        if let Some(ha) = spec.ha.filter(|h| *h != vm.ha) {
            basic.ha = Some(ha);
            actions.push(PlannedAction::update("vm", format!("ha -> {ha}")));
        }
        if let Some(description) = spec
            .description
            .as_ref()
            .filter(|d| vm.description.as_ref() != Some(*d))
        {
            basic.description = Some(description.clone());
            actions.push(PlannedAction::update("vm", String::from("description changed")));
        }

        let current_cpu = vm.cpu.unwrap_or(CpuTopology {
            cores: vm.vcpu.max(1),
            sockets: 1,
        });
        match resolve_cpu(spec.vcpu, spec.cpu_cores, spec.cpu_sockets, current_cpu) {
            Ok(Some(cpu)) if cpu.vcpu != vm.vcpu || vm.cpu != Some(cpu.topology) => {
                basic.vcpu = Some(cpu.vcpu);
                basic.cpu = Some(cpu.topology);
                actions.push(PlannedAction::update(
                    "vm",
                    format!(
                        "cpu {} ({}x{}) -> {} ({}x{})",
                        vm.vcpu,
                        current_cpu.sockets,
                        current_cpu.cores,
                        cpu.vcpu,
                        cpu.topology.sockets,
                        cpu.topology.cores
                    ),
                ));
            }
            Ok(_) => {}
            Err(err) => errors.push(err.into()),
        }

        let mut drives = DiskBatch::default();
        if let Some(disks) = &spec.disks {
            match diff_disks(disks, &observed.disks) {
                Ok(batch) => drives = drives.merge(batch),
                Err(err) => errors.push(err.into()),
            }
        }
        if let Some(cd_roms) = &spec.cd_roms {
            drives = drives.merge(diff_cd_roms(cd_roms, &observed.cd_roms));
        }
        drives.sort_by_boot();
        if !drives.is_empty() {
            describe_drives(&drives, &mut actions);
            basic.vm_disks = Some(drives.into_changes());
        }

        if let Some(nics) = &spec.nics {
            let batch = diff_nics(nics, &observed.nics);
            if !batch.is_empty() {
                describe_nics(&batch, &mut actions);
                if batch.requires_vm_tools() {
                    vm_tools.data.vm_nics = Some(batch.into_changes());
                } else {
                    basic.vm_nics = Some(batch.into_changes());
                }
            }
        }

        if let Some(hostname) = spec
            .hostname
            .as_ref()
            .filter(|h| vm.hostname.as_ref() != Some(*h))
        {
            vm_tools.data.hostname = Some(hostname.clone());
            actions.push(PlannedAction::configure(format!("hostname -> {hostname}")));
        }
        if let Some(dns) = spec.dns_servers.as_ref().filter(|d| **d != vm.dns_servers) {
            let joined = dns.join(",");
            actions.push(PlannedAction::configure(format!("dns servers -> {joined}")));
            vm_tools.dns_servers = Some(joined);
        }
        if let Some(account) = &spec.guest_os_account {
            if applied_account != Some(hasher.fingerprint_account(account).as_str()) {
                vm_tools.effect = VmUpdateEffect {
                    guest_os_username: Some(account.username.clone()),
                    guest_os_password: Some(account.password.clone()),
                };
                actions.push(PlannedAction::configure(format!(
                    "guest os account {}",
                    account.username
                )));
            }
        }

        if !vm_tools.is_empty() && !matches!(vm.status, VmStatus::Running | VmStatus::Stopped) {
            errors.push(
                PowerError::InvalidState {
                    vm_id: vm.id.clone(),
                    status: vm.status.to_string(),
                    action: "cannot update vm tools related attributes, please start vm first",
                }
                .into(),
            );
        }

        let mut power = None;
        if let Some(desired) = spec.status {
            match plan_power(spec, &vm.id, observed.status(), desired) {
                Ok(Some(op)) => {
                    actions.push(PlannedAction {
                        action_type: ActionType::Power,
                        resource: String::from("vm"),
                        reason: format!("{} -> {desired} ({op})", vm.status),
                    });
                    power = Some(op);
                }
                Ok(None) => {}
                Err(err) => errors.push(err),
            }
        }

        if let Some(err) = TowerError::from_collected(errors) {
            return Err(err);
        }

        debug!("Planned {} action(s) for vm {}", actions.len(), vm.id);
        Ok(Self {
            created_at: Utc::now(),
            vm_id: vm.id.clone(),
            config_hash: hasher.hash_vm(spec),
            observed_status: vm.status,
            basic,
            vm_tools,
            power,
            actions,
        })
    }

    /// Returns true if the plan is empty (no changes).
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }

    /// Returns the number of actions of `action_type`.
    #[must_use]
    pub fn count(&self, action_type: ActionType) -> usize {
        self.actions
            .iter()
            .filter(|a| a.action_type == action_type)
            .count()
    }
}

fn plan_power(
    spec: &VmSpec,
    vm_id: &str,
    status: VmStatus,
    desired: PowerState,
) -> Result<Option<PowerOperation>> {
    let Some(current) = status.power_state() else {
        return Err(PowerError::InvalidState {
            vm_id: vm_id.to_string(),
            status: status.to_string(),
            action: "cannot change status",
        }
        .into());
    };
    Ok(select_operation(
        current,
        desired,
        spec.force_status_change,
        spec.host_id.as_deref(),
    )?)
}

fn drive_label(disk_type: DiskType, boot: u32) -> String {
    match disk_type {
        DiskType::Disk => format!("disk[boot={boot}]"),
        DiskType::CdRom => format!("cd_rom[boot={boot}]"),
    }
}

fn describe_drives(batch: &DiskBatch, actions: &mut Vec<PlannedAction>) {
    for DiskCreateInput {
        boot, disk_type, ..
    } in &batch.create
    {
        actions.push(PlannedAction {
            action_type: ActionType::Create,
            resource: drive_label(*disk_type, *boot),
            reason: String::from("declared but not attached"),
        });
    }
    for DiskUpdateInput { target, data } in &batch.update {
        actions.push(PlannedAction {
            action_type: ActionType::Update,
            resource: drive_label(data.disk_type, data.boot),
            reason: format!("drive {} differs", target.id),
        });
    }
    describe_deletes("drive", &batch.delete, actions);
}

fn describe_nics(batch: &NicBatch, actions: &mut Vec<PlannedAction>) {
    for NicCreateInput { vlan, .. } in &batch.create {
        let vlan = vlan.connect.as_ref().map_or("", |v| v.id.as_str());
        actions.push(PlannedAction {
            action_type: ActionType::Create,
            resource: format!("nic[vlan={vlan}]"),
            reason: String::from("declared but not attached"),
        });
    }
    for NicUpdateInput { target, .. } in &batch.update {
        actions.push(PlannedAction {
            action_type: ActionType::Update,
            resource: format!("nic {}", target.id),
            reason: String::from("nic differs"),
        });
    }
    describe_deletes("nic", &batch.delete, actions);
}

fn describe_deletes(kind: &str, deletes: &[IdRef], actions: &mut Vec<PlannedAction>) {
    for target in deletes {
        actions.push(PlannedAction {
            action_type: ActionType::Delete,
            resource: format!("{kind} {}", target.id),
            reason: String::from("attached but not declared"),
        });
    }
}

impl PlannedAction {
    fn update(resource: &str, reason: String) -> Self {
        Self {
            action_type: ActionType::Update,
            resource: resource.to_string(),
            reason,
        }
    }

    fn configure(reason: String) -> Self {
        Self {
            action_type: ActionType::Configure,
            resource: String::from("vm tools"),
            reason,
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Configure => "configure",
            Self::Power => "power",
        };
        write!(f, "{s}")
    }
}

impl std::fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.action_type, self.resource)?;
        if !self.reason.is_empty() {
            write!(f, " ({})", self.reason)?;
        }
        Ok(())
    }
}

impl std::fmt::Display for VmUpdatePlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.actions.is_empty() {
            return write!(f, "No changes required");
        }

        writeln!(f, "Update plan for vm {} ({} actions):", self.vm_id, self.actions.len())?;
        for (i, action) in self.actions.iter().enumerate() {
            writeln!(f, "  {i}. {action}")?;
        }
        Ok(())
    }
}
