//! Creation of a blank VM.
//!
//! A VM without a remote id is created from its spec in one `create-vm`
//! request carrying its drives and NICs. The new VM starts stopped; static
//! addressing, guest-agent attributes and the desired power state are
//! applied by the update plan that follows.

use chrono::{DateTime, Utc};

use crate::config::{AssignedIds, ConfigHasher, VmSpec};
use crate::error::{ConfigError, Result, TowerError};
use crate::tower::{
    CpuTopology, MountCdRomInput, MountDiskInput, MountNewDiskInput, NewVolumeInput, ObservedVm,
    PowerState, VmCreateDisks, VmCreateInput, VmCreateNic,
};

use super::cpu::resolve_cpu;
use super::plan::{ActionType, PlannedAction};

/// Plan creating a VM that does not exist yet.
#[derive(Debug, Clone)]
pub struct VmCreatePlan {
    /// When the plan was created.
    pub created_at: DateTime<Utc>,
    /// Hash of the desired spec this plan is based on.
    pub config_hash: String,
    /// The `create-vm` request.
    pub input: VmCreateInput,
    /// Planned actions, for display.
    pub actions: Vec<PlannedAction>,
}

impl VmCreatePlan {
    /// Builds the creation request for `spec`.
    ///
    /// # Errors
    ///
    /// Returns every missing required field (`name`, `cluster_id`, `vcpu`,
    /// `memory`) and an invalid CPU topology, aggregated.
    pub fn build(spec: &VmSpec) -> Result<Self> {
        let mut errors: Vec<TowerError> = Vec::new();
        let required = [
            ("vm.name", spec.name.is_none()),
            ("vm.cluster_id", spec.cluster_id.is_none()),
            ("vm.vcpu", spec.vcpu.is_none()),
            ("vm.memory", spec.memory.is_none()),
        ];
        for (field, missing) in required {
            if missing {
                errors.push(ConfigError::validation("required to create the vm", field).into());
            }
        }

        // Without an explicit topology a new VM gets one core per socket.
        let flat = CpuTopology {
            cores: 1,
            sockets: spec.vcpu.unwrap_or(1).max(1),
        };
        let cpu = match resolve_cpu(spec.vcpu, spec.cpu_cores, spec.cpu_sockets, flat) {
            Ok(cpu) => cpu,
            Err(err) => {
                errors.push(err.into());
                None
            }
        };

        if let Some(err) = TowerError::from_collected(errors) {
            return Err(err);
        }
        let (Some(name), Some(cluster_id), Some(cpu), Some(memory)) =
            (&spec.name, &spec.cluster_id, cpu, spec.memory)
        else {
            return Err(TowerError::internal("create plan is missing a checked field"));
        };

        let input = VmCreateInput {
            name: name.clone(),
            cluster_id: cluster_id.clone(),
            host_id: spec.host_id.clone(),
            vcpu: cpu.vcpu,
            cpu_cores: cpu.topology.cores,
            cpu_sockets: cpu.topology.sockets,
            memory,
            ha: spec.ha.unwrap_or(false),
            firmware: spec.firmware,
            status: PowerState::Stopped,
            description: spec.description.clone(),
            vm_disks: create_disks(spec),
            vm_nics: create_nics(spec),
        };
        let actions = describe(&input);

        Ok(Self {
            created_at: Utc::now(),
            config_hash: ConfigHasher::new().hash_vm(spec),
            input,
            actions,
        })
    }

    /// Returns the number of actions.
    #[must_use]
    pub const fn action_count(&self) -> usize {
        self.actions.len()
    }
}

fn create_disks(spec: &VmSpec) -> VmCreateDisks {
    let mut disks = VmCreateDisks::default();
    for disk in spec.disks.iter().flatten() {
        match (&disk.vm_volume_id, &disk.vm_volume) {
            (Some(volume_id), _) => disks.mount_disks.push(MountDiskInput {
                boot: disk.boot,
                bus: disk.bus,
                vm_volume_id: volume_id.clone(),
            }),
            (None, Some(volume)) => disks.mount_new_create_disks.push(MountNewDiskInput {
                boot: disk.boot,
                bus: disk.bus,
                vm_volume: NewVolumeInput {
                    name: volume.name.clone(),
                    size: volume.size,
                    elf_storage_policy: volume.storage_policy,
                    path: volume.origin_path.clone(),
                },
            }),
            (None, None) => {}
        }
    }
    for cd_rom in spec.cd_roms.iter().flatten() {
        disks.mount_cd_roms.push(MountCdRomInput {
            boot: cd_rom.boot,
            elf_image_id: cd_rom.requested_image().flatten().map(str::to_string),
        });
    }
    disks
}

fn create_nics(spec: &VmSpec) -> Vec<VmCreateNic> {
    spec.nics
        .iter()
        .flatten()
        .map(|nic| VmCreateNic {
            connect_vlan_id: nic.vlan_id.clone(),
            enabled: nic.enabled,
            mirror: nic.mirror,
            model: nic.model,
            mac_address: nic.mac_address.clone(),
        })
        .collect()
}

fn describe(input: &VmCreateInput) -> Vec<PlannedAction> {
    let created = |resource: String, reason: String| PlannedAction {
        action_type: ActionType::Create,
        resource,
        reason,
    };

    let mut actions = vec![created(
        String::from("vm"),
        format!(
            "{} in cluster {}: {} vcpu ({}x{}), {} bytes",
            input.name, input.cluster_id, input.vcpu, input.cpu_sockets, input.cpu_cores, input.memory
        ),
    )];
    let disks = &input.vm_disks;
    for disk in &disks.mount_disks {
        actions.push(created(
            format!("disk[boot={}]", disk.boot),
            format!("attach volume {}", disk.vm_volume_id),
        ));
    }
    for disk in &disks.mount_new_create_disks {
        actions.push(created(
            format!("disk[boot={}]", disk.boot),
            format!("new volume {} ({} bytes)", disk.vm_volume.name, disk.vm_volume.size),
        ));
    }
    for cd_rom in &disks.mount_cd_roms {
        actions.push(created(
            format!("cd_rom[boot={}]", cd_rom.boot),
            cd_rom
                .elf_image_id
                .as_ref()
                .map_or_else(|| String::from("empty"), |iso| format!("iso {iso}")),
        ));
    }
    for nic in &input.vm_nics {
        actions.push(created(
            format!("nic[vlan={}]", nic.connect_vlan_id),
            String::new(),
        ));
    }
    actions
}

/// Records the ids the control plane gave the drives and NICs of a VM it
/// just created: CD-ROMs by boot order, NICs in their order on the VM.
#[must_use]
pub fn assigned_ids(observed: &ObservedVm) -> AssignedIds {
    let mut nics: Vec<_> = observed.nics.iter().collect();
    nics.sort_by_key(|nic| nic.order.unwrap_or(u32::MAX));
    AssignedIds {
        cd_roms: observed
            .cd_roms
            .iter()
            .map(|cd_rom| (cd_rom.boot, cd_rom.id.clone()))
            .collect(),
        nics: nics.into_iter().map(|nic| nic.id.clone()).collect(),
    }
}
