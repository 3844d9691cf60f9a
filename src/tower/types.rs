//! CloudTower API types and data structures.
//!
//! This module defines the entities returned by the control plane and the
//! input documents sent with VM mutations.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Status of an asynchronous remote task.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum TaskStatus {
    /// Queued, not started.
    #[default]
    #[serde(rename = "PENDING")]
    Pending,
    /// Running on the remote side.
    #[serde(rename = "EXECUTING")]
    Executing,
    /// Finished successfully.
    #[serde(rename = "SUCCESSED", alias = "SUCCEEDED")]
    Succeeded,
    /// Finished with an error.
    #[serde(rename = "FAILED")]
    Failed,
}

impl TaskStatus {
    /// Returns true once the task can no longer change.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }
}

/// A remote task as reported by `get-tasks`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Task {
    /// Globally unique task id.
    pub id: String,
    /// Current status.
    #[serde(default)]
    pub status: TaskStatus,
    /// Error message when the task failed.
    #[serde(default, rename = "error_message")]
    pub error_message: Option<String>,
    /// Resource the task mutates.
    #[serde(default)]
    pub resource_id: Option<String>,
    /// Mutation that spawned the task.
    #[serde(default)]
    pub resource_mutation: Option<String>,
    /// Creation timestamp on the remote side.
    #[serde(default)]
    pub local_created_at: Option<String>,
}

/// Which tasks a poll should look at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskFilter {
    /// Every task whose id is in the set.
    IdIn(Vec<String>),
    /// The most recently created task for a resource and mutation.
    LatestForResource {
        /// Resource id.
        resource_id: String,
        /// Mutation name, e.g. `updateVm`.
        mutation: String,
    },
}

/// Power state of a VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PowerState {
    /// Powered on.
    Running,
    /// Powered off.
    Stopped,
    /// Memory suspended.
    Suspended,
}

impl PowerState {
    /// All power states.
    pub const ALL: [Self; 3] = [Self::Running, Self::Stopped, Self::Suspended];
}

impl fmt::Display for PowerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Suspended => "SUSPENDED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for PowerState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "RUNNING" => Ok(Self::Running),
            "STOPPED" => Ok(Self::Stopped),
            "SUSPENDED" => Ok(Self::Suspended),
            other => Err(format!("unknown power state: {other}")),
        }
    }
}

/// VM status as reported by the control plane.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmStatus {
    /// Powered on.
    Running,
    /// Powered off.
    Stopped,
    /// Memory suspended.
    Suspended,
    /// Removed.
    Deleted,
    /// Any other status.
    #[default]
    #[serde(other)]
    Unknown,
}

impl VmStatus {
    /// Maps the remote status onto a power state, if it is one.
    #[must_use]
    pub const fn power_state(self) -> Option<PowerState> {
        match self {
            Self::Running => Some(PowerState::Running),
            Self::Stopped => Some(PowerState::Stopped),
            Self::Suspended => Some(PowerState::Suspended),
            Self::Deleted | Self::Unknown => None,
        }
    }
}

impl fmt::Display for VmStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.power_state() {
            Some(state) => write!(f, "{state}"),
            None if *self == Self::Deleted => write!(f, "DELETED"),
            None => write!(f, "UNKNOWN"),
        }
    }
}

/// Guest agent status.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VmToolsStatus {
    /// Agent is up.
    Running,
    /// Agent installed but not running.
    NotRunning,
    /// Agent not installed.
    NotInstalled,
    /// Any other status.
    #[default]
    #[serde(other)]
    Unknown,
}

/// Reference to another entity by id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdRef {
    /// Referenced id.
    pub id: String,
}

impl IdRef {
    /// Creates a reference.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// CPU topology.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct CpuTopology {
    /// Cores per socket.
    pub cores: u32,
    /// Socket count.
    pub sockets: u32,
}

/// A VM as returned by `get-vms`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vm {
    /// VM id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Current status.
    #[serde(default)]
    pub status: VmStatus,
    /// Guest agent status.
    #[serde(default)]
    pub vm_tools_status: VmToolsStatus,
    /// Host the VM is placed on.
    #[serde(default)]
    pub host: Option<IdRef>,
    /// Virtual CPU count.
    #[serde(default)]
    pub vcpu: u32,
    /// CPU topology.
    #[serde(default)]
    pub cpu: Option<CpuTopology>,
    /// Memory in bytes.
    #[serde(default)]
    pub memory: u64,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// High availability flag.
    #[serde(default)]
    pub ha: bool,
    /// Guest hostname reported by the agent.
    #[serde(default)]
    pub hostname: Option<String>,
    /// DNS servers reported by the agent.
    #[serde(default)]
    pub dns_servers: Vec<String>,
}

/// Bus a disk is attached to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Bus {
    /// IDE bus.
    Ide,
    /// SCSI bus.
    Scsi,
    /// Paravirtual bus.
    #[default]
    Virtio,
}

/// Kind of a VM disk.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum DiskType {
    /// Block device backed by a volume.
    #[serde(rename = "DISK")]
    Disk,
    /// CD-ROM drive.
    #[serde(rename = "CD_ROM")]
    CdRom,
}

/// Storage policy applied to a volume, `REPLICA_<n>_<THIN|THICK>_PROVISION`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "String", into = "String")]
pub struct StoragePolicy {
    /// Replica count.
    pub replicas: u8,
    /// Thin provisioning.
    pub thin: bool,
}

impl StoragePolicy {
    /// Creates a policy.
    #[must_use]
    pub const fn new(replicas: u8, thin: bool) -> Self {
        Self { replicas, thin }
    }
}

impl fmt::Display for StoragePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let provision = if self.thin { "THIN" } else { "THICK" };
        write!(f, "REPLICA_{}_{provision}_PROVISION", self.replicas)
    }
}

impl FromStr for StoragePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || format!("invalid storage policy: {s}");
        let rest = s.strip_prefix("REPLICA_").ok_or_else(invalid)?;
        let (replicas, provision) = rest.split_once('_').ok_or_else(invalid)?;
        let replicas: u8 = replicas.parse().map_err(|_| invalid())?;
        let thin = match provision {
            "THIN_PROVISION" => true,
            "THICK_PROVISION" => false,
            _ => return Err(invalid()),
        };
        Ok(Self { replicas, thin })
    }
}

impl TryFrom<String> for StoragePolicy {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<StoragePolicy> for String {
    fn from(policy: StoragePolicy) -> Self {
        policy.to_string()
    }
}

/// A storage policy record from `get-elf-storage-policies`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoragePolicyRecord {
    /// Remote id.
    pub id: String,
    /// Local id used by volumes and templates.
    pub local_id: String,
    /// Replica count.
    pub replica_num: u8,
    /// Thin provisioning.
    pub thin_provision: bool,
}

impl StoragePolicyRecord {
    /// Returns the policy this record describes.
    #[must_use]
    pub const fn policy(&self) -> StoragePolicy {
        StoragePolicy::new(self.replica_num, self.thin_provision)
    }
}

/// A volume as embedded in a VM disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmVolume {
    /// Volume id.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy, when the API reports it directly.
    #[serde(default)]
    pub elf_storage_policy: Option<StoragePolicy>,
    /// Storage policy local id, when only the reference is reported.
    #[serde(default)]
    pub storage_policy_uuid: Option<String>,
    /// Path on the datastore.
    #[serde(default)]
    pub path: String,
    /// Whether the volume is mounted.
    #[serde(default)]
    pub mounting: bool,
    /// Whether the volume is shared.
    #[serde(default)]
    pub sharing: bool,
}

/// A VM disk from `get-vm-disks` (both DISK and CD_ROM kinds).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VmDisk {
    /// Disk id.
    pub id: String,
    /// Disk kind.
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    /// Boot order.
    #[serde(default)]
    pub boot: u32,
    /// Bus.
    #[serde(default)]
    pub bus: Bus,
    /// Device key.
    #[serde(default)]
    pub key: Option<i32>,
    /// Whether the drive is disabled.
    #[serde(default)]
    pub disabled: bool,
    /// Backing volume for DISK kinds.
    #[serde(default)]
    pub vm_volume: Option<VmVolume>,
    /// Mounted image for CD_ROM kinds.
    #[serde(default)]
    pub elf_image: Option<IdRef>,
}

/// NIC emulation model.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NicModel {
    /// Intel e1000.
    E1000,
    /// Paravirtual.
    #[default]
    Virtio,
    /// SR-IOV passthrough.
    Sriov,
}

/// A VM NIC from `get-vm-nics`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmNic {
    /// NIC id.
    pub id: String,
    /// Connected VLAN.
    #[serde(default)]
    pub vlan: Option<IdRef>,
    /// Link enabled.
    #[serde(default)]
    pub enabled: bool,
    /// Port mirroring.
    #[serde(default)]
    pub mirror: bool,
    /// Emulation model.
    #[serde(default)]
    pub model: NicModel,
    /// MAC address.
    #[serde(default)]
    pub mac_address: Option<String>,
    /// Static IP address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Subnet mask.
    #[serde(default)]
    pub subnet_mask: Option<String>,
    /// Gateway.
    #[serde(default)]
    pub gateway: Option<String>,
    /// Position of the NIC on the VM.
    #[serde(default)]
    pub order: Option<u32>,
}

/// A VLAN.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vlan {
    /// VLAN id.
    pub id: String,
    /// Name.
    #[serde(default)]
    pub name: String,
}

/// An ISO image.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ElfImage {
    /// Image id.
    pub id: String,
    /// Name.
    #[serde(default)]
    pub name: String,
}

/// Record returned per affected entity by a mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithTask<T> {
    /// Task spawned for this entity, if any.
    #[serde(default)]
    pub task_id: Option<String>,
    /// The affected entity.
    pub data: T,
}

/// Collects the union of task ids from a bulk mutation response.
#[must_use]
pub fn task_ids<T>(records: &[WithTask<T>]) -> Vec<String> {
    let mut ids: Vec<String> = Vec::with_capacity(records.len());
    for id in records.iter().filter_map(|r| r.task_id.as_ref()) {
        if !ids.contains(id) {
            ids.push(id.clone());
        }
    }
    ids
}

/// Connect or disconnect a relation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ConnectInput {
    /// Entity to connect.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect: Option<IdRef>,
    /// Drop the current relation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disconnect: Option<bool>,
}

impl ConnectInput {
    /// Connects `id`.
    #[must_use]
    pub fn connect(id: impl Into<String>) -> Self {
        Self {
            connect: Some(IdRef::new(id)),
            disconnect: None,
        }
    }

    /// Drops the current relation.
    #[must_use]
    pub const fn disconnect() -> Self {
        Self {
            connect: None,
            disconnect: Some(true),
        }
    }
}

/// Volume definition carried by a disk mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeCreateInput {
    /// Volume name.
    pub name: String,
    /// Path on the datastore; empty lets the server choose.
    pub path: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy.
    pub elf_storage_policy: StoragePolicy,
    /// Whether the volume is mounted.
    pub mounting: bool,
    /// Whether the volume is shared.
    pub sharing: bool,
}

/// Either attach an existing volume or define one.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VolumeConnectInput {
    /// Existing volume to attach.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connect: Option<IdRef>,
    /// Volume to create or redefine.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub create: Option<VolumeCreateInput>,
}

/// A disk or CD-ROM to add.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskCreateInput {
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Disk kind.
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    /// Image for CD-ROMs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elf_image: Option<ConnectInput>,
    /// Volume for disks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_volume: Option<VolumeConnectInput>,
}

/// New values for an existing disk or CD-ROM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskUpdateData {
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Disk kind.
    #[serde(rename = "type")]
    pub disk_type: DiskType,
    /// Device key, preserved from the observed drive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<i32>,
    /// Disabled flag, preserved from the observed drive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disabled: Option<bool>,
    /// Image change for CD-ROMs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elf_image: Option<ConnectInput>,
    /// Volume redefinition for disks.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_volume: Option<VolumeConnectInput>,
}

/// Update of one disk, keyed by its remote id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskUpdateInput {
    /// Disk to update.
    #[serde(rename = "where")]
    pub target: IdRef,
    /// New values.
    pub data: DiskUpdateData,
}

/// Static addressing for a NIC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StaticIp {
    /// IPv4 address.
    pub ip_address: String,
    /// Subnet mask.
    pub subnet_mask: String,
    /// Default gateway.
    pub gateway: String,
}

/// A NIC to add.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicCreateInput {
    /// VLAN to connect.
    pub vlan: ConnectInput,
    /// Link enabled.
    pub enabled: bool,
    /// Port mirroring.
    pub mirror: bool,
    /// Emulation model.
    pub model: NicModel,
    /// MAC address; server-assigned when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
    /// Static address, configured through the guest agent.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<StaticIp>,
    /// `STATIC` when a static address is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<String>,
}

/// New values for an existing NIC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicUpdateData {
    /// VLAN to connect.
    pub vlan: ConnectInput,
    /// Link enabled.
    pub enabled: bool,
    /// Port mirroring.
    pub mirror: bool,
    /// Emulation model.
    pub model: NicModel,
    /// Static address, configured through the guest agent.
    #[serde(flatten, skip_serializing_if = "Option::is_none")]
    pub static_ip: Option<StaticIp>,
    /// `STATIC` when a static address is set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip_type: Option<String>,
}

/// Update of one NIC, keyed by its remote id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicUpdateInput {
    /// NIC to update.
    #[serde(rename = "where")]
    pub target: IdRef,
    /// New values.
    pub data: NicUpdateData,
}

/// Disk collection changes in a VM update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmDiskChanges {
    /// Drives to add.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub create: Vec<DiskCreateInput>,
    /// Drives to change.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub update: Vec<DiskUpdateInput>,
    /// Drives to remove.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub delete: Vec<IdRef>,
}

/// NIC collection changes in a VM update.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmNicChanges {
    /// NICs to add.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub create: Vec<NicCreateInput>,
    /// NICs to change.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub update: Vec<NicUpdateInput>,
    /// NICs to remove.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub delete: Vec<IdRef>,
}

/// `data` argument of the `updateVm` mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmUpdateInput {
    /// New name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Memory in bytes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory: Option<u64>,
    /// High availability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ha: Option<bool>,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Virtual CPU count.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vcpu: Option<u32>,
    /// CPU topology.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu: Option<CpuTopology>,
    /// NIC changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_nics: Option<VmNicChanges>,
    /// Disk changes.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vm_disks: Option<VmDiskChanges>,
    /// Guest hostname.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    /// Comma-separated DNS servers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dns_servers: Option<String>,
}

impl VmUpdateInput {
    /// Returns true when the update carries no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// `effect` argument of the `updateVm` mutation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmUpdateEffect {
    /// Guest OS account to (re)configure.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_os_username: Option<String>,
    /// Guest OS account password.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub guest_os_password: Option<String>,
}

impl VmUpdateEffect {
    /// Returns true when the effect carries no change.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Firmware of a new VM.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Firmware {
    /// Legacy BIOS.
    #[default]
    Bios,
    /// UEFI.
    Uefi,
}

/// An existing volume attached at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountDiskInput {
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Volume to attach.
    pub vm_volume_id: String,
}

/// Volume created together with a new VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NewVolumeInput {
    /// Volume name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy.
    pub elf_storage_policy: StoragePolicy,
    /// Datastore path to reuse.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// A new volume attached at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountNewDiskInput {
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Volume to create.
    pub vm_volume: NewVolumeInput,
}

/// A CD-ROM drive added at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MountCdRomInput {
    /// Boot order.
    pub boot: u32,
    /// Image to mount; the drive starts empty when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub elf_image_id: Option<String>,
}

/// Drives of a new VM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct VmCreateDisks {
    /// CD-ROM drives.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mount_cd_roms: Vec<MountCdRomInput>,
    /// Existing volumes.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mount_disks: Vec<MountDiskInput>,
    /// New volumes.
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub mount_new_create_disks: Vec<MountNewDiskInput>,
}

impl VmCreateDisks {
    /// Returns the number of drives.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mount_cd_roms.len() + self.mount_disks.len() + self.mount_new_create_disks.len()
    }

    /// Returns true when no drive is attached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A NIC added at creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmCreateNic {
    /// VLAN to connect.
    pub connect_vlan_id: String,
    /// Link enabled.
    pub enabled: bool,
    /// Port mirroring.
    pub mirror: bool,
    /// Emulation model.
    pub model: NicModel,
    /// MAC address; server-assigned when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac_address: Option<String>,
}

/// One entry of the `create-vm` request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VmCreateInput {
    /// Display name.
    pub name: String,
    /// Cluster to create the VM in.
    pub cluster_id: String,
    /// Host to place the VM on; the cluster chooses when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<String>,
    /// Virtual CPU count.
    pub vcpu: u32,
    /// Cores per socket.
    pub cpu_cores: u32,
    /// Socket count.
    pub cpu_sockets: u32,
    /// Memory in bytes.
    pub memory: u64,
    /// High availability.
    pub ha: bool,
    /// Firmware.
    pub firmware: Firmware,
    /// Power state right after creation.
    pub status: PowerState,
    /// Description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Drives.
    pub vm_disks: VmCreateDisks,
    /// NICs.
    pub vm_nics: Vec<VmCreateNic>,
}
