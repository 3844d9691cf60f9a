//! Configuration specification types for VM reconciliation.
//!
//! This module defines all the structs that map to the `towerctl.yaml` file.
//! These types are declarative and fully describe the desired state of one VM.
//!
//! Optional collections follow presence semantics: an omitted `disks`,
//! `cd_roms` or `nics` list leaves that collection unmanaged, while an empty
//! list removes every entry.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use crate::tower::{Bus, Firmware, NicModel, PowerState, StaticIp, StoragePolicy};

/// Environment variable holding the API token unless overridden.
pub const DEFAULT_TOKEN_ENV: &str = "TOWER_TOKEN";

/// Default local state directory.
pub const DEFAULT_STATE_DIR: &str = ".towerctl";

/// The root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconcileConfig {
    /// Control-plane connection.
    pub tower: TowerConfig,
    /// State store configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Desired VM.
    pub vm: VmSpec,
}

/// Control-plane connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TowerConfig {
    /// Base URL, e.g. `http://tower.example.com`.
    pub endpoint: String,
    /// Environment variable that holds the API token.
    #[serde(default = "default_token_env")]
    pub token_env: String,
    /// Per-request timeout in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
    /// Delay between task polls in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Attempts per remote call.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// State store settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct StateConfig {
    /// Directory holding one state file per VM.
    #[serde(default)]
    pub dir: Option<String>,
}

impl StateConfig {
    /// Returns the configured directory or the default one.
    #[must_use]
    pub fn dir_or_default(&self) -> &str {
        self.dir.as_deref().unwrap_or(DEFAULT_STATE_DIR)
    }
}

/// Desired state of a VM.
///
/// Without an `id` the VM is created on the first apply and found again
/// through the state recorded under its name.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct VmSpec {
    /// Remote VM id.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Virtual CPU count.
    #[serde(default)]
    pub vcpu: Option<u32>,
    /// Cores per socket.
    #[serde(default)]
    pub cpu_cores: Option<u32>,
    /// Socket count.
    #[serde(default)]
    pub cpu_sockets: Option<u32>,
    /// Memory in bytes.
    #[serde(default)]
    pub memory: Option<u64>,
    /// Description.
    #[serde(default)]
    pub description: Option<String>,
    /// High availability.
    #[serde(default)]
    pub ha: Option<bool>,
    /// Desired power state; unmanaged when absent.
    #[serde(default)]
    pub status: Option<PowerState>,
    /// Use a hard power off instead of a guest shutdown.
    #[serde(default)]
    pub force_status_change: bool,
    /// Host to start the VM on.
    #[serde(default)]
    pub host_id: Option<String>,
    /// Guest hostname, applied through the guest agent.
    #[serde(default)]
    pub hostname: Option<String>,
    /// Guest DNS servers, applied through the guest agent.
    #[serde(default)]
    pub dns_servers: Option<Vec<String>>,
    /// Guest OS account, applied through the guest agent.
    #[serde(default)]
    pub guest_os_account: Option<GuestOsAccount>,
    /// Disks; unmanaged when absent.
    #[serde(default)]
    pub disks: Option<Vec<DiskSpec>>,
    /// CD-ROM drives; unmanaged when absent.
    #[serde(default)]
    pub cd_roms: Option<Vec<CdRomSpec>>,
    /// NICs; unmanaged when absent.
    #[serde(default)]
    pub nics: Option<Vec<NicSpec>>,
    /// Cluster a new VM is created in.
    #[serde(default)]
    pub cluster_id: Option<String>,
    /// Firmware of a new VM.
    #[serde(default)]
    pub firmware: Firmware,
}

/// Remote ids of sub-resources created from entries that name none.
///
/// Recorded when the VM is created so later applies update those entries
/// instead of adding them again.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct AssignedIds {
    /// CD-ROM drive ids by boot order.
    #[serde(default)]
    pub cd_roms: BTreeMap<u32, String>,
    /// NIC ids by position in the `nics` list.
    #[serde(default)]
    pub nics: Vec<String>,
}

/// Desired disk.
///
/// A disk either attaches an existing volume (`vm_volume_id`) or defines
/// one (`vm_volume`). With both set, the definition updates the attached
/// volume. With neither set, the entry is ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DiskSpec {
    /// Boot order.
    pub boot: u32,
    /// Bus.
    #[serde(default)]
    pub bus: Bus,
    /// Existing volume to attach.
    #[serde(default)]
    pub vm_volume_id: Option<String>,
    /// Volume definition.
    #[serde(default)]
    pub vm_volume: Option<VolumeSpec>,
}

/// Desired volume definition.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VolumeSpec {
    /// Volume name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy.
    #[serde(default = "default_storage_policy")]
    pub storage_policy: StoragePolicy,
    /// Datastore path to reuse.
    #[serde(default)]
    pub origin_path: Option<String>,
}

/// Desired CD-ROM drive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct CdRomSpec {
    /// Remote drive id; a new drive is added when absent or unknown.
    #[serde(default)]
    pub id: Option<String>,
    /// Boot order.
    pub boot: u32,
    /// Mounted image. Omitted keeps the current image, `null` or an empty
    /// string ejects it.
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    pub iso_id: Option<Option<String>>,
}

impl CdRomSpec {
    /// Returns the requested image, `Some(None)` when an eject is requested.
    #[must_use]
    pub fn requested_image(&self) -> Option<Option<&str>> {
        self.iso_id
            .as_ref()
            .map(|iso| iso.as_deref().filter(|id| !id.is_empty()))
    }
}

/// Desired NIC.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NicSpec {
    /// Remote NIC id; a new NIC is added when absent or unknown.
    #[serde(default)]
    pub id: Option<String>,
    /// VLAN to connect.
    pub vlan_id: String,
    /// Link enabled.
    #[serde(default = "default_true")]
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
    /// Static IPv4 address.
    #[serde(default)]
    pub ip_address: Option<String>,
    /// Subnet mask.
    #[serde(default)]
    pub subnet_mask: Option<String>,
    /// Gateway.
    #[serde(default)]
    pub gateway: Option<String>,
}

impl NicSpec {
    /// Returns true when any static addressing field is set.
    #[must_use]
    pub const fn has_static_addressing(&self) -> bool {
        self.ip_address.is_some() || self.subnet_mask.is_some() || self.gateway.is_some()
    }

    /// Returns the static address triple when complete.
    #[must_use]
    pub fn static_ip(&self) -> Option<StaticIp> {
        Some(StaticIp {
            ip_address: self.ip_address.clone()?,
            subnet_mask: self.subnet_mask.clone()?,
            gateway: self.gateway.clone()?,
        })
    }
}

/// Guest OS account configured through the guest agent.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GuestOsAccount {
    /// Account name.
    pub username: String,
    /// Account password.
    pub password: String,
}

impl fmt::Debug for GuestOsAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GuestOsAccount")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl VmSpec {
    /// Key the VM's state is stored under: its id, or its name when the VM
    /// is created by this tool.
    #[must_use]
    pub fn state_key(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.name.as_deref())
            .filter(|key| !key.is_empty())
    }

    /// Returns a copy targeting `vm_id`, with sub-resource entries that name
    /// no id filled in from `assigned`.
    #[must_use]
    pub fn for_vm(&self, vm_id: &str, assigned: &AssignedIds) -> Self {
        let mut spec = self.clone();
        spec.id = Some(vm_id.to_string());
        if let Some(cd_roms) = spec.cd_roms.as_mut() {
            for cd_rom in cd_roms.iter_mut().filter(|c| c.id.is_none()) {
                cd_rom.id = assigned.cd_roms.get(&cd_rom.boot).cloned();
            }
        }
        if let Some(nics) = spec.nics.as_mut() {
            for (nic, id) in nics.iter_mut().zip(&assigned.nics) {
                if nic.id.is_none() {
                    nic.id = Some(id.clone());
                }
            }
        }
        spec
    }

    /// Returns true when any attribute needs the guest agent.
    #[must_use]
    pub fn touches_vm_tools(&self) -> bool {
        self.hostname.is_some()
            || self.dns_servers.is_some()
            || self.guest_os_account.is_some()
            || self
                .nics
                .as_ref()
                .is_some_and(|nics| nics.iter().any(NicSpec::has_static_addressing))
    }
}

impl TowerConfig {
    /// Creates a connection config with defaults.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            token_env: default_token_env(),
            request_timeout_secs: default_request_timeout(),
            poll_interval_secs: default_poll_interval(),
            max_retries: default_max_retries(),
        }
    }
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

fn default_token_env() -> String {
    String::from(DEFAULT_TOKEN_ENV)
}

const fn default_request_timeout() -> u64 {
    30
}

const fn default_poll_interval() -> u64 {
    5
}

const fn default_max_retries() -> u32 {
    3
}

const fn default_storage_policy() -> StoragePolicy {
    StoragePolicy::new(2, true)
}

const fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cd_rom_iso_presence() {
        let omitted: CdRomSpec = serde_yaml::from_str("boot: 1").expect("valid");
        let null: CdRomSpec = serde_yaml::from_str("boot: 1\niso_id: null").expect("valid");
        let empty: CdRomSpec = serde_yaml::from_str("boot: 1\niso_id: \"\"").expect("valid");
        let set: CdRomSpec = serde_yaml::from_str("boot: 1\niso_id: iso-1").expect("valid");

        assert_eq!(omitted.requested_image(), None);
        assert_eq!(null.requested_image(), Some(None));
        assert_eq!(empty.requested_image(), Some(None));
        assert_eq!(set.requested_image(), Some(Some("iso-1")));
    }

    #[test]
    fn test_nic_static_ip_requires_triple() {
        let nic: NicSpec =
            serde_yaml::from_str("vlan_id: vlan-a\nip_address: 10.0.0.5").expect("valid");
        assert!(nic.enabled);
        assert!(nic.has_static_addressing());
        assert!(nic.static_ip().is_none());
    }

    #[test]
    fn test_password_is_redacted_in_debug() {
        let account = GuestOsAccount {
            username: String::from("root"),
            password: String::from("hunter2"),
        };
        assert!(!format!("{account:?}").contains("hunter2"));
    }

    #[test]
    fn test_state_key_prefers_id() {
        let by_id: VmSpec = serde_yaml::from_str("id: vm-1\nname: web-1").expect("valid");
        let by_name: VmSpec = serde_yaml::from_str("name: web-1").expect("valid");

        assert_eq!(by_id.state_key(), Some("vm-1"));
        assert_eq!(by_name.state_key(), Some("web-1"));
        assert_eq!(VmSpec::default().state_key(), None);
    }

    #[test]
    fn test_for_vm_fills_assigned_ids() {
        let spec: VmSpec = serde_yaml::from_str(
            "name: web-1\ncd_roms: [{ boot: 2 }, { id: cd-keep, boot: 3 }]\nnics: [{ vlan_id: a }, { vlan_id: b }]",
        )
        .expect("valid");
        let assigned = AssignedIds {
            cd_roms: BTreeMap::from([(2, String::from("cd-9")), (3, String::from("cd-x"))]),
            nics: vec![String::from("nic-1")],
        };

        let resolved = spec.for_vm("vm-9", &assigned);

        assert_eq!(resolved.id.as_deref(), Some("vm-9"));
        let cd_roms = resolved.cd_roms.expect("cd-roms");
        assert_eq!(cd_roms[0].id.as_deref(), Some("cd-9"));
        assert_eq!(cd_roms[1].id.as_deref(), Some("cd-keep"));
        let nics = resolved.nics.expect("nics");
        assert_eq!(nics[0].id.as_deref(), Some("nic-1"));
        assert_eq!(nics[1].id, None);
    }

    #[test]
    fn test_unmanaged_collections() {
        let vm: VmSpec = serde_yaml::from_str("id: vm-1\ndisks: []").expect("valid");
        assert_eq!(vm.disks, Some(vec![]));
        assert!(vm.nics.is_none());
        assert!(!vm.touches_vm_tools());
    }
}
