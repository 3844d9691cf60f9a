//! Diff engine for sub-resource collections.
//!
//! Each sub-resource kind is diffed the same way: observed entries are
//! indexed by their match key, every desired entry either consumes a match
//! (and may produce an update) or becomes a create, and whatever is left
//! unconsumed is deleted. Disks match by the volume they attach, CD-ROMs
//! and NICs by their own id.

use std::collections::HashMap;
use tracing::debug;

use crate::config::{CdRomSpec, DiskSpec, NicSpec};
use crate::error::ReconcileError;
use crate::tower::{
    Bus, ConnectInput, DiskCreateInput, DiskType, DiskUpdateData, DiskUpdateInput, IdRef,
    NicCreateInput, NicUpdateData, NicUpdateInput, ObservedCdRom, ObservedDisk, StaticIp,
    VmDiskChanges, VmNic, VmNicChanges, VolumeConnectInput, VolumeCreateInput,
};

/// IP type sent with NICs carrying a static address.
const STATIC_IP_TYPE: &str = "STATIC";

/// Operations that carry a boot order.
pub trait BootOrdered {
    /// Boot order of the device.
    fn boot(&self) -> u32;
}

impl BootOrdered for DiskCreateInput {
    fn boot(&self) -> u32 {
        self.boot
    }
}

impl BootOrdered for DiskUpdateInput {
    fn boot(&self) -> u32 {
        self.data.boot
    }
}

/// Create, update and delete operations for one sub-resource collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OperationBatch<C, U> {
    /// Entries to add.
    pub create: Vec<C>,
    /// Entries to change, keyed by remote id.
    pub update: Vec<U>,
    /// Entries to remove.
    pub delete: Vec<IdRef>,
}

/// Operations on the VM drive collection (disks and CD-ROMs).
pub type DiskBatch = OperationBatch<DiskCreateInput, DiskUpdateInput>;

/// Operations on the VM NIC collection.
pub type NicBatch = OperationBatch<NicCreateInput, NicUpdateInput>;

impl<C, U> Default for OperationBatch<C, U> {
    fn default() -> Self {
        Self {
            create: Vec::new(),
            update: Vec::new(),
            delete: Vec::new(),
        }
    }
}

impl<C, U> OperationBatch<C, U> {
    /// Returns true when there is nothing to do.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.create.is_empty() && self.update.is_empty() && self.delete.is_empty()
    }

    /// Total number of operations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }

    /// Appends the operations of `other` after this batch's.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.create.extend(other.create);
        self.update.extend(other.update);
        self.delete.extend(other.delete);
        self
    }
}

impl<C: BootOrdered, U: BootOrdered> OperationBatch<C, U> {
    /// Stably sorts creates and updates by ascending boot order.
    pub fn sort_by_boot(&mut self) {
        self.create.sort_by_key(BootOrdered::boot);
        self.update.sort_by_key(BootOrdered::boot);
    }
}

impl DiskBatch {
    /// Converts the batch into the `vm_disks` part of a VM update.
    #[must_use]
    pub fn into_changes(self) -> VmDiskChanges {
        VmDiskChanges {
            create: self.create,
            update: self.update,
            delete: self.delete,
        }
    }
}

impl NicBatch {
    /// Returns true when a created or updated NIC carries a static address,
    /// which only the guest agent can apply.
    #[must_use]
    pub fn requires_vm_tools(&self) -> bool {
        self.create.iter().any(|n| n.static_ip.is_some())
            || self.update.iter().any(|n| n.data.static_ip.is_some())
    }

    /// Converts the batch into the `vm_nics` part of a VM update.
    #[must_use]
    pub fn into_changes(self) -> VmNicChanges {
        VmNicChanges {
            create: self.create,
            update: self.update,
            delete: self.delete,
        }
    }
}

/// Diffs desired disks against observed disks.
///
/// A spec with a volume id matches the disk attaching that volume. A spec
/// that only defines a volume matches an unconsumed disk whose volume has
/// the same name, so a volume created by an earlier apply is not created
/// twice. A spec with neither is ignored.
///
/// # Errors
///
/// Returns [`ReconcileError::ImmutableField`] if a matched volume's name or
/// storage policy would change, or [`ReconcileError::VolumeShrink`] if its
/// size would decrease.
pub fn diff_disks(
    desired: &[DiskSpec],
    observed: &[ObservedDisk],
) -> Result<DiskBatch, ReconcileError> {
    let mut remaining: HashMap<&str, &ObservedDisk> = observed
        .iter()
        .map(|d| (d.volume.id.as_str(), d))
        .collect();
    let mut batch = DiskBatch::default();

    for spec in desired {
        let matched = match (&spec.vm_volume_id, &spec.vm_volume) {
            (Some(volume_id), _) => remaining.remove(volume_id.as_str()),
            (None, Some(volume)) => {
                let found = observed
                    .iter()
                    .find(|d| d.volume.name == volume.name && remaining.contains_key(d.volume.id.as_str()));
                found.and_then(|d| remaining.remove(d.volume.id.as_str()))
            }
            (None, None) => {
                debug!("Disk at boot {} names no volume, ignoring", spec.boot);
                continue;
            }
        };

        match matched {
            Some(origin) => {
                if let Some(update) = disk_update(spec, origin)? {
                    debug!("Updating disk {} (volume {})", origin.id, origin.volume.name);
                    batch.update.push(update);
                }
            }
            None => batch.create.push(disk_create(spec)),
        }
    }

    batch.delete = observed
        .iter()
        .filter(|d| remaining.contains_key(d.volume.id.as_str()))
        .map(|d| IdRef::new(d.id.clone()))
        .collect();
    batch.sort_by_boot();
    Ok(batch)
}

fn disk_create(spec: &DiskSpec) -> DiskCreateInput {
    let vm_volume = match (&spec.vm_volume_id, &spec.vm_volume) {
        (Some(volume_id), _) => VolumeConnectInput {
            connect: Some(IdRef::new(volume_id.clone())),
            create: None,
        },
        (None, Some(volume)) => VolumeConnectInput {
            connect: None,
            create: Some(VolumeCreateInput {
                name: volume.name.clone(),
                path: String::new(),
                size: volume.size,
                elf_storage_policy: volume.storage_policy,
                mounting: true,
                sharing: false,
            }),
        },
        (None, None) => VolumeConnectInput::default(),
    };
    DiskCreateInput {
        boot: spec.boot,
        bus: spec.bus,
        disk_type: DiskType::Disk,
        elf_image: None,
        vm_volume: Some(vm_volume),
    }
}

fn disk_update(
    spec: &DiskSpec,
    origin: &ObservedDisk,
) -> Result<Option<DiskUpdateInput>, ReconcileError> {
    let volume = &origin.volume;
    let mut size = volume.size;
    let mut path = volume.path.clone();

    if let Some(requested) = &spec.vm_volume {
        if requested.name != volume.name {
            return Err(ReconcileError::ImmutableField {
                name: volume.name.clone(),
                field: "name",
            });
        }
        if requested.size < volume.size {
            return Err(ReconcileError::VolumeShrink {
                name: volume.name.clone(),
                current: volume.size,
                requested: requested.size,
            });
        }
        if requested.storage_policy != volume.storage_policy {
            return Err(ReconcileError::ImmutableField {
                name: volume.name.clone(),
                field: "storage policy",
            });
        }
        size = requested.size;
        if let Some(origin_path) = &requested.origin_path {
            path.clone_from(origin_path);
        }
    }

    let unchanged = spec.boot == origin.boot
        && spec.bus == origin.bus
        && size == volume.size
        && path == volume.path;
    if unchanged {
        return Ok(None);
    }

    Ok(Some(DiskUpdateInput {
        target: IdRef::new(origin.id.clone()),
        data: DiskUpdateData {
            boot: spec.boot,
            bus: spec.bus,
            disk_type: DiskType::Disk,
            key: origin.key,
            disabled: Some(origin.disabled),
            elf_image: None,
            vm_volume: Some(VolumeConnectInput {
                connect: None,
                create: Some(VolumeCreateInput {
                    name: volume.name.clone(),
                    path,
                    size,
                    elf_storage_policy: volume.storage_policy,
                    mounting: volume.mounting,
                    sharing: volume.sharing,
                }),
            }),
        },
    }))
}

/// Diffs desired CD-ROM drives against observed ones, matching by drive id.
#[must_use]
pub fn diff_cd_roms(desired: &[CdRomSpec], observed: &[ObservedCdRom]) -> DiskBatch {
    let mut remaining: HashMap<&str, &ObservedCdRom> =
        observed.iter().map(|c| (c.id.as_str(), c)).collect();
    let mut batch = DiskBatch::default();

    for spec in desired {
        let matched = spec.id.as_deref().and_then(|id| remaining.remove(id));
        match matched {
            Some(origin) => {
                let image = image_change(spec, origin);
                if spec.boot == origin.boot && image.is_none() {
                    continue;
                }
                debug!("Updating cd-rom {}", origin.id);
                batch.update.push(DiskUpdateInput {
                    target: IdRef::new(origin.id.clone()),
                    data: DiskUpdateData {
                        boot: spec.boot,
                        bus: origin.bus,
                        disk_type: DiskType::CdRom,
                        key: origin.key,
                        disabled: Some(origin.disabled),
                        elf_image: image,
                        vm_volume: None,
                    },
                });
            }
            None => batch.create.push(DiskCreateInput {
                boot: spec.boot,
                bus: Bus::Ide,
                disk_type: DiskType::CdRom,
                elf_image: spec
                    .requested_image()
                    .flatten()
                    .map(ConnectInput::connect),
                vm_volume: None,
            }),
        }
    }

    batch.delete = observed
        .iter()
        .filter(|c| remaining.contains_key(c.id.as_str()))
        .map(|c| IdRef::new(c.id.clone()))
        .collect();
    batch.sort_by_boot();
    batch
}

/// Image relation change for a matched drive; `None` keeps the current one.
fn image_change(spec: &CdRomSpec, origin: &ObservedCdRom) -> Option<ConnectInput> {
    match spec.requested_image()? {
        None if origin.iso_id.is_some() => Some(ConnectInput::disconnect()),
        None => None,
        Some(iso) if origin.iso_id.as_deref() == Some(iso) => None,
        Some(iso) => Some(ConnectInput::connect(iso)),
    }
}

/// Diffs desired NICs against observed ones, matching by NIC id.
///
/// NIC order is preserved as declared; NICs carry no boot order.
#[must_use]
pub fn diff_nics(desired: &[NicSpec], observed: &[VmNic]) -> NicBatch {
    let mut remaining: HashMap<&str, &VmNic> =
        observed.iter().map(|n| (n.id.as_str(), n)).collect();
    let mut batch = NicBatch::default();

    for spec in desired {
        let matched = spec.id.as_deref().and_then(|id| remaining.remove(id));
        let static_ip = spec.static_ip();
        let ip_type = static_ip.as_ref().map(|_| String::from(STATIC_IP_TYPE));

        match matched {
            Some(origin) => {
                if nic_matches(spec, static_ip.as_ref(), origin) {
                    continue;
                }
                debug!("Updating nic {}", origin.id);
                batch.update.push(NicUpdateInput {
                    target: IdRef::new(origin.id.clone()),
                    data: NicUpdateData {
                        vlan: ConnectInput::connect(spec.vlan_id.clone()),
                        enabled: spec.enabled,
                        mirror: spec.mirror,
                        model: spec.model,
                        static_ip,
                        ip_type,
                    },
                });
            }
            None => batch.create.push(NicCreateInput {
                vlan: ConnectInput::connect(spec.vlan_id.clone()),
                enabled: spec.enabled,
                mirror: spec.mirror,
                model: spec.model,
                mac_address: spec.mac_address.clone(),
                static_ip,
                ip_type,
            }),
        }
    }

    batch.delete = observed
        .iter()
        .filter(|n| remaining.contains_key(n.id.as_str()))
        .map(|n| IdRef::new(n.id.clone()))
        .collect();
    batch
}

fn nic_matches(spec: &NicSpec, static_ip: Option<&StaticIp>, origin: &VmNic) -> bool {
    let same_address = static_ip.is_none_or(|ip| {
        origin.ip_address.as_deref() == Some(ip.ip_address.as_str())
            && origin.subnet_mask.as_deref() == Some(ip.subnet_mask.as_str())
            && origin.gateway.as_deref() == Some(ip.gateway.as_str())
    });
    origin.vlan.as_ref().map(|v| v.id.as_str()) == Some(spec.vlan_id.as_str())
        && origin.enabled == spec.enabled
        && origin.mirror == spec.mirror
        && origin.model == spec.model
        && same_address
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VolumeSpec;
    use crate::tower::{NicModel, ObservedVolume, StoragePolicy};

    fn observed_disk(id: &str, volume_id: &str, name: &str, boot: u32, size: u64) -> ObservedDisk {
        ObservedDisk {
            id: id.to_string(),
            boot,
            bus: Bus::Virtio,
            key: Some(1),
            disabled: false,
            volume: ObservedVolume {
                id: volume_id.to_string(),
                name: name.to_string(),
                size,
                storage_policy: StoragePolicy::new(2, true),
                path: format!("/zbs/{volume_id}"),
                mounting: true,
                sharing: false,
            },
        }
    }

    fn attach(volume_id: &str, boot: u32) -> DiskSpec {
        DiskSpec {
            boot,
            bus: Bus::Virtio,
            vm_volume_id: Some(volume_id.to_string()),
            vm_volume: None,
        }
    }

    fn volume(name: &str, size: u64) -> VolumeSpec {
        VolumeSpec {
            name: name.to_string(),
            size,
            storage_policy: StoragePolicy::new(2, true),
            origin_path: None,
        }
    }

    fn cd_rom(id: Option<&str>, boot: u32, iso: Option<Option<&str>>) -> CdRomSpec {
        CdRomSpec {
            id: id.map(String::from),
            boot,
            iso_id: iso.map(|i| i.map(String::from)),
        }
    }

    fn observed_cd_rom(id: &str, boot: u32, iso: Option<&str>) -> ObservedCdRom {
        ObservedCdRom {
            id: id.to_string(),
            boot,
            bus: Bus::Ide,
            key: Some(3),
            disabled: false,
            iso_id: iso.map(String::from),
        }
    }

    fn nic(id: Option<&str>, vlan: &str) -> NicSpec {
        NicSpec {
            id: id.map(String::from),
            vlan_id: vlan.to_string(),
            enabled: true,
            mirror: false,
            model: NicModel::Virtio,
            mac_address: None,
            ip_address: None,
            subnet_mask: None,
            gateway: None,
        }
    }

    fn observed_nic(id: &str, vlan: &str) -> VmNic {
        VmNic {
            id: id.to_string(),
            vlan: Some(IdRef::new(vlan)),
            enabled: true,
            mirror: false,
            model: NicModel::Virtio,
            mac_address: Some(String::from("52:54:00:00:00:01")),
            ip_address: None,
            subnet_mask: None,
            gateway: None,
            order: Some(0),
        }
    }

    #[test]
    fn test_matching_disks_produce_empty_batch() {
        let observed = vec![observed_disk("d1", "v1", "root", 0, 10)];
        let desired = vec![attach("v1", 0)];

        let batch = diff_disks(&desired, &observed).expect("valid diff");

        assert!(batch.is_empty());
    }

    #[test]
    fn test_disk_diff_is_complete() {
        let observed = vec![
            observed_disk("d1", "v1", "root", 0, 10),
            observed_disk("d2", "v2", "data", 1, 20),
            observed_disk("d3", "v3", "logs", 2, 30),
        ];
        let desired = vec![
            attach("v1", 0),
            attach("v2", 3),
            attach("v9", 4),
            DiskSpec {
                boot: 5,
                bus: Bus::Scsi,
                vm_volume_id: None,
                vm_volume: Some(volume("scratch", 40)),
            },
        ];

        let batch = diff_disks(&desired, &observed).expect("valid diff");

        assert_eq!(batch.create.len(), 2);
        assert_eq!(batch.update.len(), 1);
        assert_eq!(batch.update[0].target.id, "d2");
        assert_eq!(batch.delete, vec![IdRef::new("d3")]);
        let created = batch.create[1].vm_volume.as_ref().and_then(|v| v.create.as_ref());
        assert_eq!(created.map(|v| v.name.as_str()), Some("scratch"));
        assert_eq!(created.map(|v| v.mounting), Some(true));
    }

    #[test]
    fn test_creates_are_stable_by_boot() {
        let desired = vec![attach("a", 2), attach("b", 1), attach("c", 1), attach("d", 0)];

        let batch = diff_disks(&desired, &[]).expect("valid diff");

        let order: Vec<&str> = batch
            .create
            .iter()
            .filter_map(|c| c.vm_volume.as_ref())
            .filter_map(|v| v.connect.as_ref())
            .map(|r| r.id.as_str())
            .collect();
        assert_eq!(order, vec!["d", "b", "c", "a"]);
    }

    #[test]
    fn test_volume_cannot_shrink() {
        let observed = vec![observed_disk("d1", "v1", "root", 0, 100)];
        let desired = vec![DiskSpec {
            vm_volume: Some(volume("root", 50)),
            ..attach("v1", 0)
        }];

        let err = diff_disks(&desired, &observed).expect_err("shrink is rejected");

        assert!(matches!(err, ReconcileError::VolumeShrink { current: 100, requested: 50, .. }));
    }

    #[test]
    fn test_mounted_volume_name_is_immutable() {
        let observed = vec![observed_disk("d1", "v1", "root", 0, 100)];
        let desired = vec![DiskSpec {
            vm_volume: Some(volume("renamed", 100)),
            ..attach("v1", 0)
        }];

        let err = diff_disks(&desired, &observed).expect_err("rename is rejected");

        assert_eq!(err.to_string(), "mounted disk root's name can not be changed");
    }

    #[test]
    fn test_growing_volume_preserves_origin_fields() {
        let observed = vec![observed_disk("d1", "v1", "root", 0, 100)];
        let desired = vec![DiskSpec {
            vm_volume: Some(volume("root", 200)),
            ..attach("v1", 0)
        }];

        let batch = diff_disks(&desired, &observed).expect("growth is allowed");

        let update = &batch.update[0];
        assert_eq!(update.data.key, Some(1));
        let redefined = update
            .data
            .vm_volume
            .as_ref()
            .and_then(|v| v.create.as_ref())
            .expect("volume redefinition");
        assert_eq!(redefined.size, 200);
        assert_eq!(redefined.path, "/zbs/v1");
        assert_eq!(redefined.elf_storage_policy, StoragePolicy::new(2, true));
    }

    #[test]
    fn test_defined_volume_matches_by_name_on_reapply() {
        let observed = vec![observed_disk("d1", "v1", "scratch", 5, 40)];
        let desired = vec![DiskSpec {
            boot: 5,
            bus: Bus::Virtio,
            vm_volume_id: None,
            vm_volume: Some(volume("scratch", 40)),
        }];

        let batch = diff_disks(&desired, &observed).expect("valid diff");

        assert!(batch.is_empty());
    }

    #[test]
    fn test_disk_without_volume_is_ignored() {
        let desired = vec![DiskSpec {
            boot: 0,
            bus: Bus::Virtio,
            vm_volume_id: None,
            vm_volume: None,
        }];

        let batch = diff_disks(&desired, &[]).expect("valid diff");

        assert!(batch.is_empty());
    }

    #[test]
    fn test_unmatched_cd_rom_is_replaced() {
        let observed = vec![observed_cd_rom("cd1", 1, Some("iso1"))];
        let desired = vec![cd_rom(None, 1, Some(None))];

        let batch = diff_cd_roms(&desired, &observed);

        assert_eq!(batch.create.len(), 1);
        assert!(batch.create[0].elf_image.is_none());
        assert!(batch.update.is_empty());
        assert_eq!(batch.delete, vec![IdRef::new("cd1")]);
    }

    #[test]
    fn test_cd_rom_image_presence() {
        let observed = vec![
            observed_cd_rom("cd1", 1, Some("iso1")),
            observed_cd_rom("cd2", 2, Some("iso2")),
            observed_cd_rom("cd3", 3, None),
        ];
        let desired = vec![
            cd_rom(Some("cd1"), 1, None),
            cd_rom(Some("cd2"), 2, Some(None)),
            cd_rom(Some("cd3"), 3, Some(Some("iso3"))),
        ];

        let batch = diff_cd_roms(&desired, &observed);

        assert!(batch.create.is_empty());
        assert!(batch.delete.is_empty());
        assert_eq!(batch.update.len(), 2);
        assert_eq!(batch.update[0].target.id, "cd2");
        assert_eq!(batch.update[0].data.elf_image, Some(ConnectInput::disconnect()));
        assert_eq!(batch.update[1].target.id, "cd3");
        assert_eq!(batch.update[1].data.elf_image, Some(ConnectInput::connect("iso3")));
    }

    #[test]
    fn test_matching_cd_roms_produce_empty_batch() {
        let observed = vec![observed_cd_rom("cd1", 1, Some("iso1"))];
        let desired = vec![cd_rom(Some("cd1"), 1, Some(Some("iso1")))];

        assert!(diff_cd_roms(&desired, &observed).is_empty());
    }

    #[test]
    fn test_new_nic_is_created() {
        let batch = diff_nics(&[nic(None, "vlan-a")], &[]);

        assert_eq!(batch.create.len(), 1);
        assert!(batch.update.is_empty());
        assert!(batch.delete.is_empty());
        assert_eq!(batch.create[0].vlan, ConnectInput::connect("vlan-a"));
        assert!(!batch.requires_vm_tools());
    }

    #[test]
    fn test_nic_diff_update_and_delete() {
        let observed = vec![observed_nic("n1", "vlan-a"), observed_nic("n2", "vlan-b")];
        let desired = vec![nic(Some("n1"), "vlan-a"), nic(Some("n2"), "vlan-c")];

        let batch = diff_nics(&desired, &observed);
        assert_eq!(batch.update.len(), 1);
        assert_eq!(batch.update[0].target.id, "n2");

        let batch = diff_nics(&desired[..1], &observed);
        assert!(batch.update.is_empty());
        assert_eq!(batch.delete, vec![IdRef::new("n2")]);
    }

    #[test]
    fn test_static_ip_needs_vm_tools() {
        let desired = vec![NicSpec {
            ip_address: Some(String::from("10.0.0.5")),
            subnet_mask: Some(String::from("255.255.255.0")),
            gateway: Some(String::from("10.0.0.1")),
            ..nic(Some("n1"), "vlan-a")
        }];

        let batch = diff_nics(&desired, &[observed_nic("n1", "vlan-a")]);

        assert!(batch.requires_vm_tools());
        assert_eq!(batch.update[0].data.ip_type.as_deref(), Some("STATIC"));
    }

    #[test]
    fn test_merged_drive_batch_sorts_across_kinds() {
        let disks = diff_disks(&[attach("v1", 2)], &[]).expect("valid diff");
        let cd_roms = diff_cd_roms(&[cd_rom(None, 1, None)], &[]);

        let mut merged = disks.merge(cd_roms);
        merged.sort_by_boot();

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.create[0].disk_type, DiskType::CdRom);
        assert_eq!(merged.create[1].disk_type, DiskType::Disk);
    }
}
