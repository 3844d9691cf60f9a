//! Reading the current state of a VM and its sub-resources.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ApiError, Result};
use crate::retry::{retry, RetryOptions};

use super::api::ControlPlane;
use super::storage_policy::StoragePolicyCache;
use super::types::{Bus, DiskType, StoragePolicy, Vm, VmDisk, VmNic, VmStatus};

/// Observed volume backing a disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedVolume {
    /// Volume id.
    pub id: String,
    /// Volume name.
    pub name: String,
    /// Size in bytes.
    pub size: u64,
    /// Storage policy.
    pub storage_policy: StoragePolicy,
    /// Datastore path.
    pub path: String,
    /// Mounted flag.
    pub mounting: bool,
    /// Shared flag.
    pub sharing: bool,
}

/// Observed disk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedDisk {
    /// Disk id.
    pub id: String,
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Device key.
    pub key: Option<i32>,
    /// Disabled flag.
    pub disabled: bool,
    /// Backing volume.
    pub volume: ObservedVolume,
}

/// Observed CD-ROM drive.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObservedCdRom {
    /// Drive id.
    pub id: String,
    /// Boot order.
    pub boot: u32,
    /// Bus.
    pub bus: Bus,
    /// Device key.
    pub key: Option<i32>,
    /// Disabled flag.
    pub disabled: bool,
    /// Mounted image.
    pub iso_id: Option<String>,
}

/// Snapshot of a VM and its sub-resources.
#[derive(Debug, Clone, Serialize)]
pub struct ObservedVm {
    /// The VM itself.
    pub vm: Vm,
    /// Disks with their volumes.
    pub disks: Vec<ObservedDisk>,
    /// CD-ROM drives.
    pub cd_roms: Vec<ObservedCdRom>,
    /// NICs.
    pub nics: Vec<VmNic>,
}

impl ObservedVm {
    /// Returns the observed status.
    #[must_use]
    pub const fn status(&self) -> VmStatus {
        self.vm.status
    }
}

/// Reads VMs from the control plane.
#[derive(Clone)]
pub struct VmObserver {
    api: Arc<dyn ControlPlane>,
    policies: Arc<StoragePolicyCache>,
    retry: RetryOptions,
}

impl VmObserver {
    /// Creates an observer sharing `policies` with other components.
    #[must_use]
    pub fn new(
        api: Arc<dyn ControlPlane>,
        policies: Arc<StoragePolicyCache>,
        retry: RetryOptions,
    ) -> Self {
        Self {
            api,
            policies,
            retry,
        }
    }

    /// Reads a VM.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the VM does not exist.
    pub async fn fetch_vm(&self, ctx: &Context, vm_id: &str) -> Result<Vm> {
        fetch_vm(ctx, &self.api, &self.retry, vm_id).await
    }

    /// Reads a VM with all of its disks, CD-ROMs and NICs.
    ///
    /// # Errors
    ///
    /// Returns an error if any read fails or a volume's storage policy
    /// cannot be resolved.
    pub async fn observe(&self, ctx: &Context, vm_id: &str) -> Result<ObservedVm> {
        let vm = self.fetch_vm(ctx, vm_id).await?;
        let drives = retry(ctx, &self.retry, || self.api.list_vm_disks(vm_id)).await?;
        let nics = retry(ctx, &self.retry, || self.api.list_vm_nics(vm_id)).await?;

        let mut disks = Vec::new();
        let mut cd_roms = Vec::new();
        for drive in drives {
            match drive.disk_type {
                DiskType::CdRom => cd_roms.push(observe_cd_rom(drive)),
                DiskType::Disk => {
                    if let Some(disk) = self.observe_disk(ctx, drive).await? {
                        disks.push(disk);
                    }
                }
            }
        }

        debug!(
            "Observed vm {vm_id}: {} disk(s), {} cd-rom(s), {} nic(s)",
            disks.len(),
            cd_roms.len(),
            nics.len()
        );
        Ok(ObservedVm {
            vm,
            disks,
            cd_roms,
            nics,
        })
    }

    async fn observe_disk(&self, ctx: &Context, drive: VmDisk) -> Result<Option<ObservedDisk>> {
        let Some(volume) = drive.vm_volume else {
            warn!("Disk {} has no volume, skipping", drive.id);
            return Ok(None);
        };

        let storage_policy = match (volume.elf_storage_policy, &volume.storage_policy_uuid) {
            (Some(policy), _) => policy,
            (None, Some(local_id)) => self.policies.get(ctx, &self.api, local_id).await?,
            (None, None) => {
                return Err(ApiError::invalid_response(
                    "get-vm-disks",
                    format!("volume {} reports no storage policy", volume.id),
                )
                .into());
            }
        };

        Ok(Some(ObservedDisk {
            id: drive.id,
            boot: drive.boot,
            bus: drive.bus,
            key: drive.key,
            disabled: drive.disabled,
            volume: ObservedVolume {
                id: volume.id,
                name: volume.name,
                size: volume.size,
                storage_policy,
                path: volume.path,
                mounting: volume.mounting,
                sharing: volume.sharing,
            },
        }))
    }
}

impl std::fmt::Debug for VmObserver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VmObserver")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// Reads a VM through the retry policy.
///
/// # Errors
///
/// Returns [`ApiError::NotFound`] if the VM does not exist.
pub async fn fetch_vm(
    ctx: &Context,
    api: &Arc<dyn ControlPlane>,
    options: &RetryOptions,
    vm_id: &str,
) -> Result<Vm> {
    retry(ctx, options, || api.get_vm(vm_id))
        .await?
        .ok_or_else(|| {
            ApiError::NotFound {
                kind: "vm",
                id: vm_id.to_string(),
            }
            .into()
        })
}

fn observe_cd_rom(drive: VmDisk) -> ObservedCdRom {
    ObservedCdRom {
        id: drive.id,
        boot: drive.boot,
        bus: drive.bus,
        key: drive.key,
        disabled: drive.disabled,
        iso_id: drive.elf_image.map(|image| image.id),
    }
}
