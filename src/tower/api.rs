//! The control-plane seam.
//!
//! Everything above this trait (task tracking, observation, power
//! transitions, reconciliation) talks to CloudTower only through
//! [`ControlPlane`], so it can be exercised against a mock.

use async_trait::async_trait;

use crate::error::Result;

use super::power::PowerOperation;
use super::types::{
    ElfImage, IdRef, StoragePolicyRecord, Task, TaskFilter, Vlan, Vm, VmCreateInput, VmDisk,
    VmNic, VmUpdateEffect, VmUpdateInput, WithTask,
};

/// Remote virtualization control plane.
///
/// Implementations perform exactly one request per call; retries and
/// cancellation are layered on top by the callers.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ControlPlane: Send + Sync {
    /// Queries tasks matching `filter`.
    async fn query_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>>;

    /// Reads a VM by id.
    async fn get_vm(&self, vm_id: &str) -> Result<Option<Vm>>;

    /// Lists every drive (disks and CD-ROMs) attached to a VM.
    async fn list_vm_disks(&self, vm_id: &str) -> Result<Vec<VmDisk>>;

    /// Lists the NICs of a VM.
    async fn list_vm_nics(&self, vm_id: &str) -> Result<Vec<VmNic>>;

    /// Lists all storage policies.
    async fn list_storage_policies(&self) -> Result<Vec<StoragePolicyRecord>>;

    /// Looks up a VLAN by id.
    async fn get_vlan(&self, vlan_id: &str) -> Result<Option<Vlan>>;

    /// Looks up an ISO image by id.
    async fn get_iso(&self, iso_id: &str) -> Result<Option<ElfImage>>;

    /// Submits a power operation.
    async fn power(&self, vm_id: &str, operation: &PowerOperation) -> Result<Vec<WithTask<Vm>>>;

    /// Creates a blank VM with its drives and NICs.
    async fn create_vm(&self, input: &VmCreateInput) -> Result<Vec<WithTask<Vm>>>;

    /// Deletes a VM and the volumes only it uses.
    async fn delete_vm(&self, vm_id: &str) -> Result<Vec<WithTask<IdRef>>>;

    /// Submits the `updateVm` mutation. Its task is not returned and has to
    /// be located by resource id.
    async fn update_vm(
        &self,
        vm_id: &str,
        data: &VmUpdateInput,
        effect: &VmUpdateEffect,
    ) -> Result<()>;
}
