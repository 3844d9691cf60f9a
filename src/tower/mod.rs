//! CloudTower integration module.
//!
//! This module provides everything that talks to the control plane: the
//! API seam and its HTTP client, task tracking, power transitions, state
//! observation, reference checks and guest-agent attributes.

mod api;
mod client;
mod observer;
mod power;
mod resolver;
mod storage_policy;
mod tasks;
mod types;
mod vm_tools;

pub use api::ControlPlane;
#[cfg(test)]
pub use api::MockControlPlane;
pub use client::TowerClient;
pub use observer::{fetch_vm, ObservedCdRom, ObservedDisk, ObservedVm, ObservedVolume, VmObserver};
pub use power::{select_operation, PowerController, PowerOperation};
pub use resolver::ReferenceResolver;
pub use storage_policy::StoragePolicyCache;
pub use tasks::{TaskTracker, DEFAULT_POLL_INTERVAL, DEFAULT_UNREPORTED_POLLS, UPDATE_VM_MUTATION};
pub use types::{
    task_ids, Bus, ConnectInput, CpuTopology, DiskCreateInput, DiskType, DiskUpdateData,
    DiskUpdateInput, ElfImage, Firmware, IdRef, MountCdRomInput, MountDiskInput,
    MountNewDiskInput, NewVolumeInput, NicCreateInput, NicModel, NicUpdateData, NicUpdateInput,
    PowerState, StaticIp, StoragePolicy, StoragePolicyRecord, Task, TaskFilter, TaskStatus, Vlan,
    Vm, VmCreateDisks, VmCreateInput, VmCreateNic, VmDisk, VmDiskChanges, VmNic, VmNicChanges,
    VmStatus, VmToolsStatus, VmUpdateEffect, VmUpdateInput, VmVolume, VolumeConnectInput,
    VolumeCreateInput, WithTask,
};
pub use vm_tools::{PowerRestore, VmToolsConfigurer, VmToolsUpdate, VM_TOOLS_TIMEOUT};
