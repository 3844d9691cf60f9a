//! Configuration module for the VM reconciliation engine.
//!
//! This module handles all configuration-related functionality:
//! - Parsing and deserializing `towerctl.yaml`
//! - Validation of configuration values
//! - Computing configuration hashes for change detection

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::ConfigHasher;
pub use parser::{find_config_file, ConfigParser, ENV_ENDPOINT, ENV_STATE_DIR, ENV_VM_ID};
pub use spec::{
    AssignedIds, CdRomSpec, DiskSpec, GuestOsAccount, NicSpec, ReconcileConfig, StateConfig,
    TowerConfig, VmSpec, VolumeSpec, DEFAULT_STATE_DIR, DEFAULT_TOKEN_ENV,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
