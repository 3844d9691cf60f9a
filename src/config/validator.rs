//! Configuration validation for VM specs.
//!
//! Validation is purely local: every field-level problem is collected with
//! its field path before anything talks to the control plane.

use crate::error::{ConfigError, Result, TowerError};
use std::collections::HashMap;
use std::net::Ipv4Addr;
use tracing::debug;

use super::spec::{NicSpec, ReconcileConfig, TowerConfig, VmSpec};

/// Validator for reconciliation configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a configuration.
    ///
    /// # Errors
    ///
    /// Returns the single validation error, or an aggregate of all of them.
    pub fn validate(&self, config: &ReconcileConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if result.errors.is_empty() {
            debug!("Configuration validation passed");
            return Ok(result);
        }

        let errors = result
            .errors
            .into_iter()
            .map(|e| TowerError::Config(ConfigError::validation(e.message, e.field)))
            .collect();
        Err(TowerError::from_collected(errors)
            .unwrap_or_else(|| TowerError::internal("validation failed without errors")))
    }

    /// Runs every check without failing.
    #[must_use]
    pub fn check(&self, config: &ReconcileConfig) -> ValidationResult {
        let mut result = ValidationResult::default();
        Self::validate_tower(&config.tower, &mut result);
        Self::validate_vm(&config.vm, &mut result);
        result
    }

    fn validate_tower(tower: &TowerConfig, result: &mut ValidationResult) {
        if !(tower.endpoint.starts_with("http://") || tower.endpoint.starts_with("https://")) {
            result.error("tower.endpoint", "must be an http:// or https:// URL");
        }
        if tower.token_env.is_empty() {
            result.error("tower.token_env", "cannot be empty");
        }
        if tower.request_timeout_secs == 0 {
            result.error("tower.request_timeout_secs", "must be positive");
        }
        if tower.poll_interval_secs == 0 {
            result.error("tower.poll_interval_secs", "must be positive");
        }
        if tower.max_retries == 0 {
            result.error("tower.max_retries", "must be at least 1");
        }
    }

    fn validate_vm(vm: &VmSpec, result: &mut ValidationResult) {
        match vm.id.as_deref() {
            Some("") => result.error("vm.id", "cannot be empty"),
            Some(_) => {}
            None if vm.name.as_deref().is_none_or(str::is_empty) => {
                result.error("vm.id", "either vm.id or vm.name must be set");
            }
            None if vm.cluster_id.is_none() => result.warnings.push(String::from(
                "vm.cluster_id: not set, the vm cannot be created unless state records it",
            )),
            None => {}
        }
        if vm.cluster_id.as_ref().is_some_and(String::is_empty) {
            result.error("vm.cluster_id", "cannot be empty");
        }
        if vm.name.as_ref().is_some_and(String::is_empty) {
            result.error("vm.name", "cannot be empty");
        }
        if vm.memory == Some(0) {
            result.error("vm.memory", "must be positive");
        }

        Self::validate_cpu(vm, result);

        if let Some(servers) = &vm.dns_servers {
            for (i, server) in servers.iter().enumerate() {
                if server.trim().is_empty() {
                    result.error(format!("vm.dns_servers[{i}]"), "cannot be empty");
                }
            }
        }
        if vm
            .guest_os_account
            .as_ref()
            .is_some_and(|a| a.username.is_empty())
        {
            result.error("vm.guest_os_account.username", "cannot be empty");
        }

        let mut boots: HashMap<u32, Vec<String>> = HashMap::new();
        for (i, disk) in vm.disks.iter().flatten().enumerate() {
            let field = format!("vm.disks[{i}]");
            if disk.vm_volume_id.is_none() && disk.vm_volume.is_none() {
                result
                    .warnings
                    .push(format!("{field}: neither vm_volume_id nor vm_volume is set, ignored"));
            }
            if disk.vm_volume_id.as_ref().is_some_and(String::is_empty) {
                result.error(format!("{field}.vm_volume_id"), "cannot be empty");
            }
            if let Some(volume) = &disk.vm_volume {
                if volume.name.is_empty() {
                    result.error(format!("{field}.vm_volume.name"), "cannot be empty");
                }
                if volume.size == 0 {
                    result.error(format!("{field}.vm_volume.size"), "must be positive");
                }
            }
            boots.entry(disk.boot).or_default().push(field);
        }
        for (i, cd_rom) in vm.cd_roms.iter().flatten().enumerate() {
            boots.entry(cd_rom.boot).or_default().push(format!("vm.cd_roms[{i}]"));
        }
        let mut shared: Vec<_> = boots.into_iter().filter(|(_, f)| f.len() > 1).collect();
        shared.sort_by_key(|(boot, _)| *boot);
        for (boot, fields) in shared {
            result
                .warnings
                .push(format!("boot order {boot} is shared by {}", fields.join(", ")));
        }

        for (i, nic) in vm.nics.iter().flatten().enumerate() {
            Self::validate_nic(&format!("vm.nics[{i}]"), nic, result);
        }
    }

    fn validate_cpu(vm: &VmSpec, result: &mut ValidationResult) {
        for (field, value) in [
            ("vm.vcpu", vm.vcpu),
            ("vm.cpu_cores", vm.cpu_cores),
            ("vm.cpu_sockets", vm.cpu_sockets),
        ] {
            if value == Some(0) {
                result.error(field, "must be positive");
            }
        }

        match (vm.vcpu, vm.cpu_cores, vm.cpu_sockets) {
            (Some(vcpu), None, Some(sockets)) if sockets > 0 && vcpu % sockets != 0 => {
                result.error("vm.vcpu", "vcpu must be divisible by number of cpu sockets");
            }
            (Some(vcpu), Some(cores), None) if cores > 0 && vcpu % cores != 0 => {
                result.error("vm.vcpu", "vcpu must be divisible by number of cpu cores");
            }
            (Some(vcpu), Some(cores), Some(sockets)) if vcpu != cores.saturating_mul(sockets) => {
                result.warnings.push(format!(
                    "vm.vcpu: {vcpu} differs from cpu_cores x cpu_sockets ({})",
                    cores.saturating_mul(sockets)
                ));
            }
            _ => {}
        }
    }

    fn validate_nic(field: &str, nic: &NicSpec, result: &mut ValidationResult) {
        if nic.vlan_id.is_empty() {
            result.error(format!("{field}.vlan_id"), "cannot be empty");
        }

        if nic.has_static_addressing() && nic.static_ip().is_none() {
            result.error(
                field,
                "ip_address, subnet_mask and gateway must be set together",
            );
        }
        for (name, value) in [
            ("ip_address", &nic.ip_address),
            ("subnet_mask", &nic.subnet_mask),
            ("gateway", &nic.gateway),
        ] {
            if let Some(value) = value {
                if value.parse::<Ipv4Addr>().is_err() {
                    result.error(format!("{field}.{name}"), format!("'{value}' is not an IPv4 address"));
                }
            }
        }
    }
}

impl ValidationResult {
    fn error(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            field: field.into(),
            message: message.into(),
        });
    }

    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigParser;

    fn config(vm: &str) -> ReconcileConfig {
        let yaml = format!("tower: {{ endpoint: http://tower.local }}\nvm:\n{vm}");
        ConfigParser::new().parse_yaml(&yaml, None).expect("valid yaml")
    }

    #[test]
    fn test_valid_config() {
        let result = ConfigValidator::new()
            .validate(&config("  id: vm-1\n  vcpu: 4\n  cpu_sockets: 2\n"))
            .expect("valid config");

        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_all_errors_are_collected() {
        let config = config(
            r"  id: ''
  vcpu: 6
  cpu_sockets: 4
  nics:
    - { vlan_id: vlan-a, ip_address: 10.0.0.5 }
  dns_servers: ['']
",
        );

        let result = ConfigValidator::new().check(&config);
        let fields: Vec<&str> = result.errors.iter().map(|e| e.field.as_str()).collect();

        assert_eq!(
            fields,
            vec!["vm.id", "vm.vcpu", "vm.dns_servers[0]", "vm.nics[0]"]
        );
        let err = ConfigValidator::new().validate(&config).expect_err("invalid");
        assert!(matches!(err, TowerError::Aggregate(ref errors) if errors.len() == 4));
    }

    #[test]
    fn test_bad_address_is_reported_with_path() {
        let config = config(
            "  id: vm-1\n  nics:\n    - { vlan_id: v, ip_address: 10.0.0.300, subnet_mask: 255.255.255.0, gateway: 10.0.0.1 }\n",
        );

        let result = ConfigValidator::new().check(&config);

        assert_eq!(result.error_count(), 1);
        assert_eq!(result.errors[0].field, "vm.nics[0].ip_address");
    }

    #[test]
    fn test_shared_boot_order_warns() {
        let config = config(
            "  id: vm-1\n  disks: [{ boot: 1, vm_volume_id: v1 }]\n  cd_roms: [{ boot: 1 }]\n",
        );

        let result = ConfigValidator::new().check(&config);

        assert!(result.is_valid());
        assert_eq!(
            result.warnings,
            vec![String::from("boot order 1 is shared by vm.disks[0], vm.cd_roms[0]")]
        );
    }

    #[test]
    fn test_id_or_name_is_required() {
        let result = ConfigValidator::new().check(&config("  vcpu: 2\n"));
        assert_eq!(result.errors[0].field, "vm.id");

        let result = ConfigValidator::new().check(&config("  name: web-1\n"));
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);

        let result = ConfigValidator::new().check(&config("  name: web-1\n  cluster_id: c1\n"));
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 0);
    }

    #[test]
    fn test_bad_endpoint() {
        let mut config = config("  id: vm-1\n");
        config.tower.endpoint = String::from("tower.local");

        let err = ConfigValidator::new().validate(&config).expect_err("invalid");

        assert!(err.to_string().contains("http://"));
    }
}
