//! Configuration parser for loading and merging configuration files.
//!
//! This module handles loading configuration from YAML files and environment
//! variables, with proper precedence and error handling.

use crate::error::{ConfigError, Result, TowerError};
use std::path::Path;
use tracing::{debug, info};

use super::spec::ReconcileConfig;

/// Overrides `tower.endpoint`.
pub const ENV_ENDPOINT: &str = "TOWER_ENDPOINT";

/// Overrides `vm.id`.
pub const ENV_VM_ID: &str = "TOWER_VM_ID";

/// Overrides `state.dir`.
pub const ENV_STATE_DIR: &str = "TOWER_STATE_DIR";

/// Configuration parser for loading reconciliation configuration.
#[derive(Debug, Default)]
pub struct ConfigParser {
    /// Base path for resolving relative paths.
    base_path: Option<std::path::PathBuf>,
}

impl ConfigParser {
    /// Creates a new configuration parser.
    #[must_use]
    pub const fn new() -> Self {
        Self { base_path: None }
    }

    /// Sets the base path for resolving relative paths.
    #[must_use]
    pub fn with_base_path(mut self, path: impl Into<std::path::PathBuf>) -> Self {
        self.base_path = Some(path.into());
        self
    }

    /// Loads configuration from a YAML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_file(&self, path: impl AsRef<Path>) -> Result<ReconcileConfig> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        if !path.exists() {
            return Err(TowerError::Config(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            }));
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            TowerError::Config(ConfigError::ParseError {
                message: format!("Failed to read file: {e}"),
                location: Some(path.display().to_string()),
            })
        })?;

        self.parse_yaml(&content, Some(path))
    }

    /// Parses configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid.
    pub fn parse_yaml(&self, content: &str, source: Option<&Path>) -> Result<ReconcileConfig> {
        debug!("Parsing YAML configuration");

        let config: ReconcileConfig = serde_yaml::from_str(content).map_err(|e| {
            let location = source.map(|p| p.display().to_string());
            TowerError::Config(ConfigError::ParseError {
                message: format!("YAML parse error: {e}"),
                location,
            })
        })?;

        debug!(
            "Successfully parsed configuration for vm: {}",
            config.vm.state_key().unwrap_or("<unnamed>")
        );
        Ok(config)
    }

    /// Loads configuration with environment variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load_with_env(&self, path: impl AsRef<Path>) -> Result<ReconcileConfig> {
        let mut config = self.load_file(path)?;
        Self::apply_env_overrides(&mut config, |name| std::env::var(name).ok());
        Ok(config)
    }

    /// Applies environment overrides read through `lookup`.
    pub fn apply_env_overrides<F>(config: &mut ReconcileConfig, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(endpoint) = lookup(ENV_ENDPOINT) {
            debug!("Overriding tower.endpoint from environment");
            config.tower.endpoint = endpoint;
        }

        if let Some(vm_id) = lookup(ENV_VM_ID) {
            debug!("Overriding vm.id from environment");
            config.vm.id = Some(vm_id);
        }

        if let Some(dir) = lookup(ENV_STATE_DIR) {
            debug!("Overriding state.dir from environment");
            config.state.dir = Some(dir);
        }
    }

    /// Loads the .env file if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the .env file exists but cannot be loaded.
    pub fn load_dotenv(&self) -> Result<()> {
        let env_path = self
            .base_path
            .as_ref()
            .map_or_else(|| std::path::PathBuf::from(".env"), |p| p.join(".env"));

        if env_path.exists() {
            info!("Loading environment from: {}", env_path.display());
            dotenvy::from_path(&env_path).map_err(|e| {
                TowerError::Config(ConfigError::ParseError {
                    message: format!("Failed to load .env file: {e}"),
                    location: Some(env_path.display().to_string()),
                })
            })?;
        } else {
            debug!(".env file not found at: {}", env_path.display());
        }

        Ok(())
    }

    /// Reads the API token from the variable named by `tower.token_env`.
    ///
    /// # Errors
    ///
    /// Returns an error if the variable is unset or empty.
    pub fn api_token(config: &ReconcileConfig) -> Result<String> {
        let name = &config.tower.token_env;
        std::env::var(name)
            .ok()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| TowerError::Config(ConfigError::MissingEnvVar { name: name.clone() }))
    }
}

/// Default configuration file names to search for.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["towerctl.yaml", "towerctl.yml", "vm.yaml", "vm.yml"];

/// Finds the configuration file in the current directory or parent directories.
///
/// # Errors
///
/// Returns an error if no configuration file is found.
pub fn find_config_file(start_dir: impl AsRef<Path>) -> Result<std::path::PathBuf> {
    let start = start_dir.as_ref();
    let mut current = start.to_path_buf();

    loop {
        for filename in DEFAULT_CONFIG_FILES {
            let config_path = current.join(filename);
            if config_path.exists() {
                info!("Found configuration file: {}", config_path.display());
                return Ok(config_path);
            }
        }

        if !current.pop() {
            break;
        }
    }

    Err(TowerError::Config(ConfigError::FileNotFound {
        path: start.join(DEFAULT_CONFIG_FILES[0]),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tower::{Bus, PowerState};

    #[test]
    fn test_parse_minimal_config() {
        let yaml = r"
tower:
  endpoint: http://tower.local
vm:
  id: vm-1
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("valid config");

        assert_eq!(config.vm.id.as_deref(), Some("vm-1"));
        assert_eq!(config.tower.token_env, "TOWER_TOKEN");
        assert_eq!(config.tower.poll_interval_secs, 5);
        assert!(config.vm.disks.is_none());
        assert_eq!(config.state.dir_or_default(), ".towerctl");
    }

    #[test]
    fn test_parse_full_config() {
        let yaml = r"
tower:
  endpoint: http://tower.local
  token_env: MY_TOKEN
state:
  dir: /tmp/towerctl
vm:
  id: vm-1
  name: web-1
  vcpu: 4
  cpu_cores: 2
  cpu_sockets: 2
  memory: 8589934592
  ha: true
  status: RUNNING
  host_id: host-1
  hostname: web-1
  dns_servers: [1.1.1.1]
  guest_os_account: { username: root, password: secret }
  disks:
    - { boot: 0, bus: VIRTIO, vm_volume_id: vol-1 }
    - boot: 1
      bus: SCSI
      vm_volume: { name: data, size: 1073741824, storage_policy: REPLICA_3_THICK_PROVISION }
  cd_roms:
    - { id: cd-1, boot: 2, iso_id: iso-1 }
    - { boot: 3, iso_id: null }
    - { boot: 4 }
  nics:
    - { id: nic-1, vlan_id: vlan-a, ip_address: 10.0.0.5, subnet_mask: 255.255.255.0, gateway: 10.0.0.1 }
";
        let config = ConfigParser::new().parse_yaml(yaml, None).expect("valid config");
        let vm = &config.vm;

        assert_eq!(vm.status, Some(PowerState::Running));
        let disks = vm.disks.as_ref().expect("disks");
        assert_eq!(disks[1].bus, Bus::Scsi);
        let volume = disks[1].vm_volume.as_ref().expect("volume");
        assert_eq!(volume.storage_policy.to_string(), "REPLICA_3_THICK_PROVISION");
        let cd_roms = vm.cd_roms.as_ref().expect("cd-roms");
        assert_eq!(cd_roms[0].requested_image(), Some(Some("iso-1")));
        assert_eq!(cd_roms[1].requested_image(), Some(None));
        assert_eq!(cd_roms[2].requested_image(), None);
        assert!(vm.touches_vm_tools());
    }

    #[test]
    fn test_env_overrides() {
        let yaml = "tower: { endpoint: http://a }\nvm: { id: vm-1 }\n";
        let mut config = ConfigParser::new().parse_yaml(yaml, None).expect("valid config");

        ConfigParser::apply_env_overrides(&mut config, |name| match name {
            ENV_ENDPOINT => Some(String::from("http://b")),
            ENV_STATE_DIR => Some(String::from("/var/lib/towerctl")),
            _ => None,
        });

        assert_eq!(config.tower.endpoint, "http://b");
        assert_eq!(config.vm.id.as_deref(), Some("vm-1"));
        assert_eq!(config.state.dir.as_deref(), Some("/var/lib/towerctl"));
    }

    #[test]
    fn test_missing_file() {
        let err = ConfigParser::new()
            .load_file("/nonexistent/towerctl.yaml")
            .expect_err("file is missing");

        assert!(matches!(err, TowerError::Config(ConfigError::FileNotFound { .. })));
    }

    #[test]
    fn test_invalid_yaml() {
        let err = ConfigParser::new()
            .parse_yaml("tower: [", None)
            .expect_err("invalid yaml");

        assert!(err.to_string().contains("YAML parse error"));
    }
}
