//! Configuration data types.

use anyhow::{bail, Result};
use serde::Deserialize;
use std::path::{Component, PathBuf};

use super::{validation, ConfigService};
use crate::domain::artifact::Owner;
use crate::domain::ConfigurationError;
use crate::domain::descriptor::ServiceOptions;
use crate::domain::network::ExposureOptions;
use crate::domain::rotation::RotationPolicy;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Unit name used for generated files
    pub name: String,

    /// Service identity
    pub user: String,
    pub group: String,

    /// Numeric owner applied to state directories and the settings file
    pub uid: Option<u32>,
    pub gid: Option<u32>,

    /// Persistent state directory (holds data/ and logs/)
    pub state_dir: PathBuf,

    /// Generated settings file passed to slskd via --config
    pub settings_path: PathBuf,

    /// slskd executable
    pub service_binary: PathBuf,

    /// This executable, as invoked by the unit's pre-start stage
    pub provision_binary: PathBuf,

    /// Directory receiving the unit file and exposure artifacts
    pub output_dir: PathBuf,

    /// File holding the Soulseek password
    pub secret_file: Option<PathBuf>,

    /// Open soulseek.listen_port in the firewall
    pub open_firewall: bool,

    /// Reverse proxy settings
    pub proxy: ProxyConfig,

    /// Log rotation thresholds
    pub log_rotation: LogRotationConfig,

    /// Enable debug logging to file
    pub debug: bool,

    /// Path to this tool's own log directory
    pub log_path: PathBuf,

    /// Typed slskd settings
    pub settings: toml::Table,

    /// Freeform slskd settings keyed by dotted path, applied last
    pub overlay: toml::Table,

    /// File this configuration was loaded from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "slskd".to_string(),
            user: "slskd".to_string(),
            group: "slskd".to_string(),
            uid: None,
            gid: None,
            state_dir: PathBuf::from("/var/lib/slskd"),
            settings_path: PathBuf::from("/run/slskd/slskd.yml"),
            service_binary: PathBuf::from("/usr/bin/slskd"),
            provision_binary: PathBuf::from("/usr/bin/slskd-provision"),
            output_dir: PathBuf::from("/run/slskd-provision"),
            secret_file: None,
            open_firewall: false,
            proxy: ProxyConfig::default(),
            log_rotation: LogRotationConfig::default(),
            debug: false,
            log_path: default_log_path(),
            settings: toml::Table::new(),
            overlay: toml::Table::new(),
            source: None,
        }
    }
}

impl Config {
    /// Validate configuration and return errors if invalid.
    /// Delegates to the comprehensive validation module.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// `logs/` below the state directory.
    pub fn logs_dir(&self) -> PathBuf {
        self.state_dir.join("logs")
    }

    /// Numeric owner, when both ids are configured.
    pub fn owner(&self) -> Option<Owner> {
        match (self.uid, self.gid) {
            (Some(uid), Some(gid)) => Some(Owner { uid, gid }),
            _ => None,
        }
    }

    /// Owner for everything written on behalf of the service. Writing state
    /// or settings without one would leave them unreadable to `user`.
    pub fn require_owner(&self) -> Result<Owner, ConfigurationError> {
        self.owner().ok_or_else(|| ConfigurationError::MissingOwner {
            user: self.user.clone(),
        })
    }

    /// Directory a rotation run works on. An explicit directory must lie
    /// inside `logs/`.
    pub fn rotation_dir(&self, requested: Option<PathBuf>) -> Result<PathBuf> {
        let logs = self.logs_dir();
        let Some(requested) = requested else {
            return Ok(logs);
        };
        if !requested.is_absolute()
            || requested.components().any(|c| matches!(c, Component::ParentDir))
            || !requested.starts_with(&logs)
        {
            bail!(
                "Refusing to rotate {}: only {} and its subdirectories are rotated",
                requested.display(),
                logs.display()
            );
        }
        Ok(requested)
    }

    pub fn service_options(&self) -> ServiceOptions {
        ServiceOptions {
            name: self.name.clone(),
            user: self.user.clone(),
            group: self.group.clone(),
            service_binary: self.service_binary.clone(),
            provision_binary: self.provision_binary.clone(),
            config_path: self.source.clone().unwrap_or_else(ConfigService::default_path),
            settings_path: self.settings_path.clone(),
            state_dir: self.state_dir.clone(),
            secret_file: self.secret_file.clone(),
            owner: self.owner(),
        }
    }

    pub fn exposure_options(&self) -> ExposureOptions {
        ExposureOptions {
            open_firewall: self.open_firewall,
            proxy_enable: self.proxy.enable,
            proxy_domain: self.proxy.domain.clone(),
        }
    }

    pub fn rotation_policy(&self) -> RotationPolicy {
        RotationPolicy::from_days(
            self.log_rotation.compress_after_days,
            self.log_rotation.delete_after_days,
        )
    }
}

/// Reverse proxy configuration.
///
/// ```toml
/// [proxy]
/// enable = true
/// domain = "music.example.org"
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProxyConfig {
    pub enable: bool,
    pub domain: Option<String>,
}

/// Log rotation thresholds in days.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogRotationConfig {
    /// Compress files older than this
    pub compress_after_days: u64,
    /// Delete files older than this
    pub delete_after_days: u64,
}

impl Default for LogRotationConfig {
    fn default() -> Self {
        Self {
            compress_after_days: 1,
            delete_after_days: 10,
        }
    }
}

/// Get default log path for this tool's own debug logs.
pub fn default_log_path() -> PathBuf {
    dirs::state_dir()
        .unwrap_or_else(|| PathBuf::from("/var/log"))
        .join("slskd-provision")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_owner_is_required_for_writes() {
        let config = Config::default();
        assert_eq!(
            config.require_owner().unwrap_err(),
            ConfigurationError::MissingOwner {
                user: "slskd".to_string()
            }
        );

        let config = Config {
            uid: Some(990),
            gid: Some(991),
            ..Config::default()
        };
        assert_eq!(config.require_owner().unwrap(), Owner { uid: 990, gid: 991 });
    }

    #[test]
    fn test_rotation_dir_stays_in_logs() {
        let config = Config::default();
        assert_eq!(config.rotation_dir(None).unwrap(), Path::new("/var/lib/slskd/logs"));
        assert_eq!(
            config.rotation_dir(Some(PathBuf::from("/var/lib/slskd/logs/old"))).unwrap(),
            Path::new("/var/lib/slskd/logs/old")
        );
        for rejected in ["/etc", "/var/lib/slskd/data", "/var/lib/slskd/logs/../data", "logs"] {
            assert!(config.rotation_dir(Some(PathBuf::from(rejected))).is_err(), "{rejected}");
        }
    }

    #[test]
    fn test_pre_start_reads_loaded_file() {
        let config = Config {
            source: Some(PathBuf::from("/etc/slskd-provision.toml")),
            ..Config::default()
        };
        assert_eq!(
            config.service_options().config_path,
            PathBuf::from("/etc/slskd-provision.toml")
        );
        assert_eq!(Config::default().service_options().config_path, ConfigService::default_path());
    }
}
