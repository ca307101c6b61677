//! Configuration service for loading and generating config files.

use anyhow::{Context, Result};
use std::fs;
use std::path::{Path, PathBuf};

use super::Config;

/// Configuration service.
pub struct ConfigService;

impl ConfigService {
    /// Get the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("slskd-provision")
            .join("config.toml")
    }

    /// Load configuration from file.
    ///
    /// If `path` is `None`, uses the default path.
    /// Validates configuration after loading.
    pub fn load(path: Option<&Path>) -> Result<Config> {
        let path = path.map(PathBuf::from).unwrap_or_else(Self::default_path);

        if !path.exists() {
            anyhow::bail!(
                "Config file not found: {} (run `slskd-provision init --path {}` to create one)",
                path.display(),
                path.display()
            );
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.source = Some(path.clone());

        // Validate configuration
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;

        Ok(config)
    }

    /// Parse configuration content without validating it.
    pub fn parse(content: &str) -> Result<Config> {
        Ok(toml::from_str(content)?)
    }

    /// Generate default configuration file at the default path.
    pub fn generate_default() -> Result<()> {
        Self::generate_at(&Self::default_path())
    }

    /// Generate default configuration file at the specified path.
    pub fn generate_at(path: &Path) -> Result<()> {
        if path.exists() {
            anyhow::bail!("Refusing to overwrite existing config file: {}", path.display());
        }

        // Create parent directories if needed
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let content = Self::default_config_content();
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Generate default configuration content with comments.
    pub fn default_config_content() -> &'static str {
        r#"# slskd-provision configuration file

# Unit name and service identity
name = "slskd"
user = "slskd"
group = "slskd"
# Numeric ids of user/group; state directories and the settings file are
# handed to them. Required by activate and write-settings.
uid = 990
gid = 990

# Persistent state; data/ and logs/ are created below it with mode 0750
state_dir = "/var/lib/slskd"

# Generated settings file, passed to slskd as --config
settings_path = "/run/slskd/slskd.yml"

# Executables referenced by the generated unit
service_binary = "/usr/bin/slskd"
provision_binary = "/usr/bin/slskd-provision"

# Where the unit file, descriptor and exposure artifacts are written
output_dir = "/run/slskd-provision"

# File holding the Soulseek password; injected before the service starts
# secret_file = "/run/secrets/slskd-password"

# Open soulseek.listen_port in the firewall (default: false)
open_firewall = false

# Enable debug logging to file (default: false)
debug = false

# Reverse proxy in front of the web UI (websockets are always passed through)
[proxy]
enable = false
# domain = "music.example.org"

# Maintenance of <state_dir>/logs
[log_rotation]
compress_after_days = 1
delete_after_days = 10

# Typed slskd settings; unknown keys are rejected
[settings.soulseek]
username = "changeme"
# listen_port = 50000

[settings.web]
# port = 5001
# url_base = "/"

[settings.shares]
# directories = ["/srv/music", "[Podcasts]/srv/podcasts", "!/srv/music/private"]
# filters = ['\.ini$', 'Thumbs.db$']

# Freeform slskd settings by dotted path, applied after the typed settings
[overlay]
# "web.https.disabled" = true
"#
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_content_parses_and_validates() {
        let config = ConfigService::parse(ConfigService::default_config_content()).unwrap();
        config.validate().unwrap();
        assert_eq!(config.user, "slskd");
        assert!(config.settings.contains_key("soulseek"));
        assert!(config.overlay.is_empty());
    }

    #[test]
    fn test_generate_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("etc").join("config.toml");
        ConfigService::generate_at(&path).unwrap();
        assert!(ConfigService::generate_at(&path).is_err());

        let config = ConfigService::load(Some(&path)).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/slskd"));
        assert_eq!(config.source.as_deref(), Some(path.as_path()));
        assert!(config.require_owner().is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = ConfigService::load(Some(&dir.path().join("nope.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn test_unknown_top_level_key_rejected() {
        assert!(ConfigService::parse("usr = \"x\"\n").is_err());
    }
}
