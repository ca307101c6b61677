//! Configuration validation.

use anyhow::{bail, Result};
use std::path::Path;

use super::Config;

fn check_absolute(name: &str, path: &Path) -> Result<()> {
    if path.as_os_str().is_empty() {
        bail!("{} cannot be empty", name);
    }
    if path.to_string_lossy().contains('\0') {
        bail!("Invalid {}: contains null character", name);
    }
    if !path.is_absolute() {
        bail!("{} must be an absolute path: {}", name, path.display());
    }
    Ok(())
}

/// Validate configuration.
pub fn validate(config: &Config) -> Result<()> {
    // Identities end up in the unit file verbatim
    for (field, value) in [("name", &config.name), ("user", &config.user), ("group", &config.group)] {
        if value.is_empty() {
            bail!("{} cannot be empty", field);
        }
        if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
            bail!("{} '{}' must not contain whitespace", field, value);
        }
    }
    if config.name.contains('/') {
        bail!("name '{}' must not contain '/'", config.name);
    }

    if config.uid.is_some() != config.gid.is_some() {
        bail!("uid and gid must be set together");
    }

    check_absolute("state_dir", &config.state_dir)?;
    check_absolute("settings_path", &config.settings_path)?;
    check_absolute("service_binary", &config.service_binary)?;
    check_absolute("provision_binary", &config.provision_binary)?;
    check_absolute("output_dir", &config.output_dir)?;
    if let Some(secret_file) = &config.secret_file {
        check_absolute("secret_file", secret_file)?;
        if secret_file == &config.settings_path {
            bail!("secret_file and settings_path must differ");
        }
    }

    if config.settings_path.file_name().is_none() {
        bail!("settings_path must name a file: {}", config.settings_path.display());
    }

    // Validate log path
    if config.log_path.to_string_lossy().contains('\0') {
        bail!("Invalid log_path: contains null character");
    }

    // Validate proxy
    if config.proxy.enable {
        match config.proxy.domain.as_deref().map(str::trim) {
            None | Some("") => bail!("proxy.enable requires proxy.domain"),
            Some(domain) if domain.chars().any(|c| c.is_whitespace() || c == ';' || c == '{') => {
                bail!("proxy.domain '{}' is not a valid host name", domain)
            }
            Some(_) => {}
        }
    }

    // Validate log rotation
    let rotation = &config.log_rotation;
    if rotation.delete_after_days == 0 {
        bail!("log_rotation.delete_after_days must be at least 1");
    }
    if rotation.compress_after_days >= rotation.delete_after_days {
        bail!(
            "log_rotation.compress_after_days ({}) must be less than delete_after_days ({})",
            rotation.compress_after_days,
            rotation.delete_after_days
        );
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn test_default_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_relative_paths_rejected() {
        let config = Config {
            state_dir: PathBuf::from("var/lib/slskd"),
            ..Config::default()
        };
        let err = validate(&config).unwrap_err();
        assert!(err.to_string().contains("state_dir"));
    }

    #[test]
    fn test_proxy_requires_domain() {
        let mut config = Config::default();
        config.proxy.enable = true;
        assert!(validate(&config).is_err());

        config.proxy.domain = Some("music.example.org".to_string());
        assert!(validate(&config).is_ok());

        config.proxy.domain = Some("evil; }".to_string());
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_rotation_thresholds() {
        let mut config = Config::default();
        config.log_rotation.compress_after_days = 10;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_uid_gid_pairing() {
        let config = Config {
            uid: Some(990),
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_user_without_whitespace() {
        let config = Config {
            user: "sl skd".to_string(),
            ..Config::default()
        };
        assert!(validate(&config).is_err());
    }
}
