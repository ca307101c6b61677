//! slskd-provision: typed settings and supervision artifacts for slskd
//!
//! Merges user settings onto slskd's defaults, writes the settings file the
//! daemon reads, injects the Soulseek password right before the service
//! starts, and derives the systemd unit, firewall rule and reverse-proxy route.

mod cli;
mod config;
mod domain;
mod service;

use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use clap::Parser;

use cli::{Cli, Commands};
use config::{Config, ConfigService};
use domain::artifact::Owner;
use domain::options::slskd_schema;
use domain::rotation;
use service::ActivationService;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let config = if cli.command.needs_config() {
        ConfigService::load(cli.config.as_deref())?
    } else {
        Config::default()
    };

    domain::logger::init(&config, cli.debug, cli.quiet)?;

    // Execute command
    match cli.command {
        Commands::Activate { out } => {
            let out_dir = out.unwrap_or_else(|| config.output_dir.clone());
            let settings_path = config.settings_path.clone();
            let activation = ActivationService::new(config).activate(&out_dir)?;
            if !cli.quiet {
                eprintln!("Settings written to: {}", settings_path.display());
                if !activation.secret_injected {
                    eprintln!("No secret_file configured; the settings file has no password.");
                }
                for path in &activation.written {
                    eprintln!("Wrote: {}", path.display());
                }
                eprintln!("Activation reached stage '{}'.", activation.stage);
            }
        }
        Commands::Render => {
            let plan = ActivationService::new(config).plan()?;
            print!("{}", plan.artifact);
        }
        Commands::WriteSettings => {
            let settings_path = config.settings_path.clone();
            ActivationService::new(config)
                .write_settings()
                .with_context(|| format!("Failed to write settings to {}", settings_path.display()))?;
            if !cli.quiet {
                eprintln!("Settings written to: {}", settings_path.display());
            }
        }
        Commands::InjectSecret {
            settings,
            secret_file,
            uid,
            gid,
        } => {
            let owner = Owner { uid, gid };
            service::inject(&secret_file, &settings, &slskd_schema(), Some(owner))
                .with_context(|| format!("Failed to inject secret into {}", settings.display()))?;
            if !cli.quiet {
                eprintln!("Secret injected into: {}", settings.display());
            }
        }
        Commands::Check => {
            config.require_owner()?;
            let plan = ActivationService::new(config).plan()?;
            if !cli.quiet {
                eprintln!("Configuration is valid.");
                eprintln!(
                    "Listen ports: {}",
                    plan.descriptor
                        .listen_ports
                        .iter()
                        .map(u16::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                );
                if let Some(rule) = &plan.network.firewall {
                    eprintln!("Firewall opens TCP {:?}", rule.tcp_ports);
                }
                if let Some(route) = &plan.network.proxy {
                    eprintln!("Proxy route: {}{} -> {}", route.domain, route.path_prefix, route.backend_url());
                }
            }
        }
        Commands::Init { path } => {
            let config_path = if let Some(p) = path {
                ConfigService::generate_at(&p)?;
                p
            } else {
                ConfigService::generate_default()?;
                ConfigService::default_path()
            };
            if !cli.quiet {
                eprintln!("Configuration file created at: {}", config_path.display());
            }
        }
        Commands::RotateLogs { logs_dir } => {
            let logs_dir = config.rotation_dir(logs_dir)?;
            let report = rotation::rotate(&logs_dir, &config.rotation_policy(), SystemTime::now())?;
            if !cli.quiet {
                eprintln!(
                    "Rotated {}: {} compressed, {} deleted, {} failed",
                    logs_dir.display(),
                    report.compressed.len(),
                    report.deleted.len(),
                    report.failed.len()
                );
            }
        }
        Commands::Options { path } => {
            let schema = slskd_schema();
            let prefix = path.unwrap_or_default();
            if !prefix.is_empty() && schema.find(&prefix).is_none() {
                bail!("Unknown option: {}", prefix);
            }
            for (path, node) in schema.leaves(&prefix) {
                let default = if node.required {
                    "required".to_string()
                } else if node.default.is_null() {
                    "unset".to_string()
                } else {
                    format!("default {}", node.default)
                };
                println!("{path}  ({}, {default})", node.kind.describe());
                println!("    {}", node.description);
            }
        }
        Commands::Version => {
            println!("slskd-provision {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
