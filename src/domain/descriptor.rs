//! Service descriptor: how the supervisor runs slskd.
//!
//! Everything here is derived from the merged settings and the module
//! options, so the unit never disagrees with the settings file it points at.

use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::debug;

use super::artifact::Owner;
use super::merge::MergedConfig;
use super::share::ShareDir;
use crate::domain::ConfigurationError;

/// Mode of the state, data and logs directories.
pub const STATE_DIR_MODE: u32 = 0o750;

/// Sandboxing capabilities applied to the service process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxFlag {
    DenyDeviceAccess,
    PrivateDevices,
    PrivateTmp,
    PrivateUsers,
    NoNewPrivileges,
    ProtectSystemStrict,
    ProtectHome,
    ProtectKernelTunables,
    ProtectKernelModules,
    ProtectKernelLogs,
    ProtectControlGroups,
    ProtectClock,
    ProtectHostname,
    ProtectProcInvisible,
    RestrictNamespaces,
    RestrictRealtime,
    RestrictSuidSgid,
    LockPersonality,
    RemoveIpc,
}

impl SandboxFlag {
    pub const ALL: [SandboxFlag; 19] = [
        SandboxFlag::DenyDeviceAccess,
        SandboxFlag::PrivateDevices,
        SandboxFlag::PrivateTmp,
        SandboxFlag::PrivateUsers,
        SandboxFlag::NoNewPrivileges,
        SandboxFlag::ProtectSystemStrict,
        SandboxFlag::ProtectHome,
        SandboxFlag::ProtectKernelTunables,
        SandboxFlag::ProtectKernelModules,
        SandboxFlag::ProtectKernelLogs,
        SandboxFlag::ProtectControlGroups,
        SandboxFlag::ProtectClock,
        SandboxFlag::ProtectHostname,
        SandboxFlag::ProtectProcInvisible,
        SandboxFlag::RestrictNamespaces,
        SandboxFlag::RestrictRealtime,
        SandboxFlag::RestrictSuidSgid,
        SandboxFlag::LockPersonality,
        SandboxFlag::RemoveIpc,
    ];

    /// systemd directive for this flag.
    pub fn directive(self) -> (&'static str, &'static str) {
        match self {
            SandboxFlag::DenyDeviceAccess => ("DeviceAllow", ""),
            SandboxFlag::PrivateDevices => ("PrivateDevices", "true"),
            SandboxFlag::PrivateTmp => ("PrivateTmp", "true"),
            SandboxFlag::PrivateUsers => ("PrivateUsers", "true"),
            SandboxFlag::NoNewPrivileges => ("NoNewPrivileges", "true"),
            SandboxFlag::ProtectSystemStrict => ("ProtectSystem", "strict"),
            SandboxFlag::ProtectHome => ("ProtectHome", "true"),
            SandboxFlag::ProtectKernelTunables => ("ProtectKernelTunables", "true"),
            SandboxFlag::ProtectKernelModules => ("ProtectKernelModules", "true"),
            SandboxFlag::ProtectKernelLogs => ("ProtectKernelLogs", "true"),
            SandboxFlag::ProtectControlGroups => ("ProtectControlGroups", "true"),
            SandboxFlag::ProtectClock => ("ProtectClock", "true"),
            SandboxFlag::ProtectHostname => ("ProtectHostname", "true"),
            SandboxFlag::ProtectProcInvisible => ("ProtectProc", "invisible"),
            SandboxFlag::RestrictNamespaces => ("RestrictNamespaces", "true"),
            SandboxFlag::RestrictRealtime => ("RestrictRealtime", "true"),
            SandboxFlag::RestrictSuidSgid => ("RestrictSUIDSGID", "true"),
            SandboxFlag::LockPersonality => ("LockPersonality", "true"),
            SandboxFlag::RemoveIpc => ("RemoveIPC", "true"),
        }
    }
}

/// Identity a lifecycle stage runs under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
    /// Full privileges, before the drop to the service identity
    Root,
    ServiceUser,
}

/// Phase of the service lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    PreStart,
    Start,
}

/// One command the supervisor runs for the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LifecycleStage {
    pub name: &'static str,
    pub phase: Phase,
    pub privilege: Privilege,
    pub command: Vec<String>,
}

/// When the supervisor restarts the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RestartCondition {
    OnFailure,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RestartPolicy {
    pub condition: RestartCondition,
    pub delay_secs: u64,
}

impl Default for RestartPolicy {
    fn default() -> Self {
        Self {
            condition: RestartCondition::OnFailure,
            delay_secs: 5,
        }
    }
}

/// Persistent state directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StateLayout {
    pub root: PathBuf,
    pub data: PathBuf,
    pub logs: PathBuf,
    pub mode: u32,
}

impl StateLayout {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            data: root.join("data"),
            logs: root.join("logs"),
            mode: STATE_DIR_MODE,
        }
    }

    /// Create root, `data/` and `logs/` with the layout mode.
    pub fn prepare(&self, owner: Option<Owner>) -> io::Result<()> {
        for dir in [&self.root, &self.data, &self.logs] {
            fs::create_dir_all(dir)?;
            fs::set_permissions(dir, fs::Permissions::from_mode(self.mode))?;
            if let Some(owner) = owner {
                std::os::unix::fs::chown(dir, Some(owner.uid), Some(owner.gid))?;
            }
            debug!("Prepared state directory {}", dir.display());
        }
        Ok(())
    }
}

/// Module options the descriptor depends on besides the settings tree.
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    pub name: String,
    pub user: String,
    pub group: String,
    pub service_binary: PathBuf,
    pub provision_binary: PathBuf,
    /// Configuration file the pre-start stages read
    pub config_path: PathBuf,
    pub settings_path: PathBuf,
    pub state_dir: PathBuf,
    pub secret_file: Option<PathBuf>,
    pub owner: Option<Owner>,
}

/// Everything the supervisor needs to run the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ServiceDescriptor {
    pub name: String,
    pub user: String,
    pub group: String,
    pub settings_path: PathBuf,
    pub lifecycle: Vec<LifecycleStage>,
    pub sandbox: BTreeSet<SandboxFlag>,
    pub restart: RestartPolicy,
    pub read_only_paths: Vec<PathBuf>,
    pub read_write_paths: Vec<PathBuf>,
    /// Writable paths slskd creates on demand; absent ones are skipped
    pub optional_read_write_paths: Vec<PathBuf>,
    pub state: StateLayout,
    pub listen_ports: Vec<u16>,
}

fn path_arg(path: &Path) -> String {
    path.display().to_string()
}

/// Derive the descriptor from merged settings.
pub fn build(merged: &MergedConfig, options: &ServiceOptions) -> Result<ServiceDescriptor, ConfigurationError> {
    let state = StateLayout::new(&options.state_dir);

    // The settings file lives on a volatile path, so every start rewrites it
    // before the secret goes in.
    let mut lifecycle = vec![LifecycleStage {
        name: "write-settings",
        phase: Phase::PreStart,
        privilege: Privilege::Root,
        command: vec![
            path_arg(&options.provision_binary),
            "--config".to_string(),
            path_arg(&options.config_path),
            "write-settings".to_string(),
        ],
    }];
    if let Some(secret_file) = &options.secret_file {
        let mut command = vec![
            path_arg(&options.provision_binary),
            "inject-secret".to_string(),
            "--settings".to_string(),
            path_arg(&options.settings_path),
            "--secret-file".to_string(),
            path_arg(secret_file),
        ];
        if let Some(owner) = options.owner {
            command.extend([
                "--uid".to_string(),
                owner.uid.to_string(),
                "--gid".to_string(),
                owner.gid.to_string(),
            ]);
        }
        lifecycle.push(LifecycleStage {
            name: "inject-secret",
            phase: Phase::PreStart,
            privilege: Privilege::Root,
            command,
        });
    }
    lifecycle.push(LifecycleStage {
        name: "main",
        phase: Phase::Start,
        privilege: Privilege::ServiceUser,
        command: vec![
            path_arg(&options.service_binary),
            "--app-dir".to_string(),
            path_arg(&state.data),
            "--config".to_string(),
            path_arg(&options.settings_path),
        ],
    });

    let read_only_paths = share_roots(merged)?;

    let mut read_write_paths = vec![state.root.clone()];
    if let Some(settings_dir) = options.settings_path.parent() {
        if !settings_dir.starts_with(&state.root) {
            read_write_paths.push(settings_dir.to_path_buf());
        }
    }
    let mut optional_read_write_paths: Vec<PathBuf> = Vec::new();
    for key in ["directories.downloads", "directories.incomplete"] {
        if let Some(dir) = merged.get_str(key) {
            let dir = PathBuf::from(dir);
            let covered = read_write_paths
                .iter()
                .chain(&optional_read_write_paths)
                .any(|p| dir.starts_with(p));
            if !covered {
                optional_read_write_paths.push(dir);
            }
        }
    }

    let listen_ports = ["soulseek.listen_port", "web.port"]
        .into_iter()
        .map(|key| {
            merged
                .get_port(key)
                .ok_or_else(|| ConfigurationError::MissingOption { path: key.to_string() })
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ServiceDescriptor {
        name: options.name.clone(),
        user: options.user.clone(),
        group: options.group.clone(),
        settings_path: options.settings_path.clone(),
        lifecycle,
        sandbox: SandboxFlag::ALL.into_iter().collect(),
        restart: RestartPolicy::default(),
        read_only_paths,
        read_write_paths,
        optional_read_write_paths,
        state,
        listen_ports,
    })
}

/// Read-only allowances: the filesystem root of every shared directory.
/// Exclusion entries only narrow a share, so they add nothing.
fn share_roots(merged: &MergedConfig) -> Result<Vec<PathBuf>, ConfigurationError> {
    let mut roots: Vec<PathBuf> = Vec::new();
    for entry in merged.get_str_list("shares.directories") {
        let share: ShareDir = entry.parse()?;
        if share.is_excluded() {
            continue;
        }
        let root = share.root().to_path_buf();
        if !roots.contains(&root) {
            debug!("Read-only share {} ({})", root.display(), share.alias().unwrap_or("no alias"));
            roots.push(root);
        }
    }
    Ok(roots)
}

fn quote_arg(arg: &str) -> String {
    if !arg.is_empty() && arg.chars().all(|c| c.is_ascii_alphanumeric() || "/._-:=+@".contains(c)) {
        arg.to_string()
    } else {
        format!("\"{}\"", arg.replace('\\', "\\\\").replace('"', "\\\""))
    }
}

fn command_line(command: &[String]) -> String {
    command.iter().map(|a| quote_arg(a)).collect::<Vec<_>>().join(" ")
}

impl ServiceDescriptor {
    /// Render as a systemd unit file.
    pub fn render_unit(&self) -> String {
        let mut unit = String::new();
        let _ = writeln!(unit, "[Unit]");
        let _ = writeln!(unit, "Description=slskd Soulseek client ({})", self.name);
        let _ = writeln!(unit, "After=network-online.target");
        let _ = writeln!(unit, "Wants=network-online.target");
        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Service]");
        let _ = writeln!(unit, "Type=simple");
        let _ = writeln!(unit, "User={}", self.user);
        let _ = writeln!(unit, "Group={}", self.group);
        let _ = writeln!(unit, "UMask=0027");

        for stage in &self.lifecycle {
            let key = match stage.phase {
                Phase::PreStart => "ExecStartPre",
                Phase::Start => "ExecStart",
            };
            // "+" runs the command with full privileges despite User=.
            let prefix = match stage.privilege {
                Privilege::Root => "+",
                Privilege::ServiceUser => "",
            };
            let _ = writeln!(unit, "{key}={prefix}{}", command_line(&stage.command));
        }

        let restart = match self.restart.condition {
            RestartCondition::OnFailure => "on-failure",
        };
        let _ = writeln!(unit, "Restart={restart}");
        let _ = writeln!(unit, "RestartSec={}", self.restart.delay_secs);

        for flag in &self.sandbox {
            let (key, value) = flag.directive();
            let _ = writeln!(unit, "{key}={value}");
        }
        for path in &self.read_only_paths {
            let _ = writeln!(unit, "ReadOnlyPaths={}", quote_arg(&path_arg(path)));
        }
        for path in &self.read_write_paths {
            let _ = writeln!(unit, "ReadWritePaths={}", quote_arg(&path_arg(path)));
        }
        // "-" lets the namespace setup skip paths that do not exist yet.
        for path in &self.optional_read_write_paths {
            let _ = writeln!(unit, "ReadWritePaths=-{}", quote_arg(&path_arg(path)));
        }

        let _ = writeln!(unit);
        let _ = writeln!(unit, "[Install]");
        let _ = writeln!(unit, "WantedBy=multi-user.target");
        unit
    }
}
