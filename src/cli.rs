//! CLI argument parsing and command definitions.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Provisioning for the slskd Soulseek client
#[derive(Parser)]
#[command(
    name = "slskd-provision",
    version,
    about = "Provisioning for the slskd Soulseek client",
    long_about = "Merges typed settings onto slskd's defaults, writes the settings file, \
                  injects the Soulseek password at service start, and derives the systemd \
                  unit, firewall rule and reverse-proxy route."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to configuration file
    #[arg(long, short = 'c', global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Suppress non-essential output
    #[arg(long, short = 'q', global = true)]
    pub quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Run the full activation: settings file, secret, unit and exposure files
    Activate {
        /// Directory for the unit, descriptor and exposure files (default: output_dir)
        #[arg(long, short = 'o')]
        out: Option<PathBuf>,
    },
    /// Print the settings file as written before secret injection
    Render,
    /// Write the settings file alone (unit pre-start step)
    WriteSettings,
    /// Inject the secret into an existing settings file (unit pre-start step)
    InjectSecret {
        /// Settings file to update in place
        #[arg(long)]
        settings: PathBuf,
        /// File holding the secret
        #[arg(long)]
        secret_file: PathBuf,
        /// Owner uid of the rewritten settings file
        #[arg(long)]
        uid: u32,
        /// Owner gid of the rewritten settings file
        #[arg(long)]
        gid: u32,
    },
    /// Validate configuration file and merged settings
    Check,
    /// Generate default configuration file
    Init {
        /// Path where to create the configuration file
        #[arg(long, short = 'p')]
        path: Option<PathBuf>,
    },
    /// Compress and expire files in the service's logs directory
    RotateLogs {
        /// Directory to rotate, inside <state_dir>/logs (default: <state_dir>/logs)
        #[arg(long)]
        logs_dir: Option<PathBuf>,
    },
    /// List recognized settings with kinds and defaults
    Options {
        /// Only list options at or below this dotted path
        path: Option<String>,
    },
    /// Display version information
    Version,
}

impl Commands {
    /// Whether the command reads the configuration file. The others run
    /// with built-in defaults so they work before `init` and inside the
    /// unit's pre-start stage.
    pub fn needs_config(&self) -> bool {
        !matches!(
            self,
            Commands::InjectSecret { .. } | Commands::Init { .. } | Commands::Options { .. } | Commands::Version
        )
    }
}
