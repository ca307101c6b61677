//! Error types for slskd-provision.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// A supplied value does not fit the option schema.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Key is not declared by the typed schema
    #[error("unknown option '{path}' (undeclared keys belong in [overlay])")]
    UnknownOption { path: String },

    /// Value has the wrong shape for its declared kind
    #[error("option '{path}' expects {expected}, found {found}")]
    TypeMismatch {
        path: String,
        expected: String,
        found: &'static str,
    },

    /// Value has the right shape but is not acceptable
    #[error("option '{path}' is invalid: {reason}")]
    InvalidValue { path: String, reason: String },

    /// Required option resolved to nothing
    #[error("option '{path}' is required but has no value")]
    MissingRequired { path: String },

    /// The secret sub-path may only be filled by the secret injector
    #[error("option '{path}' must not be set in settings; configure secret_file instead")]
    SecretInSettings { path: String },
}

/// The merged tree cannot be written as a settings file.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Value kind that has no representation in the settings format
    #[error("value at '{path}' has unsupported type {kind}")]
    Unsupported { path: String, kind: &'static str },

    /// Settings root must be a mapping
    #[error("settings root must be a mapping")]
    NotAMapping,

    /// YAML encoder failure
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// The merged tree cannot be mapped onto service or network descriptors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigurationError {
    /// Shared-directory entry without a usable filesystem root
    #[error("shared directory '{entry}' cannot be resolved: {reason}")]
    UnresolvableShare { entry: String, reason: String },

    /// Reverse proxy enabled without a domain
    #[error("proxy is enabled but no proxy.domain is configured")]
    MissingProxyDomain,

    /// Files would be written without handing them to the service identity
    #[error("uid and gid of the service identity '{user}' must be configured")]
    MissingOwner { user: String },

    /// Merged tree lacks a value a descriptor depends on
    #[error("option '{path}' is missing or has the wrong type")]
    MissingOption { path: String },
}

/// Stage of the secret injection whose helper diagnostics were discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectStage {
    LoadArtifact,
    MergeSecret,
    WriteArtifact,
}

impl fmt::Display for InjectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InjectStage::LoadArtifact => "loading the settings artifact",
            InjectStage::MergeSecret => "merging the secret",
            InjectStage::WriteArtifact => "writing the settings artifact",
        };
        f.write_str(name)
    }
}

/// Secret injection failure. Never carries the secret value or helper output.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SecretError {
    /// Secret file missing or unreadable
    #[error("cannot read secret file {}: {kind}", path.display())]
    Read { path: PathBuf, kind: io::ErrorKind },

    /// Secret file holds nothing but whitespace
    #[error("secret file {} is empty", path.display())]
    Empty { path: PathBuf },

    /// A helper step failed; its diagnostics were suppressed
    #[error("secret injection failed while {stage} (diagnostics suppressed)")]
    Helper { stage: InjectStage },
}

/// Any failure of a provisioning stage.
#[derive(Debug, Error)]
pub enum ProvisionError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Serialization(#[from] SerializationError),

    #[error(transparent)]
    Configuration(#[from] ConfigurationError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    /// I/O error on a generated artifact
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl ProvisionError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        ProvisionError::Io {
            path: path.into(),
            source,
        }
    }
}
