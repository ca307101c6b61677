//! Privileged pre-start secret injection.
//!
//! The settings artifact is written without the Soulseek password. Right
//! before the service starts, and while still privileged, the injector reads
//! the password from its own file and merges it into the artifact:
//!
//! 1. read the secret file (fatal if unreadable)
//! 2. load the generated artifact
//! 3. set the secret sub-path, replacing any existing value
//! 4. write the result atomically with mode 0640
//!
//! Parser, serializer and I/O errors of steps 2–4 are dropped on the floor:
//! their text may quote the document, and the document holds the secret. The
//! surfaced error names the failing stage only.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info};

use super::artifact::{self, Owner, ARTIFACT_MODE};
use super::merge;
use crate::domain::{InjectStage, SecretError};

/// Secret value read from disk. `Debug` never shows it.
#[derive(Clone, PartialEq, Eq)]
pub struct Secret(String);

impl Secret {
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

/// Path of the file holding the secret.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretRef(PathBuf);

impl SecretRef {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Read the secret; the whole file minus one trailing newline.
    pub fn read(&self) -> Result<Secret, SecretError> {
        let content = fs::read_to_string(&self.0).map_err(|e| SecretError::Read {
            path: self.0.clone(),
            kind: e.kind(),
        })?;

        let value = content
            .strip_suffix('\n')
            .map(|s| s.strip_suffix('\r').unwrap_or(s))
            .unwrap_or(&content);

        if value.trim().is_empty() {
            return Err(SecretError::Empty {
                path: self.0.clone(),
            });
        }
        Ok(Secret(value.to_string()))
    }
}

/// Merges a secret into an already generated settings artifact.
#[derive(Debug, Clone)]
pub struct SecretInjector {
    secret: SecretRef,
    target: String,
    owner: Option<Owner>,
}

impl SecretInjector {
    pub fn new(secret: SecretRef, target: impl Into<String>) -> Self {
        Self {
            secret,
            target: target.into(),
            owner: None,
        }
    }

    /// Hand the rewritten artifact to the service identity.
    pub fn with_owner(mut self, owner: Option<Owner>) -> Self {
        self.owner = owner;
        self
    }

    /// Run the injection protocol against `artifact_path`.
    pub fn inject(&self, artifact_path: &Path) -> Result<(), SecretError> {
        let secret = self.secret.read()?;

        let raw = quiet(InjectStage::LoadArtifact, fs::read_to_string(artifact_path))?;
        let mut document: Value = quiet(InjectStage::LoadArtifact, serde_yaml::from_str(&raw))?;
        if document.is_null() {
            document = Value::Object(Default::default());
        }

        merge::set_path(&mut document, &self.target, Value::String(secret.expose().to_string()));
        let rendered = quiet(InjectStage::MergeSecret, artifact::render_value(&document))?;

        quiet(
            InjectStage::WriteArtifact,
            artifact::write_atomic(artifact_path, rendered.as_bytes(), ARTIFACT_MODE, self.owner),
        )?;

        info!(
            "Injected secret from {} into {} at '{}'",
            self.secret.path().display(),
            artifact_path.display(),
            self.target
        );
        Ok(())
    }
}

/// Drop a helper error's diagnostics, keeping only the stage it failed in.
fn quiet<T, E>(stage: InjectStage, result: Result<T, E>) -> Result<T, SecretError> {
    result.map_err(|_| {
        debug!("Secret injection helper failed while {stage}; diagnostics suppressed");
        SecretError::Helper { stage }
    })
}
