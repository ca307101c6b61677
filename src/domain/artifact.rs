//! Settings artifact generation and atomic file writes.

use std::ffi::OsString;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use super::merge::MergedConfig;
use crate::domain::{ProvisionError, SerializationError};

/// Mode of the settings artifact: service user reads, group reads.
pub const ARTIFACT_MODE: u32 = 0o640;

/// Render a merged tree as slskd's YAML settings file.
pub fn render(merged: &MergedConfig) -> Result<String, SerializationError> {
    render_value(merged.as_value())
}

/// Render any settings mapping. Keys come out sorted, so equal trees give
/// byte-identical output.
pub fn render_value(value: &Value) -> Result<String, SerializationError> {
    if !value.is_object() {
        return Err(SerializationError::NotAMapping);
    }
    Ok(serde_yaml::to_string(value)?)
}

/// Ownership applied to a written file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Owner {
    pub uid: u32,
    pub gid: u32,
}

/// Write `contents` to `path` through a sibling temp file and a rename, so
/// readers see either the old or the new file, never a partial one.
///
/// The temp file gets an unpredictable name and is created exclusively, so a
/// link planted in the directory is never followed. Mode and owner are set on
/// the open handle before the rename.
pub fn write_atomic(path: &Path, contents: &[u8], mode: u32, owner: Option<Owner>) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&parent)?;

    let file_name = path
        .file_name()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let mut prefix = OsString::from(".");
    prefix.push(file_name);
    prefix.push(".");

    // Dropped on any early return, which removes the temp file.
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .permissions(fs::Permissions::from_mode(0o600))
        .tempfile_in(&parent)?;

    temp.write_all(contents)?;
    temp.as_file().sync_all()?;

    // The creation mode is filtered by the umask.
    temp.as_file().set_permissions(fs::Permissions::from_mode(mode))?;
    if let Some(owner) = owner {
        std::os::unix::fs::fchown(temp.as_file(), Some(owner.uid), Some(owner.gid))?;
    }

    temp.persist(path).map_err(|e| e.error)?;
    debug!("Wrote {} ({} bytes)", path.display(), contents.len());
    Ok(())
}

/// Render and write the pre-injection settings artifact.
pub fn write_artifact(
    merged: &MergedConfig,
    path: &Path,
    owner: Option<Owner>,
) -> Result<String, ProvisionError> {
    let rendered = render(merged)?;
    write_atomic(path, rendered.as_bytes(), ARTIFACT_MODE, owner)
        .map_err(|e| ProvisionError::io(path, e))?;
    Ok(rendered)
}
