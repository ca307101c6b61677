//! Periodic maintenance of the service's `logs/` directory.
//!
//! Files older than the short threshold are gzipped, files older than the
//! long threshold are deleted. A file that fails is skipped and picked up
//! again by the next scheduled run.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use anyhow::{Context, Result};
use flate2::write::GzEncoder;
use flate2::Compression;
use tracing::{debug, info, warn};

const DAY_SECS: u64 = 24 * 60 * 60;

/// Age thresholds of one rotation run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub compress_after: Duration,
    pub delete_after: Duration,
}

impl RotationPolicy {
    pub fn from_days(compress_after_days: u64, delete_after_days: u64) -> Self {
        Self {
            compress_after: Duration::from_secs(compress_after_days.saturating_mul(DAY_SECS)),
            delete_after: Duration::from_secs(delete_after_days.saturating_mul(DAY_SECS)),
        }
    }
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self::from_days(1, 10)
    }
}

/// What one run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RotationReport {
    pub compressed: Vec<PathBuf>,
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
}

/// Rotate the files directly inside `logs_dir`, judged against `now`.
pub fn rotate(logs_dir: &Path, policy: &RotationPolicy, now: SystemTime) -> Result<RotationReport> {
    let mut report = RotationReport::default();

    if !logs_dir.exists() {
        debug!("Log directory {} does not exist; nothing to rotate", logs_dir.display());
        return Ok(report);
    }

    let compress_cutoff = now.checked_sub(policy.compress_after).unwrap_or(SystemTime::UNIX_EPOCH);
    let delete_cutoff = now.checked_sub(policy.delete_after).unwrap_or(SystemTime::UNIX_EPOCH);

    let entries = fs::read_dir(logs_dir)
        .with_context(|| format!("Failed to read log directory: {}", logs_dir.display()))?;

    let mut paths: Vec<PathBuf> = entries.filter_map(|e| e.ok().map(|e| e.path())).collect();
    paths.sort();

    for path in paths {
        // Only process regular files
        if !path.is_file() {
            continue;
        }

        let modified = match fs::metadata(&path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                warn!("Skipping {}: {}", path.display(), e);
                report.failed.push(path);
                continue;
            }
        };

        if modified < delete_cutoff {
            match fs::remove_file(&path) {
                Ok(()) => report.deleted.push(path),
                Err(e) => {
                    warn!("Failed to delete {}: {}", path.display(), e);
                    report.failed.push(path);
                }
            }
        } else if modified < compress_cutoff && !is_compressed(&path) {
            match compress(&path, modified) {
                Ok(()) => report.compressed.push(path),
                Err(e) => {
                    warn!("Failed to compress {}: {}", path.display(), e);
                    report.failed.push(path);
                }
            }
        }
    }

    info!(
        "Log rotation in {}: {} compressed, {} deleted, {} failed",
        logs_dir.display(),
        report.compressed.len(),
        report.deleted.len(),
        report.failed.len()
    );
    Ok(report)
}

fn is_compressed(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Gzip `path` to `path.gz`, keep its mtime so the delete threshold still
/// applies, and remove the original.
fn compress(path: &Path, modified: SystemTime) -> io::Result<()> {
    let mut target = path.as_os_str().to_os_string();
    target.push(".gz");
    let target = PathBuf::from(target);

    // Never write through an existing name; a leftover .gz fails this file.
    let output = File::options().write(true).create_new(true).open(&target)?;

    let result = (|| -> io::Result<()> {
        let mut input = BufReader::new(File::open(path)?);
        let mut encoder = GzEncoder::new(BufWriter::new(output), Compression::default());
        io::copy(&mut input, &mut encoder)?;
        let writer = encoder.finish()?;
        let file = writer.into_inner().map_err(|e| e.into_error())?;
        file.sync_all()?;
        file.set_modified(modified)?;
        Ok(())
    })();

    match result {
        Ok(()) => fs::remove_file(path),
        Err(e) => {
            let _ = fs::remove_file(&target);
            Err(e)
        }
    }
}
