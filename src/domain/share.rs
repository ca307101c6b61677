//! Shared-directory entries.
//!
//! slskd accepts `shares.directories` entries of the form
//! `[!][\[alias\]]/absolute/path`. The leading `!` excludes a directory from
//! sharing, the bracketed alias renames it for remote peers. Only the
//! filesystem root matters to the sandbox.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use crate::domain::ConfigurationError;

/// A parsed `shares.directories` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShareDir {
    raw: String,
    alias: Option<String>,
    root: PathBuf,
    excluded: bool,
}

impl ShareDir {
    /// Filesystem root of the share, without alias or exclusion marker.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    /// Whether the entry removes a directory from sharing.
    pub fn is_excluded(&self) -> bool {
        self.excluded
    }

    fn unresolvable(raw: &str, reason: &str) -> ConfigurationError {
        ConfigurationError::UnresolvableShare {
            entry: raw.to_string(),
            reason: reason.to_string(),
        }
    }
}

impl FromStr for ShareDir {
    type Err = ConfigurationError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let mut rest = raw.trim();

        let excluded = match rest.strip_prefix('!') {
            Some(stripped) => {
                rest = stripped;
                true
            }
            None => false,
        };

        let alias = if rest.starts_with('[') {
            let close = rest
                .find(']')
                .ok_or_else(|| Self::unresolvable(raw, "unterminated alias"))?;
            let name = &rest[1..close];
            if name.trim().is_empty() {
                return Err(Self::unresolvable(raw, "empty alias"));
            }
            let name = name.to_string();
            rest = &rest[close + 1..];
            Some(name)
        } else {
            None
        };

        if rest.is_empty() {
            return Err(Self::unresolvable(raw, "no directory given"));
        }
        if rest.contains('\0') {
            return Err(Self::unresolvable(raw, "contains a null character"));
        }

        let path = Path::new(rest);
        if !path.is_absolute() {
            return Err(Self::unresolvable(raw, "path must be absolute"));
        }
        if path.components().any(|c| matches!(c, Component::ParentDir)) {
            return Err(Self::unresolvable(raw, "path must not contain '..'"));
        }

        // Normalise away duplicate and trailing separators.
        let root: PathBuf = path.components().collect();

        Ok(Self {
            raw: raw.to_string(),
            alias,
            root,
            excluded,
        })
    }
}

impl fmt::Display for ShareDir {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_path() {
        let share: ShareDir = "/mnt/a".parse().unwrap();
        assert_eq!(share.root(), Path::new("/mnt/a"));
        assert_eq!(share.alias(), None);
        assert!(!share.is_excluded());
    }

    #[test]
    fn test_alias_and_exclusion() {
        let share: ShareDir = "[Music Library]/srv/music/".parse().unwrap();
        assert_eq!(share.root(), Path::new("/srv/music"));
        assert_eq!(share.alias(), Some("Music Library"));

        let share: ShareDir = "!/srv/music/private".parse().unwrap();
        assert!(share.is_excluded());
        assert_eq!(share.root(), Path::new("/srv/music/private"));

        let share: ShareDir = "![Hidden]/srv/x".parse().unwrap();
        assert!(share.is_excluded());
        assert_eq!(share.alias(), Some("Hidden"));
    }

    #[test]
    fn test_unresolvable_entries() {
        for raw in ["", "music", "[Alias]", "[Alias/srv", "[]/srv", "/srv/../etc", "!relative"] {
            let err = raw.parse::<ShareDir>().unwrap_err();
            assert!(
                matches!(err, ConfigurationError::UnresolvableShare { .. }),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_display_keeps_raw_entry() {
        let share: ShareDir = "[A]//srv//a".parse().unwrap();
        assert_eq!(share.to_string(), "[A]//srv//a");
        assert_eq!(share.root(), Path::new("/srv/a"));
    }
}
