//! Bounded retention of historical artifacts
//!
//! Files are grouped by package identity and ordered by version; the newest
//! `keep + 1` of each group survive. Files whose name does not follow the
//! artifact naming scheme are reported and never deleted.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ARTIFACT_DIR;
use crate::error::MirrorError;
use crate::version::VersionTuple;

static EXTENSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w\-]+\.[\w\-]+)\-(\d+\.\d+\.\d+)\.vsix$").expect("valid regex")
});
static BASE_PACKAGE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([\w\-]+)_(\d+\.\d+\.\d+\-\d+)_amd64\.deb$").expect("valid regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    /// `<publisher>.<name>-<x.y.z>.vsix`
    Extension,
    /// `<package>_<x.y.z-n>_amd64.deb`
    BasePackage,
}

impl ArtifactKind {
    /// Extensions when the directory name starts with `vsix`, base packages otherwise
    pub fn for_directory(dir: &Path) -> Self {
        let is_artifact_dir = dir
            .file_name()
            .map(|n| n.to_string_lossy().starts_with(ARTIFACT_DIR))
            .unwrap_or(false);
        if is_artifact_dir {
            Self::Extension
        } else {
            Self::BasePackage
        }
    }

    fn pattern(self) -> &'static Regex {
        match self {
            Self::Extension => &EXTENSION_RE,
            Self::BasePackage => &BASE_PACKAGE_RE,
        }
    }

    /// `(identity, version)` parsed from a file name
    pub fn parse_file_name(self, name: &str) -> Option<(String, VersionTuple)> {
        let caps = self.pattern().captures(name)?;
        let version = caps[2].parse().ok()?;
        Some((caps[1].to_string(), version))
    }
}

/// Remove all but the newest `keep + 1` versions of each package below `dir`.
///
/// Returns the removed files (or the ones that would be removed on a dry
/// run). A missing directory yields an empty list.
pub fn purge(
    dir: &Path,
    kind: ArtifactKind,
    keep: usize,
    dry_run: bool,
) -> Result<Vec<PathBuf>, MirrorError> {
    if !dir.is_dir() {
        debug!("{} does not exist, nothing to purge", dir.display());
        return Ok(Vec::new());
    }

    let mut groups: HashMap<String, Vec<(PathBuf, VersionTuple)>> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for entry in WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| MirrorError::Io(e.into()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        match kind.parse_file_name(&name) {
            Some((identity, version)) => {
                if !groups.contains_key(&identity) {
                    order.push(identity.clone());
                }
                groups
                    .entry(identity)
                    .or_default()
                    .push((entry.path().to_path_buf(), version));
            }
            None => warn!("not an artifact name, skipped: {}", entry.path().display()),
        }
    }

    let mut removed = Vec::new();
    for identity in order {
        let Some(mut files) = groups.remove(&identity) else {
            continue;
        };
        files.sort_by(|a, b| b.1.cmp(&a.1));
        removed.extend(
            files
                .into_iter()
                .skip(keep.saturating_add(1))
                .map(|(path, _)| path),
        );
    }

    for path in &removed {
        if dry_run {
            info!("would remove {}", path.display());
        } else {
            debug!("remove {}", path.display());
            std::fs::remove_file(path)?;
        }
    }

    Ok(removed)
}
