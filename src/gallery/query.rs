//! Two-phase resolution of compatible extension versions
//!
//! Phase 1 asks for the latest version of every requested extension. Those
//! whose latest version accepts the engine are done. The others are queried
//! again with their full version history (phase 2) and the greatest
//! compatible version is kept. Asking for every history up front would cost
//! far more bandwidth for the common case.

use tracing::{debug, error, info, warn};

use crate::error::MirrorError;
use crate::gallery::client::Gallery;
use crate::gallery::types::{GalleryQuery, PackageRecord, VersionRecord};
use crate::identity::PackageIdentity;
use crate::version::{EngineVersion, VersionTuple};

/// An extension with the single version chosen for the mirror
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedPackage {
    /// Package metadata; its version list is emptied once resolved
    pub package: PackageRecord,
    pub version: VersionRecord,
}

impl ResolvedPackage {
    fn new(mut package: PackageRecord, version: VersionRecord) -> Self {
        package.versions.clear();
        Self { package, version }
    }

    pub fn identity(&self) -> PackageIdentity {
        self.package.identity()
    }
}

/// Outcome of one resolution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Phase 1 results in response order, followed by phase 2 results
    pub resolved: Vec<ResolvedPackage>,
    /// Packages dropped because no version accepts the engine
    pub incompatible: Vec<PackageIdentity>,
    /// Requested names the gallery did not return
    pub missing: Vec<String>,
}

/// Resolve the newest engine-compatible version of each named extension.
///
/// Gallery failures abort the resolution; a package without any compatible
/// version is only reported in [`Resolution::incompatible`], an unknown name
/// in [`Resolution::missing`].
pub async fn resolve_packages(
    gallery: &dyn Gallery,
    names: &[String],
    engine: &EngineVersion,
) -> Result<Resolution, MirrorError> {
    let mut resolution = Resolution::default();
    if names.is_empty() {
        return Ok(resolution);
    }

    debug!("query latest versions of {} extensions", names.len());
    let latest = gallery
        .query(&GalleryQuery::latest_by_names(names.iter().map(String::as_str)))
        .await?;

    for name in names {
        let key = name.to_lowercase();
        if !latest.iter().any(|p| p.identity().lookup_key() == key) {
            warn!("{}: not found in the gallery", name);
            resolution.missing.push(name.clone());
        }
    }

    let mut not_compatible: Vec<(String, PackageIdentity)> = Vec::new();
    for mut package in latest {
        let latest_version = if package.versions.is_empty() {
            None
        } else {
            Some(package.versions.swap_remove(0))
        };

        match latest_version {
            Some(version) if is_compatible(&version, engine) => {
                debug!("{} {} accepted", package.identity(), version.version);
                resolution.resolved.push(ResolvedPackage::new(package, version));
            }
            Some(version) => {
                warn!(
                    "{} {}: engine {:?} does not match engine {}",
                    package.identity(),
                    version.version,
                    version.engines().collect::<Vec<_>>(),
                    engine
                );
                not_compatible.push((package.extension_id.clone(), package.identity()));
            }
            None => {
                warn!("{}: no version listed", package.identity());
                not_compatible.push((package.extension_id.clone(), package.identity()));
            }
        }
    }

    if not_compatible.is_empty() {
        return Ok(resolution);
    }

    debug!("query all versions of {} extensions", not_compatible.len());
    let history = gallery
        .query(&GalleryQuery::all_versions_by_ids(
            not_compatible.iter().map(|(id, _)| id.as_str()),
        ))
        .await?;

    for (id, identity) in &not_compatible {
        if !history.iter().any(|p| &p.extension_id == id) {
            warn!("{}: version history not returned by the gallery", identity);
            resolution.incompatible.push(identity.clone());
        }
    }

    for mut package in history {
        debug!(
            "analyze {} ({} versions)",
            package.identity(),
            package.versions.len()
        );

        let versions = std::mem::take(&mut package.versions);
        match greatest_compatible(versions, engine) {
            Some(version) => {
                info!(
                    "{} {} is the best suitable choice for engine {}",
                    package.identity(),
                    version.version,
                    engine
                );
                resolution.resolved.push(ResolvedPackage::new(package, version));
            }
            None => {
                let identity = package.identity();
                error!(
                    "{}",
                    MirrorError::NoCompatibleVersion(identity.to_string(), engine.to_string())
                );
                resolution.incompatible.push(identity);
            }
        }
    }

    Ok(resolution)
}

/// A version is compatible when any of its engine constraints accepts the engine.
fn is_compatible(version: &VersionRecord, engine: &EngineVersion) -> bool {
    version.engines().any(|constraint| {
        engine
            .satisfies(constraint)
            .inspect_err(|e| error!("{} (current: {})", e, engine))
            .unwrap_or(false)
    })
}

/// Keep the version with the greatest number among the compatible ones.
///
/// Versions are usually listed newest first, but the order is not relied on.
fn greatest_compatible(
    versions: Vec<VersionRecord>,
    engine: &EngineVersion,
) -> Option<VersionRecord> {
    let mut best: Option<(VersionTuple, VersionRecord)> = None;

    for version in versions {
        if !is_compatible(&version, engine) {
            continue;
        }
        let Ok(number) = version.version.parse::<VersionTuple>() else {
            debug!("skipping unparseable version {}", version.version);
            continue;
        };
        if best.as_ref().is_none_or(|(current, _)| number > *current) {
            best = Some((number, version));
        }
    }

    best.map(|(_, version)| version)
}
