//! Catalog construction and artifact fetching

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::catalog::listing;
use crate::catalog::types::{Catalog, CatalogEntry};
use crate::config::{CATALOG_FILE, CPPTOOLS_KEY, GO_KEY, LISTING_FILE};
use crate::error::MirrorError;
use crate::fetch::{FetchOutcome, Fetcher};
use crate::gallery::ResolvedPackage;
use crate::gallery::releases::{CPPTOOLS_REPOSITORY, ReleaseFeed, select_platform_assets};

/// Work deferred until every artifact has been fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostAction {
    /// Extract and bundle the auxiliary tools named by this artifact
    BundleTools { artifact: PathBuf },
}

/// Counters of one fetch pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchReport {
    pub downloaded: usize,
    pub current: usize,
    pub failed: usize,
}

pub struct CatalogBuilder<'a> {
    fetcher: &'a Fetcher,
    root: &'a Path,
    marketplace_url: &'a str,
    default_icon_url: &'a str,
    platforms: Vec<String>,
    dry_run: bool,
}

impl<'a> CatalogBuilder<'a> {
    pub fn new(fetcher: &'a Fetcher, root: &'a Path) -> Self {
        Self {
            fetcher,
            root,
            marketplace_url: crate::config::MARKETPLACE_URL,
            default_icon_url: crate::config::DEFAULT_ICON_URL,
            platforms: vec!["linux".to_string()],
            dry_run: false,
        }
    }

    pub fn with_urls(mut self, marketplace_url: &'a str, default_icon_url: &'a str) -> Self {
        self.marketplace_url = marketplace_url;
        self.default_icon_url = default_icon_url;
        self
    }

    /// Platforms whose helper installers are mirrored
    pub fn with_platforms(mut self, platforms: Vec<String>) -> Self {
        self.platforms = platforms;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Insert one entry per resolved package, replacing existing ones.
    ///
    /// The native tooling helper is replaced by one entry per platform
    /// installer found on its release feed; a failing feed yields none.
    pub async fn add_packages(
        &self,
        catalog: &mut Catalog,
        resolved: &[ResolvedPackage],
        releases: &dyn ReleaseFeed,
    ) {
        for package in resolved {
            let identity = package.identity();
            let key = identity.to_string();

            if !key.eq_ignore_ascii_case(CPPTOOLS_KEY) {
                let entry = CatalogEntry::from_resolved(package, self.marketplace_url);
                catalog.extensions.insert(key, entry);
                continue;
            }

            let feed = match releases.fetch_releases(CPPTOOLS_REPOSITORY).await {
                Ok(feed) => feed,
                Err(e) => {
                    warn!("Failed to fetch {} releases: {}", CPPTOOLS_REPOSITORY, e);
                    continue;
                }
            };
            let assets = select_platform_assets(&feed, &package.version.version, &self.platforms);
            if assets.is_empty() {
                warn!("no platform installer of {} {}", key, package.version.version);
            }
            for asset in &assets {
                let entry = CatalogEntry::for_platform(package, asset, self.marketplace_url);
                catalog
                    .extensions
                    .insert(identity.with_platform(&asset.platform).to_string(), entry);
            }
        }
    }

    /// Fetch the artifact and icon of every entry that lacks them.
    ///
    /// Failures are logged per entry and do not stop the pass.
    pub async fn fetch_assets(&self, catalog: &Catalog) -> (FetchReport, Vec<PostAction>) {
        let mut report = FetchReport::default();
        let mut actions = Vec::new();

        for (key, entry) in &catalog.extensions {
            let artifact = self.root.join(&entry.artifact);
            let icon = self.root.join(&entry.icon);

            if artifact.is_file() {
                info!("{} {} is current", key, entry.version);
                report.current += 1;
            } else if self.dry_run {
                info!("{} {} would be downloaded", key, entry.version);
            } else {
                info!("{} {} downloading", key, entry.version);
                if icon.is_file() {
                    let _ = std::fs::remove_file(&icon)
                        .inspect_err(|e| debug!("cannot remove {}: {}", icon.display(), e));
                }
                match self.fetcher.fetch(&entry.artifact_url, &artifact).await {
                    Ok(FetchOutcome::Downloaded) => report.downloaded += 1,
                    Ok(FetchOutcome::NotModified) => report.current += 1,
                    Err(e) => {
                        warn!("Failed to fetch {} {}: {}", key, entry.version, e);
                        report.failed += 1;
                    }
                }
            }

            if !icon.is_file() && !self.dry_run {
                self.fetch_icon(key, entry, &icon).await;
            }

            if key.eq_ignore_ascii_case(GO_KEY) && artifact.is_file() {
                actions.push(PostAction::BundleTools { artifact });
            }
        }

        (report, actions)
    }

    async fn fetch_icon(&self, key: &str, entry: &CatalogEntry, icon: &Path) {
        let Err(e) = self.fetcher.fetch(&entry.icon_asset, icon).await else {
            return;
        };
        debug!("no icon for {} ({}), using the default one", key, e);
        let _ = self
            .fetcher
            .fetch(self.default_icon_url, icon)
            .await
            .inspect_err(|e| warn!("Failed to fetch default icon for {}: {}", key, e));
    }

    /// Write `data.json` and `extensions.md` below the root.
    pub fn write(&self, catalog: &Catalog) -> Result<(), MirrorError> {
        std::fs::create_dir_all(self.root)?;
        catalog.save(&self.root.join(CATALOG_FILE))?;
        std::fs::write(self.root.join(LISTING_FILE), listing::render(catalog))?;
        debug!("catalog written with {} entries", catalog.extensions.len());
        Ok(())
    }
}
