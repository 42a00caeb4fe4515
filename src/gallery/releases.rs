//! Per-platform installers of the native tooling helper
//!
//! The gallery only lists one package for the helper, but each platform has
//! its own installer published on a release feed. The release whose name is
//! exactly the gallery-resolved version provides one asset per platform.

use std::sync::LazyLock;

#[cfg(test)]
use mockall::automock;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::MirrorError;

/// Repository publishing the helper's platform installers
pub const CPPTOOLS_REPOSITORY: &str = "Microsoft/vscode-cpptools";

const ASSET_CONTENT_TYPE: &str = "application/vsix";
const ASSET_STATE: &str = "uploaded";

static ASSET_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^cpptools-(.+)\.vsix$").expect("valid regex"));

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Release {
    pub name: String,
    #[serde(default)]
    pub assets: Vec<ReleaseAsset>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    pub name: String,
    pub content_type: String,
    pub state: String,
    pub browser_download_url: String,
    pub updated_at: String,
}

impl ReleaseAsset {
    /// Platform tag encoded in the asset name (`cpptools-<platform>.vsix`)
    pub fn platform(&self) -> Option<&str> {
        ASSET_NAME_RE
            .captures(&self.name)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str())
    }
}

/// Installer of one platform, matched to a gallery version
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformAsset {
    pub platform: String,
    pub download_url: String,
    pub updated_at: String,
}

/// Trait for listing the releases of a repository
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn fetch_releases(&self, repository: &str) -> Result<Vec<Release>, MirrorError>;
}

/// Release feed backed by the GitHub Releases API
pub struct GitHubReleases {
    client: reqwest::Client,
    base_url: String,
}

impl GitHubReleases {
    pub fn new(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: base_url.to_string(),
        }
    }
}

#[async_trait::async_trait]
impl ReleaseFeed for GitHubReleases {
    async fn fetch_releases(&self, repository: &str) -> Result<Vec<Release>, MirrorError> {
        let url = format!("{}/repos/{}/releases", self.base_url, repository);

        let response = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            warn!("release feed returned status {}: {}", status, url);
            return Err(MirrorError::FetchFailed { status, url });
        }

        response.json().await.map_err(|e| {
            warn!("Failed to parse release feed response: {}", e);
            MirrorError::ResourceUnavailable(e.to_string())
        })
    }
}

/// Select the platform installers of the release named exactly `version`.
///
/// Assets must be uploaded VSIX files named `cpptools-<platform>.vsix` with
/// `<platform>` in `platforms`; each platform appears at most once.
pub fn select_platform_assets(
    releases: &[Release],
    version: &str,
    platforms: &[String],
) -> Vec<PlatformAsset> {
    let Some(release) = releases.iter().find(|r| r.name == version) else {
        debug!("no release named {}", version);
        return Vec::new();
    };

    let mut selected: Vec<PlatformAsset> = Vec::new();
    for asset in &release.assets {
        if asset.content_type != ASSET_CONTENT_TYPE || asset.state != ASSET_STATE {
            continue;
        }
        let Some(platform) = asset.platform() else {
            continue;
        };
        if !platforms.iter().any(|p| p == platform)
            || selected.iter().any(|s| s.platform == platform)
        {
            continue;
        }
        selected.push(PlatformAsset {
            platform: platform.to_string(),
            download_url: asset.browser_download_url.clone(),
            updated_at: asset.updated_at.clone(),
        });
    }
    selected
}
