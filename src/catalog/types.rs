//! Records persisted in `data.json`

use std::path::Path;

use chrono::DateTime;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::config::{ARTIFACT_DIR, ICON_DIR};
use crate::error::MirrorError;
use crate::fetch::write_replacing;
use crate::gallery::ResolvedPackage;
use crate::gallery::releases::PlatformAsset;

/// Layout of `lastUpdated` in the catalog and the listing
const LAST_UPDATED_FORMAT: &str = "%Y/%m/%d&nbsp;%H:%M:%S";

/// The mirrored catalog
///
/// Maps keep insertion order so that two builds from the same inputs
/// serialize to identical bytes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<BasePackage>,
    #[serde(default)]
    pub extensions: IndexMap<String, CatalogEntry>,
    #[serde(rename = "go-tools", default, skip_serializing_if = "Option::is_none")]
    pub go_tools: Option<IndexMap<String, ToolDefinition>>,
}

impl Catalog {
    pub fn from_json(content: &str) -> Result<Self, MirrorError> {
        Ok(serde_json::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self, MirrorError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Pretty JSON with a four space indent
    pub fn to_json(&self) -> Result<String, MirrorError> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut serializer = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut serializer)?;
        // serde_json only emits valid UTF-8
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Replace the catalog file at `path` in one rename.
    pub fn save(&self, path: &Path) -> Result<(), MirrorError> {
        let json = self.to_json()?;
        write_replacing(path, json.as_bytes())
    }

    /// Look up an entry by exact key, then case-insensitively.
    pub fn find(&self, key: &str) -> Option<(&str, &CatalogEntry)> {
        if let Some((k, entry)) = self.extensions.get_key_value(key) {
            return Some((k.as_str(), entry));
        }
        let lower = key.to_lowercase();
        self.extensions
            .iter()
            .find(|(k, _)| k.to_lowercase() == lower)
            .map(|(k, entry)| (k.as_str(), entry))
    }
}

/// The base application package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasePackage {
    pub version: String,
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_id: Option<String>,
    /// Path of the `.deb` below the mirror root
    pub url: String,
    pub deb: String,
    #[serde(default)]
    pub server: Vec<String>,
}

/// One mirrored extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogEntry {
    pub version: String,
    /// Artifact path below the mirror root
    #[serde(rename = "vsix")]
    pub artifact: String,
    #[serde(rename = "vsixAsset")]
    pub artifact_url: String,
    pub url: String,
    pub icon: String,
    pub icon_asset: String,
    pub name: String,
    pub description: String,
    pub author: String,
    pub author_url: String,
    pub last_updated: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

impl CatalogEntry {
    /// Entry for a package resolved from the gallery
    pub fn from_resolved(resolved: &ResolvedPackage, marketplace_url: &str) -> Self {
        let key = resolved.identity().to_string();
        let package = &resolved.package;
        let version = &resolved.version;

        Self {
            version: version.version.clone(),
            artifact: artifact_path(&key, &version.version),
            artifact_url: version.package_url(),
            url: item_url(marketplace_url, &key),
            icon: icon_path(&key),
            icon_asset: version.icon_url(),
            name: package.display_name.clone(),
            description: package.description().to_string(),
            author: package.publisher.display_name.clone(),
            author_url: publisher_url(marketplace_url, &package.publisher.publisher_name),
            last_updated: format_last_updated(&version.last_updated),
            platform: None,
        }
    }

    /// Entry for one platform installer of a resolved package.
    ///
    /// The icon and item page are shared with the base package.
    pub fn for_platform(
        resolved: &ResolvedPackage,
        asset: &PlatformAsset,
        marketplace_url: &str,
    ) -> Self {
        let identity = resolved.identity().with_platform(&asset.platform);
        let mut entry = Self::from_resolved(resolved, marketplace_url);
        entry.artifact = artifact_path(&identity.to_string(), &resolved.version.version);
        entry.artifact_url = asset.download_url.clone();
        entry.name = format!("{} ({})", resolved.package.display_name, asset.platform);
        entry.last_updated = format_last_updated(&asset.updated_at);
        entry.platform = Some(asset.platform.clone());
        entry
    }
}

/// An auxiliary tool of the language tooling extension
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    pub name: String,
    pub import_path: String,
    pub description: String,
    #[serde(default)]
    pub is_important: bool,
}

pub fn artifact_path(key: &str, version: &str) -> String {
    format!("{}/{}-{}.vsix", ARTIFACT_DIR, key, version)
}

pub fn icon_path(key: &str) -> String {
    format!("{}/{}.png", ICON_DIR, key)
}

fn item_url(marketplace_url: &str, key: &str) -> String {
    format!("{}/items?itemName={}", marketplace_url, key)
}

fn publisher_url(marketplace_url: &str, publisher: &str) -> String {
    format!("{}/publishers/{}", marketplace_url, publisher)
}

/// Reformat an RFC 3339 timestamp; unparseable values are kept as is.
pub fn format_last_updated(value: &str) -> String {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.format(LAST_UPDATED_FORMAT).to_string())
        .unwrap_or_else(|_| value.to_string())
}
