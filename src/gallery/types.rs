//! Wire types of the gallery query protocol

use serde::{Deserialize, Serialize};

use crate::identity::PackageIdentity;

/// Property key carrying the engine constraint of a version
pub const ENGINE_PROPERTY: &str = "Microsoft.VisualStudio.Code.Engine";

/// Installation target sent with every query
pub const INSTALLATION_TARGET: &str = "Microsoft.VisualStudio.Code";

/// Asset path of the installable package below a version's `assetUri`
pub const PACKAGE_ASSET: &str = "Microsoft.VisualStudio.Services.VSIXPackage";

/// Asset path of the small icon below a version's `assetUri`
pub const ICON_ASSET: &str = "Microsoft.VisualStudio.Services.Icons.Small";

/// Filter criteria types understood by the gallery
pub mod filter_type {
    pub const EXTENSION_ID: u32 = 4;
    pub const EXTENSION_NAME: u32 = 7;
    pub const TARGET: u32 = 8;
    pub const EXCLUDE_WITH_FLAGS: u32 = 12;
}

/// Response verbosity flags
pub mod flags {
    pub const INCLUDE_VERSIONS: u32 = 0x1;
    pub const INCLUDE_VERSION_PROPERTIES: u32 = 0x10;
    pub const INCLUDE_ASSET_URI: u32 = 0x80;
    pub const INCLUDE_LATEST_VERSION_ONLY: u32 = 0x200;
    pub const UNPUBLISHED: u32 = 0x1000;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Criterion {
    pub filter_type: u32,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryFilter {
    pub criteria: Vec<Criterion>,
}

/// Body of a batched gallery query
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GalleryQuery {
    pub filters: Vec<QueryFilter>,
    pub flags: u32,
}

impl GalleryQuery {
    fn new(flags: u32, selectors: impl IntoIterator<Item = Criterion>) -> Self {
        let mut criteria = vec![
            Criterion {
                filter_type: filter_type::TARGET,
                value: INSTALLATION_TARGET.to_string(),
            },
            Criterion {
                filter_type: filter_type::EXCLUDE_WITH_FLAGS,
                value: flags::UNPUBLISHED.to_string(),
            },
        ];
        criteria.extend(selectors);
        Self {
            filters: vec![QueryFilter { criteria }],
            flags,
        }
    }

    /// Latest version metadata for the given `publisher.name` identifiers.
    pub fn latest_by_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Self {
        let mut names: Vec<&str> = names.into_iter().collect();
        names.sort_unstable();
        Self::new(
            flags::INCLUDE_LATEST_VERSION_ONLY
                | flags::INCLUDE_ASSET_URI
                | flags::INCLUDE_VERSION_PROPERTIES,
            names.into_iter().map(|name| Criterion {
                filter_type: filter_type::EXTENSION_NAME,
                value: name.to_string(),
            }),
        )
    }

    /// Full version history for the given gallery extension ids.
    pub fn all_versions_by_ids<'a>(ids: impl IntoIterator<Item = &'a str>) -> Self {
        Self::new(
            flags::INCLUDE_VERSIONS | flags::INCLUDE_ASSET_URI | flags::INCLUDE_VERSION_PROPERTIES,
            ids.into_iter().map(|id| Criterion {
                filter_type: filter_type::EXTENSION_ID,
                value: id.to_string(),
            }),
        )
    }

    pub fn requests_all_versions(&self) -> bool {
        self.flags & flags::INCLUDE_VERSIONS != 0
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResponse {
    #[serde(default)]
    pub results: Vec<QueryResult>,
}

impl QueryResponse {
    /// Package records of the first result set, empty when there is none.
    pub fn into_packages(self) -> Vec<PackageRecord> {
        self.results
            .into_iter()
            .next()
            .map(|r| r.extensions)
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueryResult {
    #[serde(default)]
    pub extensions: Vec<PackageRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublisherRecord {
    pub publisher_name: String,
    pub display_name: String,
}

/// One extension as returned by the gallery
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageRecord {
    pub extension_id: String,
    pub extension_name: String,
    pub display_name: String,
    #[serde(default)]
    pub short_description: Option<String>,
    pub publisher: PublisherRecord,
    #[serde(default)]
    pub versions: Vec<VersionRecord>,
}

impl PackageRecord {
    pub fn identity(&self) -> PackageIdentity {
        PackageIdentity::new(
            self.publisher.publisher_name.clone(),
            self.extension_name.clone(),
        )
    }

    /// Short description, or the display name when there is none
    pub fn description(&self) -> &str {
        self.short_description
            .as_deref()
            .unwrap_or(&self.display_name)
    }
}

/// One published version of an extension
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionRecord {
    pub version: String,
    pub last_updated: String,
    pub asset_uri: String,
    #[serde(default)]
    pub properties: Option<Vec<PropertyEntry>>,
}

impl VersionRecord {
    /// Engine constraints declared by this version
    pub fn engines(&self) -> impl Iterator<Item = &str> {
        self.properties
            .iter()
            .flatten()
            .filter(|p| p.key == ENGINE_PROPERTY)
            .map(|p| p.value.as_str())
    }

    pub fn package_url(&self) -> String {
        format!("{}/{}", self.asset_uri, PACKAGE_ASSET)
    }

    pub fn icon_url(&self) -> String {
        format!("{}/{}", self.asset_uri, ICON_ASSET)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PropertyEntry {
    pub key: String,
    pub value: String,
}
