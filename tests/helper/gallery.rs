//! Gallery and release feed test utilities

use async_trait::async_trait;
use mockito::{Matcher, Mock, Server, ServerGuard};
use serde_json::{Value, json};

use gallery_mirror::config::MirrorConfig;
use gallery_mirror::error::MirrorError;
use gallery_mirror::gallery::ReleaseFeed;
use gallery_mirror::gallery::releases::Release;

pub const QUERY_PATH: &str = "/_apis/public/gallery/extensionquery";

/// Flags of the latest-version query (phase 1)
pub const LATEST_FLAGS: u32 = 0x290;
/// Flags of the all-versions query (phase 2)
#[allow(dead_code)]
pub const ALL_VERSIONS_FLAGS: u32 = 0x91;

/// A gallery served by a local mockito server
pub struct MockMarketplace {
    pub server: ServerGuard,
}

impl MockMarketplace {
    pub async fn start() -> Self {
        Self {
            server: Server::new_async().await,
        }
    }

    pub fn url(&self) -> String {
        self.server.url()
    }

    /// Asset root of one package version on this server
    pub fn asset_uri(&self, publisher: &str, name: &str, version: &str) -> String {
        format!("{}/assets/{}/{}/{}", self.url(), publisher, name, version)
    }

    /// Answer queries carrying `flags` with the given package records
    pub async fn mock_query(&mut self, flags: u32, packages: Vec<Value>, hits: usize) -> Mock {
        self.server
            .mock("POST", QUERY_PATH)
            .match_body(Matcher::PartialJson(json!({ "flags": flags })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(json!({ "results": [{ "extensions": packages }] }).to_string())
            .expect(hits)
            .create_async()
            .await
    }

    /// Serve the package and icon of one version
    pub async fn mock_assets(
        &mut self,
        publisher: &str,
        name: &str,
        version: &str,
        hits: usize,
    ) -> (Mock, Mock) {
        let base = format!("/assets/{}/{}/{}", publisher, name, version);
        let package = self
            .server
            .mock(
                "GET",
                format!("{}/Microsoft.VisualStudio.Services.VSIXPackage", base).as_str(),
            )
            .with_status(200)
            .with_header("last-modified", "Wed, 21 Oct 2015 07:28:00 GMT")
            .with_body(format!("{}.{}-{}", publisher, name, version))
            .expect(hits)
            .create_async()
            .await;
        let icon = self
            .server
            .mock(
                "GET",
                format!("{}/Microsoft.VisualStudio.Services.Icons.Small", base).as_str(),
            )
            .with_status(200)
            .with_body("png")
            .expect(hits)
            .create_async()
            .await;
        (package, icon)
    }

    /// Configuration pointing every endpoint at this server
    pub fn config(&self, extensions: &[&str]) -> MirrorConfig {
        let mut config = MirrorConfig {
            extensions: extensions.iter().map(|e| e.to_string()).collect(),
            ..MirrorConfig::default()
        };
        config.endpoints.gallery = format!("{}{}", self.url(), QUERY_PATH);
        config.endpoints.default_icon = format!("{}/default_icon.png", self.url());
        config.endpoints.update = self.url();
        config.endpoints.package_index = self.url();
        config.endpoints.releases = self.url();
        config.tools.enabled = false;
        config
    }
}

/// A package record with one entry per `(version, engine)` pair, newest first
pub fn package_record(
    marketplace: &MockMarketplace,
    publisher: &str,
    name: &str,
    versions: &[(&str, &str)],
) -> Value {
    let versions: Vec<Value> = versions
        .iter()
        .map(|(version, engine)| {
            json!({
                "version": version,
                "lastUpdated": "2019-01-15T18:22:33.12Z",
                "assetUri": marketplace.asset_uri(publisher, name, version),
                "properties": [
                    { "key": "Microsoft.VisualStudio.Code.Engine", "value": engine }
                ]
            })
        })
        .collect();

    json!({
        "extensionId": format!("{}-{}-id", publisher, name),
        "extensionName": name,
        "displayName": name.to_uppercase(),
        "shortDescription": format!("{} for tests", name),
        "publisher": { "publisherName": publisher, "displayName": publisher },
        "versions": versions
    })
}

/// Release feed that never has any release
pub struct EmptyReleases;

#[async_trait]
impl ReleaseFeed for EmptyReleases {
    async fn fetch_releases(&self, _repository: &str) -> Result<Vec<Release>, MirrorError> {
        Ok(Vec::new())
    }
}
