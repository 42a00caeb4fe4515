//! Gallery trait and its HTTP implementation

use std::sync::Arc;

#[cfg(test)]
use mockall::automock;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use tracing::{debug, warn};

use crate::error::MirrorError;
use crate::gallery::cache::ResponseCache;
use crate::gallery::types::{GalleryQuery, PackageRecord, QueryResponse};

/// API version negotiated with the gallery
const ACCEPT_HEADER: &str = "application/json;api-version=3.0-preview.1";

/// Trait for running batched queries against an extension gallery
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait Gallery: Send + Sync {
    /// Runs one batched query and returns the package records of the first result set
    async fn query(&self, query: &GalleryQuery) -> Result<Vec<PackageRecord>, MirrorError>;
}

/// Gallery implementation for the marketplace `extensionquery` endpoint
pub struct MarketplaceGallery {
    client: reqwest::Client,
    url: String,
    cache: Option<Arc<ResponseCache>>,
}

impl MarketplaceGallery {
    pub fn new(client: reqwest::Client, url: &str) -> Self {
        Self {
            client,
            url: url.to_string(),
            cache: None,
        }
    }

    /// Reuse recent responses from `cache` for identical queries
    pub fn with_cache(mut self, cache: Arc<ResponseCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    fn cached(&self, body: &str) -> Option<String> {
        let cache = self.cache.as_ref()?;
        cache
            .get(&self.url, body)
            .inspect_err(|e| warn!("Failed to read response cache: {}", e))
            .ok()
            .flatten()
    }

    fn store(&self, body: &str, response: &str) {
        if let Some(cache) = &self.cache {
            let _ = cache
                .put(&self.url, body, response)
                .inspect_err(|e| warn!("Failed to store response in cache: {}", e));
        }
    }
}

#[async_trait::async_trait]
impl Gallery for MarketplaceGallery {
    async fn query(&self, query: &GalleryQuery) -> Result<Vec<PackageRecord>, MirrorError> {
        let body = serde_json::to_string(query)?;

        let text = match self.cached(&body) {
            Some(text) => {
                debug!("gallery response served from cache");
                text
            }
            None => {
                let response = self
                    .client
                    .post(&self.url)
                    .header(CONTENT_TYPE, "application/json")
                    .header(ACCEPT, ACCEPT_HEADER)
                    .body(body.clone())
                    .send()
                    .await?;

                let status = response.status();
                if !status.is_success() {
                    warn!("gallery returned status {}: {}", status, self.url);
                    return Err(MirrorError::FetchFailed {
                        status,
                        url: self.url.clone(),
                    });
                }

                let text = response.text().await?;
                self.store(&body, &text);
                text
            }
        };

        let response: QueryResponse = serde_json::from_str(&text).map_err(|e| {
            warn!("Failed to parse gallery response: {}", e);
            MirrorError::ResourceUnavailable(format!("invalid gallery response: {}", e))
        })?;

        Ok(response.into_packages())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CACHE_EXPIRY_MS;
    use mockito::{Matcher, Server};
    use serde_json::json;
    use tempfile::TempDir;

    const RESPONSE: &str = r#"{
        "results": [{
            "extensions": [{
                "extensionId": "id-1",
                "extensionName": "python",
                "displayName": "Python",
                "shortDescription": "Linting, Debugging",
                "publisher": {"publisherName": "ms-python", "displayName": "Microsoft"},
                "versions": [{
                    "version": "2019.1.0",
                    "lastUpdated": "2019-01-15T18:22:33.12Z",
                    "assetUri": "https://cdn/python/2019.1.0",
                    "properties": [{"key": "Microsoft.VisualStudio.Code.Engine", "value": "^1.26.0"}]
                }]
            }]
        }]
    }"#;

    #[tokio::test]
    async fn query_posts_body_and_parses_records() {
        let mut server = Server::new_async().await;
        let query = GalleryQuery::latest_by_names(["ms-python.python"]);

        let mock = server
            .mock("POST", "/extensionquery")
            .match_header("accept", ACCEPT_HEADER)
            .match_header("content-type", "application/json")
            .match_body(Matcher::Json(serde_json::to_value(&query).unwrap()))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(RESPONSE)
            .create_async()
            .await;

        let gallery = MarketplaceGallery::new(
            reqwest::Client::new(),
            &format!("{}/extensionquery", server.url()),
        );
        let packages = gallery.query(&query).await.unwrap();

        mock.assert_async().await;
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].identity().to_string(), "ms-python.python");
        assert_eq!(packages[0].description(), "Linting, Debugging");
    }

    #[tokio::test]
    async fn query_reports_status_failure() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/extensionquery")
            .with_status(503)
            .create_async()
            .await;

        let gallery = MarketplaceGallery::new(
            reqwest::Client::new(),
            &format!("{}/extensionquery", server.url()),
        );
        let result = gallery
            .query(&GalleryQuery::latest_by_names(["a.b"]))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(MirrorError::FetchFailed { .. })));
    }

    #[tokio::test]
    async fn query_reports_malformed_record_as_unavailable() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/extensionquery")
            .with_status(200)
            .with_body(
                json!({"results": [{"extensions": [{"extensionId": "x"}]}]}).to_string(),
            )
            .create_async()
            .await;

        let gallery = MarketplaceGallery::new(
            reqwest::Client::new(),
            &format!("{}/extensionquery", server.url()),
        );
        let result = gallery
            .query(&GalleryQuery::latest_by_names(["a.b"]))
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(MirrorError::ResourceUnavailable(_))));
    }

    #[tokio::test]
    async fn query_reuses_cached_response() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/extensionquery")
            .with_status(200)
            .with_body(RESPONSE)
            .expect(1)
            .create_async()
            .await;

        let temp_dir = TempDir::new().unwrap();
        let cache = Arc::new(
            ResponseCache::new(&temp_dir.path().join("cache.db"), CACHE_EXPIRY_MS).unwrap(),
        );
        let gallery = MarketplaceGallery::new(
            reqwest::Client::new(),
            &format!("{}/extensionquery", server.url()),
        )
        .with_cache(cache);

        let query = GalleryQuery::latest_by_names(["ms-python.python"]);
        let first = gallery.query(&query).await.unwrap();
        let second = gallery.query(&query).await.unwrap();

        mock.assert_async().await;
        assert_eq!(first, second);
    }
}
