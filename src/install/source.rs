//! Access to a published mirror, local or remote

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::catalog::Catalog;
use crate::config::CATALOG_FILE;
use crate::error::MirrorError;
use crate::fetch::{Fetcher, join_url, local_path};

/// A mirror location: an HTTP(S) URL, a `file://` URL or a plain path
pub struct MirrorSource {
    location: String,
    fetcher: Fetcher,
}

impl MirrorSource {
    pub fn new(location: &str, fetcher: Fetcher) -> Self {
        Self {
            location: location.to_string(),
            fetcher,
        }
    }

    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn is_local(&self) -> bool {
        local_path(&self.location).is_some()
    }

    /// Load the published catalog.
    pub async fn load_catalog(&self) -> Result<Catalog, MirrorError> {
        let text = self.load_text(CATALOG_FILE).await?;
        Catalog::from_json(&text).map_err(|e| {
            MirrorError::ResourceUnavailable(format!("{} is not a catalog: {}", CATALOG_FILE, e))
        })
    }

    /// Load a named extension list (`<name>.json`, a JSON array of identifiers).
    pub async fn load_team(&self, name: &str) -> Result<Vec<String>, MirrorError> {
        let file = format!("{}.json", name);
        let text = self.load_text(&file).await?;
        serde_json::from_str(&text).map_err(|e| {
            MirrorError::ResourceUnavailable(format!("{} is not a list: {}", file, e))
        })
    }

    /// Local path of a mirrored file, downloading it into `scratch` when remote.
    pub async fn artifact(&self, relative: &str, scratch: &Path) -> Result<PathBuf, MirrorError> {
        if let Some(root) = local_path(&self.location) {
            return Ok(root.join(relative));
        }

        let name = relative.rsplit('/').next().unwrap_or(relative);
        let destination = scratch.join(name);
        let url = join_url(&self.location, relative);
        debug!("downloading {} to {}", url, destination.display());
        self.fetcher.fetch(&url, &destination).await?;
        Ok(destination)
    }

    async fn load_text(&self, name: &str) -> Result<String, MirrorError> {
        let result = match local_path(&self.location) {
            Some(root) => std::fs::read_to_string(root.join(name)).map_err(MirrorError::from),
            None => self.fetcher.get_text(&join_url(&self.location, name)).await,
        };
        result.map_err(|e| {
            warn!("cannot get resource {}: {}", name, e);
            MirrorError::ResourceUnavailable(format!("{} from {}: {}", name, self.location, e))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use tempfile::TempDir;

    const CATALOG: &str = r#"{
    "extensions": {
        "golang.Go": {
            "version": "0.9.2",
            "vsix": "vsix/golang.Go-0.9.2.vsix",
            "vsixAsset": "https://cdn/go",
            "url": "https://marketplace/items?itemName=golang.Go",
            "icon": "icons/golang.Go.png",
            "iconAsset": "https://cdn/go/icon",
            "name": "Go",
            "description": "Rich Go language support",
            "author": "Go Team",
            "authorUrl": "https://marketplace/publishers/golang",
            "lastUpdated": "2019/01/15&nbsp;18:22:33"
        }
    }
}"#;

    fn source(location: &str) -> MirrorSource {
        MirrorSource::new(location, Fetcher::new(reqwest::Client::new()))
    }

    #[tokio::test]
    async fn local_catalog_and_artifact() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CATALOG_FILE), CATALOG).unwrap();
        let location = format!("file://{}", dir.path().display());

        let source = source(&location);
        let catalog = source.load_catalog().await.unwrap();
        assert_eq!(catalog.extensions["golang.Go"].version, "0.9.2");

        let scratch = TempDir::new().unwrap();
        let path = source
            .artifact("vsix/golang.Go-0.9.2.vsix", scratch.path())
            .await
            .unwrap();
        assert_eq!(path, dir.path().join("vsix/golang.Go-0.9.2.vsix"));
    }

    #[tokio::test]
    async fn remote_catalog_and_artifact() {
        let mut server = Server::new_async().await;
        let _catalog = server
            .mock("GET", "/mirror/data.json")
            .with_status(200)
            .with_body(CATALOG)
            .create_async()
            .await;
        let _artifact = server
            .mock("GET", "/mirror/vsix/golang.Go-0.9.2.vsix")
            .with_status(200)
            .with_body("zip")
            .create_async()
            .await;

        let source = source(&format!("{}/mirror/", server.url()));
        assert!(!source.is_local());
        let catalog = source.load_catalog().await.unwrap();
        assert_eq!(catalog.extensions.len(), 1);

        let scratch = TempDir::new().unwrap();
        let path = source
            .artifact("vsix/golang.Go-0.9.2.vsix", scratch.path())
            .await
            .unwrap();
        assert_eq!(path, scratch.path().join("golang.Go-0.9.2.vsix"));
        assert_eq!(std::fs::read_to_string(path).unwrap(), "zip");
    }

    #[tokio::test]
    async fn unreachable_catalog_is_unavailable() {
        let mut server = Server::new_async().await;
        let _catalog = server
            .mock("GET", "/data.json")
            .with_status(404)
            .create_async()
            .await;

        let result = source(&server.url()).load_catalog().await;
        assert!(matches!(result, Err(MirrorError::ResourceUnavailable(_))));
    }

    #[tokio::test]
    async fn malformed_catalog_is_unavailable() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CATALOG_FILE), "{\"extensions\": [").unwrap();

        let result = source(&dir.path().to_string_lossy()).load_catalog().await;
        assert!(matches!(result, Err(MirrorError::ResourceUnavailable(_))));
    }

    #[tokio::test]
    async fn team_list_is_a_json_array() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("backend.json"), r#"["golang.Go", "ms-python.python"]"#)
            .unwrap();

        let team = source(&dir.path().to_string_lossy())
            .load_team("backend")
            .await
            .unwrap();
        assert_eq!(team, vec!["golang.Go", "ms-python.python"]);
    }
}
