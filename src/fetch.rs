//! Conditional download of a single remote resource
//!
//! A fetch sends `If-Modified-Since` when the destination already exists,
//! writes the body only once it has been read completely, and stamps the file
//! with the server's `Last-Modified` date so the next run can be answered with
//! `304 Not Modified`.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest::header::{IF_MODIFIED_SINCE, LAST_MODIFIED};
use tracing::{debug, warn};

use crate::error::MirrorError;

/// HTTP date layout (RFC 7231, always GMT)
const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// Mode of every file written to the mirror
#[cfg(unix)]
const PUBLISHED_FILE_MODE: u32 = 0o644;

/// Result of a successful fetch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The body was written to the destination
    Downloaded,
    /// The server confirmed the local copy is current
    NotModified,
}

/// Downloads resources to local files, one at a time
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: reqwest::Client,
}

impl Fetcher {
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Fetch `url` into `destination`.
    ///
    /// Any status other than 200 or 304 is reported as
    /// [`MirrorError::FetchFailed`]; the existing destination is left intact.
    pub async fn fetch(&self, url: &str, destination: &Path) -> Result<FetchOutcome, MirrorError> {
        let mut request = self.client.get(url);

        if let Some(modified) = local_modification_time(destination) {
            let header = format_http_date(modified);
            debug!("{} exists, sending If-Modified-Since {}", destination.display(), header);
            request = request.header(IF_MODIFIED_SINCE, header);
        }

        let response = request.send().await?;
        let status = response.status();

        match status {
            StatusCode::OK => {}
            StatusCode::NOT_MODIFIED => {
                debug!("not modified: {}", url);
                return Ok(FetchOutcome::NotModified);
            }
            _ => {
                warn!("fetch returned status {}: {}", status, url);
                return Err(MirrorError::FetchFailed {
                    status,
                    url: url.to_string(),
                });
            }
        }

        let last_modified = response
            .headers()
            .get(LAST_MODIFIED)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);

        let body = response.bytes().await?;
        write_replacing(destination, &body)?;

        if let Some(modified) = last_modified {
            // not all filesystems let us set the timestamp; a fresh mtime only
            // costs a re-download on the next run
            let _ = set_modification_time(destination, modified).inspect_err(|e| {
                debug!("cannot set mtime of {}: {}", destination.display(), e);
            });
        }

        debug!("downloaded {} ({} bytes)", url, body.len());
        Ok(FetchOutcome::Downloaded)
    }

    /// Fetch a text resource, e.g. a published catalog or a team list.
    pub async fn get_text(&self, url: &str) -> Result<String, MirrorError> {
        Ok(self.get(url).await?.text().await?)
    }

    /// Fetch a resource into memory, unconditionally.
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>, MirrorError> {
        Ok(self.get(url).await?.bytes().await?.to_vec())
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, MirrorError> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(MirrorError::FetchFailed {
                status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }
}

/// Write `data` to `destination` through a temporary sibling renamed into place.
///
/// The file ends up world-readable so that any static file server can
/// publish the mirror.
pub fn write_replacing(destination: &Path, data: &[u8]) -> Result<(), MirrorError> {
    let parent = match destination.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut tmp = tempfile::NamedTempFile::new_in(parent)?;
    tmp.write_all(data)?;
    tmp.flush()?;
    make_readable(tmp.as_file())?;
    tmp.persist(destination).map_err(|e| e.error)?;
    Ok(())
}

// temporary files are created 0600
#[cfg(unix)]
fn make_readable(file: &std::fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(std::fs::Permissions::from_mode(PUBLISHED_FILE_MODE))
}

#[cfg(not(unix))]
fn make_readable(_file: &std::fs::File) -> std::io::Result<()> {
    Ok(())
}

fn local_modification_time(path: &Path) -> Option<SystemTime> {
    let metadata = std::fs::metadata(path).ok()?;
    if !metadata.is_file() {
        return None;
    }
    metadata.modified().ok()
}

fn set_modification_time(path: &Path, time: SystemTime) -> std::io::Result<()> {
    std::fs::File::options()
        .write(true)
        .open(path)?
        .set_modified(time)
}

pub fn format_http_date(time: SystemTime) -> String {
    DateTime::<Utc>::from(time).format(HTTP_DATE_FORMAT).to_string()
}

pub fn parse_http_date(value: &str) -> Option<SystemTime> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|dt| SystemTime::from(dt.with_timezone(&Utc)))
}

/// Resolve a mirror location to a local path when it is not an HTTP(S) URL.
///
/// `file:///srv/mirror` and `/srv/mirror` both map to `/srv/mirror`.
pub fn local_path(location: &str) -> Option<PathBuf> {
    if let Some(path) = location.strip_prefix("file://") {
        return Some(PathBuf::from(path));
    }
    if location.contains("://") {
        return None;
    }
    Some(PathBuf::from(location))
}

/// Append a relative resource name to a mirror URL.
pub fn join_url(base: &str, name: &str) -> String {
    if base.ends_with('/') {
        format!("{}{}", base, name)
    } else {
        format!("{}/{}", base, name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use rstest::rstest;
    use std::time::{Duration, UNIX_EPOCH};
    use tempfile::TempDir;

    const LAST_MODIFIED_VALUE: &str = "Wed, 21 Oct 2015 07:28:00 GMT";
    const LAST_MODIFIED_EPOCH: u64 = 1445412480;

    fn fetcher() -> Fetcher {
        Fetcher::new(reqwest::Client::new())
    }

    #[tokio::test]
    async fn fetch_writes_body_and_sets_remote_mtime() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.vsix")
            .match_header("if-modified-since", Matcher::Missing)
            .with_status(200)
            .with_header("last-modified", LAST_MODIFIED_VALUE)
            .with_body("payload")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/dir/pkg.vsix");

        let outcome = fetcher()
            .fetch(&format!("{}/pkg.vsix", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "payload");
        assert_eq!(
            std::fs::metadata(&dest).unwrap().modified().unwrap(),
            UNIX_EPOCH + Duration::from_secs(LAST_MODIFIED_EPOCH)
        );
    }

    #[tokio::test]
    async fn fetch_sends_if_modified_since_and_keeps_file_on_304() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.vsix")
            .match_header("if-modified-since", LAST_MODIFIED_VALUE)
            .with_status(304)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.vsix");
        std::fs::write(&dest, "local copy").unwrap();
        set_modification_time(&dest, UNIX_EPOCH + Duration::from_secs(LAST_MODIFIED_EPOCH))
            .unwrap();

        let outcome = fetcher()
            .fetch(&format!("{}/pkg.vsix", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome, FetchOutcome::NotModified);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "local copy");
    }

    #[tokio::test]
    async fn fetch_reports_status_and_leaves_existing_file_untouched() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/pkg.vsix")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("pkg.vsix");
        std::fs::write(&dest, "good file").unwrap();

        let result = fetcher()
            .fetch(&format!("{}/pkg.vsix", server.url()), &dest)
            .await;

        mock.assert_async().await;
        assert!(matches!(
            result,
            Err(MirrorError::FetchFailed {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                ..
            })
        ));
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "good file");
    }

    #[tokio::test]
    async fn fetch_reports_not_found_without_creating_file() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("missing.png");

        let result = fetcher()
            .fetch(&format!("{}/missing.png", server.url()), &dest)
            .await;

        mock.assert_async().await;
        assert!(matches!(result, Err(MirrorError::FetchFailed { .. })));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn fetch_without_last_modified_still_succeeds() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/plain")
            .with_status(200)
            .with_body("x")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("plain");

        let outcome = fetcher()
            .fetch(&format!("{}/plain", server.url()), &dest)
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(outcome, FetchOutcome::Downloaded);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "x");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn fetched_file_is_readable_by_group_and_others() {
        use std::os::unix::fs::PermissionsExt;

        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/pkg.deb")
            .with_status(200)
            .with_body("deb")
            .create_async()
            .await;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("code/pkg.deb");

        fetcher()
            .fetch(&format!("{}/pkg.deb", server.url()), &dest)
            .await
            .unwrap();

        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o644);
    }

    #[cfg(unix)]
    #[test]
    fn write_replacing_overwrites_with_published_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("data.json");
        std::fs::write(&dest, "old").unwrap();
        std::fs::set_permissions(&dest, std::fs::Permissions::from_mode(0o600)).unwrap();

        write_replacing(&dest, b"new").unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "new");
        let mode = std::fs::metadata(&dest).unwrap().permissions().mode();
        assert_eq!(mode & 0o044, 0o044);
    }

    #[test]
    fn http_date_formats_and_parses_symmetrically() {
        let time = UNIX_EPOCH + Duration::from_secs(LAST_MODIFIED_EPOCH);
        assert_eq!(format_http_date(time), LAST_MODIFIED_VALUE);
        assert_eq!(parse_http_date(LAST_MODIFIED_VALUE), Some(time));
        assert_eq!(parse_http_date("not a date"), None);
    }

    #[rstest]
    #[case("file:///srv/mirror", Some("/srv/mirror"))]
    #[case("/srv/mirror", Some("/srv/mirror"))]
    #[case("mirror", Some("mirror"))]
    #[case("http://host/mirror", None)]
    #[case("https://host", None)]
    fn local_path_returns_expected(#[case] location: &str, #[case] expected: Option<&str>) {
        assert_eq!(local_path(location), expected.map(PathBuf::from));
    }

    #[rstest]
    #[case("http://host/mirror", "data.json", "http://host/mirror/data.json")]
    #[case("http://host/mirror/", "vsix/a.vsix", "http://host/mirror/vsix/a.vsix")]
    fn join_url_returns_expected(#[case] base: &str, #[case] name: &str, #[case] expected: &str) {
        assert_eq!(join_url(base, name), expected);
    }
}
