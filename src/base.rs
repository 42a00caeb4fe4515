//! Base application package resolution
//!
//! Two sources are supported:
//!
//! - the update server, which answers `/<revision>/linux-deb-x64/<channel>`
//!   with a redirect whose path is `/<channel>/<commit>/<file.deb>`. Files are
//!   stored below `code/<commit>/` together with the server archives of the
//!   same commit.
//! - a Debian style package index (`Packages.gz`), from which the newest
//!   section of the configured package is taken. Files are stored below `code/`.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use indexmap::IndexMap;
use regex::Regex;
use reqwest::StatusCode;
use reqwest::header::LOCATION;
use tracing::{debug, info, warn};

use crate::catalog::types::BasePackage;
use crate::config::{BASE_DIR, BaseConfig, BaseSource};
use crate::error::MirrorError;
use crate::fetch::Fetcher;
use crate::version::VersionTuple;

/// Package index path below the repository URL
const INDEX_PATH: &str = "dists/stable/main/binary-amd64/Packages.gz";

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_(.+)_").expect("valid regex"));

/// Resolves and fetches the base application package
pub struct BaseResolver<'a> {
    fetcher: &'a Fetcher,
    /// Client that does not follow redirects
    redirect_client: &'a reqwest::Client,
    config: &'a BaseConfig,
    update_url: &'a str,
    index_url: &'a str,
    root: &'a Path,
    dry_run: bool,
}

impl<'a> BaseResolver<'a> {
    pub fn new(
        fetcher: &'a Fetcher,
        redirect_client: &'a reqwest::Client,
        config: &'a BaseConfig,
        root: &'a Path,
    ) -> Self {
        Self {
            fetcher,
            redirect_client,
            config,
            update_url: crate::config::DEFAULT_UPDATE_URL,
            index_url: crate::config::DEFAULT_PACKAGE_INDEX_URL,
            root,
            dry_run: false,
        }
    }

    pub fn with_endpoints(mut self, update_url: &'a str, index_url: &'a str) -> Self {
        self.update_url = update_url;
        self.index_url = index_url;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Resolve the current base package and fetch it when missing.
    pub async fn resolve(&self) -> Result<BasePackage, MirrorError> {
        match self.config.source {
            BaseSource::UpdateServer => self.resolve_from_update_server().await,
            BaseSource::PackageIndex => self.resolve_from_package_index().await,
        }
    }

    async fn resolve_from_update_server(&self) -> Result<BasePackage, MirrorError> {
        let channel = &self.config.channel;
        let revision = &self.config.revision;
        let url = format!("{}/{}/linux-deb-x64/{}", self.update_url, revision, channel);

        let location = self.redirect_target(&url).await?.ok_or_else(|| {
            MirrorError::ResourceUnavailable(format!("cannot get {} channel", channel))
        })?;
        let (commit_id, deb) = split_redirect_path(&location).ok_or_else(|| {
            MirrorError::ResourceUnavailable(format!("cannot parse url {}", location))
        })?;

        let tag = deb_tag(&deb)?;
        let version = tag.split('-').next().unwrap_or(&tag).to_string();
        let relative = format!("{}/{}/{}", BASE_DIR, commit_id, deb);
        let destination = self.root.join(&relative);

        if destination.is_file() {
            info!("{} {} is current", self.config.package, tag);
        } else {
            info!("{} {} downloading", self.config.package, tag);
            if self.fetch_to(location.as_str(), &destination).await {
                self.link_alias(revision, &commit_id)?;
                self.link_alias(&version, &commit_id)?;
            }
        }

        let mut server = Vec::new();
        for arch in &self.config.server_architectures {
            let name = format!("server-linux-{}", arch);
            let url = format!("{}/commit:{}/{}/{}", self.update_url, commit_id, name, channel);
            let Some(location) = self.redirect_target(&url).await.unwrap_or_else(|e| {
                warn!("Failed to resolve {}: {}", name, e);
                None
            }) else {
                continue;
            };
            let Some((_, file)) = split_redirect_path(&location) else {
                debug!("unexpected redirect for {}: {}", name, location);
                continue;
            };

            let destination = self.root.join(BASE_DIR).join(&commit_id).join(&file);
            if destination.is_file() {
                info!("{} {} is current", name, version);
            } else {
                info!("{} {} downloading", name, version);
                self.fetch_to(location.as_str(), &destination).await;
            }
            server.push(file);
        }

        Ok(BasePackage {
            version,
            tag,
            channel: Some(channel.clone()),
            commit_id: Some(commit_id),
            url: relative,
            deb,
            server,
        })
    }

    async fn resolve_from_package_index(&self) -> Result<BasePackage, MirrorError> {
        let url = format!("{}/{}", self.index_url, INDEX_PATH);
        let text = self.download_index(&url).await?;
        let sections = parse_package_index(&text)?;

        let latest = newest_section(&sections, &self.config.package).ok_or_else(|| {
            MirrorError::ResourceUnavailable(format!(
                "package {} not found in {}",
                self.config.package, url
            ))
        })?;
        let (Some(tag), Some(filename)) = (latest.get("version"), latest.get("filename")) else {
            return Err(MirrorError::ResourceUnavailable(format!(
                "incomplete index section for {}",
                self.config.package
            )));
        };

        let deb = filename.rsplit('/').next().unwrap_or(filename).to_string();
        let relative = format!("{}/{}", BASE_DIR, deb);
        let destination = self.root.join(&relative);

        if destination.is_file() {
            info!("{} {} is current", self.config.package, tag);
        } else {
            info!("{} {} downloading", self.config.package, tag);
            let package_url = format!("{}/{}", self.index_url, filename);
            self.fetch_to(&package_url, &destination).await;
        }

        Ok(BasePackage {
            version: tag.split('-').next().unwrap_or(tag).to_string(),
            tag: tag.clone(),
            channel: None,
            commit_id: None,
            url: relative,
            deb,
            server: Vec::new(),
        })
    }

    async fn redirect_target(&self, url: &str) -> Result<Option<reqwest::Url>, MirrorError> {
        let response = self.redirect_client.get(url).send().await?;
        if response.status() != StatusCode::FOUND {
            debug!("{} answered {}, expected a redirect", url, response.status());
            return Ok(None);
        }

        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                MirrorError::ResourceUnavailable(format!("redirect without location: {}", url))
            })?;

        reqwest::Url::parse(url)
            .and_then(|base| base.join(location))
            .map(Some)
            .map_err(|e| MirrorError::ResourceUnavailable(format!("bad redirect {}: {}", location, e)))
    }

    async fn download_index(&self, url: &str) -> Result<String, MirrorError> {
        let compressed = self.fetcher.get_bytes(url).await?;
        let mut text = String::new();
        GzDecoder::new(compressed.as_slice()).read_to_string(&mut text)?;
        Ok(text)
    }

    /// Fetch one file, logging failures. Returns whether the file is present.
    async fn fetch_to(&self, url: &str, destination: &Path) -> bool {
        if self.dry_run {
            debug!("dry run, not fetching {}", url);
            return false;
        }
        match self.fetcher.fetch(url, destination).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to fetch {}: {}", url, e);
                false
            }
        }
    }

    /// Point `code/<alias>` at the commit directory.
    fn link_alias(&self, alias: &str, commit_id: &str) -> Result<(), MirrorError> {
        let link = self.root.join(BASE_DIR).join(alias);
        if link.is_symlink() {
            std::fs::remove_file(&link)?;
        } else if link.exists() {
            warn!("{} exists and is not a link, leaving it", link.display());
            return Ok(());
        }

        #[cfg(unix)]
        std::os::unix::fs::symlink(commit_id, &link)?;
        #[cfg(not(unix))]
        debug!("symbolic links unsupported, {} -> {} skipped", alias, commit_id);

        Ok(())
    }
}

/// `(commit, file)` from a redirect path `/<channel>/<commit>/<file>`
fn split_redirect_path(url: &reqwest::Url) -> Option<(String, String)> {
    let parts: Vec<&str> = url.path().split('/').collect();
    if parts.len() != 4 {
        return None;
    }
    Some((parts[2].to_string(), parts[3].to_string()))
}

/// Text between the first and the last `_` of a package file name
fn deb_tag(deb: &str) -> Result<String, MirrorError> {
    TAG_RE
        .captures(deb)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
        .ok_or_else(|| MirrorError::ResourceUnavailable(format!("no version tag in {}", deb)))
}

/// One stanza of a package index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexSection {
    fields: IndexMap<String, String>,
    version: Option<VersionTuple>,
}

impl IndexSection {
    pub fn get(&self, key: &str) -> Option<&String> {
        self.fields.get(key)
    }

    pub fn version(&self) -> Option<&VersionTuple> {
        self.version.as_ref()
    }
}

/// Parse a Debian style package index.
///
/// Sections are separated by blank lines. Keys are lowercased, values left
/// trimmed, and lines starting with a space are appended verbatim to the
/// previous value. A `version` field that is not a numeric tuple aborts the
/// parse.
pub fn parse_package_index(text: &str) -> Result<Vec<IndexSection>, MirrorError> {
    let mut sections = Vec::new();
    let mut fields: IndexMap<String, String> = IndexMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split('\n') {
        if line.is_empty() {
            flush_field(&mut fields, &mut current);
            if !fields.is_empty() {
                sections.push(build_section(std::mem::take(&mut fields))?);
            }
        } else if line.starts_with(' ') {
            if let Some((_, value)) = current.as_mut() {
                value.push_str(line);
            }
        } else {
            flush_field(&mut fields, &mut current);
            match line.split_once(':') {
                Some((key, value)) => {
                    current = Some((key.to_lowercase(), value.trim_start().to_string()));
                }
                None => debug!("ignoring index line without key: {}", line),
            }
        }
    }
    flush_field(&mut fields, &mut current);
    if !fields.is_empty() {
        sections.push(build_section(fields)?);
    }

    Ok(sections)
}

fn flush_field(fields: &mut IndexMap<String, String>, current: &mut Option<(String, String)>) {
    if let Some((key, value)) = current.take()
        && !key.is_empty()
        && !value.is_empty()
    {
        fields.insert(key, value);
    }
}

fn build_section(fields: IndexMap<String, String>) -> Result<IndexSection, MirrorError> {
    let version = fields
        .get("version")
        .map(|v| v.parse::<VersionTuple>())
        .transpose()?;
    Ok(IndexSection { fields, version })
}

/// Newest section whose `package` field equals `package`
pub fn newest_section<'s>(sections: &'s [IndexSection], package: &str) -> Option<&'s IndexSection> {
    sections
        .iter()
        .filter(|s| s.get("package").is_some_and(|p| p == package))
        .filter(|s| s.version.is_some())
        .max_by(|a, b| a.version.cmp(&b.version))
}
