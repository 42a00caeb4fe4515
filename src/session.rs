//! One mirror run
//!
//! [`MirrorSession`] owns everything a run needs (configuration, HTTP clients,
//! the catalog being built) and drives the steps in order: base package,
//! engine, gallery resolution, fetching, tool bundle, catalog files and
//! retention.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::base::BaseResolver;
use crate::catalog::tools::{self, ToolMap};
use crate::catalog::{Catalog, CatalogBuilder, FetchReport, PostAction};
use crate::config::{
    ARTIFACT_DIR, BASE_DIR, HTTP_CONNECT_TIMEOUT_SECS, HTTP_READ_TIMEOUT_SECS, MirrorConfig,
    tools_disabled_by_env,
};
use crate::error::MirrorError;
use crate::fetch::Fetcher;
use crate::gallery::{Gallery, ReleaseFeed, resolve_packages};
use crate::process::CommandRunner;
use crate::retention::{self, ArtifactKind};
use crate::version::EngineVersion;

/// Options of one run, usually from the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MirrorOptions {
    pub root: PathBuf,
    /// Engine override, taking precedence over the configuration
    pub engine: Option<String>,
    /// Historical versions kept per package
    pub keep: usize,
    pub dry_run: bool,
    /// Skip the base application package
    pub skip_base: bool,
    /// Bundle the auxiliary tools of the language tooling extension
    pub tools: bool,
}

impl MirrorOptions {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            engine: None,
            keep: 0,
            dry_run: false,
            skip_base: false,
            tools: true,
        }
    }
}

/// What a run did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MirrorSummary {
    pub engine: String,
    pub resolved: usize,
    pub incompatible: usize,
    pub missing: usize,
    pub fetch: FetchReport,
    pub purged: Vec<PathBuf>,
}

pub struct MirrorSession {
    config: MirrorConfig,
    options: MirrorOptions,
    client: reqwest::Client,
    redirect_client: reqwest::Client,
    fetcher: Fetcher,
    catalog: Catalog,
}

impl MirrorSession {
    pub fn new(config: MirrorConfig, options: MirrorOptions) -> Result<Self, MirrorError> {
        let read_timeout = Duration::from_secs(HTTP_READ_TIMEOUT_SECS);
        let client = http_client(read_timeout, true)?;
        let redirect_client = http_client(read_timeout, false)?;

        Ok(Self {
            fetcher: Fetcher::new(client.clone()),
            config,
            options,
            client,
            redirect_client,
            catalog: Catalog::default(),
        })
    }

    /// Shared HTTP client, for the gallery and the release feed
    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn config(&self) -> &MirrorConfig {
        &self.config
    }

    pub fn root(&self) -> &Path {
        &self.options.root
    }

    /// The catalog built by the last run
    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Engine from the override, else from the base package, else `*`.
    pub fn engine(&self) -> Result<EngineVersion, MirrorError> {
        let engine_override = self.options.engine.as_ref().or(self.config.engine.as_ref());
        if let Some(value) = engine_override {
            return Ok(EngineVersion::from_override(value)?);
        }
        match &self.catalog.code {
            Some(base) => Ok(EngineVersion::from_application_version(&base.version)?),
            None => Ok(EngineVersion::Any),
        }
    }

    /// Extensions to mirror, in configuration order without duplicates
    fn requested_extensions(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for name in &self.config.extensions {
            if !names.contains(name) {
                names.push(name.clone());
            }
        }
        names
    }

    fn tools_enabled(&self) -> bool {
        self.options.tools && self.config.tools.enabled && !tools_disabled_by_env()
    }

    /// Mirror everything and rewrite the catalog.
    ///
    /// A failing gallery query aborts the run; a failing base package or
    /// individual artifact is logged and skipped.
    pub async fn run(
        &mut self,
        gallery: &dyn Gallery,
        releases: &dyn ReleaseFeed,
        runner: &dyn CommandRunner,
    ) -> Result<MirrorSummary, MirrorError> {
        self.catalog = Catalog::default();

        if !self.options.skip_base {
            self.catalog.code = self.resolve_base().await;
        }

        let engine = self.engine()?;
        info!("using engine version {}", engine);

        let names = self.requested_extensions();
        let resolution = resolve_packages(gallery, &names, &engine).await?;

        let endpoints = &self.config.endpoints;
        let builder = CatalogBuilder::new(&self.fetcher, &self.options.root)
            .with_urls(&endpoints.marketplace, &endpoints.default_icon)
            .with_platforms(self.config.cpptools_platforms())
            .dry_run(self.options.dry_run);

        let mut catalog = std::mem::take(&mut self.catalog);
        builder
            .add_packages(&mut catalog, &resolution.resolved, releases)
            .await;
        let (report, actions) = builder.fetch_assets(&catalog).await;

        for action in actions {
            match action {
                PostAction::BundleTools { artifact } => {
                    catalog.go_tools = Some(self.bundle_tools(&artifact, runner).await);
                }
            }
        }

        builder.write(&catalog)?;
        self.catalog = catalog;

        let purged = self.purge()?;

        Ok(MirrorSummary {
            engine: engine.to_string(),
            resolved: resolution.resolved.len(),
            incompatible: resolution.incompatible.len(),
            missing: resolution.missing.len(),
            fetch: report,
            purged,
        })
    }

    async fn resolve_base(&self) -> Option<crate::catalog::BasePackage> {
        let endpoints = &self.config.endpoints;
        BaseResolver::new(
            &self.fetcher,
            &self.redirect_client,
            &self.config.base,
            &self.options.root,
        )
        .with_endpoints(&endpoints.update, &endpoints.package_index)
        .dry_run(self.options.dry_run)
        .resolve()
        .await
        .inspect_err(|e| error!("Failed to resolve the base package: {}", e))
        .ok()
    }

    async fn bundle_tools(&self, artifact: &Path, runner: &dyn CommandRunner) -> ToolMap {
        if !self.tools_enabled() {
            info!("tool sync disabled");
            return ToolMap::new();
        }

        let definitions = match tools::extract_tool_definitions(artifact) {
            Ok(definitions) => definitions,
            Err(e) => {
                warn!("Failed to read tools from {}: {}", artifact.display(), e);
                return ToolMap::new();
            }
        };
        info!("{} tools found", definitions.len());

        let all = self.config.tools.all;
        if let Err(e) =
            tools::bundle_tools(&self.options.root, &definitions, runner, all, self.options.dry_run).await
        {
            warn!("Failed to bundle tools: {}", e);
        }
        definitions
    }

    /// Drop old base packages and extension artifacts.
    pub fn purge(&self) -> Result<Vec<PathBuf>, MirrorError> {
        let keep = self.options.keep;
        let root = &self.options.root;
        let mut purged = retention::purge(
            &root.join(BASE_DIR),
            ArtifactKind::BasePackage,
            keep,
            self.options.dry_run,
        )?;
        purged.extend(retention::purge(
            &root.join(ARTIFACT_DIR),
            ArtifactKind::Extension,
            keep,
            self.options.dry_run,
        )?);
        Ok(purged)
    }
}

/// HTTP client bounding connection setup and idle reads, never the whole transfer.
fn http_client(read_timeout: Duration, follow_redirects: bool) -> Result<reqwest::Client, MirrorError> {
    let mut builder = reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(HTTP_CONNECT_TIMEOUT_SECS))
        .read_timeout(read_timeout);
    if !follow_redirects {
        builder = builder.redirect(reqwest::redirect::Policy::none());
    }
    Ok(builder.build()?)
}
