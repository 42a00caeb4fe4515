//! Diff of installed extensions against a mirrored catalog
//!
//! Planning is pure: [`plan_updates`] and [`plan_installs`] only look at the
//! catalog and the inventory. [`Installer`] executes a plan, one command at a
//! time, and runs the deferred [`PostAction`]s once at the end.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;
use tempfile::TempDir;
use tracing::{error, info, warn};

use crate::catalog::Catalog;
use crate::catalog::tools::unpack_archive;
use crate::config::{CPPTOOLS_KEY, GO_KEY, TOOLS_ARCHIVE};
use crate::error::MirrorError;
use crate::install::host::{self, InstalledPackage};
use crate::install::source::MirrorSource;
use crate::process::{CommandRunner, CommandSpec};

/// What to do about one extension
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Not in the catalog, nothing to do
    NotFound,
    UpToDate { version: String },
    Upgrade {
        from: String,
        to: String,
        artifact: String,
    },
    Install { version: String, artifact: String },
}

/// Work deferred until every extension has been handled
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PostAction {
    /// Unpack the tool bundle and build the recorded tools
    SyncTools,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Catalog key, or the requested identifier when not found
    pub key: String,
    pub action: Action,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plan {
    pub decisions: Vec<Decision>,
    pub post_actions: Vec<PostAction>,
    /// Identifiers already handled, excluded from later install lists
    pub processed: HashSet<String>,
}

impl Plan {
    fn defer(&mut self, action: PostAction) {
        if !self.post_actions.contains(&action) {
            self.post_actions.push(action);
        }
    }
}

/// The helper is mirrored per platform; look it up under its platform key.
fn platform_key(id: &str, platform: Option<&str>) -> String {
    match platform {
        Some(platform) if id.eq_ignore_ascii_case(CPPTOOLS_KEY) => format!("{}-{}", id, platform),
        _ => id.to_string(),
    }
}

/// Compare installed extensions with the catalog.
pub fn plan_updates(catalog: &Catalog, installed: &[InstalledPackage], platform: Option<&str>) -> Plan {
    let mut plan = Plan::default();

    for package in installed {
        let key = platform_key(&package.id, platform);
        plan.processed.insert(key.clone());

        let Some((catalog_key, entry)) = catalog.find(&key) else {
            plan.decisions.push(Decision {
                key,
                action: Action::NotFound,
            });
            continue;
        };

        let action = if entry.version == package.version {
            Action::UpToDate {
                version: package.version.clone(),
            }
        } else {
            Action::Upgrade {
                from: package.version.clone(),
                to: entry.version.clone(),
                artifact: entry.artifact.clone(),
            }
        };
        if catalog_key.eq_ignore_ascii_case(GO_KEY) {
            plan.defer(PostAction::SyncTools);
        }
        plan.decisions.push(Decision {
            key: catalog_key.to_string(),
            action,
        });
    }
    plan
}

/// Plan the installation of requested extensions not yet processed.
///
/// An identifier missing from the catalog is retried as `<id>-<platform>`.
pub fn plan_installs(
    catalog: &Catalog,
    wanted: &[String],
    processed: &HashSet<String>,
    platform: Option<&str>,
) -> Plan {
    let mut plan = Plan::default();
    let mut seen = HashSet::new();

    for id in wanted {
        if processed.contains(id) || !seen.insert(id.clone()) {
            continue;
        }
        let found = catalog.find(id).or_else(|| {
            platform.and_then(|p| catalog.find(&format!("{}-{}", id, p)))
        });
        let Some((key, entry)) = found else {
            plan.decisions.push(Decision {
                key: id.clone(),
                action: Action::NotFound,
            });
            continue;
        };

        if key.eq_ignore_ascii_case(GO_KEY) {
            plan.defer(PostAction::SyncTools);
        }
        plan.processed.insert(key.to_string());
        plan.decisions.push(Decision {
            key: key.to_string(),
            action: Action::Install {
                version: entry.version.clone(),
                artifact: entry.artifact.clone(),
            },
        });
    }
    plan
}

/// Fail when running with root privileges
pub fn ensure_unprivileged(privileged: bool) -> Result<(), MirrorError> {
    if privileged {
        return Err(MirrorError::PrivilegedExecutionRefused);
    }
    Ok(())
}

/// Available extensions, one `key | description` line each, sorted by key
pub fn render_available(catalog: &Catalog) -> String {
    let mut keys: Vec<&String> = catalog.extensions.keys().collect();
    keys.sort();
    let width = keys.iter().map(|k| k.len()).max().unwrap_or(0);

    let mut out = String::new();
    for key in keys {
        let entry = &catalog.extensions[key.as_str()];
        out.push_str(&format!(
            "{:width$} | {:>8} | {}\n",
            key,
            entry.version,
            entry.description,
            width = width
        ));
    }
    out
}

/// Listed versus installed extensions
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InventoryReport {
    pub extensions: Vec<String>,
    pub installed: Vec<String>,
    pub not_installed: Vec<String>,
    pub not_listed: Vec<String>,
}

impl InventoryReport {
    pub fn new(listed: &[String], installed: &[String]) -> Self {
        let listed_set: HashSet<&String> = listed.iter().collect();
        let installed_set: HashSet<&String> = installed.iter().collect();

        let mut report = Self {
            extensions: listed.to_vec(),
            installed: installed.to_vec(),
            not_installed: listed
                .iter()
                .filter(|id| !installed_set.contains(id))
                .cloned()
                .collect(),
            not_listed: installed
                .iter()
                .filter(|id| !listed_set.contains(id))
                .cloned()
                .collect(),
        };
        report.installed.sort();
        report.not_installed.sort();
        report.not_listed.sort();
        report
    }
}

/// Executes plans against the local machine
pub struct Installer<'a> {
    source: &'a MirrorSource,
    runner: &'a dyn CommandRunner,
    platform: Option<String>,
    dry_run: bool,
    privileged: bool,
    /// Where the tool bundle is unpacked
    tools_root: PathBuf,
    scratch: TempDir,
}

impl<'a> Installer<'a> {
    pub fn new(
        source: &'a MirrorSource,
        runner: &'a dyn CommandRunner,
        platform: Option<String>,
    ) -> Result<Self, MirrorError> {
        Ok(Self {
            source,
            runner,
            platform,
            dry_run: false,
            privileged: crate::process::is_privileged(),
            tools_root: dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")),
            scratch: TempDir::new()?,
        })
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn tools_root(mut self, dir: PathBuf) -> Self {
        self.tools_root = dir;
        self
    }

    /// Upgrade every installed extension that has a newer catalog version.
    ///
    /// Returns the identifiers handled, so that install lists skip them.
    pub async fn update_extensions(&self, catalog: &Catalog) -> Result<HashSet<String>, MirrorError> {
        ensure_unprivileged(self.privileged)?;

        info!("fetching installed extensions");
        let installed = host::list_installed(self.runner).await?;
        let plan = plan_updates(catalog, &installed, self.platform.as_deref());
        self.execute(catalog, &plan).await;
        Ok(plan.processed)
    }

    /// Install the requested extensions that were not already handled.
    pub async fn install_extensions(
        &self,
        catalog: &Catalog,
        wanted: &[String],
        processed: &HashSet<String>,
    ) -> Result<(), MirrorError> {
        ensure_unprivileged(self.privileged)?;

        let plan = plan_installs(catalog, wanted, processed, self.platform.as_deref());
        self.execute(catalog, &plan).await;
        Ok(())
    }

    /// Install or update the application package when its tag differs.
    pub async fn update_base(&self, catalog: &Catalog) -> Result<(), MirrorError> {
        let Some(base) = &catalog.code else {
            warn!("the mirror holds no application package");
            return Ok(());
        };

        let installed = match host::installed_base_tag(self.runner).await {
            Ok(tag) => tag,
            Err(e) => {
                warn!("cannot query the installed application version: {}", e);
                return Ok(());
            }
        };

        match &installed {
            Some(tag) if *tag == base.tag => {
                info!("application up to date: {} ({})", base.version, base.tag);
                return Ok(());
            }
            Some(tag) => info!("updating application from {} to {} ({})", tag, base.version, base.tag),
            None => info!("installing application {} ({})", base.version, base.tag),
        }

        if self.dry_run {
            return Ok(());
        }

        let package = self.source.artifact(&base.url, self.scratch.path()).await?;
        host::install_base(self.runner, &package, self.privileged).await?;

        if let Some(settings) = dirs::config_dir().map(|d| d.join("Code/User/settings.json"))
            && host::write_default_settings(&settings)?
        {
            info!("created {}", settings.display());
        }
        Ok(())
    }

    async fn execute(&self, catalog: &Catalog, plan: &Plan) {
        for decision in &plan.decisions {
            let key = &decision.key;
            let artifact = match &decision.action {
                Action::NotFound => {
                    warn!("extension not found: {}", key);
                    continue;
                }
                Action::UpToDate { version } => {
                    info!("extension up to date: {} ({})", key, version);
                    continue;
                }
                Action::Upgrade { from, to, artifact } => {
                    info!("updating {} from {} to {}", key, from, to);
                    artifact
                }
                Action::Install { version, artifact } => {
                    info!("installing {} {}", key, version);
                    artifact
                }
            };

            if let Err(e) = self.install_artifact(artifact).await {
                error!("error for {}: {}", key, e);
            }
        }

        for action in &plan.post_actions {
            match action {
                PostAction::SyncTools => {
                    if let Err(e) = self.sync_tools(catalog).await {
                        error!("Failed to sync tools: {}", e);
                    }
                }
            }
        }
    }

    async fn install_artifact(&self, artifact: &str) -> Result<(), MirrorError> {
        if self.dry_run {
            info!("would run: code --install-extension {}", artifact);
            return Ok(());
        }
        let path = self.source.artifact(artifact, self.scratch.path()).await?;
        host::install_extension(self.runner, &path).await?;
        Ok(())
    }

    async fn sync_tools(&self, catalog: &Catalog) -> Result<(), MirrorError> {
        info!("syncing tools");
        let tools = catalog.go_tools.clone().unwrap_or_default();

        if self.dry_run {
            info!("would unpack {} into {}", TOOLS_ARCHIVE, self.tools_root.display());
        } else {
            let archive = self.source.artifact(TOOLS_ARCHIVE, self.scratch.path()).await?;
            unpack_archive(&archive, &self.tools_root)?;
        }

        for tool in tools.values() {
            let cmd = CommandSpec::new("go", ["get", tool.import_path.as_str()]);
            if self.dry_run {
                info!("would run: {}", cmd.display());
                continue;
            }
            info!("installing {}", tool.name);
            match self.runner.run(&cmd).await {
                Ok(output) if !output.success() => {
                    warn!("go get {} exited with {:?}", tool.import_path, output.code)
                }
                Ok(_) => {}
                Err(e) => warn!("Failed to run go get {}: {}", tool.import_path, e),
            }
        }
        Ok(())
    }
}
