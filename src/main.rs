use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::{debug, error, info, warn};

use gallery_mirror::config::{self, CACHE_EXPIRY_MS, MirrorConfig, PLATFORMS, TEAM_FILE};
use gallery_mirror::fetch::Fetcher;
use gallery_mirror::gallery::cache::ResponseCache;
use gallery_mirror::gallery::{GitHubReleases, MarketplaceGallery};
use gallery_mirror::install::host::{self, detect_platform};
use gallery_mirror::install::reconcile::render_available;
use gallery_mirror::install::{Installer, InventoryReport, MirrorSource};
use gallery_mirror::logging::init_logging;
use gallery_mirror::process::SystemRunner;
use gallery_mirror::retention::{self, ArtifactKind};
use gallery_mirror::session::{MirrorOptions, MirrorSession};

/// Exit status when the mirror root or the catalog is unavailable
const EXIT_UNAVAILABLE: i32 = 2;

/// Root used when neither the command line nor the configuration names one
const DEFAULT_ROOT: &str = "web";

#[derive(Parser)]
#[command(name = "gallery-mirror")]
#[command(version, about = "Offline mirror of an extension gallery and its base application")]
struct Cli {
    /// Increase verbosity
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Mirror the base package and the configured extensions
    Mirror(MirrorArgs),
    /// Remove old versions from a mirror directory
    Purge(PurgeArgs),
    /// Print the configuration with installed and listed extensions
    Conf(ConfArgs),
    /// Install or update the application and its extensions from a mirror
    Install(InstallArgs),
}

#[derive(Args)]
struct MirrorArgs {
    /// Configuration file
    #[arg(short, long, default_value = "extensions.yaml")]
    config: PathBuf,
    /// Root directory of the mirror
    #[arg(short, long)]
    root: Option<PathBuf>,
    /// Required engine version
    #[arg(short, long)]
    engine: Option<String>,
    /// Number of old versions to keep
    #[arg(short, long, value_name = "N", num_args = 0..=1, default_missing_value = "10")]
    keep: Option<usize>,
    /// Report what would be done without fetching anything
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Do not mirror the base application
    #[arg(long)]
    no_code: bool,
    /// Do not bundle the language tools
    #[arg(long)]
    no_tools: bool,
    /// Cache gallery responses for an hour
    #[arg(long)]
    cache: bool,
}

#[derive(Args)]
struct PurgeArgs {
    /// Directory to purge (`vsix*` for extensions, anything else for base packages)
    dir: PathBuf,
    /// Number of old versions to keep
    #[arg(short, long, default_value_t = 0)]
    keep: usize,
    #[arg(short = 'n', long)]
    dry_run: bool,
}

#[derive(Args)]
struct ConfArgs {
    #[arg(short, long, default_value = "extensions.yaml")]
    config: PathBuf,
}

#[derive(Args)]
struct InstallArgs {
    /// Mirror URL or directory
    #[arg(default_value = ".")]
    url: String,
    /// Only report what would be done
    #[arg(short = 'n', long)]
    dry_run: bool,
    /// Override platform detection
    #[arg(short, long, value_parser = clap::builder::PossibleValuesParser::new(PLATFORMS))]
    platform: Option<String>,
    /// Install or update the application
    #[arg(short = 'C', long)]
    code: bool,
    /// Update installed extensions
    #[arg(short = 'E', long)]
    extensions: bool,
    /// Install the favorite extensions
    #[arg(short = 'F', long)]
    favorites: bool,
    /// Name of an extension list published on the mirror
    #[arg(short, long)]
    team: Option<String>,
    /// Install an extension
    #[arg(short, long = "install-extension")]
    install_extension: Vec<String>,
    /// List available extensions
    #[arg(short, long = "list-extensions")]
    list: bool,
    /// Update the application and the installed extensions
    #[arg(short, long)]
    update: bool,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let _guard = init_logging(cli.verbose, &config::log_path());

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    match cli.command {
        Command::Mirror(args) => runtime.block_on(run_mirror(args)),
        Command::Purge(args) => run_purge(args),
        Command::Conf(args) => runtime.block_on(run_conf(args)),
        Command::Install(args) => runtime.block_on(run_install(args)),
    }
}

fn load_config(path: &Path) -> anyhow::Result<MirrorConfig> {
    if !path.is_file() {
        debug!("{} not found, using defaults", path.display());
        return Ok(MirrorConfig::default());
    }
    Ok(MirrorConfig::load(path)?)
}

async fn run_mirror(args: MirrorArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;

    let root = args
        .root
        .or_else(|| config.web_root.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ROOT));
    let root = std::path::absolute(&root)?;
    if !root.is_dir() {
        error!("directory does not exist: {}", root.display());
        std::process::exit(EXIT_UNAVAILABLE);
    }

    let mut options = MirrorOptions::new(root);
    options.engine = args.engine;
    options.keep = args.keep.or(config.keep).unwrap_or(0);
    options.dry_run = args.dry_run;
    options.skip_base = args.no_code;
    options.tools = !args.no_tools;

    let mut session = MirrorSession::new(config, options)?;

    let endpoints = &session.config().endpoints;
    let mut gallery = MarketplaceGallery::new(session.client().clone(), &endpoints.gallery);
    if args.cache {
        let cache_path = config::cache_db_path();
        if let Some(parent) = cache_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let cache = ResponseCache::new(&cache_path, CACHE_EXPIRY_MS)?;
        let removed = cache.remove_expired()?;
        debug!("{} expired responses removed", removed);
        gallery = gallery.with_cache(Arc::new(cache));
    }
    let releases = GitHubReleases::new(session.client().clone(), &endpoints.releases);

    let summary = session.run(&gallery, &releases, &SystemRunner).await?;

    info!(
        "engine {}: {} extensions resolved, {} incompatible, {} not found",
        summary.engine, summary.resolved, summary.incompatible, summary.missing
    );
    info!(
        "{} downloaded, {} current, {} failed, {} old files purged",
        summary.fetch.downloaded,
        summary.fetch.current,
        summary.fetch.failed,
        summary.purged.len()
    );
    Ok(())
}

fn run_purge(args: PurgeArgs) -> anyhow::Result<()> {
    let kind = ArtifactKind::for_directory(&args.dir);
    let removed = retention::purge(&args.dir, kind, args.keep, args.dry_run)?;
    for path in &removed {
        println!("{}", path.display());
    }
    Ok(())
}

async fn run_conf(args: ConfArgs) -> anyhow::Result<()> {
    let config = load_config(&args.config)?;
    let installed = host::list_installed_ids(&SystemRunner).await;

    let report = InventoryReport::new(&config.extensions, &installed);
    print!("{}", serde_yaml_ng::to_string(&report)?);
    Ok(())
}

async fn run_install(mut args: InstallArgs) -> anyhow::Result<()> {
    let platform = args
        .platform
        .clone()
        .or_else(|| detect_platform().map(String::from));
    let Some(platform) = platform else {
        anyhow::bail!("Could not detect a supported platform");
    };

    let location = if args.url == "." {
        std::path::absolute(".")?.to_string_lossy().into_owned()
    } else {
        args.url.clone()
    };
    let source = MirrorSource::new(&location, Fetcher::new(reqwest::Client::new()));

    let catalog = match source.load_catalog().await {
        Ok(catalog) => catalog,
        Err(e) => {
            error!("Cannot retrieve data: {}", e);
            std::process::exit(EXIT_UNAVAILABLE);
        }
    };

    if args.list {
        print!("{}", render_available(&catalog));
        return Ok(());
    }

    if args.update {
        args.code = true;
        args.extensions = true;
    }
    // no explicit action: do everything
    if !(args.code || args.extensions || args.favorites || !args.install_extension.is_empty()) {
        args.code = true;
        args.extensions = true;
        args.favorites = true;
    }

    let runner = SystemRunner;
    let installer = Installer::new(&source, &runner, Some(platform))
        .context("cannot create scratch directory")?
        .dry_run(args.dry_run);

    if args.code {
        installer.update_base(&catalog).await?;
    }

    let processed = if args.extensions {
        installer.update_extensions(&catalog).await?
    } else {
        Default::default()
    };

    if args.favorites || args.team.is_some() || !args.install_extension.is_empty() {
        let mut wanted = args.install_extension.clone();
        if args.favorites || args.team.is_some() {
            let team = args
                .team
                .clone()
                .unwrap_or_else(|| TEAM_FILE.trim_end_matches(".json").to_string());
            match source.load_team(&team).await {
                Ok(list) => wanted.extend(list),
                Err(e) => warn!("no extension list {}: {}", team, e),
            }
        }
        installer
            .install_extensions(&catalog, &wanted, &processed)
            .await?;
    }

    Ok(())
}
