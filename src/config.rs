use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// =============================================================================
// Remote endpoints
// =============================================================================

/// Gallery query endpoint
pub const DEFAULT_GALLERY_URL: &str =
    "https://marketplace.visualstudio.com/_apis/public/gallery/extensionquery";

/// Base URL used for item and publisher pages in the catalog
pub const MARKETPLACE_URL: &str = "https://marketplace.visualstudio.com";

/// Release feed holding the per-platform installers of the native tooling helper
pub const DEFAULT_RELEASES_URL: &str = "https://api.github.com";

/// Update server answering with a redirect to the current base package
pub const DEFAULT_UPDATE_URL: &str = "https://update.code.visualstudio.com";

/// Debian style repository of the base application
pub const DEFAULT_PACKAGE_INDEX_URL: &str = "https://packages.microsoft.com/repos/vscode";

/// Icon used when an extension's own icon cannot be fetched
pub const DEFAULT_ICON_URL: &str =
    "https://cdn.vsassets.io/v/20180521T120403/_content/Header/default_icon.png";

// =============================================================================
// Well-known packages
// =============================================================================

/// Native debugger/tooling helper, shipped as one installer per platform
pub const CPPTOOLS_KEY: &str = "ms-vscode.cpptools";

/// Language tooling extension whose sub-tools are mirrored alongside it
pub const GO_KEY: &str = "golang.Go";

/// Platform tags the installer understands
pub const PLATFORMS: &[&str] = &["linux", "win32", "osx", "linux32"];

// =============================================================================
// Mirror layout
// =============================================================================

pub const CATALOG_FILE: &str = "data.json";
pub const LISTING_FILE: &str = "extensions.md";
pub const TEAM_FILE: &str = "team.json";
pub const TOOLS_ARCHIVE: &str = "go-tools.tar.gz";
pub const TOOLS_SCRIPT: &str = "go-tools.sh";
pub const ARTIFACT_DIR: &str = "vsix";
pub const ICON_DIR: &str = "icons";
pub const BASE_DIR: &str = "code";
pub const TOOLS_DIR: &str = "go";

/// Setting this variable skips the tool sync step (handy for quick test runs)
pub const NO_TOOLS_ENV: &str = "GALLERY_MIRROR_NO_TOOLS";

/// Lifetime of a cached gallery response in milliseconds (1 hour)
pub const CACHE_EXPIRY_MS: i64 = 60 * 60 * 1000;

/// Timeout for establishing an HTTP connection in seconds
pub const HTTP_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Longest silence tolerated while reading a response, in seconds.
/// Downloads of any size may run as long as data keeps arriving.
pub const HTTP_READ_TIMEOUT_SECS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml_ng::Error,
    },
}

/// Mirror configuration, read from `extensions.yaml`
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct MirrorConfig {
    /// Directory receiving the mirror
    pub web_root: Option<PathBuf>,
    /// Engine version override (e.g. "1.30")
    pub engine: Option<String>,
    /// Number of historical versions to keep
    pub keep: Option<usize>,
    /// Extension identifiers to mirror
    pub extensions: Vec<String>,
    pub endpoints: EndpointsConfig,
    pub base: BaseConfig,
    pub tools: ToolsConfig,
    /// Platforms of the native tooling helper to mirror
    pub cpptools_platforms: Vec<String>,
}

impl MirrorConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_yaml(content: &str) -> Result<Self, serde_yaml_ng::Error> {
        // an empty file deserializes to unit, not to a mapping
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml_ng::from_str(content)
    }

    /// Platforms of the native tooling helper, `linux` when unset.
    pub fn cpptools_platforms(&self) -> Vec<String> {
        if self.cpptools_platforms.is_empty() {
            vec!["linux".to_string()]
        } else {
            self.cpptools_platforms.clone()
        }
    }
}

/// Remote services used by the mirror
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct EndpointsConfig {
    pub gallery: String,
    pub marketplace: String,
    pub releases: String,
    pub update: String,
    pub package_index: String,
    pub default_icon: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            gallery: DEFAULT_GALLERY_URL.to_string(),
            marketplace: MARKETPLACE_URL.to_string(),
            releases: DEFAULT_RELEASES_URL.to_string(),
            update: DEFAULT_UPDATE_URL.to_string(),
            package_index: DEFAULT_PACKAGE_INDEX_URL.to_string(),
            default_icon: DEFAULT_ICON_URL.to_string(),
        }
    }
}

/// Where the base application package comes from
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BaseSource {
    #[default]
    UpdateServer,
    PackageIndex,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct BaseConfig {
    pub source: BaseSource,
    pub channel: String,
    pub revision: String,
    /// Package name looked up in the package index
    pub package: String,
    /// Server archive architectures mirrored next to the base package
    pub server_architectures: Vec<String>,
}

impl Default for BaseConfig {
    fn default() -> Self {
        Self {
            source: BaseSource::default(),
            channel: "stable".to_string(),
            revision: "latest".to_string(),
            package: "code".to_string(),
            server_architectures: ["x64", "armhf", "alpine", "arm64"]
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToolsConfig {
    pub enabled: bool,
    /// Fetch every tool, not only the ones flagged important
    pub all: bool,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            all: true,
        }
    }
}

/// Tool sync is disabled when the opt-out variable is present.
pub fn tools_disabled_by_env() -> bool {
    std::env::var_os(NO_TOOLS_ENV).is_some()
}

/// Returns the path to the data directory for gallery-mirror.
/// Uses $XDG_DATA_HOME/gallery-mirror if XDG_DATA_HOME is set,
/// otherwise falls back to ~/.local/share/gallery-mirror,
/// or ./gallery-mirror if neither is available.
pub fn data_dir() -> PathBuf {
    data_dir_with_env(std::env::var("XDG_DATA_HOME").ok(), dirs::home_dir())
}

/// Returns the path to the gallery response cache database.
pub fn cache_db_path() -> PathBuf {
    data_dir().join("responses.db")
}

/// Returns the path to the log file.
pub fn log_path() -> PathBuf {
    data_dir().join("gallery-mirror.log")
}

fn data_dir_with_env(xdg_data_home: Option<String>, home_dir: Option<PathBuf>) -> PathBuf {
    let data_dir = xdg_data_home
        .map(PathBuf::from)
        .or_else(|| home_dir.map(|home| home.join(".local/share")))
        .unwrap_or_else(|| PathBuf::from("."));

    data_dir.join("gallery-mirror")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    fn mirror_config_from_partial_yaml_uses_defaults_for_missing_fields() {
        let result = MirrorConfig::from_yaml(
            r#"
web_root: /srv/mirror
extensions:
  - ms-python.python
  - golang.Go
"#,
        )
        .unwrap();

        assert_eq!(result.web_root, Some(PathBuf::from("/srv/mirror")));
        assert_eq!(result.extensions, vec!["ms-python.python", "golang.Go"]);
        assert_eq!(result.endpoints, EndpointsConfig::default());
        assert_eq!(result.base, BaseConfig::default());
        assert_eq!(result.cpptools_platforms(), vec!["linux".to_string()]);
    }

    #[test]
    fn mirror_config_from_full_yaml_parses_all_fields() {
        let result = MirrorConfig::from_yaml(
            r#"
web_root: web
engine: "1.30"
keep: 3
extensions: [ms-vscode.cpptools]
endpoints:
  gallery: http://localhost/gallery
  releases: http://localhost/gh
base:
  source: package-index
  channel: insider
  server_architectures: [x64]
tools:
  enabled: false
  all: false
cpptools_platforms: [linux, osx]
"#,
        )
        .unwrap();

        assert_eq!(result.engine.as_deref(), Some("1.30"));
        assert_eq!(result.keep, Some(3));
        assert_eq!(result.endpoints.gallery, "http://localhost/gallery");
        assert_eq!(result.endpoints.releases, "http://localhost/gh");
        assert_eq!(result.endpoints.update, DEFAULT_UPDATE_URL);
        assert_eq!(
            result.base,
            BaseConfig {
                source: BaseSource::PackageIndex,
                channel: "insider".to_string(),
                revision: "latest".to_string(),
                package: "code".to_string(),
                server_architectures: vec!["x64".to_string()],
            }
        );
        assert_eq!(
            result.tools,
            ToolsConfig {
                enabled: false,
                all: false
            }
        );
        assert_eq!(result.cpptools_platforms(), vec!["linux", "osx"]);
    }

    #[test]
    fn mirror_config_from_empty_yaml_is_default() {
        assert_eq!(MirrorConfig::from_yaml("").unwrap(), MirrorConfig::default());
    }

    #[test]
    fn mirror_config_load_reports_missing_file() {
        let result = MirrorConfig::load(Path::new("/nonexistent/extensions.yaml"));
        assert!(matches!(result, Err(ConfigError::Read { .. })));
    }

    #[test]
    #[serial]
    fn tools_disabled_by_env_follows_variable() {
        // SAFETY: serialized with the other env-dependent tests
        unsafe { std::env::remove_var(NO_TOOLS_ENV) };
        assert!(!tools_disabled_by_env());
        unsafe { std::env::set_var(NO_TOOLS_ENV, "1") };
        assert!(tools_disabled_by_env());
        unsafe { std::env::remove_var(NO_TOOLS_ENV) };
    }

    #[test]
    fn data_dir_with_env_uses_xdg_data_home_when_set() {
        let path = data_dir_with_env(
            Some("/tmp/test-data".to_string()),
            Some(PathBuf::from("/home/user")),
        );

        assert_eq!(path, PathBuf::from("/tmp/test-data/gallery-mirror"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_home_local_share() {
        let path = data_dir_with_env(None, Some(PathBuf::from("/home/user")));

        assert_eq!(path, PathBuf::from("/home/user/.local/share/gallery-mirror"));
    }

    #[test]
    fn data_dir_with_env_falls_back_to_current_dir_when_no_dirs_available() {
        let path = data_dir_with_env(None, None);
        assert_eq!(path, PathBuf::from("./gallery-mirror"));
    }
}
