//! The machine being brought up to date
//!
//! Everything here goes through a [`CommandRunner`] so the reconciler can be
//! exercised without the client application installed.

use std::path::Path;

use tracing::{debug, warn};

use crate::error::MirrorError;
use crate::process::{CommandRunner, CommandSpec};

/// Command line client of the application
const CLIENT: &str = "code";

/// Settings written on first install: the mirror replaces the built-in update checks
const DEFAULT_SETTINGS: &str = r#"{
    "update.mode": "none",
    "update.showReleaseNotes": false,
    "extensions.autoCheckUpdates": false,
    "extensions.autoUpdate": false,
    "telemetry.enableCrashReporter": false,
    "telemetry.enableTelemetry": false
}
"#;

/// An extension found on the machine
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InstalledPackage {
    pub id: String,
    pub version: String,
}

/// Parse `id@version` lines, sorted and without duplicates.
pub fn parse_installed(output: &str) -> Vec<InstalledPackage> {
    let mut installed: Vec<InstalledPackage> = output
        .split_whitespace()
        .filter_map(|item| match item.split_once('@') {
            Some((id, version)) => Some(InstalledPackage {
                id: id.to_string(),
                version: version.to_string(),
            }),
            None => {
                warn!("unexpected extension listing: {}", item);
                None
            }
        })
        .collect();
    installed.sort();
    installed.dedup();
    installed
}

/// Installed extensions with their versions.
pub async fn list_installed(runner: &dyn CommandRunner) -> Result<Vec<InstalledPackage>, MirrorError> {
    let cmd = CommandSpec::new(CLIENT, ["--list-extensions", "--show-versions"]);
    let output = runner.run(&cmd).await?;
    if !output.success() {
        return Err(MirrorError::ResourceUnavailable(format!(
            "{} exited with {:?}",
            cmd.display(),
            output.code
        )));
    }
    Ok(parse_installed(&output.stdout))
}

/// Identifiers of the installed extensions; empty when the client is unavailable.
pub async fn list_installed_ids(runner: &dyn CommandRunner) -> Vec<String> {
    let cmd = CommandSpec::new(CLIENT, ["--list-extensions"]);
    match runner.run(&cmd).await {
        Ok(output) if output.success() => {
            let mut ids: Vec<String> = output.stdout.split_whitespace().map(String::from).collect();
            ids.sort();
            ids.dedup();
            ids
        }
        Ok(output) => {
            debug!("{} exited with {:?}", cmd.display(), output.code);
            Vec::new()
        }
        Err(e) => {
            debug!("cannot run {}: {}", cmd.display(), e);
            Vec::new()
        }
    }
}

/// Install one extension package. A non-zero exit is reported, not raised.
pub async fn install_extension(runner: &dyn CommandRunner, package: &Path) -> Result<bool, MirrorError> {
    let cmd = CommandSpec::new(
        CLIENT,
        ["--install-extension".to_string(), package.to_string_lossy().into_owned()],
    );
    let output = runner.run(&cmd).await?;
    if !output.success() {
        warn!("{} exited with {:?}", cmd.display(), output.code);
    }
    Ok(output.success())
}

/// Installed version tag of the application package, `None` when absent.
///
/// Fails when the package database cannot be queried at all.
pub async fn installed_base_tag(runner: &dyn CommandRunner) -> Result<Option<String>, MirrorError> {
    let cmd = CommandSpec::new("dpkg-query", ["--show", CLIENT]);
    let output = runner.run(&cmd).await?;
    match output.code {
        Some(0) | Some(1) => Ok(output.stdout.split_whitespace().nth(1).map(String::from)),
        code => Err(MirrorError::ResourceUnavailable(format!(
            "{} exited with {:?}",
            cmd.display(),
            code
        ))),
    }
}

/// Install the application package, through `sudo` unless already privileged.
pub async fn install_base(
    runner: &dyn CommandRunner,
    package: &Path,
    privileged: bool,
) -> Result<bool, MirrorError> {
    let mut cmd = CommandSpec::new("dpkg", ["-i".to_string(), package.to_string_lossy().into_owned()]);
    if !privileged {
        cmd = cmd.elevated();
    }
    let output = runner.run(&cmd).await?;
    if !output.success() {
        warn!("{} exited with {:?}", cmd.display(), output.code);
    }
    Ok(output.success())
}

/// Write the default user settings when the file is missing or empty.
pub fn write_default_settings(path: &Path) -> Result<bool, MirrorError> {
    let empty = std::fs::metadata(path).map(|m| m.len() == 0).unwrap_or(true);
    if !empty {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, DEFAULT_SETTINGS)?;
    Ok(true)
}

/// Platform tag of the running machine, `None` when unsupported.
pub fn detect_platform() -> Option<&'static str> {
    platform_for(std::env::consts::OS, std::env::consts::ARCH)
}

fn platform_for(os: &str, arch: &str) -> Option<&'static str> {
    match (os, arch) {
        ("macos", _) => Some("osx"),
        ("windows", _) => Some("win32"),
        ("linux", "x86") => Some("linux32"),
        ("linux", "x86_64") => Some("linux"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, MockCommandRunner};
    use rstest::rstest;
    use tempfile::TempDir;

    fn output(code: i32, stdout: &str) -> CommandOutput {
        CommandOutput {
            code: Some(code),
            stdout: stdout.to_string(),
        }
    }

    #[test]
    fn parse_installed_sorts_and_deduplicates() {
        let installed = parse_installed("ms-python.python@2019.1.0\ngolang.Go@0.9.2\ngarbage\ngolang.Go@0.9.2\n");

        assert_eq!(
            installed,
            vec![
                InstalledPackage {
                    id: "golang.Go".to_string(),
                    version: "0.9.2".to_string()
                },
                InstalledPackage {
                    id: "ms-python.python".to_string(),
                    version: "2019.1.0".to_string()
                },
            ]
        );
    }

    #[rstest]
    #[case("macos", "aarch64", Some("osx"))]
    #[case("windows", "x86_64", Some("win32"))]
    #[case("linux", "x86", Some("linux32"))]
    #[case("linux", "x86_64", Some("linux"))]
    #[case("linux", "aarch64", None)]
    #[case("freebsd", "x86_64", None)]
    fn test_platform_for(#[case] os: &str, #[case] arch: &str, #[case] expected: Option<&str>) {
        assert_eq!(platform_for(os, arch), expected);
    }

    #[tokio::test]
    async fn list_installed_fails_when_client_fails() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(output(127, "")));

        let result = list_installed(&runner).await;
        assert!(matches!(result, Err(MirrorError::ResourceUnavailable(_))));
    }

    fn runner_answering(code: i32, stdout: &'static str) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd: &CommandSpec| cmd.program == "dpkg-query")
            .returning(move |_| Ok(output(code, stdout)));
        runner
    }

    #[tokio::test]
    async fn installed_base_tag_reads_second_field() {
        let runner = runner_answering(0, "code\t1.30.2-1546901646\n");
        let tag = installed_base_tag(&runner).await.unwrap();
        assert_eq!(tag.as_deref(), Some("1.30.2-1546901646"));
    }

    #[tokio::test]
    async fn installed_base_tag_absent_package() {
        let runner = runner_answering(1, "");
        assert_eq!(installed_base_tag(&runner).await.unwrap(), None);
    }

    #[tokio::test]
    async fn installed_base_tag_fails_without_package_database() {
        let mut runner = MockCommandRunner::new();
        runner.expect_run().returning(|_| Ok(output(2, "")));

        assert!(installed_base_tag(&runner).await.is_err());
    }

    fn runner_expecting(program: &'static str) -> MockCommandRunner {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(move |cmd: &CommandSpec| {
                cmd.program == program && cmd.args.contains(&"-i".to_string())
            })
            .times(1)
            .returning(|_| Ok(output(0, "")));
        runner
    }

    #[tokio::test]
    async fn install_base_elevates_when_unprivileged() {
        let runner = runner_expecting("sudo");
        assert!(install_base(&runner, Path::new("/tmp/code.deb"), false).await.unwrap());
    }

    #[tokio::test]
    async fn install_base_runs_dpkg_directly_when_privileged() {
        let runner = runner_expecting("dpkg");
        assert!(install_base(&runner, Path::new("/tmp/code.deb"), true).await.unwrap());
    }

    #[tokio::test]
    async fn install_extension_reports_failure() {
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd: &CommandSpec| cmd.args == ["--install-extension", "/tmp/a.vsix"])
            .returning(|_| Ok(output(1, "")));

        let ok = install_extension(&runner, Path::new("/tmp/a.vsix")).await.unwrap();
        assert!(!ok);
    }

    #[test]
    fn default_settings_written_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Code/User/settings.json");

        assert!(write_default_settings(&path).unwrap());
        std::fs::write(&path, "{\"editor.tabSize\": 2}").unwrap();
        assert!(!write_default_settings(&path).unwrap());
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "{\"editor.tabSize\": 2}"
        );
    }
}
