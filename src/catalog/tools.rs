//! Auxiliary tools of the language tooling extension
//!
//! The extension bundle embeds a JavaScript table (`allToolsInformation`)
//! naming the command line tools it relies on. The mirror fetches their
//! sources into `<root>/go`, packs that tree as `go-tools.tar.gz` and writes a
//! `go-tools.sh` script; installers unpack the archive and build the tools.

use std::io::Read;
use std::path::Path;
use std::sync::LazyLock;

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use indexmap::IndexMap;
use regex::Regex;
use tracing::{debug, info, warn};

use crate::catalog::types::ToolDefinition;
use crate::config::{TOOLS_ARCHIVE, TOOLS_DIR, TOOLS_SCRIPT};
use crate::error::MirrorError;
use crate::process::{CommandRunner, CommandSpec};

/// Bundle entries holding the tool table, newest layout first
const MANIFEST_ENTRIES: &[&str] = &["extension/dist/goMain.js", "extension/out/src/goTools.js"];

static TABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)allToolsInformation = (\{.+?\n\});\n").expect("valid regex")
});
static RECORD_START_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^'[-\w]+': \{").expect("valid regex"));
static FIELD_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\w+): (.+)").expect("valid regex"));

pub type ToolMap = IndexMap<String, ToolDefinition>;

/// Read the tool table out of an extension bundle.
pub fn extract_tool_definitions(artifact: &Path) -> Result<ToolMap, MirrorError> {
    let file = std::fs::File::open(artifact)?;
    let mut archive = zip::ZipArchive::new(file)?;

    for name in MANIFEST_ENTRIES {
        let mut entry = match archive.by_name(name) {
            Ok(entry) => entry,
            Err(zip::result::ZipError::FileNotFound) => continue,
            Err(e) => return Err(e.into()),
        };
        let mut source = String::new();
        entry.read_to_string(&mut source)?;
        debug!("tool table read from {}", name);
        return parse_tool_table(&source).ok_or_else(|| {
            MirrorError::ResourceUnavailable(format!("no tool table in {}", name))
        });
    }

    Err(MirrorError::ResourceUnavailable(format!(
        "{} holds no tool manifest",
        artifact.display()
    )))
}

/// Parse the `allToolsInformation` table of a script, `None` when absent.
///
/// Each record is a run of `key: value` lines closed by its `description`.
pub fn parse_tool_table(source: &str) -> Option<ToolMap> {
    let table = TABLE_RE.captures(source)?.get(1)?.as_str();

    let mut tools = ToolMap::new();
    let mut fields: IndexMap<String, String> = IndexMap::new();

    for line in table.lines() {
        if RECORD_START_RE.is_match(line.trim()) {
            fields.clear();
        }
        let Some(caps) = FIELD_RE.captures(line) else {
            continue;
        };
        let key = caps[1].to_string();
        let value = caps[2].trim_end_matches(',').trim_matches('\'').to_string();
        fields.insert(key.clone(), value);

        if key == "description"
            && let Some(tool) = tool_from_fields(&fields)
        {
            tools.insert(tool.name.clone(), tool);
        }
    }
    Some(tools)
}

fn tool_from_fields(fields: &IndexMap<String, String>) -> Option<ToolDefinition> {
    Some(ToolDefinition {
        name: fields.get("name")?.clone(),
        import_path: fields.get("importPath")?.clone(),
        description: fields.get("description")?.clone(),
        is_important: fields.get("isImportant").is_some_and(|v| v == "true"),
    })
}

/// Fetch tool sources into `<root>/go` and bundle them.
///
/// Only important tools are fetched unless `all` is set. A failed fetch is a
/// warning; the bundle is still written with whatever was retrieved.
pub async fn bundle_tools(
    root: &Path,
    tools: &ToolMap,
    runner: &dyn CommandRunner,
    all: bool,
    dry_run: bool,
) -> Result<(), MirrorError> {
    let go_path = std::path::absolute(root.join(TOOLS_DIR))?;
    std::fs::create_dir_all(&go_path)?;
    let go_path_str = go_path.to_string_lossy().into_owned();

    for tool in tools.values() {
        if !all && !tool.is_important {
            debug!("skipping {} ({})", tool.name, tool.import_path);
            continue;
        }
        let cmd = CommandSpec::new("go", ["get", "-u", "-d", tool.import_path.as_str()])
            .env("GOPATH", &go_path_str);
        if dry_run {
            info!("would run: {}", cmd.display());
            continue;
        }
        match runner.run(&cmd).await {
            Ok(output) if output.success() => info!("fetched {}", tool.import_path),
            Ok(output) => warn!(
                "go get {} exited with {:?}",
                tool.import_path, output.code
            ),
            Err(e) => warn!("Failed to run go get {}: {}", tool.import_path, e),
        }
    }

    if dry_run {
        return Ok(());
    }

    pack_directory(&go_path, &root.join(TOOLS_ARCHIVE))?;
    write_install_script(&root.join(TOOLS_SCRIPT), tools)?;
    Ok(())
}

/// Write `dir` as a gzip tarball whose entries live below `go/`.
pub fn pack_directory(dir: &Path, archive: &Path) -> Result<(), MirrorError> {
    let file = std::fs::File::create(archive)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    builder.append_dir_all(TOOLS_DIR, dir)?;
    builder.into_inner()?.finish()?;
    debug!("packed {} into {}", dir.display(), archive.display());
    Ok(())
}

/// Unpack a tool bundle below `destination`.
pub fn unpack_archive(archive: &Path, destination: &Path) -> Result<(), MirrorError> {
    let file = std::fs::File::open(archive)?;
    let mut tarball = tar::Archive::new(GzDecoder::new(file));
    tarball.unpack(destination)?;
    Ok(())
}

fn write_install_script(path: &Path, tools: &ToolMap) -> Result<(), MirrorError> {
    let paths: Vec<&str> = tools.values().map(|t| t.import_path.as_str()).collect();
    let script = format!("#!/bin/sh\ngo get \\\n  {}\n", paths.join(" \\\n  "));
    std::fs::write(path, script)?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{CommandOutput, MockCommandRunner};
    use std::io::Write;
    use tempfile::TempDir;

    const TOOL_SCRIPT: &str = "\
var x = 1;
const allToolsInformation = {
\t'gocode': {
\t\tname: 'gocode',
\t\timportPath: 'github.com/mdempsky/gocode',
\t\tisImportant: true,
\t\tdescription: 'Auto-completion, does not work with modules',
\t},
\t'gopkgs': {
\t\tname: 'gopkgs',
\t\timportPath: 'github.com/uudashr/gopkgs/cmd/gopkgs',
\t\tisImportant: false,
\t\tdescription: 'Auto-completion of unimported packages',
\t},
};
function other() {}
";

    fn write_bundle(dir: &Path, entry: &str, content: &str) -> std::path::PathBuf {
        let path = dir.join("golang.Go-0.9.2.vsix");
        let file = std::fs::File::create(&path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.start_file(entry, zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(content.as_bytes()).unwrap();
        zip.finish().unwrap();
        path
    }

    fn two_tools() -> ToolMap {
        parse_tool_table(TOOL_SCRIPT).unwrap()
    }

    #[test]
    fn parse_tool_table_reads_records_in_order() {
        let tools = two_tools();

        assert_eq!(tools.len(), 2);
        let gocode = &tools["gocode"];
        assert_eq!(gocode.import_path, "github.com/mdempsky/gocode");
        assert_eq!(
            gocode.description,
            "Auto-completion, does not work with modules"
        );
        assert!(gocode.is_important);
        assert!(!tools["gopkgs"].is_important);
        assert_eq!(tools.get_index(1).unwrap().0, "gopkgs");
    }

    #[test]
    fn parse_tool_table_without_table_is_none() {
        assert!(parse_tool_table("const nothing = {};\n").is_none());
    }

    #[test]
    fn extract_falls_back_to_legacy_entry() {
        let dir = TempDir::new().unwrap();
        let bundle = write_bundle(dir.path(), "extension/out/src/goTools.js", TOOL_SCRIPT);

        let tools = extract_tool_definitions(&bundle).unwrap();
        assert_eq!(tools.len(), 2);
    }

    #[test]
    fn extract_without_manifest_fails() {
        let dir = TempDir::new().unwrap();
        let bundle = write_bundle(dir.path(), "extension/package.json", "{}");

        let result = extract_tool_definitions(&bundle);
        assert!(matches!(result, Err(MirrorError::ResourceUnavailable(_))));
    }

    #[tokio::test]
    async fn bundle_tools_fetches_important_only_and_writes_outputs() {
        let dir = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner
            .expect_run()
            .withf(|cmd: &CommandSpec| {
                cmd.program == "go"
                    && cmd.args == ["get", "-u", "-d", "github.com/mdempsky/gocode"]
                    && cmd.envs.iter().any(|(k, _)| k == "GOPATH")
            })
            .times(1)
            .returning(|_| {
                Ok(CommandOutput {
                    code: Some(0),
                    stdout: String::new(),
                })
            });

        bundle_tools(dir.path(), &two_tools(), &runner, false, false)
            .await
            .unwrap();

        assert!(dir.path().join(TOOLS_ARCHIVE).is_file());
        let script = std::fs::read_to_string(dir.path().join(TOOLS_SCRIPT)).unwrap();
        assert_eq!(
            script,
            "#!/bin/sh\ngo get \\\n  github.com/mdempsky/gocode \\\n  github.com/uudashr/gopkgs/cmd/gopkgs\n"
        );
    }

    #[tokio::test]
    async fn bundle_tools_dry_run_runs_nothing() {
        let dir = TempDir::new().unwrap();
        let mut runner = MockCommandRunner::new();
        runner.expect_run().never();

        bundle_tools(dir.path(), &two_tools(), &runner, true, true)
            .await
            .unwrap();

        assert!(!dir.path().join(TOOLS_ARCHIVE).exists());
        assert!(!dir.path().join(TOOLS_SCRIPT).exists());
    }

    #[test]
    fn packed_tree_unpacks_below_go() {
        let src = TempDir::new().unwrap();
        let go = src.path().join("go");
        std::fs::create_dir_all(go.join("src/example.com/tool")).unwrap();
        std::fs::write(go.join("src/example.com/tool/main.go"), "package main").unwrap();
        let archive = src.path().join(TOOLS_ARCHIVE);

        pack_directory(&go, &archive).unwrap();

        let dest = TempDir::new().unwrap();
        unpack_archive(&archive, dest.path()).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.path().join("go/src/example.com/tool/main.go")).unwrap(),
            "package main"
        );
    }
}
