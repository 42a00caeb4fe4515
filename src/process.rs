//! External command execution
//!
//! Commands run one at a time and are awaited to completion. A non-zero exit
//! status is not an error at this level; callers decide whether it matters.

use std::path::PathBuf;
use std::process::Stdio;

#[cfg(test)]
use mockall::automock;
use tracing::debug;

use crate::error::MirrorError;

/// Command line to run
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    pub envs: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    pub fn current_dir(mut self, dir: PathBuf) -> Self {
        self.cwd = Some(dir);
        self
    }

    /// Prefix the command with `sudo`
    pub fn elevated(self) -> Self {
        let mut args = vec![self.program];
        args.extend(self.args);
        Self {
            program: "sudo".to_string(),
            args,
            envs: self.envs,
            cwd: self.cwd,
        }
    }

    /// Shell-like rendering, for logs and dry runs
    pub fn display(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|a| {
                if a.contains(' ') {
                    format!("\"{}\"", a)
                } else {
                    a.clone()
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Exit code, `None` when killed by a signal
    pub code: Option<i32>,
    pub stdout: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// Trait for running external commands
#[cfg_attr(test, automock)]
#[async_trait::async_trait]
pub trait CommandRunner: Send + Sync {
    /// Runs the command to completion, capturing stdout.
    ///
    /// Fails only when the program cannot be started.
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, MirrorError>;
}

/// Runs commands on the local system
pub struct SystemRunner;

#[async_trait::async_trait]
impl CommandRunner for SystemRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, MirrorError> {
        debug!("exec: {}", command.display());

        let mut cmd = tokio::process::Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .stderr(Stdio::null());
        if let Some(cwd) = &command.cwd {
            cmd.current_dir(cwd);
        }

        let output = cmd.output().await?;
        Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        })
    }
}

/// Whether the current process runs with root privileges
pub fn is_privileged() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
