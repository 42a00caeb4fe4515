//! Command runner test utilities

use std::sync::Mutex;

use async_trait::async_trait;

use gallery_mirror::error::MirrorError;
use gallery_mirror::process::{CommandOutput, CommandRunner, CommandSpec};

/// Runner answering the extension listing with a fixed inventory and
/// recording every command
#[allow(dead_code)]
pub struct RecordingRunner {
    inventory: String,
    calls: Mutex<Vec<CommandSpec>>,
}

#[allow(dead_code)]
impl RecordingRunner {
    pub fn new(installed: &[&str]) -> Self {
        Self {
            inventory: installed.join("\n"),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<CommandSpec> {
        self.calls.lock().unwrap().clone()
    }

    /// Arguments of every `--install-extension` call
    pub fn installed_packages(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter(|c| c.args.first().map(String::as_str) == Some("--install-extension"))
            .filter_map(|c| c.args.get(1).cloned())
            .collect()
    }
}

#[async_trait]
impl CommandRunner for RecordingRunner {
    async fn run(&self, command: &CommandSpec) -> Result<CommandOutput, MirrorError> {
        self.calls.lock().unwrap().push(command.clone());
        let stdout = if command.args.first().map(String::as_str) == Some("--list-extensions") {
            self.inventory.clone()
        } else {
            String::new()
        };
        Ok(CommandOutput {
            code: Some(0),
            stdout,
        })
    }
}
