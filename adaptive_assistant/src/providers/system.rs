//! Provider that answers file and system questions with read-only commands.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use serde_json::json;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, instrument, warn};

use crate::{
    instruction::Instruction,
    provider::{CapabilityProvider, ProviderOutput},
    settings::SystemProviderConfig,
};

const KEYWORDS: &[&str] = &[
    "file", "directory", "folder", "desktop", "ls", "find", "search", "terminal", "command", "system",
    "check", "exists",
];

const SAFE_COMMANDS: &[&str] = &[
    "ls", "dir", "pwd", "find", "locate", "grep", "cat", "head", "tail", "ps", "top", "df", "du", "free",
    "uname", "whoami", "date", "cal", "which", "whereis", "file", "stat", "wc", "sort", "uniq", "cut",
];

const DANGEROUS_TOKENS: &[&str] = &[
    "rm", "del", "format", "fdisk", "mkfs", "dd", "chown", "sudo", "su", "passwd", "-delete", "-exec",
];

/// Longest plan the heuristics produce.
const MAX_COMMANDS_PER_PLAN: u32 = 2;

static FILENAME: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\w[-\w]*\.[A-Za-z0-9]+)").expect("valid filename regex"));

/// A command to run without a shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedCommand {
    pub program: String,
    pub args: Vec<String>,
}

impl PlannedCommand {
    fn new(program: &str, args: &[&str]) -> Self {
        Self {
            program: program.to_string(),
            args: args.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[derive(Debug, Serialize)]
struct CommandReport {
    command: String,
    stdout: String,
    stderr: String,
    returncode: Option<i32>,
}

pub struct SystemCommandProvider {
    safe_mode: bool,
    search_roots: Vec<PathBuf>,
    command_timeout: Duration,
}

impl SystemCommandProvider {
    pub fn new(config: &SystemProviderConfig) -> Self {
        Self {
            safe_mode: config.safe_mode,
            search_roots: config.allowed_directories.iter().map(|d| expand_home(d)).collect(),
            command_timeout: Duration::from_secs(config.command_timeout_seconds),
        }
    }

    /// Map instruction text onto read-only commands.
    pub fn plan(&self, instruction: &Instruction) -> Vec<PlannedCommand> {
        let text = instruction.normalized_text();
        let mut commands = Vec::new();

        let root = self.search_roots.iter().find(|root| {
            root.file_name()
                .and_then(|n| n.to_str())
                .map(|n| text.contains(&n.to_lowercase()))
                .unwrap_or(false)
        });
        let lookup = ["have", "exists", "exist", "find"].iter().any(|w| text.contains(w));

        if let (Some(root), true) = (root, lookup) {
            let root = root.to_string_lossy().to_string();
            commands.push(PlannedCommand::new("ls", &["-la", &root]));
            if let Some(name) = FILENAME.captures(&text).and_then(|c| c.get(1)) {
                let pattern = format!("*{}*", name.as_str());
                commands.push(PlannedCommand::new("find", &[&root, "-name", &pattern, "-type", "f"]));
            }
        } else if text.contains("list") && text.contains("file") {
            commands.push(PlannedCommand::new("ls", &["-la"]));
        } else if text.contains("find") && text.contains("python") {
            commands.push(PlannedCommand::new("find", &[".", "-name", "*.py", "-type", "f"]));
        } else if text.contains("disk") && text.contains("space") {
            commands.push(PlannedCommand::new("df", &["-h"]));
        } else if text.contains("process") || text.contains("running") {
            commands.push(PlannedCommand::new("ps", &["aux"]));
        }

        if commands.is_empty() {
            commands.push(PlannedCommand::new("pwd", &[]));
            commands.push(PlannedCommand::new("ls", &["-la"]));
        }
        commands
    }

    pub fn is_safe(&self, command: &PlannedCommand) -> bool {
        if !self.safe_mode {
            return true;
        }
        let program = command.program.rsplit('/').next().unwrap_or_default();
        if !SAFE_COMMANDS.contains(&program) {
            return false;
        }
        !command
            .args
            .iter()
            .any(|arg| DANGEROUS_TOKENS.contains(&arg.to_lowercase().as_str()))
    }

    async fn run(&self, command: &PlannedCommand) -> Result<CommandReport> {
        let child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| anyhow!("Failed to spawn '{}': {}", command.display(), e))?;

        let output = tokio::time::timeout(self.command_timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("Command '{}' timed out after {:?}", command.display(), self.command_timeout))??;

        Ok(CommandReport {
            command: command.display(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            returncode: output.status.code(),
        })
    }
}

#[async_trait]
impl CapabilityProvider for SystemCommandProvider {
    fn id(&self) -> &str {
        "system"
    }

    fn description(&self) -> &str {
        "Handles system commands, file lookups and terminal queries"
    }

    fn examples(&self) -> Vec<String> {
        vec![
            "list files in current directory".to_string(),
            "find all python files".to_string(),
        ]
    }

    fn can_handle(&self, instruction: &Instruction) -> bool {
        let text = instruction.normalized_text();
        KEYWORDS.iter().any(|k| text.contains(k))
    }

    #[instrument(skip_all, fields(instruction_id = %instruction.id()))]
    async fn execute(&self, instruction: &Instruction) -> Result<ProviderOutput> {
        let commands = self.plan(instruction);

        if let Some(unsafe_command) = commands.iter().find(|c| !self.is_safe(c)) {
            warn!(command = %unsafe_command.display(), "Refusing command outside the safe list");
            return Ok(ProviderOutput::failure(
                json!(null),
                format!("Command '{}' is not in safe commands list", unsafe_command.display()),
            ));
        }

        let mut reports = Vec::with_capacity(commands.len());
        for command in &commands {
            info!(command = %command.display(), "Running system command");
            reports.push(self.run(command).await?);
        }

        let all_ok = reports.iter().all(|r| r.returncode == Some(0));
        let payload = serde_json::to_value(&reports)?;
        let output = if all_ok {
            ProviderOutput::success(payload)
        } else {
            ProviderOutput::failure(payload, "one or more commands exited with a non-zero status")
        };
        Ok(output.with_metadata("commands_executed", commands.len()))
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.command_timeout * MAX_COMMANDS_PER_PLAN + Duration::from_secs(1))
    }
}

fn expand_home(dir: &str) -> PathBuf {
    match (dir.strip_prefix("~/"), std::env::var_os("HOME")) {
        (Some(rest), Some(home)) => PathBuf::from(home).join(rest),
        _ => PathBuf::from(dir),
    }
}
