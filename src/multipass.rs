//! Thin client over the `multipass` command line tool

use std::fmt;
use std::path::Path;
use std::sync::LazyLock;

use log::{info, warn};
use regex::Regex;

use crate::error::{InstallerError, Result};
use crate::install::runner::{CommandSpec, ExitOutcome, OutputLine, ProcessRunner};

static COLUMN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(\S+)\s+").expect("column regex must compile"));
static PERCENT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"([0-9]+)\s*%").expect("percent regex must compile"));

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Running,
    Stopped,
    Suspended,
    Starting,
    Deleted,
    Unknown,
}

impl InstanceState {
    pub fn parse(text: &str) -> Self {
        match text.to_ascii_lowercase().as_str() {
            "running" => Self::Running,
            "stopped" => Self::Stopped,
            "suspended" => Self::Suspended,
            "starting" | "restarting" => Self::Starting,
            "deleted" => Self::Deleted,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Running => "Running",
            Self::Stopped => "Stopped",
            Self::Suspended => "Suspended",
            Self::Starting => "Starting",
            Self::Deleted => "Deleted",
            Self::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Instance {
    pub name: String,
    pub state: InstanceState,
    pub ipv4: String,
}

impl fmt::Display for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<24} {:<10} {}", self.name, self.state, self.ipv4)
    }
}

/// One data row of `multipass list`; `None` for rows with fewer than three columns
pub fn parse_row(line: &str) -> Option<Instance> {
    let mut columns = COLUMN.captures_iter(line).map(|c| c[1].to_string());
    let name = columns.next()?;
    let state = columns.next()?;
    let ipv4 = columns.next()?;
    Some(Instance {
        name,
        state: InstanceState::parse(&state),
        ipv4,
    })
}

/// Every instance of a `multipass list` table, header skipped
pub fn parse_list(lines: &[String]) -> Vec<Instance> {
    lines.iter().skip(1).filter_map(|l| parse_row(l)).collect()
}

/// First `NN%` on a line of launch output
pub fn parse_percent(line: &str) -> Option<u8> {
    let caps = PERCENT.captures(line)?;
    caps[1].parse::<u32>().ok().map(|p| p.min(100) as u8)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceCommand {
    Shell,
    Start,
    Stop,
    Restart,
    Suspend,
    Info,
    Delete,
    Recover,
    Purge,
}

impl InstanceCommand {
    pub fn for_state(state: InstanceState) -> &'static [InstanceCommand] {
        use InstanceCommand::*;
        match state {
            InstanceState::Running => &[Shell, Stop, Restart, Suspend, Info, Delete],
            InstanceState::Stopped | InstanceState::Suspended => &[Start, Info, Delete],
            InstanceState::Deleted => &[Recover, Purge],
            InstanceState::Starting | InstanceState::Unknown => &[],
        }
    }

    pub fn verb(self) -> &'static str {
        match self {
            Self::Shell => "shell",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Restart => "restart",
            Self::Suspend => "suspend",
            Self::Info => "info",
            Self::Delete => "delete",
            Self::Recover => "recover",
            Self::Purge => "purge",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Self::Shell => "Open a shell on the instance",
            Self::Start => "Start the instance",
            Self::Stop => "Stop the instance",
            Self::Restart => "Restart the instance",
            Self::Suspend => "Suspend the instance",
            Self::Info => "Show instance details",
            Self::Delete => "Delete the instance",
            Self::Recover => "Recover the deleted instance",
            Self::Purge => "Purge all deleted instances",
        }
    }

    /// Whether the instance list must be refreshed afterwards
    pub fn changes_state(self) -> bool {
        !matches!(self, Self::Shell | Self::Info)
    }
}

impl fmt::Display for InstanceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:<8} {}", self.verb(), self.description())
    }
}

pub struct MultipassClient {
    bin: String,
    runner: Box<dyn ProcessRunner>,
}

impl MultipassClient {
    pub fn new(bin: impl Into<String>, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            bin: bin.into(),
            runner,
        }
    }

    fn command<I, S>(&self, args: I) -> CommandSpec
    where
        I: IntoIterator<Item = S>,
        S: Into<std::ffi::OsString>,
    {
        CommandSpec::new(&self.bin).args(args)
    }

    /// Run capturing stdout and stderr lines separately
    fn capture(&self, spec: &CommandSpec) -> Result<(ExitOutcome, Vec<String>, Vec<String>)> {
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let outcome = self.runner.run(spec, &mut |line| match line {
            OutputLine::Stdout(text) => stdout.push(text),
            OutputLine::Stderr(text) => stderr.push(text),
        })?;
        Ok((outcome, stdout, stderr))
    }

    pub fn list(&self) -> Result<Vec<Instance>> {
        let spec = self.command(["list"]);
        let (outcome, stdout, stderr) = self.capture(&spec)?;
        if !outcome.success() {
            return Err(self.failure(&spec, outcome, &stderr));
        }
        Ok(parse_list(&stdout))
    }

    /// Create an instance from `cloud_init` and return the newest listed instance
    pub fn launch(
        &self,
        cloud_init: &Path,
        on_progress: &mut dyn FnMut(u8, &str),
    ) -> Result<Option<Instance>> {
        info!("Launching a new instance with {}", cloud_init.display());
        let spec = self.command([
            std::ffi::OsString::from("launch"),
            "--cloud-init".into(),
            cloud_init.as_os_str().to_os_string(),
        ]);

        let mut errors = Vec::new();
        let outcome = self.runner.run(&spec, &mut |line| {
            if let Some(percent) = parse_percent(line.text()) {
                on_progress(percent, "Launching instance");
            }
            match line {
                OutputLine::Stdout(text) => info!("[launch] {text}"),
                OutputLine::Stderr(text) => {
                    warn!("[launch] {text}");
                    errors.push(text);
                }
            }
        })?;

        if !outcome.success() {
            return Err(self.failure(&spec, outcome, &errors));
        }
        on_progress(100, "Launching instance");

        Ok(self.list()?.pop())
    }

    /// Interactive shell with the terminal attached
    pub fn shell(&self, name: &str) -> Result<ExitOutcome> {
        self.runner.run_attached(&self.command(["shell", name]))
    }

    /// Run `command` against `instance`, returning everything it printed
    pub fn execute(&self, command: InstanceCommand, instance: &Instance) -> Result<String> {
        match command {
            InstanceCommand::Shell => {
                self.shell(&instance.name)?;
                Ok(String::new())
            }
            InstanceCommand::Purge => self.purge(),
            other => self.run_verb(other.verb(), &instance.name),
        }
    }

    pub fn run_verb(&self, verb: &str, name: &str) -> Result<String> {
        self.output(&self.command([verb, name]))
    }

    pub fn purge(&self) -> Result<String> {
        self.output(&self.command(["purge"]))
    }

    fn output(&self, spec: &CommandSpec) -> Result<String> {
        let (outcome, mut stdout, stderr) = self.capture(spec)?;
        if !outcome.success() {
            return Err(self.failure(spec, outcome, &stderr));
        }
        stdout.extend(stderr);
        Ok(stdout.join("\n"))
    }

    fn failure(&self, spec: &CommandSpec, outcome: ExitOutcome, stderr: &[String]) -> InstallerError {
        let args: Vec<_> = spec.args.iter().map(|a| a.to_string_lossy()).collect();
        InstallerError::System(format!(
            "`{} {}` failed (exit {:?}): {}",
            self.bin,
            args.join(" "),
            outcome.code,
            stderr.join("\n")
        ))
    }
}
