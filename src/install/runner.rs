//! Child process execution and unattended installer runs
//!
//! Output of a child is read on helper threads and handed to the calling
//! thread over a channel, so line callbacks never run concurrently.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;

use crossbeam_channel::{Sender, unbounded};
use log::{error, info, warn};

use crate::error::{InstallerError, Result};

/// Program, arguments and working directory of a child process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    pub program: OsString,
    pub args: Vec<OsString>,
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    pub fn new(program: impl Into<OsString>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    pub fn arg(mut self, arg: impl Into<OsString>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    fn to_command(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    fn display(&self) -> String {
        let mut s = self.program.to_string_lossy().into_owned();
        for arg in &self.args {
            s.push(' ');
            s.push_str(&arg.to_string_lossy());
        }
        s
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputLine {
    Stdout(String),
    Stderr(String),
}

impl OutputLine {
    pub fn text(&self) -> &str {
        match self {
            Self::Stdout(s) | Self::Stderr(s) => s,
        }
    }
}

/// How a child process ended; `code` is `None` when killed by a signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitOutcome {
    pub code: Option<i32>,
}

impl ExitOutcome {
    pub fn success(self) -> bool {
        self.code == Some(0)
    }
}

pub trait ProcessRunner {
    /// Run to completion, forwarding every output line to `on_line`
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(OutputLine)) -> Result<ExitOutcome>;

    /// Run with the terminal attached (interactive shells)
    fn run_attached(&self, spec: &CommandSpec) -> Result<ExitOutcome>;
}

/// Runs real child processes
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl ProcessRunner for SystemRunner {
    fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(OutputLine)) -> Result<ExitOutcome> {
        let mut child = spec
            .to_command()
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| InstallerError::io(format!("Failed to start `{}`", spec.display()), e))?;

        let (tx, rx) = unbounded();
        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(spawn_reader(stdout, tx.clone(), OutputLine::Stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(spawn_reader(stderr, tx.clone(), OutputLine::Stderr));
        }
        drop(tx);

        // Ends once both readers hit EOF and drop their senders
        for line in rx {
            on_line(line);
        }
        for reader in readers {
            let _ = reader.join();
        }

        let status = child
            .wait()
            .map_err(|e| InstallerError::io(format!("Failed to wait for `{}`", spec.display()), e))?;
        Ok(ExitOutcome {
            code: status.code(),
        })
    }

    fn run_attached(&self, spec: &CommandSpec) -> Result<ExitOutcome> {
        let status = spec
            .to_command()
            .status()
            .map_err(|e| InstallerError::io(format!("Failed to run `{}`", spec.display()), e))?;
        Ok(ExitOutcome {
            code: status.code(),
        })
    }
}

fn spawn_reader<R>(
    stream: R,
    tx: Sender<OutputLine>,
    wrap: fn(String) -> OutputLine,
) -> thread::JoinHandle<()>
where
    R: Read + Send + 'static,
{
    thread::spawn(move || {
        for line in BufReader::new(stream).lines() {
            let Ok(line) = line else { break };
            if tx.send(wrap(line)).is_err() {
                break;
            }
        }
    })
}

/// Run a command and forward its output to the log under `tag`
pub fn run_logged(runner: &dyn ProcessRunner, spec: &CommandSpec, tag: &str) -> Result<ExitOutcome> {
    runner.run(spec, &mut |line| match line {
        OutputLine::Stdout(text) => info!("[{tag}] {text}"),
        OutputLine::Stderr(text) => warn!("[{tag}] {text}"),
    })
}

/// Persistent, user-level PATH variable
pub trait PathStore {
    fn read_user_path(&self) -> Result<Option<String>>;
    fn write_user_path(&self, value: &str) -> Result<()>;
}

/// Merge PATH entries an installer introduced back onto the original value
///
/// The delta is `new` with every occurrence of `old` removed, trimmed of
/// `;` separators. Installers that overwrite PATH instead of extending it
/// therefore lose nothing that was already there.
pub fn reconcile_path(old: &str, new: &str) -> String {
    let stripped;
    let added = if old.is_empty() {
        new
    } else {
        stripped = new.replace(old, "");
        &stripped
    };
    let added = added.trim_matches(';');

    match (old.is_empty(), added.is_empty()) {
        (_, true) => old.to_string(),
        (true, false) => added.to_string(),
        (false, false) => format!("{old};{added}"),
    }
}

/// Runs a native installer unattended and repairs the user PATH afterwards
pub struct InstallerRunner<'a> {
    runner: &'a dyn ProcessRunner,
    path_store: &'a dyn PathStore,
    command: fn(&Path) -> CommandSpec,
}

impl<'a> InstallerRunner<'a> {
    /// `command` builds the silent invocation for an installer path
    pub fn new(
        runner: &'a dyn ProcessRunner,
        path_store: &'a dyn PathStore,
        command: fn(&Path) -> CommandSpec,
    ) -> Self {
        Self {
            runner,
            path_store,
            command,
        }
    }

    /// Best effort: failures are logged, callers verify the installation afterwards
    pub fn install(&self, installer: &Path) {
        info!("Deploying {}...", installer.display());

        let old_path = match self.path_store.read_user_path() {
            Ok(path) => path,
            Err(e) => {
                warn!("Could not read user PATH before install: {e}");
                None
            }
        };

        let mut spec = (self.command)(installer);
        if spec.working_dir.is_none()
            && let Some(dir) = installer.parent().filter(|d| !d.as_os_str().is_empty())
        {
            spec.working_dir = Some(dir.to_path_buf());
        }

        let tag = installer
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "installer".to_string());

        match run_logged(self.runner, &spec, &tag) {
            Ok(outcome) if outcome.success() => info!("Installer finished"),
            Ok(outcome) => warn!(
                "{}",
                InstallerError::InstallChildProcessFailed {
                    path: installer.to_path_buf(),
                    code: outcome.code,
                }
            ),
            Err(e) => error!("Error occurred while running installer: {e}"),
        }

        match old_path {
            Some(old) => {
                if let Err(e) = self.reconcile(&old) {
                    error!("Error occurred while updating PATH: {e}");
                }
            }
            None => warn!("User PATH was not set before install, leaving it as the installer left it"),
        }
    }

    fn reconcile(&self, old: &str) -> Result<()> {
        let new = self.path_store.read_user_path()?.unwrap_or_default();
        let merged = reconcile_path(old, &new);
        if merged != new {
            self.path_store.write_user_path(&merged)?;
            info!("User PATH updated");
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// Records commands and replays canned output and exit codes
    #[derive(Default)]
    pub(crate) struct FakeRunner {
        pub calls: RefCell<Vec<CommandSpec>>,
        pub outputs: RefCell<Vec<(Vec<OutputLine>, Option<i32>)>>,
        /// Invoked while "running", used to mimic installer side effects
        pub side_effect: Option<Box<dyn Fn(&CommandSpec)>>,
    }

    impl FakeRunner {
        pub fn with_outputs(outputs: Vec<(Vec<OutputLine>, Option<i32>)>) -> Self {
            Self {
                outputs: RefCell::new(outputs),
                ..Self::default()
            }
        }
    }

    impl ProcessRunner for FakeRunner {
        fn run(&self, spec: &CommandSpec, on_line: &mut dyn FnMut(OutputLine)) -> Result<ExitOutcome> {
            self.calls.borrow_mut().push(spec.clone());
            if let Some(effect) = &self.side_effect {
                effect(spec);
            }
            let mut outputs = self.outputs.borrow_mut();
            let (lines, code) = if outputs.is_empty() {
                (Vec::new(), Some(0))
            } else {
                outputs.remove(0)
            };
            for line in lines {
                on_line(line);
            }
            Ok(ExitOutcome { code })
        }

        fn run_attached(&self, spec: &CommandSpec) -> Result<ExitOutcome> {
            self.calls.borrow_mut().push(spec.clone());
            Ok(ExitOutcome { code: Some(0) })
        }
    }

    pub(crate) struct MemoryPath(pub Rc<RefCell<Option<String>>>);

    impl MemoryPath {
        pub fn new(value: Option<&str>) -> Self {
            Self(Rc::new(RefCell::new(value.map(str::to_string))))
        }
    }

    impl PathStore for MemoryPath {
        fn read_user_path(&self) -> Result<Option<String>> {
            Ok(self.0.borrow().clone())
        }

        fn write_user_path(&self, value: &str) -> Result<()> {
            *self.0.borrow_mut() = Some(value.to_string());
            Ok(())
        }
    }

    fn silent(path: &Path) -> CommandSpec {
        CommandSpec::new(path.as_os_str()).arg("/S")
    }

    #[test]
    fn delta_is_appended_to_original() {
        assert_eq!(
            reconcile_path(r"C:\a;C:\b", r"C:\a;C:\b;C:\Multipass\bin"),
            r"C:\a;C:\b;C:\Multipass\bin"
        );
    }

    #[test]
    fn overwritten_path_keeps_original_entries() {
        assert_eq!(reconcile_path(r"C:\a;C:\b", r"C:\Multipass\bin"), r"C:\a;C:\b;C:\Multipass\bin");
    }

    #[test]
    fn unchanged_path_stays_unchanged() {
        assert_eq!(reconcile_path(r"C:\a", r"C:\a"), r"C:\a");
        assert_eq!(reconcile_path("", ""), "");
    }

    #[test]
    fn empty_original_takes_new_entries() {
        assert_eq!(reconcile_path("", r";C:\Multipass\bin;"), r"C:\Multipass\bin");
    }

    #[test]
    fn system_runner_forwards_lines_in_order() {
        let spec = if cfg!(windows) {
            CommandSpec::new("cmd").args(["/C", "echo one&& echo two"])
        } else {
            CommandSpec::new("sh").args(["-c", "echo one; echo two; echo oops >&2; exit 3"])
        };
        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let outcome = SystemRunner
            .run(&spec, &mut |line| match line {
                OutputLine::Stdout(t) => stdout.push(t.trim().to_string()),
                OutputLine::Stderr(t) => stderr.push(t.trim().to_string()),
            })
            .unwrap();

        assert_eq!(stdout, vec!["one", "two"]);
        if cfg!(unix) {
            assert_eq!(stderr, vec!["oops"]);
            assert_eq!(outcome.code, Some(3));
        }
    }

    #[test]
    fn missing_program_is_an_io_error() {
        let err = SystemRunner
            .run(&CommandSpec::new("definitely-not-a-real-binary-mplaunch"), &mut |_| {})
            .unwrap_err();
        assert!(matches!(err, InstallerError::Io { .. }));
    }

    #[test]
    fn install_runs_from_installer_directory_and_repairs_path() {
        let path = MemoryPath::new(Some(r"C:\a;C:\b"));
        let mut runner = FakeRunner::with_outputs(vec![(
            vec![OutputLine::Stdout("installing".to_string())],
            Some(0),
        )]);
        let shared = Rc::clone(&path.0);
        runner.side_effect = Some(Box::new(move |_| {
            // Installer clobbers the user PATH
            *shared.borrow_mut() = Some(r"C:\Multipass\bin".to_string());
        }));

        let installer = PathBuf::from("downloads").join("multipass-setup.exe");
        InstallerRunner::new(&runner, &path, silent).install(&installer);

        let calls = runner.calls.borrow();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].working_dir.as_deref(), Some(Path::new("downloads")));
        assert_eq!(calls[0].args, vec![OsString::from("/S")]);
        assert_eq!(
            path.0.borrow().as_deref(),
            Some(r"C:\a;C:\b;C:\Multipass\bin")
        );
    }

    #[test]
    fn failing_installer_is_not_fatal() {
        let path = MemoryPath::new(Some(r"C:\a"));
        let runner = FakeRunner::with_outputs(vec![(
            vec![OutputLine::Stderr("boom".to_string())],
            Some(1603),
        )]);

        InstallerRunner::new(&runner, &path, silent).install(Path::new("setup.exe"));

        assert_eq!(runner.calls.borrow().len(), 1);
        assert_eq!(path.0.borrow().as_deref(), Some(r"C:\a"));
    }
}
