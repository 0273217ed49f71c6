//! Linux variant: Multipass from the snap store
//!
//! `snap download` fetches the snap and its assertion into the download
//! directory; install acknowledges the assertion and installs the local
//! snap, escalating with `sudo` when not running as root.

use std::ffi::{OsStr, OsString};
use std::fs;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use super::PlatformInstaller;
use super::autostart::AutoLaunchRegistrar;
use super::file_ops::remove_if_exists;
use super::runner::{CommandSpec, ProcessRunner, run_logged};
use crate::error::{InstallerError, Result};

pub const SNAP_NAME: &str = "multipass";
pub const SNAP_BIN: &str = "/snap/bin/multipass";

pub struct LinuxInstaller {
    binary: String,
    snap_bin: PathBuf,
    download_dir: PathBuf,
    executable: PathBuf,
    use_sudo: bool,
    registrar: Box<dyn AutoLaunchRegistrar>,
    runner: Box<dyn ProcessRunner>,
}

impl LinuxInstaller {
    pub fn new(
        binary: impl Into<String>,
        download_dir: impl Into<PathBuf>,
        registrar: Box<dyn AutoLaunchRegistrar>,
        executable: impl Into<PathBuf>,
        runner: Box<dyn ProcessRunner>,
    ) -> Self {
        Self {
            binary: binary.into(),
            snap_bin: PathBuf::from(SNAP_BIN),
            download_dir: download_dir.into(),
            executable: executable.into(),
            use_sudo: !is_root(),
            registrar,
            runner,
        }
    }

    #[cfg(target_os = "linux")]
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        use super::autostart::XdgAutostart;
        use super::runner::SystemRunner;

        Ok(Self::new(
            config.multipass_bin.clone(),
            config.download_dir(),
            Box::new(XdgAutostart::for_current_user()?),
            super::relaunch_target()?,
            Box::new(SystemRunner),
        ))
    }

    pub fn snap_bin(mut self, path: impl Into<PathBuf>) -> Self {
        self.snap_bin = path.into();
        self
    }

    pub fn use_sudo(mut self, sudo: bool) -> Self {
        self.use_sudo = sudo;
        self
    }

    /// A previously downloaded `multipass_<rev>.snap`
    fn downloaded_snap(&self) -> Option<PathBuf> {
        let entries = fs::read_dir(&self.download_dir).ok()?;
        entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_snap_file(p))
            .max_by_key(|p| snap_revision(p))
    }

    fn privileged(&self, args: &[&OsStr]) -> CommandSpec {
        if self.use_sudo {
            CommandSpec::new("sudo").arg("snap").args(args.iter().copied())
        } else {
            CommandSpec::new("snap").args(args.iter().copied())
        }
    }

    fn run_step(&self, spec: &CommandSpec, path: &Path) -> bool {
        match run_logged(self.runner.as_ref(), spec, "snap") {
            Ok(outcome) if outcome.success() => true,
            Ok(outcome) => {
                warn!(
                    "{}",
                    InstallerError::InstallChildProcessFailed {
                        path: path.to_path_buf(),
                        code: outcome.code,
                    }
                );
                false
            }
            Err(e) => {
                error!("Error occurred while running snap: {e}");
                false
            }
        }
    }
}

fn is_root() -> bool {
    cfg_if::cfg_if! {
        if #[cfg(unix)] {
            nix::unistd::geteuid().is_root()
        } else {
            false
        }
    }
}

fn is_snap_file(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "snap")
        && path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&format!("{SNAP_NAME}_")))
}

/// `multipass_1234.snap` -> 1234
fn snap_revision(path: &Path) -> u64 {
    path.file_stem()
        .and_then(|n| n.to_str())
        .and_then(|n| n.rsplit('_').next())
        .and_then(|rev| rev.parse().ok())
        .unwrap_or(0)
}

impl PlatformInstaller for LinuxInstaller {
    fn is_installed(&self) -> bool {
        which::which(&self.binary).is_ok() || self.snap_bin.exists()
    }

    fn download(
        &self,
        mut on_progress: Option<&mut dyn FnMut(u8, &str)>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        if let Some(existing) = self.downloaded_snap() {
            info!("Snap already downloaded: {}", existing.display());
            return Ok(existing);
        }
        if cancel.is_cancelled() {
            return Err(InstallerError::Cancelled);
        }

        let label = format!("Downloading {SNAP_NAME} snap");
        let source = format!("snap:{SNAP_NAME}");
        if let Some(cb) = on_progress.as_mut() {
            cb(0, &label);
        }

        fs::create_dir_all(&self.download_dir).map_err(|e| {
            InstallerError::io(format!("Failed to create {}", self.download_dir.display()), e)
        })?;

        let mut target = OsString::from("--target-directory=");
        target.push(self.download_dir.as_os_str());
        let spec = CommandSpec::new("snap").args([OsString::from("download"), SNAP_NAME.into(), target]);

        let outcome = run_logged(self.runner.as_ref(), &spec, "snap")?;
        if !outcome.success() {
            return Err(InstallerError::download(
                &source,
                format!("snap download exited with {:?}", outcome.code),
            ));
        }

        let snap = self
            .downloaded_snap()
            .ok_or_else(|| InstallerError::download(&source, "snap download produced no .snap file"))?;

        if let Some(cb) = on_progress.as_mut() {
            cb(100, &label);
        }
        Ok(snap)
    }

    fn install(&self, snap: &Path) {
        if let Err(e) = self.registrar.register(&self.executable) {
            error!("Failed to register autostart entry: {e}");
        }

        info!("Deploying {}...", snap.display());

        let assertion = snap.with_extension("assert");
        if assertion.exists() {
            self.run_step(&self.privileged(&[OsStr::new("ack"), assertion.as_os_str()]), &assertion);
        } else {
            warn!("No assertion next to {}, installing without it", snap.display());
        }

        let spec = if assertion.exists() {
            self.privileged(&[OsStr::new("install"), snap.as_os_str()])
        } else {
            self.privileged(&[OsStr::new("install"), OsStr::new("--dangerous"), snap.as_os_str()])
        };
        if self.run_step(&spec, snap) {
            info!("Installer finished");
        }
    }

    fn clear_installation_files(&self) -> Result<()> {
        self.registrar.unregister()?;
        if let Some(snap) = self.downloaded_snap() {
            for leftover in [snap.with_extension("assert"), snap] {
                if remove_if_exists(&leftover)? {
                    info!("Removed {}", leftover.display());
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::autostart::XdgAutostart;
    use crate::install::runner::tests::FakeRunner;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn linux(dir: &Path, runner: FakeRunner) -> LinuxInstaller {
        LinuxInstaller::new(
            "definitely-not-installed-multipass",
            dir.join("downloads"),
            Box::new(XdgAutostart::at(dir.join("autostart").join("mplaunch.desktop"))),
            "/opt/mplaunch",
            Box::new(runner),
        )
        .snap_bin(dir.join("snap").join("multipass"))
        .use_sudo(true)
    }

    fn command_line(spec: &CommandSpec) -> String {
        std::iter::once(&spec.program)
            .chain(&spec.args)
            .map(|a| a.to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Runner that records each command line into a shared log
    fn recording_runner() -> (FakeRunner, Rc<RefCell<Vec<String>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let seen = Rc::clone(&log);
        let mut runner = FakeRunner::default();
        runner.side_effect = Some(Box::new(move |spec| seen.borrow_mut().push(command_line(spec))));
        (runner, log)
    }

    #[test]
    fn snap_binary_counts_as_installed() {
        let dir = tempfile::tempdir().unwrap();
        let installer = linux(dir.path(), FakeRunner::default());
        assert!(!installer.is_installed());

        fs::create_dir_all(dir.path().join("snap")).unwrap();
        fs::write(dir.path().join("snap").join("multipass"), b"").unwrap();
        assert!(installer.is_installed());
    }

    #[test]
    fn download_runs_snap_download_and_reports_progress() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        let mut runner = FakeRunner::default();
        let target = downloads.clone();
        runner.side_effect = Some(Box::new(move |_| {
            fs::write(target.join("multipass_1234.snap"), b"snap").unwrap();
            fs::write(target.join("multipass_1234.assert"), b"assert").unwrap();
        }));
        let installer = linux(dir.path(), runner);

        let mut seen = Vec::new();
        let mut progress = |p: u8, _: &str| seen.push(p);
        let snap = installer
            .download(Some(&mut progress), &CancellationToken::new())
            .unwrap();

        assert_eq!(snap, downloads.join("multipass_1234.snap"));
        assert_eq!(seen, vec![0, 100]);
    }

    #[test]
    fn existing_snap_skips_download() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("multipass_99.snap"), b"snap").unwrap();
        let (runner, log) = recording_runner();
        let installer = linux(dir.path(), runner);

        let mut calls = 0;
        let mut progress = |_: u8, _: &str| calls += 1;
        let snap = installer
            .download(Some(&mut progress), &CancellationToken::new())
            .unwrap();

        assert_eq!(snap, downloads.join("multipass_99.snap"));
        assert_eq!(calls, 0);
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn failed_snap_download_is_download_failed() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::with_outputs(vec![(Vec::new(), Some(1))]);
        let installer = linux(dir.path(), runner);
        let err = installer.download(None, &CancellationToken::new()).unwrap_err();
        assert!(matches!(err, InstallerError::DownloadFailed { .. }));
    }

    #[test]
    fn cancelled_download_runs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, log) = recording_runner();
        let installer = linux(dir.path(), runner);
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(installer.download(None, &cancel), Err(InstallerError::Cancelled)));
        assert!(log.borrow().is_empty());
    }

    #[test]
    fn install_acknowledges_assertion_then_installs_with_sudo() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        let snap = downloads.join("multipass_7.snap");
        let assertion = downloads.join("multipass_7.assert");
        fs::write(&snap, b"snap").unwrap();
        fs::write(&assertion, b"assert").unwrap();

        let (runner, log) = recording_runner();
        linux(dir.path(), runner).install(&snap);

        assert_eq!(
            *log.borrow(),
            vec![
                format!("sudo snap ack {}", assertion.display()),
                format!("sudo snap install {}", snap.display()),
            ]
        );
        let entry = fs::read_to_string(dir.path().join("autostart").join("mplaunch.desktop")).unwrap();
        assert!(entry.contains("Exec=\"/opt/mplaunch\""));
    }

    #[test]
    fn unsigned_snap_is_installed_dangerously_as_root() {
        let dir = tempfile::tempdir().unwrap();
        let snap = dir.path().join("multipass_7.snap");
        fs::write(&snap, b"snap").unwrap();

        let (runner, log) = recording_runner();
        linux(dir.path(), runner).use_sudo(false).install(&snap);

        assert_eq!(
            *log.borrow(),
            vec![format!("snap install --dangerous {}", snap.display())]
        );
    }

    #[test]
    fn clearing_removes_autostart_and_downloaded_snap() {
        let dir = tempfile::tempdir().unwrap();
        let downloads = dir.path().join("downloads");
        fs::create_dir_all(&downloads).unwrap();
        fs::write(downloads.join("multipass_7.snap"), b"snap").unwrap();
        fs::write(downloads.join("multipass_7.assert"), b"assert").unwrap();
        let installer = linux(dir.path(), FakeRunner::default());
        installer.registrar.register(Path::new("/opt/mplaunch")).unwrap();

        installer.clear_installation_files().unwrap();

        assert!(!downloads.join("multipass_7.snap").exists());
        assert!(!downloads.join("multipass_7.assert").exists());
        assert!(!installer.registrar.is_registered());
        installer.clear_installation_files().unwrap();
    }

    #[test]
    fn only_multipass_snaps_are_picked_up() {
        assert!(is_snap_file(Path::new("/d/multipass_1.snap")));
        assert!(!is_snap_file(Path::new("/d/lxd_1.snap")));
        assert!(!is_snap_file(Path::new("/d/multipass_1.assert")));
        assert_eq!(snap_revision(Path::new("/d/multipass_1234.snap")), 1234);
    }
}
