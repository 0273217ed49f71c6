//! Login-time relaunch registration
//!
//! A package install may reboot the machine; the registration brings this
//! tool back once the user logs in again. Each variant owns exactly one
//! artifact, so registering twice overwrites instead of duplicating.

use std::path::{Path, PathBuf};

use log::info;

use super::file_ops::{remove_if_exists, write_file_atomic};
use super::runner::{CommandSpec, ProcessRunner, run_logged};
use crate::error::{InstallerError, Result};

pub const APP_NAME: &str = "mplaunch";

pub trait AutoLaunchRegistrar {
    /// Create or overwrite the entry so that `target` starts at login
    fn register(&self, target: &Path) -> Result<()>;

    /// Remove the entry; a missing entry is not an error
    fn unregister(&self) -> Result<()>;

    /// Where the artifact lives
    fn location(&self) -> &Path;

    fn is_registered(&self) -> bool {
        self.location().exists()
    }
}

/// Freedesktop autostart entry (`~/.config/autostart/<name>.desktop`)
pub struct XdgAutostart {
    path: PathBuf,
}

impl XdgAutostart {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn for_current_user() -> Result<Self> {
        let config = dirs::config_dir()
            .ok_or_else(|| InstallerError::System("Could not determine config directory".to_string()))?;
        Ok(Self::at(config.join("autostart").join(format!("{APP_NAME}.desktop"))))
    }

    fn entry(target: &Path) -> String {
        let exec = target.display().to_string().replace('"', "\\\"");
        format!(
            "[Desktop Entry]\n\
             Type=Application\n\
             Name={APP_NAME}\n\
             Comment=Resume VM setup after login\n\
             Exec=\"{exec}\"\n\
             Terminal=true\n\
             X-GNOME-Autostart-enabled=true\n"
        )
    }
}

impl AutoLaunchRegistrar for XdgAutostart {
    fn register(&self, target: &Path) -> Result<()> {
        write_file_atomic(&self.path, Self::entry(target).as_bytes())?;
        info!("Registered autostart entry {}", self.path.display());
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        if remove_if_exists(&self.path)? {
            info!("Removed autostart entry {}", self.path.display());
        }
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

/// Shortcut in the Windows per-user Startup folder
///
/// `.lnk` files are written by the WScript.Shell COM object, driven through
/// PowerShell so no COM bindings leak into this crate.
pub struct StartupShortcut {
    path: PathBuf,
    runner: Box<dyn ProcessRunner>,
}

impl StartupShortcut {
    pub fn at(path: impl Into<PathBuf>, runner: Box<dyn ProcessRunner>) -> Self {
        Self {
            path: path.into(),
            runner,
        }
    }

    /// `%APPDATA%\Microsoft\Windows\Start Menu\Programs\Startup\<name>.lnk`
    pub fn for_current_user(runner: Box<dyn ProcessRunner>) -> Result<Self> {
        let roaming = dirs::data_dir()
            .ok_or_else(|| InstallerError::System("Could not determine AppData directory".to_string()))?;
        let startup = roaming
            .join("Microsoft")
            .join("Windows")
            .join("Start Menu")
            .join("Programs")
            .join("Startup");
        Ok(Self::at(startup.join(format!("{APP_NAME}.lnk")), runner))
    }

    fn script(&self, target: &Path) -> String {
        format!(
            "$s=(New-Object -ComObject WScript.Shell).CreateShortcut('{}');\
             $s.TargetPath='{}';\
             $s.IconLocation='shell32.dll, 1';\
             $s.Save()",
            ps_quote(&self.path.display().to_string()),
            ps_quote(&target.display().to_string()),
        )
    }
}

/// Escape for a single-quoted PowerShell string
fn ps_quote(s: &str) -> String {
    s.replace('\'', "''")
}

impl AutoLaunchRegistrar for StartupShortcut {
    fn register(&self, target: &Path) -> Result<()> {
        let spec = CommandSpec::new("powershell").args([
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-Command".to_string(),
            self.script(target),
        ]);

        let outcome = run_logged(self.runner.as_ref(), &spec, "shortcut")?;
        if !outcome.success() {
            return Err(InstallerError::System(format!(
                "Failed to create startup shortcut {} (exit {:?})",
                self.path.display(),
                outcome.code
            )));
        }
        info!("Registered startup shortcut {}", self.path.display());
        Ok(())
    }

    fn unregister(&self) -> Result<()> {
        if remove_if_exists(&self.path)? {
            info!("Removed startup shortcut {}", self.path.display());
        }
        Ok(())
    }

    fn location(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::install::runner::tests::FakeRunner;
    use std::fs;

    #[test]
    fn xdg_entry_points_at_target_and_overwrites() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = XdgAutostart::at(dir.path().join("autostart").join("mplaunch.desktop"));

        registrar.register(Path::new("/opt/old/mplaunch")).unwrap();
        registrar.register(Path::new("/opt/new/mplaunch")).unwrap();

        let entries: Vec<_> = fs::read_dir(dir.path().join("autostart")).unwrap().collect();
        assert_eq!(entries.len(), 1);
        let content = fs::read_to_string(registrar.location()).unwrap();
        assert!(content.contains("Exec=\"/opt/new/mplaunch\""));
        assert!(!content.contains("/opt/old"));
    }

    #[test]
    fn xdg_unregister_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let registrar = XdgAutostart::at(dir.path().join("mplaunch.desktop"));
        registrar.unregister().unwrap();

        registrar.register(Path::new("/usr/bin/mplaunch")).unwrap();
        assert!(registrar.is_registered());
        registrar.unregister().unwrap();
        assert!(!registrar.is_registered());
    }

    #[test]
    fn shortcut_script_targets_executable_with_quotes_escaped() {
        let runner = FakeRunner::default();
        let shortcut = StartupShortcut::at(r"C:\Users\o'neil\Startup\mplaunch.lnk", Box::new(runner));
        let script = shortcut.script(Path::new(r"C:\tools\mplaunch.exe"));
        assert!(script.contains(r"CreateShortcut('C:\Users\o''neil\Startup\mplaunch.lnk')"));
        assert!(script.contains(r"$s.TargetPath='C:\tools\mplaunch.exe'"));
        assert!(script.ends_with("$s.Save()"));
    }

    #[test]
    fn shortcut_creation_failure_is_reported() {
        let runner = FakeRunner::with_outputs(vec![(Vec::new(), Some(1))]);
        let dir = tempfile::tempdir().unwrap();
        let shortcut = StartupShortcut::at(dir.path().join("mplaunch.lnk"), Box::new(runner));
        assert!(shortcut.register(Path::new("mplaunch.exe")).is_err());
    }

    #[test]
    fn shortcut_unregister_removes_link() {
        let dir = tempfile::tempdir().unwrap();
        let link = dir.path().join("mplaunch.lnk");
        fs::write(&link, b"lnk").unwrap();
        let shortcut = StartupShortcut::at(&link, Box::new(FakeRunner::default()));
        shortcut.unregister().unwrap();
        assert!(!link.exists());
        shortcut.unregister().unwrap();
    }
}
