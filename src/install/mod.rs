//! Multipass installation
//!
//! Detects whether the VM tool is present and, if not, fetches and runs the
//! platform's installer. One [`PlatformInstaller`] per host OS is picked by
//! [`select_installer`]; hosts without one fail with `UnsupportedPlatform`.

pub mod autostart;
mod environment;
mod file_ops;
pub mod linux;
pub mod progress;
pub mod release;
pub mod runner;
pub mod windows;

use std::fmt;
use std::path::{Path, PathBuf};

use log::{error, info, warn};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::{InstallerError, Result};

pub use environment::is_interactive_terminal;

/// Absolute path of the running program, which relaunch entries point at
pub fn relaunch_target() -> Result<PathBuf> {
    std::env::current_exe().map_err(|e| InstallerError::io("Failed to resolve the running executable", e))
}

/// Capability set every platform variant provides
pub trait PlatformInstaller {
    /// Platform-appropriate presence check
    fn is_installed(&self) -> bool;

    /// Fetch the installer artifact, reusing an existing download
    fn download(
        &self,
        on_progress: Option<&mut dyn FnMut(u8, &str)>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf>;

    /// Run the installer unattended. Failures are logged; verify with `is_installed`.
    fn install(&self, installer: &Path);

    /// Remove the relaunch entry and other install-time leftovers
    fn clear_installation_files(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Linux,
    MacOs,
    Other(String),
}

impl Platform {
    pub fn detect() -> Self {
        Self::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Self::Windows,
            "linux" => Self::Linux,
            "macos" => Self::MacOs,
            other => Self::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Windows => f.write_str("windows"),
            Self::Linux => f.write_str("linux"),
            Self::MacOs => f.write_str("macos"),
            Self::Other(os) => f.write_str(os),
        }
    }
}

/// Installer variant for `platform`
///
/// Only the variant of the host this binary was built for can be
/// constructed; anything else is `UnsupportedPlatform`.
pub fn select_installer(platform: &Platform, config: &AppConfig) -> Result<Box<dyn PlatformInstaller>> {
    match platform {
        #[cfg(windows)]
        Platform::Windows => Ok(Box::new(windows::WindowsInstaller::from_config(config)?)),
        #[cfg(target_os = "linux")]
        Platform::Linux => Ok(Box::new(linux::LinuxInstaller::from_config(config)?)),
        other => {
            let _ = config;
            Err(InstallerError::UnsupportedPlatform {
                os: other.to_string(),
            })
        }
    }
}

/// Install the tool if missing, otherwise tidy up after a previous install
///
/// Returns whether the tool is present afterwards. An installer that ran but
/// left nothing behind is logged, not raised.
pub fn bootstrap(
    installer: &dyn PlatformInstaller,
    on_progress: Option<&mut dyn FnMut(u8, &str)>,
    cancel: &CancellationToken,
) -> Result<bool> {
    if installer.is_installed() {
        if let Err(e) = installer.clear_installation_files() {
            warn!("Failed to clear installation files: {e}");
        }
        return Ok(true);
    }

    info!("Multipass is not installed, fetching the latest release...");
    let artifact = installer.download(on_progress, cancel)?;
    installer.install(&artifact);

    let installed = installer.is_installed();
    if installed {
        info!("Multipass installed");
    } else {
        error!("Installation finished but Multipass is still not present");
    }
    Ok(installed)
}
