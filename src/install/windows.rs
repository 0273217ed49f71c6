//! Windows variant: GitHub release installer run silently through PowerShell

use std::path::{Path, PathBuf};

use log::{error, info};
use tokio_util::sync::CancellationToken;

use super::PlatformInstaller;
use super::autostart::AutoLaunchRegistrar;
use super::release::ReleaseFetcher;
use super::runner::{CommandSpec, InstallerRunner, PathStore, ProcessRunner};
use crate::error::Result;

/// Used when the Program Files known folder cannot be resolved
pub const DEFAULT_INSTALL_DIR: &str = r"C:\Program Files\Multipass";

/// `<Program Files>\Multipass`, following the system drive
pub fn default_install_dir() -> PathBuf {
    #[cfg(windows)]
    {
        use windows::Win32::UI::Shell::FOLDERID_ProgramFiles;
        if let Some(program_files) = known_folder_path(&FOLDERID_ProgramFiles) {
            return program_files.join("Multipass");
        }
    }
    PathBuf::from(DEFAULT_INSTALL_DIR)
}

#[cfg(windows)]
fn known_folder_path(id: &windows::core::GUID) -> Option<PathBuf> {
    use windows::Win32::System::Com::CoTaskMemFree;
    use windows::Win32::UI::Shell::{KF_FLAG_DEFAULT, SHGetKnownFolderPath};

    unsafe {
        let raw = SHGetKnownFolderPath(id, KF_FLAG_DEFAULT, None).ok()?;
        let path = raw.to_string().ok();
        CoTaskMemFree(Some(raw.0 as _));
        path.filter(|p| !p.is_empty()).map(PathBuf::from)
    }
}

/// `$setup=Start-Process '<installer>' -ArgumentList '/S' -Wait -PassThru; exit $setup.ExitCode`
pub fn silent_install_command(installer: &Path) -> CommandSpec {
    let quoted = installer.display().to_string().replace('\'', "''");
    CommandSpec::new("powershell").args([
        "-NoProfile".to_string(),
        "-Command".to_string(),
        format!("$setup=Start-Process '{quoted}' -ArgumentList '/S' -Wait -PassThru; exit $setup.ExitCode"),
    ])
}

/// Where releases come from and where their installer lands
#[derive(Debug, Clone)]
pub struct ReleaseSource {
    pub owner: String,
    pub repo: String,
    pub platform_marker: String,
    pub download_dir: PathBuf,
}

pub struct WindowsInstaller {
    source: ReleaseSource,
    install_dir: PathBuf,
    executable: PathBuf,
    fetcher: ReleaseFetcher,
    registrar: Box<dyn AutoLaunchRegistrar>,
    runner: Box<dyn ProcessRunner>,
    path_store: Box<dyn PathStore>,
}

impl WindowsInstaller {
    pub fn new(
        source: ReleaseSource,
        fetcher: ReleaseFetcher,
        registrar: Box<dyn AutoLaunchRegistrar>,
        executable: impl Into<PathBuf>,
        runner: Box<dyn ProcessRunner>,
        path_store: Box<dyn PathStore>,
    ) -> Self {
        Self {
            source,
            install_dir: default_install_dir(),
            executable: executable.into(),
            fetcher,
            registrar,
            runner,
            path_store,
        }
    }

    pub fn install_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.install_dir = dir.into();
        self
    }

    #[cfg(windows)]
    pub fn from_config(config: &crate::config::AppConfig) -> Result<Self> {
        use super::autostart::StartupShortcut;
        use super::runner::SystemRunner;

        let source = ReleaseSource {
            owner: config.release_owner.clone(),
            repo: config.release_repo.clone(),
            platform_marker: config.platform_marker.clone(),
            download_dir: config.download_dir(),
        };
        Ok(Self::new(
            source,
            ReleaseFetcher::github()?,
            Box::new(StartupShortcut::for_current_user(Box::new(SystemRunner))?),
            super::relaunch_target()?,
            Box::new(SystemRunner),
            Box::new(user_env::UserEnvironment),
        ))
    }
}

impl PlatformInstaller for WindowsInstaller {
    fn is_installed(&self) -> bool {
        self.install_dir.is_dir()
    }

    fn download(
        &self,
        on_progress: Option<&mut dyn FnMut(u8, &str)>,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        info!("Searching for the latest {} release...", self.source.repo);
        let asset = self.fetcher.find_latest_asset(
            &self.source.owner,
            &self.source.repo,
            &self.source.platform_marker,
        )?;
        let destination = self.source.download_dir.join(&asset.name);
        self.fetcher.download(&asset, &destination, on_progress, cancel)
    }

    fn install(&self, installer: &Path) {
        if let Err(e) = self.registrar.register(&self.executable) {
            error!("Failed to register startup shortcut: {e}");
        }

        InstallerRunner::new(self.runner.as_ref(), self.path_store.as_ref(), silent_install_command)
            .install(installer);
    }

    fn clear_installation_files(&self) -> Result<()> {
        self.registrar.unregister()
    }
}

/// User-scope `Path` under `HKCU\Environment`
#[cfg(windows)]
pub mod user_env {
    use windows::Win32::Foundation::{ERROR_FILE_NOT_FOUND, LPARAM, WPARAM};
    use windows::Win32::System::Registry::{
        HKEY, HKEY_CURRENT_USER, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_EXPAND_SZ, REG_VALUE_TYPE,
        RegCloseKey, RegOpenKeyExW, RegQueryValueExW, RegSetValueExW,
    };
    use windows::Win32::UI::WindowsAndMessaging::{
        HWND_BROADCAST, SMTO_ABORTIFHUNG, SendMessageTimeoutW, WM_SETTINGCHANGE,
    };
    use windows::core::w;

    use crate::error::{InstallerError, Result};
    use crate::install::runner::PathStore;

    struct RegistryHandle(HKEY);

    impl Drop for RegistryHandle {
        fn drop(&mut self) {
            unsafe {
                let _ = RegCloseKey(self.0);
            }
        }
    }

    fn open(access: windows::Win32::System::Registry::REG_SAM_FLAGS) -> Result<RegistryHandle> {
        let mut key = HKEY::default();
        unsafe { RegOpenKeyExW(HKEY_CURRENT_USER, w!("Environment"), None, access, &mut key) }
            .ok()
            .map_err(|e| InstallerError::System(format!("Failed to open HKCU\\Environment: {e}")))?;
        Ok(RegistryHandle(key))
    }

    pub struct UserEnvironment;

    impl PathStore for UserEnvironment {
        fn read_user_path(&self) -> Result<Option<String>> {
            let key = open(KEY_QUERY_VALUE)?;

            let mut kind = REG_VALUE_TYPE::default();
            let mut size = 0u32;
            let status = unsafe {
                RegQueryValueExW(
                    key.0,
                    w!("Path"),
                    None,
                    Some(&mut kind as *mut _),
                    None,
                    Some(&mut size as *mut _),
                )
            };
            if status == ERROR_FILE_NOT_FOUND {
                return Ok(None);
            }
            status
                .ok()
                .map_err(|e| InstallerError::System(format!("Failed to query user Path: {e}")))?;

            let mut buf = vec![0u16; (size as usize).div_ceil(2)];
            unsafe {
                RegQueryValueExW(
                    key.0,
                    w!("Path"),
                    None,
                    Some(&mut kind as *mut _),
                    Some(buf.as_mut_ptr().cast()),
                    Some(&mut size as *mut _),
                )
            }
            .ok()
            .map_err(|e| InstallerError::System(format!("Failed to read user Path: {e}")))?;

            let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
            Ok(Some(String::from_utf16_lossy(&buf[..len])))
        }

        fn write_user_path(&self, value: &str) -> Result<()> {
            let key = open(KEY_SET_VALUE)?;
            let wide: Vec<u16> = value.encode_utf16().chain(Some(0)).collect();
            let bytes: Vec<u8> = wide.iter().flat_map(|c| c.to_le_bytes()).collect();

            unsafe { RegSetValueExW(key.0, w!("Path"), None, REG_EXPAND_SZ, Some(&bytes)) }
                .ok()
                .map_err(|e| InstallerError::System(format!("Failed to write user Path: {e}")))?;

            // Let Explorer and new shells pick up the change
            unsafe {
                let _ = SendMessageTimeoutW(
                    HWND_BROADCAST,
                    WM_SETTINGCHANGE,
                    WPARAM(0),
                    LPARAM(w!("Environment").as_ptr() as isize),
                    SMTO_ABORTIFHUNG,
                    5000,
                    None,
                );
            }

            refresh_process_path(value);
            Ok(())
        }
    }

    /// Append user entries missing from this process' PATH
    fn refresh_process_path(user_path: &str) {
        let current = std::env::var("PATH").unwrap_or_default();
        let missing: Vec<&str> = user_path
            .split(';')
            .filter(|entry| !entry.is_empty() && !current.split(';').any(|c| c.eq_ignore_ascii_case(entry)))
            .collect();
        if missing.is_empty() {
            return;
        }
        let refreshed = format!("{current};{}", missing.join(";"));
        // Single-threaded at this point: the runner has joined its readers
        unsafe { std::env::set_var("PATH", refreshed) };
    }
}
