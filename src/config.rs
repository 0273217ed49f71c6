use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::info;
use serde::{Deserialize, Serialize};

/// Default cloud-init user data for new instances
pub const DEFAULT_CLOUD_INIT: &str = include_str!("../templates/cloud-config.yaml");

/// User configuration (`<config dir>/mplaunch/config.toml`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// GitHub owner of the release feed
    pub release_owner: String,
    pub release_repo: String,
    /// Substring of the asset content type that marks this platform's installer
    pub platform_marker: String,
    /// Where installers are downloaded to (defaults to the executable's directory)
    pub download_dir: Option<PathBuf>,
    /// Name of the VM daemon service
    pub service_name: String,
    pub service_timeout_secs: u64,
    pub poll_interval_ms: u64,
    /// Cloud-init template for new instances (defaults next to this file)
    pub cloud_init: Option<PathBuf>,
    pub multipass_bin: String,

    /// Directory of the loaded config file
    #[serde(skip)]
    base_dir: Option<PathBuf>,
}

fn default_platform_marker() -> &'static str {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            "ms-dos"
        } else if #[cfg(target_os = "macos")] {
            "apple-diskimage"
        } else {
            "x-snap"
        }
    }
}

fn default_service_name() -> &'static str {
    cfg_if::cfg_if! {
        if #[cfg(target_os = "windows")] {
            "Multipass"
        } else if #[cfg(target_os = "macos")] {
            "com.canonical.multipassd"
        } else {
            "snap.multipass.multipassd"
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            release_owner: "canonical".to_string(),
            release_repo: "multipass".to_string(),
            platform_marker: default_platform_marker().to_string(),
            download_dir: None,
            service_name: default_service_name().to_string(),
            service_timeout_secs: 120,
            poll_interval_ms: 250,
            cloud_init: None,
            multipass_bin: "multipass".to_string(),
            base_dir: None,
        }
    }
}

impl AppConfig {
    /// `<config dir>/mplaunch/config.toml`
    pub fn default_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?
            .join("mplaunch");
        Ok(config_dir.join("config.toml"))
    }

    /// Load `path`, writing the defaults there first if it does not exist
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("Config not found at {}, creating default configuration", path.display());

            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).context("Failed to create config directory")?;
            }

            let default_toml = toml::to_string_pretty(&Self::default())
                .context("Failed to serialize default config")?;
            fs::write(path, default_toml).context("Failed to write config file")?;

            info!("Created default configuration at {}", path.display());
        }

        let cfg_str = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut cfg: Self = toml::from_str(&cfg_str)
            .with_context(|| format!("Failed to parse config {}", path.display()))?;
        cfg.base_dir = path.parent().map(Path::to_path_buf);

        info!("Using config from: {}", path.display());
        Ok(cfg)
    }

    pub fn service_timeout(&self) -> Duration {
        Duration::from_secs(self.service_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Configured download directory, else the directory of the running executable
    pub fn download_dir(&self) -> PathBuf {
        if let Some(dir) = &self.download_dir {
            return dir.clone();
        }
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(Path::to_path_buf))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    pub fn cloud_init_path(&self) -> PathBuf {
        match &self.cloud_init {
            Some(path) if path.is_absolute() => path.clone(),
            Some(path) => self.base_dir().join(path),
            None => self.base_dir().join("cloud-config.yaml"),
        }
    }

    fn base_dir(&self) -> PathBuf {
        self.base_dir.clone().unwrap_or_else(|| PathBuf::from("."))
    }

    /// Write the built-in cloud-init template if the configured one is missing
    pub fn ensure_cloud_init(&self) -> Result<PathBuf> {
        let path = self.cloud_init_path();
        if !path.exists() {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            fs::write(&path, DEFAULT_CLOUD_INIT)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            info!("Wrote default cloud-init template to {}", path.display());
        }
        Ok(path)
    }
}
