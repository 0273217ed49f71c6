//! Wiring between configuration, the installer core and the multipass client

use anyhow::{Context, Result};
use log::info;
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::control::{ServiceStatus, system_control};
use crate::install::progress::ProgressReporter;
use crate::install::runner::SystemRunner;
use crate::install::{Platform, PlatformInstaller, bootstrap, select_installer};
use crate::multipass::{Instance, InstanceCommand, MultipassClient};
use crate::reconcile::ServiceReconciler;

pub struct App {
    pub config: AppConfig,
    pub client: MultipassClient,
    pub cancel: CancellationToken,
}

/// Snapshot printed by `mplaunch status`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Status {
    pub installed: bool,
    /// `None` when the service is not registered
    pub service: Option<ServiceStatus>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let client = MultipassClient::new(config.multipass_bin.clone(), Box::new(SystemRunner));
        Self {
            config,
            client,
            cancel: CancellationToken::new(),
        }
    }

    fn installer(&self) -> Result<Box<dyn PlatformInstaller>> {
        let platform = Platform::detect();
        select_installer(&platform, &self.config)
            .with_context(|| format!("Cannot manage Multipass on {platform}"))
    }

    /// Install Multipass when missing; returns whether it is present afterwards
    pub fn ensure_installed(&self) -> Result<bool> {
        let installer = self.installer()?;
        let mut reporter = ProgressReporter::new("Downloading installer...");
        let installed = {
            let mut progress = reporter.callback();
            bootstrap(installer.as_ref(), Some(&mut progress), &self.cancel)
        };
        reporter.finish();
        installed.context("Failed to install Multipass")
    }

    /// Bring the daemon service to running, waiting out transitional states
    pub fn ensure_service(&self) -> Result<()> {
        let control = system_control()?;
        ServiceReconciler::new(control.as_ref(), self.config.service_timeout())
            .poll_interval(self.config.poll_interval())
            .ensure_running(&self.config.service_name, &self.cancel)
            .with_context(|| format!("Service {} is not usable", self.config.service_name))
    }

    /// Install if needed, then make sure the daemon runs
    pub fn prepare(&self) -> Result<()> {
        if !self.ensure_installed()? {
            anyhow::bail!("Multipass is not installed; check the installer output above");
        }
        self.ensure_service()?;
        info!("{} is running", self.config.service_name);
        Ok(())
    }

    pub fn status(&self) -> Result<Status> {
        let installed = self.installer()?.is_installed();
        let service = system_control()?.status(&self.config.service_name)?;
        Ok(Status { installed, service })
    }

    /// Remove relaunch entries and downloaded installers
    pub fn clear_installation_files(&self) -> Result<()> {
        self.installer()?
            .clear_installation_files()
            .context("Failed to clear installation files")
    }

    pub fn list(&self) -> Result<Vec<Instance>> {
        Ok(self.client.list()?)
    }

    /// Launch a new instance from the configured cloud-init template
    pub fn create_instance(&self) -> Result<Option<Instance>> {
        let cloud_init = self.config.ensure_cloud_init()?;
        let mut reporter = ProgressReporter::new("Downloading image...");
        let launched = {
            let mut progress = reporter.callback();
            self.client.launch(&cloud_init, &mut progress)
        };
        reporter.finish();
        launched.context("Failed to launch a new instance")
    }

    pub fn purge(&self) -> Result<String> {
        Ok(self.client.purge()?)
    }

    pub fn execute(&self, command: InstanceCommand, instance: &Instance) -> Result<String> {
        self.client
            .execute(command, instance)
            .with_context(|| format!("`{}` failed for {}", command.verb(), instance.name))
    }
}
