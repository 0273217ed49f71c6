//! Linux service control using systemd (systemctl)

use std::process::Command;

use crate::control::{ServiceControl, ServiceStatus};
use crate::error::{InstallerError, Result};

/// Drives system units; the VM daemon is never a user unit
pub(super) struct NativeControl;

impl NativeControl {
    pub(super) fn new() -> Self {
        Self
    }

    fn unit(name: &str) -> String {
        if name.ends_with(".service") {
            name.to_string()
        } else {
            format!("{name}.service")
        }
    }

    fn systemctl(&self, verb: &str, name: &str) -> Result<std::process::Output> {
        Command::new("systemctl")
            .args([verb, Self::unit(name).as_str()])
            .output()
            .map_err(|e| InstallerError::io(format!("Failed to execute systemctl {verb}"), e))
    }

    fn command(&self, verb: &str, name: &str) -> Result<()> {
        let output = self.systemctl(verb, name)?;
        if !output.status.success() {
            return Err(InstallerError::System(format!(
                "Failed to {verb} {}: {}",
                Self::unit(name),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(())
    }
}

impl ServiceControl for NativeControl {
    /// Reads `LoadState` and `ActiveState` via `systemctl show`
    fn status(&self, name: &str) -> Result<Option<ServiceStatus>> {
        let unit = Self::unit(name);
        let output = Command::new("systemctl")
            .args(["show", "-p", "LoadState", "-p", "ActiveState", &unit])
            .output()
            .map_err(|e| InstallerError::io("Failed to execute systemctl show", e))?;

        if !output.status.success() {
            return Err(InstallerError::System(format!(
                "systemctl show {unit} failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(parse_show_output(&String::from_utf8_lossy(&output.stdout)))
    }

    fn start(&self, name: &str) -> Result<()> {
        self.command("start", name)
    }

    fn stop(&self, name: &str) -> Result<()> {
        self.command("stop", name)
    }

    /// systemd has no paused state; continuing is starting
    fn resume(&self, name: &str) -> Result<()> {
        self.command("start", name)
    }
}

/// Map `systemctl show` key=value output onto a service status
fn parse_show_output(stdout: &str) -> Option<ServiceStatus> {
    let mut load_state = None;
    let mut active_state = None;
    for line in stdout.lines() {
        match line.split_once('=') {
            Some(("LoadState", v)) => load_state = Some(v.trim()),
            Some(("ActiveState", v)) => active_state = Some(v.trim()),
            _ => {}
        }
    }

    if matches!(load_state, None | Some("not-found") | Some("masked")) {
        return None;
    }

    Some(match active_state.unwrap_or("inactive") {
        "active" | "reloading" => ServiceStatus::Running,
        "activating" => ServiceStatus::StartPending,
        "deactivating" => ServiceStatus::StopPending,
        _ => ServiceStatus::Stopped,
    })
}
