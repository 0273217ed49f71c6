//! macOS service control using launchd (launchctl)

use std::process::Command;
use std::time::Duration;

use crate::control::{ServiceControl, ServiceStatus};
use crate::error::{InstallerError, Result};

pub(super) struct NativeControl;

impl NativeControl {
    pub(super) fn new() -> Self {
        Self
    }

    fn plist_path(label: &str) -> String {
        format!("/Library/LaunchDaemons/{label}.plist")
    }

    fn launchctl(args: &[&str]) -> Result<std::process::Output> {
        Command::new("launchctl")
            .args(args)
            .output()
            .map_err(|e| InstallerError::io(format!("Failed to execute launchctl {}", args[0]), e))
    }
}

impl ServiceControl for NativeControl {
    fn status(&self, label: &str) -> Result<Option<ServiceStatus>> {
        let output = Self::launchctl(&["list"])?;
        if !output.status.success() {
            return Err(InstallerError::System(format!(
                "launchctl list failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(parse_list_output(&String::from_utf8_lossy(&output.stdout), label))
    }

    /// Uses kickstart with a legacy load fallback
    fn start(&self, label: &str) -> Result<()> {
        let plist = Self::plist_path(label);
        // Already bootstrapped services make this fail, which is fine
        let _ = Self::launchctl(&["bootstrap", "system", &plist]);

        let target = format!("system/{label}");
        let output = Self::launchctl(&["kickstart", &target])?;
        if !output.status.success() {
            let load_output = Self::launchctl(&["load", "-w", &plist])?;
            if !load_output.status.success() {
                return Err(InstallerError::System(format!(
                    "Failed to start {label}: {}",
                    String::from_utf8_lossy(&load_output.stderr).trim()
                )));
            }
        }
        Ok(())
    }

    fn stop(&self, label: &str) -> Result<()> {
        let target = format!("system/{label}");
        let _ = Self::launchctl(&["kill", "SIGTERM", &target]);
        std::thread::sleep(Duration::from_millis(500));

        let plist = Self::plist_path(label);
        let output = Self::launchctl(&["bootout", "system", &plist])?;
        if !output.status.success() {
            let unload_output = Self::launchctl(&["unload", "-w", &plist])?;
            if !unload_output.status.success() {
                return Err(InstallerError::System(format!(
                    "Failed to stop {label}: {}",
                    String::from_utf8_lossy(&unload_output.stderr).trim()
                )));
            }
        }
        Ok(())
    }

    /// launchd jobs cannot be paused
    fn resume(&self, label: &str) -> Result<()> {
        self.start(label)
    }
}

/// Find `label` in `launchctl list` output ("PID\tStatus\tLabel" rows)
///
/// A PID of "-" means the job is loaded but not running.
fn parse_list_output(stdout: &str, label: &str) -> Option<ServiceStatus> {
    stdout.lines().find_map(|line| {
        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            [pid, _status, name] if *name == label => Some(if *pid == "-" {
                ServiceStatus::Stopped
            } else {
                ServiceStatus::Running
            }),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const LIST: &str = "PID\tStatus\tLabel\n412\t0\tcom.canonical.multipassd\n-\t0\tcom.apple.other\n";

    #[test]
    fn listed_job_with_pid_is_running() {
        assert_eq!(
            parse_list_output(LIST, "com.canonical.multipassd"),
            Some(ServiceStatus::Running)
        );
    }

    #[test]
    fn listed_job_without_pid_is_stopped() {
        assert_eq!(parse_list_output(LIST, "com.apple.other"), Some(ServiceStatus::Stopped));
    }

    #[test]
    fn missing_job_does_not_exist() {
        assert_eq!(parse_list_output(LIST, "com.example.none"), None);
    }
}
