//! Service lifecycle control - delegates to OS-native service managers
//!
//! Provides a unified interface for inspecting and commanding the VM daemon
//! across operating systems:
//! - macOS: launchd (launchctl)
//! - Linux: systemd (systemctl)
//! - Windows: Service Control Manager (Windows API)
//!
//! The daemon is never created or destroyed here, only queried and driven.

use std::thread;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::error::{InstallerError, Result};

// Platform-specific implementations
cfg_if::cfg_if! {
    if #[cfg(target_os = "macos")] {
        mod macos_control;
        use macos_control as platform;
    } else if #[cfg(target_os = "linux")] {
        mod linux_control;
        use linux_control as platform;
    } else if #[cfg(target_os = "windows")] {
        mod windows_control;
        use windows_control as platform;
    }
}

/// Observed state of an OS-level background service
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceStatus {
    StartPending,
    ContinuePending,
    PausePending,
    StopPending,
    Paused,
    Stopped,
    Running,
}

/// Query and command interface over an OS service manager
pub trait ServiceControl {
    /// Current status, or `None` when no service with this name is registered
    fn status(&self, name: &str) -> Result<Option<ServiceStatus>>;

    fn start(&self, name: &str) -> Result<()>;

    fn stop(&self, name: &str) -> Result<()>;

    /// Continue a paused service
    fn resume(&self, name: &str) -> Result<()>;

    /// Block until the service reports `expected`
    ///
    /// Polls every `poll` and fails with `ServiceTimeout` once `timeout`
    /// has elapsed without observing the state.
    fn wait_for_status(
        &self,
        name: &str,
        expected: ServiceStatus,
        timeout: Duration,
        poll: Duration,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let started = Instant::now();
        loop {
            let current = self
                .status(name)?
                .ok_or_else(|| InstallerError::ServiceUnavailable {
                    name: name.to_string(),
                })?;
            if current == expected {
                return Ok(());
            }

            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(InstallerError::ServiceTimeout {
                    name: name.to_string(),
                    expected,
                    last: current,
                    timeout,
                });
            }
            if cancel.is_cancelled() {
                return Err(InstallerError::Cancelled);
            }

            thread::sleep(poll.min(timeout - elapsed));
        }
    }
}

/// Service control backed by this host's native service manager
#[cfg(any(target_os = "macos", target_os = "linux", target_os = "windows"))]
pub fn system_control() -> Result<Box<dyn ServiceControl>> {
    Ok(Box::new(platform::NativeControl::new()))
}

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
pub fn system_control() -> Result<Box<dyn ServiceControl>> {
    Err(InstallerError::UnsupportedPlatform {
        os: std::env::consts::OS.to_string(),
    })
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Scripted service manager: pops one status per query, repeating the last
    pub(crate) struct ScriptedControl {
        pub statuses: RefCell<VecDeque<Option<ServiceStatus>>>,
        pub commands: RefCell<Vec<&'static str>>,
        pub queries: RefCell<usize>,
    }

    impl ScriptedControl {
        pub fn new(script: &[Option<ServiceStatus>]) -> Self {
            Self {
                statuses: RefCell::new(script.iter().copied().collect()),
                commands: RefCell::new(Vec::new()),
                queries: RefCell::new(0),
            }
        }

        pub fn commands(&self) -> Vec<&'static str> {
            self.commands.borrow().clone()
        }
    }

    impl ServiceControl for ScriptedControl {
        fn status(&self, _name: &str) -> Result<Option<ServiceStatus>> {
            *self.queries.borrow_mut() += 1;
            let mut statuses = self.statuses.borrow_mut();
            if statuses.len() > 1 {
                Ok(statuses.pop_front().flatten())
            } else {
                Ok(statuses.front().copied().flatten())
            }
        }

        fn start(&self, _name: &str) -> Result<()> {
            self.commands.borrow_mut().push("start");
            Ok(())
        }

        fn stop(&self, _name: &str) -> Result<()> {
            self.commands.borrow_mut().push("stop");
            Ok(())
        }

        fn resume(&self, _name: &str) -> Result<()> {
            self.commands.borrow_mut().push("continue");
            Ok(())
        }
    }

    #[test]
    fn wait_returns_once_status_is_observed() {
        let control = ScriptedControl::new(&[
            Some(ServiceStatus::StartPending),
            Some(ServiceStatus::StartPending),
            Some(ServiceStatus::Running),
        ]);
        control
            .wait_for_status(
                "svc",
                ServiceStatus::Running,
                Duration::from_secs(5),
                Duration::from_millis(1),
                &CancellationToken::new(),
            )
            .unwrap();
        assert_eq!(*control.queries.borrow(), 3);
    }

    #[test]
    fn wait_times_out_with_last_seen_status() {
        let control = ScriptedControl::new(&[Some(ServiceStatus::StopPending)]);
        let err = control
            .wait_for_status(
                "svc",
                ServiceStatus::Stopped,
                Duration::from_millis(20),
                Duration::from_millis(2),
                &CancellationToken::new(),
            )
            .unwrap_err();
        match err {
            InstallerError::ServiceTimeout { last, expected, .. } => {
                assert_eq!(last, ServiceStatus::StopPending);
                assert_eq!(expected, ServiceStatus::Stopped);
            }
            other => panic!("expected timeout, got {other:?}"),
        }
    }

    #[test]
    fn wait_stops_when_cancelled() {
        let control = ScriptedControl::new(&[Some(ServiceStatus::StartPending)]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = control
            .wait_for_status(
                "svc",
                ServiceStatus::Running,
                Duration::from_secs(5),
                Duration::from_millis(1),
                &cancel,
            )
            .unwrap_err();
        assert!(matches!(err, InstallerError::Cancelled));
    }

    #[test]
    fn wait_fails_when_service_disappears() {
        let control = ScriptedControl::new(&[Some(ServiceStatus::StopPending), None]);
        let err = control
            .wait_for_status(
                "svc",
                ServiceStatus::Stopped,
                Duration::from_secs(5),
                Duration::from_millis(1),
                &CancellationToken::new(),
            )
            .unwrap_err();
        assert!(matches!(err, InstallerError::ServiceUnavailable { .. }));
    }
}
