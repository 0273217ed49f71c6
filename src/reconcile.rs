//! Drives the VM daemon through its lifecycle until it is usable
//!
//! Runs on every request for the daemon; nothing is cached because the
//! service can be stopped externally between calls.

use std::time::Duration;

use log::info;
use tokio_util::sync::CancellationToken;

use crate::control::{ServiceControl, ServiceStatus};
use crate::error::{InstallerError, Result};

pub struct ServiceReconciler<'a> {
    control: &'a dyn ServiceControl,
    timeout: Duration,
    poll: Duration,
}

impl<'a> ServiceReconciler<'a> {
    pub fn new(control: &'a dyn ServiceControl, timeout: Duration) -> Self {
        Self {
            control,
            timeout,
            poll: Duration::from_millis(250),
        }
    }

    /// Override how often the service manager is polled while waiting
    pub fn poll_interval(mut self, poll: Duration) -> Self {
        self.poll = poll;
        self
    }

    /// Return only once `name` is running
    ///
    /// | observed                       | action              | awaited          |
    /// |--------------------------------|---------------------|------------------|
    /// | StartPending / ContinuePending | none                | Running          |
    /// | PausePending                   | Continue after wait | Paused, Running  |
    /// | StopPending                    | Start after wait    | Stopped, Running |
    /// | Paused                         | Continue            | Running          |
    /// | Stopped                        | Start               | Running          |
    /// | Running                        | none                | -                |
    pub fn ensure_running(&self, name: &str, cancel: &CancellationToken) -> Result<()> {
        let status = self
            .control
            .status(name)?
            .ok_or_else(|| InstallerError::ServiceUnavailable {
                name: name.to_string(),
            })?;

        match status {
            ServiceStatus::StartPending | ServiceStatus::ContinuePending => {
                info!("{name} is going to be running soon");
                self.wait(name, ServiceStatus::Running, cancel)?;
            }
            ServiceStatus::PausePending => {
                info!("{name} is being paused");
                self.wait(name, ServiceStatus::Paused, cancel)?;
                info!("{name} is continuing");
                self.control.resume(name)?;
                self.wait(name, ServiceStatus::Running, cancel)?;
            }
            ServiceStatus::StopPending => {
                info!("{name} is being stopped");
                self.wait(name, ServiceStatus::Stopped, cancel)?;
                info!("{name} is starting");
                self.control.start(name)?;
                self.wait(name, ServiceStatus::Running, cancel)?;
            }
            ServiceStatus::Paused => {
                info!("{name} is continuing");
                self.control.resume(name)?;
                self.wait(name, ServiceStatus::Running, cancel)?;
            }
            ServiceStatus::Stopped => {
                info!("{name} is starting");
                self.control.start(name)?;
                self.wait(name, ServiceStatus::Running, cancel)?;
            }
            ServiceStatus::Running => {}
        }

        info!("{name} is running");
        Ok(())
    }

    fn wait(&self, name: &str, expected: ServiceStatus, cancel: &CancellationToken) -> Result<()> {
        self.control
            .wait_for_status(name, expected, self.timeout, self.poll, cancel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::tests::ScriptedControl;
    use ServiceStatus::*;

    fn reconcile(control: &ScriptedControl, timeout: Duration) -> Result<()> {
        ServiceReconciler::new(control, timeout)
            .poll_interval(Duration::from_millis(1))
            .ensure_running("Multipass", &CancellationToken::new())
    }

    #[test]
    fn paused_service_is_continued_once() {
        let control = ScriptedControl::new(&[Some(Paused), Some(ContinuePending), Some(Running)]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert_eq!(control.commands(), vec!["continue"]);
    }

    #[test]
    fn missing_service_fails_without_waiting() {
        let control = ScriptedControl::new(&[None]);
        let err = reconcile(&control, Duration::from_secs(5)).unwrap_err();
        assert!(matches!(err, InstallerError::ServiceUnavailable { ref name } if name == "Multipass"));
        assert_eq!(*control.queries.borrow(), 1);
        assert!(control.commands().is_empty());
    }

    #[test]
    fn stopping_service_is_restarted_after_it_stops() {
        let control = ScriptedControl::new(&[
            Some(StopPending),
            Some(StopPending),
            Some(Stopped),
            Some(StartPending),
            Some(Running),
        ]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert_eq!(control.commands(), vec!["start"]);
    }

    #[test]
    fn restart_that_never_runs_times_out() {
        let control = ScriptedControl::new(&[Some(StopPending), Some(Stopped), Some(StartPending)]);
        let err = reconcile(&control, Duration::from_millis(30)).unwrap_err();
        assert!(matches!(
            err,
            InstallerError::ServiceTimeout {
                expected: Running,
                last: StartPending,
                ..
            }
        ));
        assert_eq!(control.commands(), vec!["start"]);
    }

    #[test]
    fn pausing_service_is_continued_after_it_pauses() {
        let control = ScriptedControl::new(&[Some(PausePending), Some(Paused), Some(Running)]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert_eq!(control.commands(), vec!["continue"]);
    }

    #[test]
    fn starting_service_is_only_awaited() {
        let control = ScriptedControl::new(&[Some(StartPending), Some(Running)]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert!(control.commands().is_empty());
    }

    #[test]
    fn stopped_service_is_started() {
        let control = ScriptedControl::new(&[Some(Stopped), Some(Running)]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert_eq!(control.commands(), vec!["start"]);
    }

    #[test]
    fn running_service_is_left_alone() {
        let control = ScriptedControl::new(&[Some(Running)]);
        reconcile(&control, Duration::from_secs(5)).unwrap();
        assert!(control.commands().is_empty());
        assert_eq!(*control.queries.borrow(), 1);
    }
}
