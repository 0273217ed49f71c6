//! Windows service control using Service Control Manager (SCM) API

use windows::Win32::Foundation::ERROR_SERVICE_DOES_NOT_EXIST;
use windows::Win32::System::Services::{
    CloseServiceHandle, ControlService, OpenSCManagerW, OpenServiceW, QueryServiceStatus,
    StartServiceW, SC_HANDLE, SC_MANAGER_CONNECT, SERVICE_CONTINUE_PENDING,
    SERVICE_CONTROL_CONTINUE, SERVICE_CONTROL_STOP, SERVICE_PAUSE_CONTINUE, SERVICE_PAUSE_PENDING,
    SERVICE_PAUSED, SERVICE_QUERY_STATUS, SERVICE_RUNNING, SERVICE_START, SERVICE_START_PENDING,
    SERVICE_STATUS, SERVICE_STOP, SERVICE_STOP_PENDING, SERVICE_STOPPED,
};
use windows::core::PCWSTR;

use crate::control::{ServiceControl, ServiceStatus};
use crate::error::{InstallerError, Result};

/// RAII wrapper for SC_HANDLE (manager or service handle)
struct ScHandle(SC_HANDLE);

impl Drop for ScHandle {
    fn drop(&mut self) {
        if !self.0.is_invalid() {
            unsafe {
                let _ = CloseServiceHandle(self.0);
            }
        }
    }
}

pub(super) struct NativeControl;

impl NativeControl {
    pub(super) fn new() -> Self {
        Self
    }

    fn manager() -> Result<ScHandle> {
        let handle = unsafe { OpenSCManagerW(PCWSTR::null(), PCWSTR::null(), SC_MANAGER_CONNECT.0) }
            .map_err(|e| {
                InstallerError::System(format!("Failed to open Service Control Manager: {e}"))
            })?;
        Ok(ScHandle(handle))
    }

    /// Open a service, `None` when it is not registered
    fn open(name: &str, access: u32) -> Result<Option<ScHandle>> {
        let manager = Self::manager()?;
        let wide: Vec<u16> = name.encode_utf16().chain(Some(0)).collect();

        match unsafe { OpenServiceW(manager.0, PCWSTR(wide.as_ptr()), access) } {
            Ok(handle) => Ok(Some(ScHandle(handle))),
            Err(e) if e.code() == ERROR_SERVICE_DOES_NOT_EXIST.to_hresult() => Ok(None),
            Err(e) => Err(InstallerError::System(format!(
                "Failed to open service {name}: {e}"
            ))),
        }
    }

    fn open_existing(name: &str, access: u32) -> Result<ScHandle> {
        Self::open(name, access)?.ok_or_else(|| InstallerError::ServiceUnavailable {
            name: name.to_string(),
        })
    }

    fn control(name: &str, access: u32, code: u32, verb: &str) -> Result<()> {
        let service = Self::open_existing(name, access)?;
        let mut status = SERVICE_STATUS::default();
        unsafe { ControlService(service.0, code, &mut status) }
            .map_err(|e| InstallerError::System(format!("Failed to {verb} service {name}: {e}")))
    }
}

impl ServiceControl for NativeControl {
    fn status(&self, name: &str) -> Result<Option<ServiceStatus>> {
        let Some(service) = Self::open(name, SERVICE_QUERY_STATUS.0)? else {
            return Ok(None);
        };

        let mut status = SERVICE_STATUS::default();
        unsafe { QueryServiceStatus(service.0, &mut status) }
            .map_err(|e| InstallerError::System(format!("Failed to query service status: {e}")))?;

        let state = status.dwCurrentState;
        let mapped = if state == SERVICE_RUNNING {
            ServiceStatus::Running
        } else if state == SERVICE_START_PENDING {
            ServiceStatus::StartPending
        } else if state == SERVICE_CONTINUE_PENDING {
            ServiceStatus::ContinuePending
        } else if state == SERVICE_PAUSE_PENDING {
            ServiceStatus::PausePending
        } else if state == SERVICE_STOP_PENDING {
            ServiceStatus::StopPending
        } else if state == SERVICE_PAUSED {
            ServiceStatus::Paused
        } else if state == SERVICE_STOPPED {
            ServiceStatus::Stopped
        } else {
            return Err(InstallerError::System(format!(
                "Service {name} reported unknown state {}",
                state.0
            )));
        };
        Ok(Some(mapped))
    }

    fn start(&self, name: &str) -> Result<()> {
        let service = Self::open_existing(name, SERVICE_START.0)?;
        unsafe { StartServiceW(service.0, None) }
            .map_err(|e| InstallerError::System(format!("Failed to start service {name}: {e}")))
    }

    fn stop(&self, name: &str) -> Result<()> {
        Self::control(name, SERVICE_STOP.0, SERVICE_CONTROL_STOP, "stop")
    }

    fn resume(&self, name: &str) -> Result<()> {
        Self::control(name, SERVICE_PAUSE_CONTINUE.0, SERVICE_CONTROL_CONTINUE, "continue")
    }
}
