//! Error taxonomy shared by the installer and service reconciliation core

use std::path::PathBuf;
use std::time::Duration;

use crate::control::ServiceStatus;

/// Boxed cause carried by transport failures
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Debug, thiserror::Error)]
pub enum InstallerError {
    /// No release carries an asset for this platform
    #[error("no release of {owner}/{repo} carries an asset matching `{marker}`")]
    ReleaseNotFound {
        owner: String,
        repo: String,
        marker: String,
    },

    /// Transport error or unusable response while fetching an asset
    #[error("download of {url} failed: {source}")]
    DownloadFailed {
        url: String,
        #[source]
        source: BoxError,
    },

    /// Installer exited unsuccessfully. Logged by the runner, never raised past it.
    #[error("installer {} exited with {}", path.display(), code.map_or_else(|| "a signal".to_string(), |c| format!("code {c}")))]
    InstallChildProcessFailed { path: PathBuf, code: Option<i32> },

    #[error("service `{name}` is not registered on this machine")]
    ServiceUnavailable { name: String },

    #[error("service `{name}` did not reach {expected:?} within {timeout:?} (last seen {last:?})")]
    ServiceTimeout {
        name: String,
        expected: ServiceStatus,
        last: ServiceStatus,
        timeout: Duration,
    },

    #[error("no installer is available for platform `{os}`")]
    UnsupportedPlatform { os: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// Release feed answered with something unusable
    #[error("release feed error: {0}")]
    Feed(String),

    #[error("{0}")]
    System(String),
}

impl InstallerError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn download(url: &str, source: impl Into<BoxError>) -> Self {
        Self::DownloadFailed {
            url: url.to_string(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, InstallerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_message_names_both_states() {
        let err = InstallerError::ServiceTimeout {
            name: "Multipass".to_string(),
            expected: ServiceStatus::Running,
            last: ServiceStatus::StartPending,
            timeout: Duration::from_secs(5),
        };
        let msg = err.to_string();
        assert!(msg.contains("Running"));
        assert!(msg.contains("StartPending"));
    }

    #[test]
    fn download_failure_keeps_cause() {
        use std::error::Error;
        let err = InstallerError::download("http://x/a", "content length is unknown");
        assert_eq!(
            err.source().map(|s| s.to_string()).as_deref(),
            Some("content length is unknown")
        );
    }
}
