//! Atomic file operations
//!
//! Writes land in a sibling temp file that is renamed over the target, so a
//! reader never observes a half-written download or autostart entry.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{InstallerError, Result};

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    path.with_file_name(name)
}

/// Write file atomically, creating missing parent directories
pub(crate) fn write_file_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .map_err(|e| InstallerError::io(format!("Failed to create {}", parent.display()), e))?;
    }

    let temp_path = temp_path(path);
    {
        let mut file = fs::File::create(&temp_path)
            .map_err(|e| InstallerError::io("Failed to create temp file", e))?;
        file.write_all(content)
            .map_err(|e| InstallerError::io("Failed to write temp file", e))?;
        file.sync_all()
            .map_err(|e| InstallerError::io("Failed to sync temp file", e))?;
    }

    fs::rename(&temp_path, path).map_err(|e| {
        let _ = fs::remove_file(&temp_path);
        InstallerError::io(format!("Failed to move temp file to {}", path.display()), e)
    })
}

/// Delete a file; a missing file is not an error. Returns whether it existed.
pub(crate) fn remove_if_exists(path: &Path) -> Result<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(InstallerError::io(format!("Failed to remove {}", path.display()), e)),
    }
}
