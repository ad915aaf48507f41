//! Write-permission checks with an optional one-shot elevated fix
//!
//! The elevated helper runs exactly one command on the target path; nothing
//! else in the engine ever runs with raised privileges.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};

/// The closest ancestor of `path` (or `path` itself) that exists
pub fn nearest_existing(path: &Path) -> PathBuf {
    path.ancestors()
        .find(|p| !p.as_os_str().is_empty() && p.exists())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Whether a file can be created inside directory `dir`
pub fn is_writable(dir: &Path) -> bool {
    let marker = dir.join(format!(".veil-write-check-{}", std::process::id()));
    match OpenOptions::new().write(true).create_new(true).open(&marker) {
        Ok(_) => {
            let _ = fs::remove_file(&marker);
            true
        }
        Err(_) => false,
    }
}

/// Make sure `path` (or the directory that will contain it) is writable
///
/// With `elevate` set, one elevated permission fix is attempted before giving up.
pub fn ensure_writable(path: &Path, elevate: bool) -> Result<()> {
    let target = nearest_existing(path);
    let dir = if target.is_dir() {
        target.clone()
    } else {
        target.parent().map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("."))
    };

    if is_writable(&dir) {
        return Ok(());
    }
    if !elevate {
        return Err(Error::PermissionDenied(dir));
    }

    tracing::warn!("{} is not writable, requesting elevated permission fix", dir.display());
    match elevation_command(&dir).status() {
        Ok(status) if status.success() && is_writable(&dir) => {
            tracing::info!("Permissions fixed for {}", dir.display());
            Ok(())
        }
        Ok(status) => {
            tracing::error!("Permission fix exited with {}", status);
            Err(Error::PermissionDenied(dir))
        }
        Err(e) => {
            tracing::error!("Could not run permission fix: {}", e);
            Err(Error::PermissionDenied(dir))
        }
    }
}

#[cfg(windows)]
fn elevation_command(path: &Path) -> Command {
    let user = std::env::var("USERNAME").unwrap_or_else(|_| "Everyone".to_string());
    let mut command = Command::new("icacls");
    command
        .arg(path)
        .arg("/grant")
        .arg(format!("{}:F", user))
        .arg("/T");
    command
}

#[cfg(not(windows))]
fn elevation_command(path: &Path) -> Command {
    let mut command = Command::new("sudo");
    command.args(["chmod", "-R", "u+rwX"]).arg(path);
    command
}
