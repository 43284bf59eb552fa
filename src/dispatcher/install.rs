//! Backend source installation
//!
//! Backends with an `install_source` are cloned into `<install_root>/<id>`
//! before their first launch. Installing is idempotent: an existing install
//! directory (or entry point, when one is named) means there is nothing to do.

use crate::dispatcher::descriptor::BackendDescriptor;
use crate::dispatcher::error::BackendError;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, error, info};

/// Upper bound for a single clone
const INSTALL_TIMEOUT: Duration = Duration::from_secs(300);

/// Where a backend is (or will be) installed
pub fn install_dir(install_root: &Path, descriptor: &BackendDescriptor) -> PathBuf {
    install_root.join(&descriptor.id)
}

/// Whether the backend's source is already in place
pub fn is_installed(install_root: &Path, descriptor: &BackendDescriptor) -> bool {
    let dir = install_dir(install_root, descriptor);
    match &descriptor.entry_point {
        Some(entry) => dir.join(entry).exists(),
        None => dir.is_dir(),
    }
}

/// Install the backend if needed and return a descriptor ready to launch
///
/// Descriptors without `install_source` are returned unchanged. Otherwise the
/// returned descriptor runs inside the install directory unless it already
/// names its own working directory.
pub async fn ensure_installed(
    install_root: &Path,
    descriptor: &BackendDescriptor,
) -> Result<BackendDescriptor, BackendError> {
    let Some(source) = descriptor.install_source.as_deref() else {
        return Ok(descriptor.clone());
    };

    let dir = install_dir(install_root, descriptor);
    let mut prepared = descriptor.clone();
    if prepared.working_dir.is_none() {
        prepared.working_dir = Some(dir.to_string_lossy().to_string());
    }

    if is_installed(install_root, descriptor) {
        debug!(
            backend_id = %descriptor.id,
            install_dir = %dir.display(),
            "Backend already installed"
        );
        return Ok(prepared);
    }

    info!(
        backend_id = %descriptor.id,
        source = %source,
        install_dir = %dir.display(),
        "Installing backend"
    );

    tokio::fs::create_dir_all(install_root)
        .await
        .map_err(|e| BackendError::InstallFailed(format!("cannot create install root: {}", e)))?;

    let mut cmd = Command::new("git");
    cmd.arg("clone")
        .arg("--depth")
        .arg("1")
        .arg(source)
        .arg(&dir)
        .kill_on_drop(true);

    let output = match timeout(INSTALL_TIMEOUT, cmd.output()).await {
        Ok(Ok(output)) => output,
        Ok(Err(e)) => {
            return Err(BackendError::InstallFailed(format!("failed to run git: {}", e)));
        }
        Err(_) => {
            return Err(BackendError::InstallFailed(format!(
                "clone timed out after {} seconds",
                INSTALL_TIMEOUT.as_secs()
            )));
        }
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        error!(
            backend_id = %descriptor.id,
            stderr = %stderr,
            "Backend install failed"
        );
        return Err(BackendError::InstallFailed(format!(
            "git clone exited with code {}: {}",
            output.status.code().unwrap_or(-1),
            stderr.trim()
        )));
    }

    if !is_installed(install_root, descriptor) {
        return Err(BackendError::InstallFailed(format!(
            "entry point {:?} missing after install",
            descriptor.entry_point
        )));
    }

    info!(backend_id = %descriptor.id, "Backend installed");
    Ok(prepared)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn installable(id: &str, entry_point: Option<&str>) -> BackendDescriptor {
        BackendDescriptor {
            install_source: Some("https://example.invalid/backend.git".to_string()),
            entry_point: entry_point.map(str::to_string),
            ..BackendDescriptor::process(id, "python3", vec!["server.py".to_string()])
        }
    }

    #[tokio::test]
    async fn test_no_install_source_is_unchanged() {
        let root = TempDir::new().unwrap();
        let descriptor = BackendDescriptor::process("plain", "node", Vec::new());
        let prepared = ensure_installed(root.path(), &descriptor).await.unwrap();
        assert_eq!(prepared, descriptor);
    }

    #[tokio::test]
    async fn test_existing_entry_point_is_noop() {
        let root = TempDir::new().unwrap();
        let descriptor = installable("search", Some("server.py"));
        let dir = install_dir(root.path(), &descriptor);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(dir.join("server.py"), "print('hi')").unwrap();

        // The source URL is unreachable, so this only passes if no clone runs
        let prepared = ensure_installed(root.path(), &descriptor).await.unwrap();
        assert_eq!(prepared.working_dir, Some(dir.to_string_lossy().to_string()));
    }

    #[test]
    fn test_is_installed_checks_entry_point() {
        let root = TempDir::new().unwrap();
        let descriptor = installable("mail", Some("main.py"));
        let dir = install_dir(root.path(), &descriptor);
        std::fs::create_dir_all(&dir).unwrap();
        assert!(!is_installed(root.path(), &descriptor));

        std::fs::write(dir.join("main.py"), "").unwrap();
        assert!(is_installed(root.path(), &descriptor));

        let no_entry = installable("mail", None);
        assert!(is_installed(root.path(), &no_entry));
    }
}
