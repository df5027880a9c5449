//! Python virtual environment management for tool isolation.

use crate::subprocess;
use opsmith_core::{Home, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Entries in a venv bin directory that are interpreter or environment
/// management files, not tool executables.
const EXCLUDED_EXECUTABLES: [&str; 7] = [
    "python",
    "python3",
    "pip",
    "pip3",
    "activate",
    "activate.fish",
    "activate.csh",
];

#[cfg(windows)]
const EXCLUDED_EXECUTABLES_OS: [&str; 2] = ["activate.bat", "Activate.ps1"];

/// Creates and inspects per-tool virtual environments under
/// `<home>/tools/<name>/venv`.
pub struct VenvManager {
    home: Home,
    python_path: PathBuf,
}

impl VenvManager {
    #[must_use]
    pub fn new(home: Home, python_path: impl Into<PathBuf>) -> Self {
        Self {
            home,
            python_path: python_path.into(),
        }
    }

    /// Create the virtual environment for `tool_name`, returning its path.
    ///
    /// An existing environment is reused as-is.
    pub async fn create(&self, tool_name: &str, cancel: &CancellationToken) -> Result<PathBuf> {
        let venv_path = self.home.tool_venv_dir(tool_name);
        if venv_path.exists() {
            return Ok(venv_path);
        }

        if let Some(parent) = venv_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        info!(tool = tool_name, path = %venv_path.display(), "creating virtual environment");
        let python = self.python_path.to_string_lossy().into_owned();
        let venv_str = venv_path.to_string_lossy().into_owned();
        subprocess::run(&python, &["-m", "venv", &venv_str], None, cancel).await?;

        Ok(venv_path)
    }

    /// Path to pip inside a venv.
    #[must_use]
    pub fn pip_path(&self, venv_path: &Path) -> PathBuf {
        if cfg!(windows) {
            venv_path.join("Scripts").join("pip.exe")
        } else {
            venv_path.join("bin").join("pip")
        }
    }

    /// Path to the interpreter inside a venv.
    #[must_use]
    pub fn python_path(&self, venv_path: &Path) -> PathBuf {
        if cfg!(windows) {
            venv_path.join("Scripts").join("python.exe")
        } else {
            venv_path.join("bin").join("python")
        }
    }

    /// The directory holding a venv's executables.
    #[must_use]
    pub fn bin_dir(&self, venv_path: &Path) -> PathBuf {
        if cfg!(windows) {
            venv_path.join("Scripts")
        } else {
            venv_path.join("bin")
        }
    }

    /// Remove the virtual environment for `tool_name`.
    ///
    /// Removing an environment that does not exist is not an error.
    pub fn remove(&self, tool_name: &str) -> Result<()> {
        let venv_path = self.home.tool_venv_dir(tool_name);
        if venv_path.exists() {
            std::fs::remove_dir_all(&venv_path)?;
        }
        // Drop the now-empty tool directory as well.
        if let Some(parent) = venv_path.parent() {
            let _ = std::fs::remove_dir(parent);
        }
        Ok(())
    }

    /// Enumerate tool executables in the venv bin directory, excluding
    /// interpreter and environment-management entries.
    pub fn list_executables(&self, venv_path: &Path) -> Result<Vec<String>> {
        let bin_dir = self.bin_dir(venv_path);

        let mut executables = Vec::new();
        for entry in std::fs::read_dir(&bin_dir)? {
            let entry = entry?;
            if entry.path().is_dir() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if EXCLUDED_EXECUTABLES.contains(&name.as_str()) {
                continue;
            }
            #[cfg(windows)]
            if EXCLUDED_EXECUTABLES_OS.contains(&name.as_str()) {
                continue;
            }
            executables.push(name);
        }

        executables.sort();
        Ok(executables)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn manager(temp: &TempDir) -> VenvManager {
        VenvManager::new(Home::new(temp.path()), "/usr/bin/python3")
    }

    #[test]
    fn test_paths() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let venv = temp.path().join("tools/httpie/venv");

        #[cfg(not(windows))]
        {
            assert_eq!(mgr.pip_path(&venv), venv.join("bin/pip"));
            assert_eq!(mgr.python_path(&venv), venv.join("bin/python"));
            assert_eq!(mgr.bin_dir(&venv), venv.join("bin"));
        }
    }

    #[test]
    fn test_list_executables_excludes_infrastructure() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);
        let venv = temp.path().join("tools/httpie/venv");
        let bin = mgr.bin_dir(&venv);
        std::fs::create_dir_all(&bin).unwrap();

        for name in [
            "python", "python3", "pip", "pip3", "activate", "activate.fish", "http", "https",
        ] {
            std::fs::write(bin.join(name), "").unwrap();
        }

        let executables = mgr.list_executables(&venv).unwrap();
        assert_eq!(executables, vec!["http", "https"]);
    }

    #[test]
    fn test_remove_is_idempotent() {
        let temp = TempDir::new().unwrap();
        let mgr = manager(&temp);

        let venv = temp.path().join("tools/httpie/venv");
        std::fs::create_dir_all(&venv).unwrap();
        mgr.remove("httpie").unwrap();
        assert!(!venv.exists());
        assert!(!temp.path().join("tools/httpie").exists());

        // Second removal is a no-op.
        mgr.remove("httpie").unwrap();
    }

    #[tokio::test]
    async fn test_create_reuses_existing() {
        let temp = TempDir::new().unwrap();
        // Nonexistent interpreter: create must still succeed because the
        // directory already exists and short-circuits the subprocess.
        let mgr = VenvManager::new(Home::new(temp.path()), "/nonexistent/python");
        let venv = temp.path().join("tools/httpie/venv");
        std::fs::create_dir_all(&venv).unwrap();

        let cancel = CancellationToken::new();
        let path = mgr.create("httpie", &cancel).await.unwrap();
        assert_eq!(path, venv);
    }
}
