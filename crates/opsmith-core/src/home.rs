//! On-disk layout of the opsmith home directory.
//!
//! Every core shares a single root (default `~/.opsmith`):
//!
//! ```text
//! <home>/runtimes/<kind>-<version>/   installed interpreters
//! <home>/tools/<name>/venv/           isolated tool environments
//! <home>/tools/manifest.json          durable tool registry
//! <home>/cache/downloads/             fetched archives
//! <home>/cache/git/                   cloned repositories
//! <home>/certs/                       ACME certificate cache
//! ```

use std::path::{Path, PathBuf};

/// Handle to the opsmith home directory.
///
/// Nothing outside this type hardcodes the layout; tests construct a `Home`
/// over a temporary directory.
#[derive(Debug, Clone)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    /// Create a home rooted at an explicit directory.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The default home, `~/.opsmith`.
    ///
    /// Falls back to `.opsmith` in the current directory when the user home
    /// cannot be determined.
    #[must_use]
    pub fn default_location() -> Self {
        let base = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
        Self::new(base.join(".opsmith"))
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn runtimes_dir(&self) -> PathBuf {
        self.root.join("runtimes")
    }

    /// Directory for one installed runtime, `<home>/runtimes/<kind>-<version>`.
    #[must_use]
    pub fn runtime_dir(&self, kind: &str, version: &str) -> PathBuf {
        self.runtimes_dir().join(format!("{kind}-{version}"))
    }

    #[must_use]
    pub fn tools_dir(&self) -> PathBuf {
        self.root.join("tools")
    }

    /// Virtual environment for one tool, `<home>/tools/<name>/venv`.
    #[must_use]
    pub fn tool_venv_dir(&self, name: &str) -> PathBuf {
        self.tools_dir().join(name).join("venv")
    }

    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.tools_dir().join("manifest.json")
    }

    #[must_use]
    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("cache").join("downloads")
    }

    #[must_use]
    pub fn git_cache_dir(&self) -> PathBuf {
        self.root.join("cache").join("git")
    }

    #[must_use]
    pub fn certs_dir(&self) -> PathBuf {
        self.root.join("certs")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout() {
        let home = Home::new("/tmp/opsmith-home");
        assert_eq!(
            home.runtime_dir("python", "3.12.1"),
            PathBuf::from("/tmp/opsmith-home/runtimes/python-3.12.1")
        );
        assert_eq!(
            home.tool_venv_dir("ansible"),
            PathBuf::from("/tmp/opsmith-home/tools/ansible/venv")
        );
        assert_eq!(
            home.manifest_path(),
            PathBuf::from("/tmp/opsmith-home/tools/manifest.json")
        );
        assert_eq!(
            home.downloads_dir(),
            PathBuf::from("/tmp/opsmith-home/cache/downloads")
        );
        assert_eq!(
            home.git_cache_dir(),
            PathBuf::from("/tmp/opsmith-home/cache/git")
        );
        assert_eq!(home.certs_dir(), PathBuf::from("/tmp/opsmith-home/certs"));
    }

    #[test]
    fn test_default_location_is_dot_opsmith() {
        let home = Home::default_location();
        assert!(home.root().ends_with(".opsmith"));
    }
}
