//! Local directory installs.

use crate::types::{ToolEcosystem, detect_ecosystem};
use opsmith_core::{Error, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Project files that mark a directory as installable.
const PROJECT_FILES: [&str; 6] = [
    "setup.py",
    "pyproject.toml",
    "package.json",
    "go.mod",
    "Cargo.toml",
    "Gemfile",
];

/// Validates and inspects local directory sources.
pub struct LocalInstaller;

impl LocalInstaller {
    /// Check that a path exists, is a directory, and looks like a project.
    pub fn validate(path: &Path) -> Result<()> {
        let meta = std::fs::metadata(path)
            .map_err(|_| Error::not_found(format!("path does not exist: {}", path.display())))?;
        if !meta.is_dir() {
            return Err(Error::config(format!(
                "path must be a directory: {}",
                path.display()
            )));
        }

        if !PROJECT_FILES.iter().any(|f| path.join(f).exists()) {
            return Err(Error::config(format!(
                "directory does not appear to be a valid project (missing setup.py, pyproject.toml, package.json, ...): {}",
                path.display()
            )));
        }

        Ok(())
    }

    /// Metadata recorded for local installs.
    #[must_use]
    pub fn extract_metadata(path: &Path) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        metadata.insert("source_path".to_string(), path.display().to_string());
        metadata.insert(
            "ecosystem".to_string(),
            detect_ecosystem(path).to_string(),
        );
        if let Some(name) = path.file_name() {
            metadata.insert(
                "project_name".to_string(),
                name.to_string_lossy().into_owned(),
            );
        }
        metadata
    }

    /// Ecosystem of a local directory.
    #[must_use]
    pub fn ecosystem(path: &Path) -> ToolEcosystem {
        detect_ecosystem(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_validate_requires_project_file() {
        let temp = TempDir::new().unwrap();
        let err = LocalInstaller::validate(temp.path()).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        std::fs::write(temp.path().join("pyproject.toml"), "[project]").unwrap();
        LocalInstaller::validate(temp.path()).unwrap();
    }

    #[test]
    fn test_validate_rejects_file_and_missing() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("setup.py");
        std::fs::write(&file, "").unwrap();

        assert!(matches!(
            LocalInstaller::validate(&file).unwrap_err(),
            Error::Config(_)
        ));
        assert!(matches!(
            LocalInstaller::validate(&temp.path().join("missing")).unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[test]
    fn test_metadata() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("go.mod"), "module x").unwrap();

        let metadata = LocalInstaller::extract_metadata(temp.path());
        assert_eq!(metadata["ecosystem"], "go");
        assert_eq!(metadata["source_path"], temp.path().display().to_string());
        assert!(metadata.contains_key("project_name"));
    }
}
