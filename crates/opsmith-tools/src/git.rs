//! Shallow-clone handling for remote repository installs.

use crate::source::{InstallSource, repo_name};
use crate::subprocess;
use opsmith_core::{Error, Home, Result};
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Clones repositories into `<home>/cache/git` and reads versions back out
/// of them.
pub struct GitInstaller {
    cache_dir: PathBuf,
}

impl GitInstaller {
    #[must_use]
    pub fn new(home: &Home) -> Self {
        Self {
            cache_dir: home.git_cache_dir(),
        }
    }

    /// Clone a remote repository source, returning the install path.
    ///
    /// An earlier clone of the same repository is removed first. A branch or
    /// tag becomes `--branch` on the clone; a commit is checked out after.
    /// The returned path points at the requested subdirectory when one is
    /// set.
    pub async fn clone_repository(
        &self,
        source: &InstallSource,
        cancel: &CancellationToken,
    ) -> Result<PathBuf> {
        let InstallSource::RemoteRepo {
            url,
            branch,
            tag,
            commit,
            subdir,
        } = source
        else {
            return Err(Error::config("clone requires a remote repository source"));
        };

        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let clone_path = self.cache_dir.join(repo_name(url));
        if clone_path.exists() {
            info!(path = %clone_path.display(), "removing existing clone");
            tokio::fs::remove_dir_all(&clone_path).await?;
        }

        let clone_str = clone_path.to_string_lossy().into_owned();
        let mut args: Vec<&str> = vec!["clone", "--depth", "1"];
        let reference = branch.as_deref().or(tag.as_deref());
        if let Some(r) = reference {
            args.extend(["--branch", r]);
        }
        args.extend([url.as_str(), clone_str.as_str()]);

        info!(%url, "cloning repository");
        subprocess::run("git", &args, None, cancel)
            .await
            .map_err(|e| Error::subprocess(format!("git clone failed: {e}")))?;

        if let Some(commit) = commit {
            info!(%commit, "checking out commit");
            subprocess::run("git", &["checkout", commit], Some(&clone_path), cancel)
                .await
                .map_err(|e| Error::subprocess(format!("git checkout failed: {e}")))?;
        }

        if let Some(subdir) = subdir {
            let sub_path = clone_path.join(subdir);
            if !sub_path.exists() {
                return Err(Error::not_found(format!(
                    "subdirectory {subdir} not found in repository"
                )));
            }
            return Ok(sub_path);
        }

        Ok(clone_path)
    }

    /// Best-effort version of a working tree: latest tag, else short commit,
    /// else `dev`.
    pub async fn version(&self, repo: &Path, cancel: &CancellationToken) -> String {
        if let Ok(out) = subprocess::run(
            "git",
            &["describe", "--tags", "--abbrev=0"],
            Some(repo),
            cancel,
        )
        .await
        {
            return out.trim().trim_start_matches('v').to_string();
        }

        if let Ok(out) =
            subprocess::run("git", &["rev-parse", "--short", "HEAD"], Some(repo), cancel).await
        {
            return out.trim().to_string();
        }

        "dev".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn git_available() -> bool {
        std::process::Command::new("git")
            .arg("--version")
            .output()
            .is_ok()
    }

    async fn init_repo(dir: &Path) {
        let cancel = CancellationToken::new();
        let run = |args: Vec<&'static str>| {
            let dir = dir.to_path_buf();
            let cancel = cancel.clone();
            async move {
                let args: Vec<&str> = args;
                subprocess::run("git", &args, Some(&dir), &cancel)
                    .await
                    .unwrap()
            }
        };
        run(vec!["init", "-q"]).await;
        run(vec!["config", "user.email", "test@example.com"]).await;
        run(vec!["config", "user.name", "test"]).await;
        std::fs::write(dir.join("setup.py"), "# setup").unwrap();
        run(vec!["add", "."]).await;
        run(vec!["commit", "-q", "-m", "initial"]).await;
    }

    #[tokio::test]
    async fn test_version_prefers_tag() {
        if !git_available() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        init_repo(temp.path()).await;

        let cancel = CancellationToken::new();
        subprocess::run("git", &["tag", "v1.4.0"], Some(temp.path()), &cancel)
            .await
            .unwrap();

        let installer = GitInstaller::new(&Home::new(temp.path()));
        let version = installer.version(temp.path(), &cancel).await;
        assert_eq!(version, "1.4.0");
    }

    #[tokio::test]
    async fn test_version_falls_back_to_commit() {
        if !git_available() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        init_repo(temp.path()).await;

        let installer = GitInstaller::new(&Home::new(temp.path()));
        let cancel = CancellationToken::new();
        let version = installer.version(temp.path(), &cancel).await;
        assert!(!version.is_empty());
        assert_ne!(version, "dev");
    }

    #[tokio::test]
    async fn test_version_dev_outside_repo() {
        if !git_available() {
            return;
        }
        let temp = tempfile::TempDir::new().unwrap();
        let installer = GitInstaller::new(&Home::new(temp.path()));
        let cancel = CancellationToken::new();
        assert_eq!(installer.version(temp.path(), &cancel).await, "dev");
    }

    #[tokio::test]
    async fn test_clone_local_repo_and_reclone() {
        if !git_available() {
            return;
        }
        let upstream = tempfile::TempDir::new().unwrap();
        init_repo(upstream.path()).await;

        let home_dir = tempfile::TempDir::new().unwrap();
        let home = Home::new(home_dir.path());
        let installer = GitInstaller::new(&home);
        let cancel = CancellationToken::new();

        let source = InstallSource::RemoteRepo {
            url: upstream.path().to_string_lossy().into_owned(),
            branch: None,
            tag: None,
            commit: None,
            subdir: None,
        };

        let path = installer.clone_repository(&source, &cancel).await.unwrap();
        assert!(path.join("setup.py").exists());
        assert!(path.starts_with(home.git_cache_dir()));

        // A second clone replaces the first.
        let path2 = installer.clone_repository(&source, &cancel).await.unwrap();
        assert_eq!(path, path2);
    }

    #[tokio::test]
    async fn test_clone_missing_subdir_fails() {
        if !git_available() {
            return;
        }
        let upstream = tempfile::TempDir::new().unwrap();
        init_repo(upstream.path()).await;

        let home_dir = tempfile::TempDir::new().unwrap();
        let installer = GitInstaller::new(&Home::new(home_dir.path()));
        let cancel = CancellationToken::new();

        let source = InstallSource::RemoteRepo {
            url: upstream.path().to_string_lossy().into_owned(),
            branch: None,
            tag: None,
            commit: None,
            subdir: Some("nonexistent".into()),
        };

        let err = installer
            .clone_repository(&source, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    async fn test_clone_rejects_non_repo_source() {
        let temp = tempfile::TempDir::new().unwrap();
        let installer = GitInstaller::new(&Home::new(temp.path()));
        let cancel = CancellationToken::new();
        let err = installer
            .clone_repository(
                &InstallSource::Registry {
                    name: "requests".into(),
                },
                &cancel,
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
