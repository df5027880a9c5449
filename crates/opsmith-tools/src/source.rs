//! Installation source detection.
//!
//! A single user-supplied string is classified by precedence: local-path
//! heuristic, explicit git prefix, GitHub host, `user/repo` shorthand,
//! plain http(s), `file://`, and finally a registry package name.

use opsmith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const GITHUB_HOST: &str = "github.com";

/// Where a package comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InstallSource {
    /// A package in the Python index.
    Registry { name: String },
    /// A cloneable repository.
    RemoteRepo {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        branch: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tag: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        commit: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        subdir: Option<String>,
    },
    /// A directory on the local filesystem.
    LocalDir { path: PathBuf },
}

impl InstallSource {
    fn repo(url: impl Into<String>) -> Self {
        InstallSource::RemoteRepo {
            url: url.into(),
            branch: None,
            tag: None,
            commit: None,
            subdir: None,
        }
    }

    /// Short label used in logs and the manifest display.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            InstallSource::Registry { .. } => "registry",
            InstallSource::RemoteRepo { .. } => "remote_repo",
            InstallSource::LocalDir { .. } => "local_dir",
        }
    }
}

/// Classify a user-supplied package specification.
pub fn detect_source(spec: &str) -> Result<InstallSource> {
    // 1. Local path heuristic.
    if is_local_path(spec) {
        let path = absolutize(Path::new(spec));
        if !path.exists() {
            return Err(Error::not_found(format!(
                "local path does not exist: {}",
                path.display()
            )));
        }
        return Ok(InstallSource::LocalDir { path });
    }

    // 2. Explicit git prefix.
    if spec.starts_with("git+") || spec.starts_with("git://") {
        return parse_git_url(spec);
    }

    // 3. GitHub host name anywhere in the spec.
    if spec.contains(GITHUB_HOST) {
        return parse_github_url(spec);
    }

    // 4. Shorthand `user/repo`.
    if let Some(source) = parse_shorthand(spec) {
        return Ok(source);
    }

    // 5. Plain http(s) URL.
    if spec.starts_with("http://") || spec.starts_with("https://") {
        return Ok(InstallSource::repo(spec));
    }

    // 6. file:// URL.
    if let Some(rest) = spec.strip_prefix("file://") {
        return Ok(InstallSource::LocalDir {
            path: absolutize(Path::new(rest)),
        });
    }

    // 7. Anything else names a registry package.
    Ok(InstallSource::Registry {
        name: spec.to_string(),
    })
}

fn is_local_path(spec: &str) -> bool {
    if spec.starts_with("./") || spec.starts_with("../") || spec.starts_with('/') {
        return true;
    }
    // Windows drive letter.
    let bytes = spec.as_bytes();
    if bytes.len() > 1 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        return true;
    }
    Path::new(spec).exists()
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    }
}

/// Parse `git+<url>` / `git://<url>`, honoring `@branch` and `#commit`.
fn parse_git_url(spec: &str) -> Result<InstallSource> {
    let mut url = spec.strip_prefix("git+").unwrap_or(spec).to_string();

    let mut branch = None;
    let mut commit = None;

    if let Some(idx) = url.find('#') {
        commit = Some(url[idx + 1..].to_string());
        url.truncate(idx);
    }

    // An @ after the last path separator is a ref, not URL userinfo.
    if let Some(at) = url.rfind('@') {
        let last_slash = url.rfind('/').unwrap_or(0);
        if at > last_slash {
            branch = Some(url[at + 1..].to_string());
            url.truncate(at);
        }
    }

    if url.is_empty() {
        return Err(Error::config(format!("invalid git URL: {spec}")));
    }

    Ok(InstallSource::RemoteRepo {
        url,
        branch,
        tag: None,
        commit,
        subdir: None,
    })
}

/// Normalize any GitHub reference to its `.git` clone URL.
fn parse_github_url(spec: &str) -> Result<InstallSource> {
    let with_scheme = if spec.contains("://") {
        spec.to_string()
    } else {
        format!("https://{spec}")
    };

    let parsed = url::Url::parse(&with_scheme)
        .map_err(|e| Error::config(format!("invalid GitHub URL {spec}: {e}")))?;

    let path = parsed
        .path()
        .trim_start_matches('/')
        .trim_end_matches(".git");
    if path.is_empty() {
        return Err(Error::config(format!("invalid GitHub URL: {spec}")));
    }

    Ok(InstallSource::RemoteRepo {
        url: format!("https://{GITHUB_HOST}/{path}.git"),
        branch: parsed.fragment().map(str::to_string),
        tag: None,
        commit: None,
        subdir: None,
    })
}

/// `user/repo` with an optional `@ref`, alphanumerics plus `-._` only.
fn parse_shorthand(spec: &str) -> Option<InstallSource> {
    let (repo_part, reference) = match spec.split_once('@') {
        Some((r, rf)) => (r, Some(rf.to_string())),
        None => (spec, None),
    };

    let parts: Vec<&str> = repo_part.split('/').collect();
    if parts.len() != 2 {
        return None;
    }
    let valid = |s: &str| {
        !s.is_empty()
            && s.chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
    };
    if !valid(parts[0]) || !valid(parts[1]) {
        return None;
    }

    Some(InstallSource::RemoteRepo {
        url: format!("https://{GITHUB_HOST}/{repo_part}.git"),
        branch: reference,
        tag: None,
        commit: None,
        subdir: None,
    })
}

/// Repository directory name derived from a clone URL.
#[must_use]
pub(crate) fn repo_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    trimmed
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or("repo")
        .to_string()
}
