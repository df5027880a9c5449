//! Runtime installation lifecycle.

use crate::downloader::{Downloader, PYTHON_BUILD_DATE};
use crate::extractor;
use crate::spec::{RuntimeKind, RuntimeSpec};
use crate::verifier::Verifier;
use chrono::{DateTime, Utc};
use opsmith_core::{Error, Home, Platform, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

/// An installed runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Runtime {
    pub kind: RuntimeKind,
    pub version: String,
    pub path: PathBuf,
    pub os: String,
    pub arch: String,
    pub installed_at: DateTime<Utc>,
}

/// Installs, lists and removes runtimes under `<home>/runtimes`.
pub struct RuntimeManager {
    home: Home,
    platform: Platform,
    downloader: Downloader,
    verifier: Verifier,
}

impl RuntimeManager {
    /// Create a manager for the given home directory.
    ///
    /// Errors when the current host has no distribution mapping.
    pub fn new(home: Home) -> Result<Self> {
        let platform = Platform::detect()
            .ok_or_else(|| Error::config("unsupported platform: unknown os/arch"))?;
        Ok(Self::with_platform(home, platform))
    }

    /// Create a manager with an explicit platform (tests).
    #[must_use]
    pub fn with_platform(home: Home, platform: Platform) -> Self {
        let downloader = Downloader::new(home.downloads_dir(), platform);
        Self {
            home,
            platform,
            downloader,
            verifier: Verifier::new(),
        }
    }

    /// Create a manager wired to alternate upstream endpoints (tests).
    #[must_use]
    pub fn with_endpoints(
        home: Home,
        platform: Platform,
        python_base: impl Into<String>,
        node_base: impl Into<String>,
        release_api: impl Into<String>,
    ) -> Self {
        let downloader =
            Downloader::with_base_urls(home.downloads_dir(), platform, python_base, node_base);
        Self {
            home,
            platform,
            downloader,
            verifier: Verifier::with_api_url(release_api),
        }
    }

    /// Install a runtime from a specification string.
    pub async fn install(&self, spec_str: &str) -> Result<Runtime> {
        let spec = RuntimeSpec::parse(spec_str)?;
        self.install_spec(&spec).await
    }

    /// Install a runtime.
    ///
    /// Idempotent: an existing `<home>/runtimes/<kind>-<version>` directory
    /// is returned as-is without touching the network.
    pub async fn install_spec(&self, spec: &RuntimeSpec) -> Result<Runtime> {
        info!(
            kind = spec.kind.display_name(),
            version = %spec.version,
            platform = %self.platform,
            "installing runtime"
        );

        let target = self.home.runtime_dir(&spec.kind.to_string(), &spec.version);
        if target.exists() {
            info!(path = %target.display(), "runtime already installed");
            return self.runtime_at(spec, target);
        }

        match spec.kind {
            RuntimeKind::Python => self.install_python(spec, &target).await,
            RuntimeKind::Node => self.install_node(spec, &target).await,
            other => Err(Error::config(format!(
                "runtime kind not yet implemented: {other}"
            ))),
        }
    }

    async fn install_python(&self, spec: &RuntimeSpec, target: &PathBuf) -> Result<Runtime> {
        let archive = self
            .downloader
            .download_python(&spec.version)
            .await
            .map_err(|e| wrap(e, "download failed"))?;

        self.verifier.verify_file_exists(&archive).await?;

        // A digest lookup failure downgrades to a warning; a mismatch aborts.
        match self
            .verifier
            .python_sha256(&spec.version, &self.platform, PYTHON_BUILD_DATE)
            .await
        {
            Ok(expected) => {
                info!(version = %spec.version, "verifying SHA-256 checksum");
                self.verifier.verify_sha256(&archive, &expected).await?;
            }
            Err(e) => {
                warn!(error = %e, version = %spec.version, "digest lookup failed, skipping integrity check");
            }
        }

        self.extract(&archive, target).await?;
        self.runtime_at(spec, target.clone())
    }

    async fn install_node(&self, spec: &RuntimeSpec, target: &PathBuf) -> Result<Runtime> {
        let archive = self
            .downloader
            .download_node(&spec.version)
            .await
            .map_err(|e| wrap(e, "download failed"))?;

        // No upstream digest source is wired for Node yet; existence only.
        self.verifier.verify_file_exists(&archive).await?;

        self.extract(&archive, target).await?;
        self.runtime_at(spec, target.clone())
    }

    async fn extract(&self, archive: &PathBuf, target: &PathBuf) -> Result<()> {
        info!(destination = %target.display(), "extracting runtime");
        let archive = archive.clone();
        let target = target.clone();
        tokio::task::spawn_blocking(move || extractor::extract_archive(&archive, &target))
            .await
            .map_err(|e| Error::subprocess(format!("extraction task panicked: {e}")))?
            .map_err(|e| wrap(e, "extraction failed"))
    }

    /// Enumerate installed runtimes.
    ///
    /// Directory names that do not parse as `<kind>-<version>` with a known
    /// kind are skipped silently.
    pub fn list(&self) -> Result<Vec<Runtime>> {
        let runtimes_dir = self.home.runtimes_dir();
        if !runtimes_dir.exists() {
            return Ok(Vec::new());
        }

        let mut runtimes = Vec::new();
        for entry in std::fs::read_dir(&runtimes_dir)? {
            let entry = entry?;
            if !entry.path().is_dir() {
                continue;
            }

            let name = entry.file_name().to_string_lossy().into_owned();
            let Some((kind_str, version)) = name.split_once('-') else {
                continue;
            };
            let Ok(kind) = kind_str.parse::<RuntimeKind>() else {
                continue;
            };

            runtimes.push(Runtime {
                kind,
                version: version.to_string(),
                path: entry.path(),
                os: self.platform.os.to_string(),
                arch: self.platform.arch.to_string(),
                installed_at: dir_mtime(&entry.path()),
            });
        }

        Ok(runtimes)
    }

    /// Look up an installed runtime by specification string.
    pub fn get(&self, spec_str: &str) -> Result<Runtime> {
        let spec = RuntimeSpec::parse(spec_str)?;
        let path = self.home.runtime_dir(&spec.kind.to_string(), &spec.version);
        if !path.exists() {
            return Err(Error::not_found(format!(
                "{} {} is not installed",
                spec.kind.display_name(),
                spec.version
            )));
        }
        self.runtime_at(&spec, path)
    }

    /// Remove an installed runtime.
    pub fn remove(&self, spec_str: &str) -> Result<()> {
        let spec = RuntimeSpec::parse(spec_str)?;
        let path = self.home.runtime_dir(&spec.kind.to_string(), &spec.version);
        if !path.exists() {
            return Err(Error::not_found(format!(
                "{} {} is not installed",
                spec.kind.display_name(),
                spec.version
            )));
        }

        std::fs::remove_dir_all(&path)?;
        info!(
            kind = spec.kind.display_name(),
            version = %spec.version,
            path = %path.display(),
            "runtime removed"
        );
        Ok(())
    }

    /// Path of the interpreter binary inside an installed runtime.
    #[must_use]
    pub fn interpreter_path(&self, runtime: &Runtime) -> PathBuf {
        match runtime.kind {
            RuntimeKind::Python => {
                if cfg!(windows) {
                    runtime.path.join("python.exe")
                } else {
                    runtime.path.join("bin").join("python3")
                }
            }
            _ => {
                if cfg!(windows) {
                    runtime.path.join("node.exe")
                } else {
                    runtime.path.join("bin").join("node")
                }
            }
        }
    }

    fn runtime_at(&self, spec: &RuntimeSpec, path: PathBuf) -> Result<Runtime> {
        Ok(Runtime {
            kind: spec.kind,
            version: spec.version.clone(),
            installed_at: dir_mtime(&path),
            os: self.platform.os.to_string(),
            arch: self.platform.arch.to_string(),
            path,
        })
    }
}

fn wrap(err: Error, context: &str) -> Error {
    match err {
        Error::Network { message, status, body } => Error::Network {
            message: format!("{context}: {message}"),
            status,
            body,
        },
        Error::Integrity(msg) => Error::Integrity(format!("{context}: {msg}")),
        other => other,
    }
}

fn dir_mtime(path: &std::path::Path) -> DateTime<Utc> {
    std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now())
}
