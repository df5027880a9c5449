//! The install pipeline over registry, remote repository and local sources.
//!
//! Every install runs a security pre-flight before any environment is
//! created, so a blocked install leaves the system untouched.

use crate::git::GitInstaller;
use crate::local::LocalInstaller;
use crate::source::{InstallSource, detect_source, repo_name};
use crate::subprocess;
use crate::types::{SecurityInfo, Tool, ToolEcosystem, ToolManifest, detect_ecosystem};
use crate::venv::VenvManager;
use chrono::Utc;
use opsmith_core::{Error, Home, Result};
use opsmith_security::{Ecosystem, Package, Sbom, SecretScanner, VulnScanner, parser};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const PYPI_API_URL: &str = "https://pypi.org/pypi";

/// Name of the BOM written into scanned working trees.
const SBOM_FILENAME: &str = "opsmith-sbom.json";

/// Dependency manifests tried, in order, when scanning a source tree.
const DEP_FILES: [&str; 3] = ["requirements.txt", "go.mod", "package.json"];

/// Options for a single install invocation.
#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    /// Specific version, or `None`/`"latest"` to resolve the newest.
    pub version: Option<String>,
    /// Force reinstall even when already present.
    pub force: bool,
    /// Skip the security pre-flight entirely.
    pub skip_scan: bool,
    /// Block the install when the pre-flight finds critical issues.
    pub require_scan: bool,
    /// Python extras, e.g. `security` for `requests[security]`.
    pub extras: Vec<String>,
    /// Install in editable mode.
    pub editable: bool,
    /// Skip dependency installation.
    pub no_deps: bool,
}

#[derive(Deserialize)]
struct PypiInfo {
    version: String,
}

#[derive(Deserialize)]
struct PypiResponse {
    info: PypiInfo,
}

/// Installs tools into isolated environments and records them durably.
pub struct Installer {
    venv: VenvManager,
    git: GitInstaller,
    manifest: ToolManifest,
    manifest_path: PathBuf,
    scanner: VulnScanner,
    client: reqwest::Client,
    pypi_url: String,
}

impl Installer {
    /// Create an installer, loading the manifest from disk.
    pub fn new(home: Home, venv: VenvManager) -> Result<Self> {
        Self::with_endpoints(home, venv, PYPI_API_URL, VulnScanner::new())
    }

    /// Create an installer against alternate endpoints (tests).
    pub fn with_endpoints(
        home: Home,
        venv: VenvManager,
        pypi_url: impl Into<String>,
        scanner: VulnScanner,
    ) -> Result<Self> {
        let manifest_path = home.manifest_path();
        let manifest = ToolManifest::load(&manifest_path)?;
        let git = GitInstaller::new(&home);

        Ok(Self {
            venv,
            git,
            manifest,
            manifest_path,
            scanner,
            client: reqwest::Client::builder()
                .user_agent(concat!("opsmith/", env!("CARGO_PKG_VERSION")))
                .timeout(std::time::Duration::from_secs(10))
                .build()
                .expect("default reqwest client"),
            pypi_url: pypi_url.into(),
        })
    }

    /// Install a tool from any supported source.
    pub async fn install(
        &mut self,
        spec: &str,
        opts: InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Tool> {
        let source = detect_source(spec)?;
        info!(%spec, source = source.kind(), "installing tool");

        match source {
            InstallSource::Registry { ref name } => {
                let name = name.clone();
                self.install_registry(&name, source, opts, cancel).await
            }
            InstallSource::RemoteRepo { ref url, .. } => {
                let name = repo_name(url);
                self.install_repo(&name, source, opts, cancel).await
            }
            InstallSource::LocalDir { ref path } => {
                let name = path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| spec.to_string());
                let path = path.clone();
                self.install_local(&name, &path, source, opts, cancel).await
            }
        }
    }

    async fn install_registry(
        &mut self,
        name: &str,
        source: InstallSource,
        opts: InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Tool> {
        // Resolve "latest" to a concrete version for the pre-flight query.
        let mut version = opts
            .version
            .clone()
            .filter(|v| !v.is_empty() && v != "latest");
        if version.is_none() {
            match self.latest_pypi_version(name).await {
                Ok(v) => {
                    info!(%name, version = %v, "resolved latest version");
                    version = Some(v);
                }
                Err(e) => warn!(%name, error = %e, "failed to resolve version from registry"),
            }
        }

        // Pre-flight scan before any environment exists.
        let mut security = SecurityInfo {
            license_compliant: true,
            ..Default::default()
        };
        if !opts.skip_scan {
            let package = Package::new(
                name,
                version.clone().unwrap_or_else(|| "latest".to_string()),
                Ecosystem::PyPi,
            );
            let results = self.scanner.scan_packages(&[package], cancel).await;
            security.scan_date = Some(Utc::now());
            for result in &results {
                security.vuln_count += result.vulnerabilities.len();
                security.critical_vuln_count += result.critical_count();
            }

            if opts.require_scan && security.critical_vuln_count > 0 {
                return Err(Error::security_policy(format!(
                    "critical vulnerabilities found ({}) - installation of {name} blocked",
                    security.critical_vuln_count
                )));
            }
            if security.vuln_count > 0 {
                warn!(
                    %name,
                    total = security.vuln_count,
                    critical = security.critical_vuln_count,
                    "vulnerabilities found, proceeding with installation"
                );
            }
        }

        // Create the environment and install.
        let venv_path = self.venv.create(name, cancel).await?;
        let pip = self.venv.pip_path(&venv_path);

        let mut spec = name.to_string();
        if let Some(v) = &version {
            spec.push_str(&format!("=={v}"));
        }
        if !opts.extras.is_empty() {
            spec.push_str(&format!("[{}]", opts.extras.join(",")));
        }

        let mut args = vec!["install"];
        if opts.force {
            args.push("--force-reinstall");
        }
        if opts.no_deps {
            args.push("--no-deps");
        }
        if opts.editable {
            args.push("-e");
        }
        args.push(&spec);

        let pip_str = pip.to_string_lossy().into_owned();
        subprocess::run(&pip_str, &args, None, cancel)
            .await
            .map_err(|e| Error::subprocess(format!("pip install failed: {e}")))?;

        let installed_version = self
            .installed_version(&pip_str, name, cancel)
            .await
            .or(version)
            .unwrap_or_else(|| "unknown".to_string());

        let executables = self.venv.list_executables(&venv_path).unwrap_or_default();

        let tool = Tool {
            name: name.to_string(),
            version: installed_version,
            ecosystem: ToolEcosystem::Python,
            install_path: venv_path,
            executables,
            source,
            security,
            metadata: BTreeMap::new(),
            installed_at: Utc::now(),
            updated_at: None,
        };
        self.persist(tool)
    }

    async fn install_repo(
        &mut self,
        name: &str,
        source: InstallSource,
        opts: InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Tool> {
        let repo_path = self.git.clone_repository(&source, cancel).await?;
        info!(path = %repo_path.display(), "repository cloned");

        let ecosystem = detect_ecosystem(&repo_path);
        if ecosystem == ToolEcosystem::Unknown {
            return Err(Error::config(
                "could not detect project type in repository",
            ));
        }

        let security = self
            .preflight_tree(&repo_path, &opts, cancel)
            .await?;

        let (install_path, executables) = if ecosystem == ToolEcosystem::Python {
            let venv_path = self.venv.create(name, cancel).await?;
            let pip = self.venv.pip_path(&venv_path).to_string_lossy().into_owned();
            let repo_str = repo_path.to_string_lossy().into_owned();
            subprocess::run(&pip, &["install", "-e", &repo_str], None, cancel)
                .await
                .map_err(|e| Error::subprocess(format!("pip install failed: {e}")))?;
            let executables = self.venv.list_executables(&venv_path).unwrap_or_default();
            (venv_path, executables)
        } else {
            (repo_path.clone(), Vec::new())
        };

        let version = self.git.version(&repo_path, cancel).await;

        let tool = Tool {
            name: name.to_string(),
            version,
            ecosystem,
            install_path,
            executables,
            source,
            security,
            metadata: BTreeMap::new(),
            installed_at: Utc::now(),
            updated_at: None,
        };
        self.persist(tool)
    }

    async fn install_local(
        &mut self,
        name: &str,
        path: &Path,
        source: InstallSource,
        opts: InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<Tool> {
        LocalInstaller::validate(path)?;

        let ecosystem = LocalInstaller::ecosystem(path);
        if ecosystem == ToolEcosystem::Unknown {
            return Err(Error::config("could not detect project type in directory"));
        }

        let security = self.preflight_tree(path, &opts, cancel).await?;

        let (install_path, executables) = if ecosystem == ToolEcosystem::Python {
            let venv_path = self.venv.create(name, cancel).await?;
            let pip = self.venv.pip_path(&venv_path).to_string_lossy().into_owned();
            let path_str = path.to_string_lossy().into_owned();
            subprocess::run(&pip, &["install", "-e", &path_str], None, cancel)
                .await
                .map_err(|e| Error::subprocess(format!("pip install failed: {e}")))?;
            let executables = self.venv.list_executables(&venv_path).unwrap_or_default();
            (venv_path, executables)
        } else {
            (path.to_path_buf(), Vec::new())
        };

        let tool = Tool {
            name: name.to_string(),
            version: "local".to_string(),
            ecosystem,
            install_path,
            executables,
            source,
            security,
            metadata: LocalInstaller::extract_metadata(path),
            installed_at: Utc::now(),
            updated_at: None,
        };
        self.persist(tool)
    }

    /// Scan a working tree (secrets + dependency manifests) and enforce the
    /// `require_scan` policy. Runs before any environment is created.
    async fn preflight_tree(
        &self,
        tree: &Path,
        opts: &InstallOptions,
        cancel: &CancellationToken,
    ) -> Result<SecurityInfo> {
        let mut security = SecurityInfo {
            license_compliant: true,
            ..Default::default()
        };
        if opts.skip_scan {
            return Ok(security);
        }
        security.scan_date = Some(Utc::now());

        // Secret scanning.
        info!(path = %tree.display(), "scanning for secrets");
        let scan_root = tree.to_path_buf();
        let scanner = SecretScanner::new();
        let secrets = tokio::task::spawn_blocking(move || scanner.scan(&scan_root))
            .await
            .map_err(|e| Error::subprocess(format!("secret scan task panicked: {e}")))?;
        match secrets {
            Ok(report) => {
                security.secrets_found = report.total_secrets;
                security.critical_secrets = report.critical_secrets;
                if report.has_secrets() {
                    warn!(
                        total = report.total_secrets,
                        critical = report.critical_secrets,
                        "secrets found in source tree"
                    );
                }
            }
            Err(e) => {
                if opts.require_scan {
                    return Err(Error::security_policy(format!("secret scan failed: {e}")));
                }
                warn!(error = %e, "secret scan failed");
            }
        }

        // Dependency vulnerability scanning over the first parseable manifest.
        let packages = first_dependency_manifest(tree);
        if packages.is_empty() {
            info!("no dependency manifests found, skipping vulnerability scan");
            return Ok(security);
        }

        info!(count = packages.len(), "scanning dependencies");
        let results = self.scanner.scan_packages(&packages, cancel).await;
        for result in &results {
            security.vuln_count += result.vulnerabilities.len();
            security.critical_vuln_count += result.critical_count();
        }

        if opts.require_scan && security.critical_vuln_count > 0 {
            return Err(Error::security_policy(format!(
                "critical vulnerabilities found ({}) - installation blocked",
                security.critical_vuln_count
            )));
        }

        // Emit a BOM into the scanned tree.
        let sbom_path = tree.join(SBOM_FILENAME);
        match Sbom::generate(&packages).write(&sbom_path) {
            Ok(()) => security.sbom_path = Some(sbom_path),
            Err(e) => warn!(error = %e, "BOM generation failed"),
        }

        Ok(security)
    }

    /// Reinstall a tool from its recorded source, keeping its original
    /// install date and stamping the update time.
    pub async fn upgrade(&mut self, name: &str, cancel: &CancellationToken) -> Result<Tool> {
        let existing = self.get(name)?.clone();
        let spec = match &existing.source {
            InstallSource::Registry { name } => name.clone(),
            InstallSource::RemoteRepo { url, .. } => url.clone(),
            InstallSource::LocalDir { path } => path.display().to_string(),
        };

        let opts = InstallOptions {
            force: true,
            ..Default::default()
        };
        let mut tool = self.install(&spec, opts, cancel).await?;
        tool.installed_at = existing.installed_at;
        tool.updated_at = Some(Utc::now());
        self.persist(tool)
    }

    /// Remove a tool: its environment and its manifest entry.
    ///
    /// The manifest is authoritative; disk state is only cross-checked here.
    pub fn uninstall(&mut self, name: &str) -> Result<()> {
        let tool = self
            .manifest
            .tools
            .get(name)
            .ok_or_else(|| Error::not_found(format!("tool {name} is not installed")))?;
        info!(%name, version = %tool.version, "uninstalling tool");

        self.venv.remove(name)?;
        self.manifest.tools.remove(name);
        self.manifest.updated_at = Utc::now();
        self.manifest.save(&self.manifest_path)
    }

    /// All installed tools, in manifest order.
    #[must_use]
    pub fn list(&self) -> Vec<&Tool> {
        self.manifest.tools.values().collect()
    }

    /// Look up an installed tool by name.
    pub fn get(&self, name: &str) -> Result<&Tool> {
        self.manifest
            .tools
            .get(name)
            .ok_or_else(|| Error::not_found(format!("tool {name} is not installed")))
    }

    fn persist(&mut self, tool: Tool) -> Result<Tool> {
        self.manifest.tools.insert(tool.name.clone(), tool.clone());
        self.manifest.updated_at = Utc::now();
        self.manifest.save(&self.manifest_path)?;

        info!(name = %tool.name, version = %tool.version, "tool installed");
        Ok(tool)
    }

    async fn latest_pypi_version(&self, name: &str) -> Result<String> {
        let url = format!("{}/{name}/json", self.pypi_url);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::network(format!("failed to query registry: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::http_status(
                format!("registry returned an error for {name}"),
                status.as_u16(),
                String::new(),
            ));
        }

        let decoded: PypiResponse = resp
            .json()
            .await
            .map_err(|e| Error::network(format!("failed to parse registry response: {e}")))?;
        Ok(decoded.info.version)
    }

    /// Read the concrete installed version back out of `pip show`.
    async fn installed_version(
        &self,
        pip: &str,
        name: &str,
        cancel: &CancellationToken,
    ) -> Option<String> {
        let output = subprocess::run(pip, &["show", name], None, cancel).await.ok()?;
        output
            .lines()
            .find_map(|line| line.strip_prefix("Version:"))
            .map(|v| v.trim().to_string())
    }
}

/// Parse the first dependency manifest present in a tree.
fn first_dependency_manifest(tree: &Path) -> Vec<Package> {
    for file in DEP_FILES {
        let path = tree.join(file);
        if !path.exists() {
            continue;
        }
        let parsed = match file {
            "requirements.txt" => parser::parse_requirements_txt(&path),
            "go.mod" => parser::parse_go_mod(&path),
            _ => parser::parse_package_json(&path),
        };
        match parsed {
            Ok(packages) => return packages,
            Err(e) => warn!(file, error = %e, "failed to parse dependency manifest"),
        }
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::routing::{get, post};
    use tempfile::TempDir;

    fn venv_manager(temp: &TempDir) -> VenvManager {
        // An interpreter path that cannot exist: tests must never get far
        // enough to spawn it.
        VenvManager::new(Home::new(temp.path()), "/nonexistent/python3")
    }

    async fn spawn_stubs(pypi_version: &'static str, osv_body: &'static str) -> (String, String) {
        let app = Router::new()
            .route(
                "/pypi/{name}/json",
                get(move || async move {
                    (
                        [("content-type", "application/json")],
                        format!(r#"{{"info":{{"version":"{pypi_version}"}}}}"#),
                    )
                }),
            )
            .route(
                "/v1/query",
                post(move || async move {
                    ([("content-type", "application/json")], osv_body)
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (
            format!("http://{addr}/pypi"),
            format!("http://{addr}/v1/query"),
        )
    }

    const CRITICAL_OSV: &str = r#"{"vulns":[{"id":"GHSA-crit","summary":"rce","details":"","severity":[{"type":"CVSS_V3","score":"CVSS:3.1/AV:N/AC:L/PR:N/UI:N/S:U/C:H/I:H/A:H"}],"modified":"","published":""}]}"#;

    #[tokio::test]
    async fn test_preflight_block_leaves_no_side_effects() {
        let temp = TempDir::new().unwrap();
        let (pypi, osv) = spawn_stubs("2.28.0", CRITICAL_OSV).await;

        let mut installer = Installer::with_endpoints(
            Home::new(temp.path()),
            venv_manager(&temp),
            pypi,
            VulnScanner::with_api_url(osv, 100.0),
        )
        .unwrap();

        let opts = InstallOptions {
            require_scan: true,
            ..Default::default()
        };
        let cancel = CancellationToken::new();
        let err = installer.install("requests", opts, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::SecurityPolicy(_)));

        // No environment, no manifest entry.
        assert!(!temp.path().join("tools/requests").exists());
        assert!(!temp.path().join("tools/manifest.json").exists());
        assert!(installer.get("requests").is_err());
    }

    #[tokio::test]
    async fn test_preflight_warn_proceeds_to_env_creation() {
        let temp = TempDir::new().unwrap();
        let (pypi, osv) = spawn_stubs("2.28.0", CRITICAL_OSV).await;

        let mut installer = Installer::with_endpoints(
            Home::new(temp.path()),
            venv_manager(&temp),
            pypi,
            VulnScanner::with_api_url(osv, 100.0),
        )
        .unwrap();

        // Without require_scan the pipeline proceeds past the scan and fails
        // at venv creation (nonexistent interpreter), not at policy.
        let cancel = CancellationToken::new();
        let err = installer
            .install("requests", InstallOptions::default(), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Subprocess(_)));
    }

    #[tokio::test]
    async fn test_registry_version_resolution() {
        let temp = TempDir::new().unwrap();
        let (pypi, osv) = spawn_stubs("9.9.9", r#"{"vulns":[]}"#).await;

        let installer = Installer::with_endpoints(
            Home::new(temp.path()),
            venv_manager(&temp),
            pypi,
            VulnScanner::with_api_url(osv, 100.0),
        )
        .unwrap();

        let version = installer.latest_pypi_version("requests").await.unwrap();
        assert_eq!(version, "9.9.9");
    }

    #[tokio::test]
    async fn test_uninstall_removes_env_and_entry() {
        let temp = TempDir::new().unwrap();
        let home = Home::new(temp.path());

        // Seed a manifest entry with a real on-disk environment.
        let venv_dir = home.tool_venv_dir("mytool");
        std::fs::create_dir_all(&venv_dir).unwrap();

        let mut manifest = ToolManifest::default();
        manifest.tools.insert(
            "mytool".to_string(),
            Tool {
                name: "mytool".to_string(),
                version: "1.0.0".to_string(),
                ecosystem: ToolEcosystem::Python,
                install_path: venv_dir.clone(),
                executables: vec![],
                source: InstallSource::Registry {
                    name: "mytool".to_string(),
                },
                security: SecurityInfo::default(),
                metadata: BTreeMap::new(),
                installed_at: Utc::now(),
                updated_at: None,
            },
        );
        manifest.save(&home.manifest_path()).unwrap();

        let mut installer =
            Installer::new(home.clone(), venv_manager(&temp)).unwrap();
        assert!(installer.get("mytool").is_ok());
        assert_eq!(installer.list().len(), 1);

        installer.uninstall("mytool").unwrap();
        assert!(!venv_dir.exists());
        assert!(installer.get("mytool").is_err());

        // The change survives a reload.
        let reloaded = ToolManifest::load(&home.manifest_path()).unwrap();
        assert!(reloaded.tools.is_empty());
    }

    #[tokio::test]
    async fn test_upgrade_unknown_tool() {
        let temp = TempDir::new().unwrap();
        let mut installer =
            Installer::new(Home::new(temp.path()), venv_manager(&temp)).unwrap();
        let cancel = CancellationToken::new();
        assert!(matches!(
            installer.upgrade("ghost", &cancel).await.unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_uninstall_unknown_tool() {
        let temp = TempDir::new().unwrap();
        let mut installer =
            Installer::new(Home::new(temp.path()), venv_manager(&temp)).unwrap();
        assert!(matches!(
            installer.uninstall("ghost").unwrap_err(),
            Error::NotFound(_)
        ));
    }

    #[tokio::test]
    async fn test_local_install_non_python_records_source_path() {
        let temp = TempDir::new().unwrap();
        let project = TempDir::new().unwrap();
        std::fs::write(project.path().join("Gemfile"), "source 'https://rubygems.org'").unwrap();

        let (pypi, osv) = spawn_stubs("1.0.0", r#"{"vulns":[]}"#).await;
        let mut installer = Installer::with_endpoints(
            Home::new(temp.path()),
            venv_manager(&temp),
            pypi,
            VulnScanner::with_api_url(osv, 100.0),
        )
        .unwrap();

        let spec = project.path().to_string_lossy().into_owned();
        let cancel = CancellationToken::new();
        let tool = installer
            .install(&spec, InstallOptions::default(), &cancel)
            .await
            .unwrap();

        // Non-python ecosystems get no venv; install path is the source.
        assert_eq!(tool.ecosystem, ToolEcosystem::Ruby);
        assert_eq!(tool.version, "local");
        assert_eq!(tool.install_path, project.path());
        assert!(tool.executables.is_empty());
        assert!(installer.get(&tool.name).is_ok());
    }

    #[test]
    fn test_first_dependency_manifest_order() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("package.json"), r#"{"dependencies":{"a":"1.0.0"}}"#)
            .unwrap();
        std::fs::write(temp.path().join("requirements.txt"), "flask==2.0.0\n").unwrap();

        let packages = first_dependency_manifest(temp.path());
        assert_eq!(packages.len(), 1);
        assert_eq!(packages[0].name, "flask");
    }
}
