//! Command implementations, delegating to the core crates.

use crate::cli::{Cli, Command, RuntimeCommand, ScanCommand};
use opsmith_core::{Error, Home, Result};
use opsmith_proxy::{ProxyConfig, Server};
use opsmith_runtime::{RuntimeKind, RuntimeManager};
use opsmith_security::{Package, Sbom, SecretScanner, VulnScanner, parser, redact_secret};
use opsmith_supervisor::{HealthChecker, Manager, ProcessConfig};
use opsmith_tools::{InstallOptions, Installer, ToolManifest, VenvManager};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub async fn run(cli: Cli) -> Result<()> {
    let home = cli
        .home
        .map(Home::new)
        .unwrap_or_else(Home::default_location);

    match cli.command {
        Command::Runtime { command } => runtime(home, command).await,
        Command::Install {
            spec,
            version,
            force,
            skip_scan,
            require_scan,
            extras,
            editable,
            no_deps,
        } => {
            install(
                home,
                &spec,
                InstallOptions {
                    version,
                    force,
                    skip_scan,
                    require_scan,
                    extras,
                    editable,
                    no_deps,
                },
            )
            .await
        }
        Command::Upgrade { name } => upgrade(home, &name).await,
        Command::Uninstall { name } => uninstall(home, &name),
        Command::List => list(home),
        Command::Scan { command } => scan(command).await,
        Command::Proxy { config } => proxy(home, &config).await,
        Command::Supervise { config } => supervise(&config).await,
    }
}

async fn runtime(home: Home, command: RuntimeCommand) -> Result<()> {
    let manager = RuntimeManager::new(home)?;
    match command {
        RuntimeCommand::Install { spec } => {
            let runtime = manager.install(&spec).await?;
            println!(
                "{} {} installed at {}",
                runtime.kind, runtime.version, runtime.path.display()
            );
        }
        RuntimeCommand::List => {
            let runtimes = manager.list()?;
            if runtimes.is_empty() {
                println!("no runtimes installed");
            }
            for runtime in runtimes {
                println!(
                    "{}-{} ({}/{})",
                    runtime.kind, runtime.version, runtime.os, runtime.arch
                );
            }
        }
        RuntimeCommand::Remove { spec } => {
            manager.remove(&spec)?;
            println!("{spec} removed");
        }
    }
    Ok(())
}

async fn install(home: Home, spec: &str, opts: InstallOptions) -> Result<()> {
    let runtime_mgr = RuntimeManager::new(home.clone())?;
    let python = runtime_mgr
        .list()?
        .into_iter()
        .find(|r| r.kind == RuntimeKind::Python)
        .ok_or_else(|| {
            Error::config(
                "no Python runtime installed; run 'opsmith runtime install <version>' first",
            )
        })?;
    let python_path = runtime_mgr.interpreter_path(&python);

    let venv = VenvManager::new(home.clone(), python_path);
    let mut installer = Installer::new(home, venv)?;

    let cancel = CancellationToken::new();
    let tool = tokio::select! {
        result = installer.install(spec, opts, &cancel) => result?,
        _ = tokio::signal::ctrl_c() => {
            cancel.cancel();
            return Err(Error::config("installation cancelled"));
        }
    };

    println!("{} {} installed", tool.name, tool.version);
    if !tool.executables.is_empty() {
        println!("executables: {}", tool.executables.join(", "));
    }
    if tool.security.vuln_count > 0 {
        println!(
            "warning: {} vulnerabilities ({} critical)",
            tool.security.vuln_count, tool.security.critical_vuln_count
        );
    }
    Ok(())
}

async fn upgrade(home: Home, name: &str) -> Result<()> {
    let runtime_mgr = RuntimeManager::new(home.clone())?;
    let python = runtime_mgr
        .list()?
        .into_iter()
        .find(|r| r.kind == RuntimeKind::Python)
        .ok_or_else(|| Error::config("no Python runtime installed"))?;
    let python_path = runtime_mgr.interpreter_path(&python);

    let venv = VenvManager::new(home.clone(), python_path);
    let mut installer = Installer::new(home, venv)?;
    let cancel = CancellationToken::new();
    let tool = installer.upgrade(name, &cancel).await?;
    println!("{} upgraded to {}", tool.name, tool.version);
    Ok(())
}

fn uninstall(home: Home, name: &str) -> Result<()> {
    let venv = VenvManager::new(home.clone(), "python3");
    let mut installer = Installer::new(home, venv)?;
    installer.uninstall(name)?;
    println!("{name} uninstalled");
    Ok(())
}

fn list(home: Home) -> Result<()> {
    let manifest = ToolManifest::load(&home.manifest_path())?;
    if manifest.tools.is_empty() {
        println!("no tools installed");
        return Ok(());
    }
    for tool in manifest.tools.values() {
        println!(
            "{} {} ({}) {}",
            tool.name,
            tool.version,
            tool.ecosystem,
            tool.install_path.display()
        );
    }
    Ok(())
}

async fn scan(command: ScanCommand) -> Result<()> {
    match command {
        ScanCommand::Vuln { path } => {
            let packages = manifest_packages(&path)?;
            println!("scanning {} dependencies...", packages.len());

            let scanner = VulnScanner::new();
            let cancel = CancellationToken::new();
            let results = scanner.scan_packages(&packages, &cancel).await;

            let mut total = 0usize;
            let mut critical = 0usize;
            for result in &results {
                if let Some(error) = &result.error {
                    println!("{}: query failed: {error}", result.package.name);
                    continue;
                }
                total += result.vulnerabilities.len();
                critical += result.critical_count();
                for vuln in &result.vulnerabilities {
                    println!(
                        "{} in {}@{}: {}",
                        vuln.id, result.package.name, result.package.version, vuln.summary
                    );
                }
            }
            println!("{total} vulnerabilities ({critical} critical)");
        }
        ScanCommand::Secrets { path } => {
            let scanner = SecretScanner::new();
            let report = tokio::task::spawn_blocking(move || scanner.scan(&path))
                .await
                .map_err(|e| Error::subprocess(format!("scan task panicked: {e}")))??;

            for finding in &report.findings {
                println!(
                    "[{:?}] {} at {}:{} -> {}",
                    finding.severity,
                    finding.rule_id,
                    finding.file,
                    finding.line,
                    redact_secret(&finding.secret)
                );
            }
            println!(
                "{} files scanned, {} secrets ({} critical)",
                report.files_scanned, report.total_secrets, report.critical_secrets
            );
        }
        ScanCommand::Sbom { path, output } => {
            let packages = manifest_packages(&path)?;
            let sbom = Sbom::generate(&packages);
            let out = output.unwrap_or_else(|| path.join("sbom.json"));
            sbom.write(&out)?;
            println!("BOM written to {}", out.display());
        }
    }
    Ok(())
}

/// Parse the first dependency manifest found in a directory.
fn manifest_packages(path: &Path) -> Result<Vec<Package>> {
    let requirements = path.join("requirements.txt");
    if requirements.exists() {
        return parser::parse_requirements_txt(&requirements);
    }
    let gomod = path.join("go.mod");
    if gomod.exists() {
        return parser::parse_go_mod(&gomod);
    }
    let package_json = path.join("package.json");
    if package_json.exists() {
        return parser::parse_package_json(&package_json);
    }
    Err(Error::not_found(format!(
        "no dependency manifest in {}",
        path.display()
    )))
}

async fn proxy(home: Home, config_path: &Path) -> Result<()> {
    let mut config = ProxyConfig::load(config_path)?;
    if config.tls.enabled && config.tls.cache_dir.is_none() {
        config.tls.cache_dir = Some(home.certs_dir().display().to_string());
    }

    let server = Arc::new(Server::new(config)?);
    let runner = server.clone();
    let task = tokio::spawn(async move { runner.run().await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::config(format!("signal handler failed: {e}")))?;
    server.shutdown(Duration::from_secs(30));

    task.await
        .map_err(|e| Error::subprocess(format!("server task panicked: {e}")))?
}

async fn supervise(config_path: &Path) -> Result<()> {
    let content = std::fs::read_to_string(config_path)?;
    let configs: Vec<ProcessConfig> = serde_json::from_str(&content)
        .map_err(|e| Error::config(format!("invalid supervisor config: {e}")))?;

    let manager = Manager::new();
    for config in configs {
        let name = config.name.clone();
        manager.start(config).await?;
        println!("{name} started");
    }

    let checker = HealthChecker::new(manager.clone());
    let cancel = CancellationToken::new();
    let monitor_cancel = cancel.clone();
    let monitor = tokio::spawn(async move { checker.run(monitor_cancel).await });

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| Error::config(format!("signal handler failed: {e}")))?;

    cancel.cancel();
    manager.stop_all().await?;
    let _ = monitor.await;
    Ok(())
}
