//! Command-line surface.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "opsmith", version, about = "Operational toolkit: runtimes, tools, scanning, serving")]
pub struct Cli {
    /// Override the opsmith home directory (default ~/.opsmith).
    #[arg(long, global = true)]
    pub home: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage interpreter runtimes.
    Runtime {
        #[command(subcommand)]
        command: RuntimeCommand,
    },
    /// Install a tool from a registry, repository or local directory.
    Install {
        /// Package name, `user/repo`, URL, or local path.
        spec: String,
        /// Specific version (registry installs).
        #[arg(long)]
        version: Option<String>,
        /// Force reinstall.
        #[arg(long)]
        force: bool,
        /// Skip the security pre-flight.
        #[arg(long)]
        skip_scan: bool,
        /// Block installation on critical findings.
        #[arg(long)]
        require_scan: bool,
        /// Python extras.
        #[arg(long)]
        extras: Vec<String>,
        /// Editable install.
        #[arg(long, short)]
        editable: bool,
        /// Skip dependencies.
        #[arg(long)]
        no_deps: bool,
    },
    /// Reinstall a tool from its recorded source.
    Upgrade { name: String },
    /// Remove an installed tool.
    Uninstall { name: String },
    /// List installed tools.
    List,
    /// Supply-chain security scans.
    Scan {
        #[command(subcommand)]
        command: ScanCommand,
    },
    /// Run the reverse proxy.
    Proxy {
        /// Path to the proxy configuration JSON.
        #[arg(long, short)]
        config: PathBuf,
    },
    /// Supervise local processes.
    Supervise {
        /// Path to a JSON array of process configurations.
        #[arg(long, short)]
        config: PathBuf,
    },
}

#[derive(Subcommand)]
pub enum RuntimeCommand {
    /// Install a runtime, e.g. `python@3.12.1` or `node@20.0.0`.
    Install { spec: String },
    /// List installed runtimes.
    List,
    /// Remove an installed runtime.
    Remove { spec: String },
}

#[derive(Subcommand)]
pub enum ScanCommand {
    /// Scan dependency manifests in a directory for vulnerabilities.
    Vuln { path: PathBuf },
    /// Scan a file or directory for secrets.
    Secrets { path: PathBuf },
    /// Emit a CycloneDX BOM for the dependency manifests in a directory.
    Sbom {
        path: PathBuf,
        /// Output file (default `sbom.json` in the scanned directory).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}
