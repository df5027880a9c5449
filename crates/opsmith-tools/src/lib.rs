//! Tool installer.
//!
//! Installs packages from a registry, a remote repository, or a local
//! directory into isolated per-tool environments, gated by a security
//! pre-flight, and records every install in a durable manifest.

mod git;
mod installer;
mod local;
mod source;
mod subprocess;
mod types;
mod venv;

pub use git::GitInstaller;
pub use installer::{InstallOptions, Installer};
pub use local::LocalInstaller;
pub use source::{InstallSource, detect_source};
pub use types::{SecurityInfo, Tool, ToolEcosystem, ToolManifest, detect_ecosystem};
pub use venv::VenvManager;
