//! Tool records and the durable manifest.

use crate::source::InstallSource;
use chrono::{DateTime, Utc};
use opsmith_core::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// The project ecosystem a tool's source tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolEcosystem {
    Python,
    Go,
    Node,
    Ruby,
    Rust,
    Unknown,
}

impl std::fmt::Display for ToolEcosystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ToolEcosystem::Python => "python",
            ToolEcosystem::Go => "go",
            ToolEcosystem::Node => "node",
            ToolEcosystem::Ruby => "ruby",
            ToolEcosystem::Rust => "rust",
            ToolEcosystem::Unknown => "unknown",
        };
        write!(f, "{s}")
    }
}

/// Detect the ecosystem of a source tree by its manifest files.
///
/// The first present file wins, in this order: python markers, `go.mod`,
/// `package.json`, `Gemfile`, `Cargo.toml`.
#[must_use]
pub fn detect_ecosystem(dir: &Path) -> ToolEcosystem {
    let has = |name: &str| dir.join(name).exists();

    if has("setup.py") || has("pyproject.toml") || has("requirements.txt") {
        ToolEcosystem::Python
    } else if has("go.mod") {
        ToolEcosystem::Go
    } else if has("package.json") {
        ToolEcosystem::Node
    } else if has("Gemfile") {
        ToolEcosystem::Ruby
    } else if has("Cargo.toml") {
        ToolEcosystem::Rust
    } else {
        ToolEcosystem::Unknown
    }
}

/// Security scan summary attached to an installed tool.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sbom_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scan_date: Option<DateTime<Utc>>,
    #[serde(default)]
    pub vuln_count: usize,
    #[serde(default)]
    pub critical_vuln_count: usize,
    #[serde(default)]
    pub secrets_found: usize,
    #[serde(default)]
    pub critical_secrets: usize,
    #[serde(default)]
    pub license_compliant: bool,
}

/// An installed tool as recorded in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    pub version: String,
    pub ecosystem: ToolEcosystem,
    pub install_path: PathBuf,
    pub executables: Vec<String>,
    pub source: InstallSource,
    #[serde(default)]
    pub security: SecurityInfo,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, String>,
    pub installed_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

/// The durable tool registry at `<home>/tools/manifest.json`.
///
/// An ordered map so the serialized file is stable across rewrites. A
/// missing or unreadable file is a valid initial state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolManifest {
    pub tools: BTreeMap<String, Tool>,
    pub updated_at: DateTime<Utc>,
}

impl Default for ToolManifest {
    fn default() -> Self {
        Self {
            tools: BTreeMap::new(),
            updated_at: Utc::now(),
        }
    }
}

impl ToolManifest {
    /// Load the manifest, treating a missing file as empty.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Persist the manifest as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}
