//! Supervised process configuration.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// How to run and watch one process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessConfig {
    pub name: String,
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<PathBuf>,
    /// Extra environment variables layered over the parent's.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub auto_restart: bool,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default)]
    pub health_check: HealthCheckConfig,
}

/// Health probe style.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthCheckKind {
    Http,
    Tcp,
    #[default]
    Process,
}

/// Health probe parameters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HealthCheckConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, rename = "type")]
    pub kind: HealthCheckKind,
    /// URL for http probes, `host:port` for tcp probes.
    #[serde(default)]
    pub endpoint: String,
    #[serde(default)]
    pub interval_secs: u64,
    #[serde(default)]
    pub timeout_secs: u64,
    #[serde(default)]
    pub retries: u32,
}

impl HealthCheckConfig {
    /// Probe timeout, defaulting to five seconds.
    #[must_use]
    pub fn timeout(&self) -> Duration {
        if self.timeout_secs == 0 {
            Duration::from_secs(5)
        } else {
            Duration::from_secs(self.timeout_secs)
        }
    }
}

/// Process lifecycle state.
///
/// `stopped → starting → running → (stopped | failed)`; auto-restart
/// re-enters `starting` while retries remain. `failed` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Starting,
    Running,
    Failed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProcessStatus::Stopped => "stopped",
            ProcessStatus::Starting => "starting",
            ProcessStatus::Running => "running",
            ProcessStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}
