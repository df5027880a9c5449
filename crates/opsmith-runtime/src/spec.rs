//! Runtime kinds and the `<kind>@<version>` specification syntax.

use opsmith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The kind of interpreter a runtime directory holds.
///
/// Bun and Deno are recognized so their on-disk directories parse, but
/// installation is rejected until an upstream distribution mapping lands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    Python,
    Node,
    Bun,
    Deno,
}

impl RuntimeKind {
    /// Whether an installer exists for this kind.
    #[must_use]
    pub fn is_implemented(&self) -> bool {
        matches!(self, RuntimeKind::Python | RuntimeKind::Node)
    }

    /// Human-readable name for log and error messages.
    #[must_use]
    pub fn display_name(&self) -> &'static str {
        match self {
            RuntimeKind::Python => "Python",
            RuntimeKind::Node => "Node.js",
            RuntimeKind::Bun => "Bun",
            RuntimeKind::Deno => "Deno",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeKind::Python => "python",
            RuntimeKind::Node => "node",
            RuntimeKind::Bun => "bun",
            RuntimeKind::Deno => "deno",
        };
        write!(f, "{s}")
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "python" => Ok(RuntimeKind::Python),
            "node" => Ok(RuntimeKind::Node),
            "bun" => Ok(RuntimeKind::Bun),
            "deno" => Ok(RuntimeKind::Deno),
            other => Err(Error::config(format!(
                "unsupported runtime kind: {other} (supported: python, node, bun, deno)"
            ))),
        }
    }
}

/// A `(kind, version)` pair parsed from user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSpec {
    pub kind: RuntimeKind,
    pub version: String,
}

impl RuntimeSpec {
    /// Parse a runtime specification string.
    ///
    /// Accepts `python@3.12.1`, `node@20.0.0`, or a bare `3.12.1` which
    /// defaults to Python.
    pub fn parse(spec: &str) -> Result<Self> {
        if let Some((kind_part, version_part)) = spec.split_once('@') {
            let version = version_part.trim();
            if version.is_empty() {
                return Err(Error::config(format!(
                    "version cannot be empty in specification: {spec}"
                )));
            }

            let kind: RuntimeKind = kind_part.trim().to_lowercase().parse()?;
            if !kind.is_implemented() {
                return Err(Error::config(format!(
                    "runtime kind not yet implemented: {kind}"
                )));
            }

            return Ok(Self {
                kind,
                version: version.to_string(),
            });
        }

        // No @ separator: a bare version defaults to Python.
        let version = spec.trim();
        if version.is_empty() {
            return Err(Error::config("version cannot be empty"));
        }

        Ok(Self {
            kind: RuntimeKind::Python,
            version: version.to_string(),
        })
    }
}

impl fmt::Display for RuntimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.kind, self.version)
    }
}

impl FromStr for RuntimeSpec {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
