//! CycloneDX 1.4 Bill of Materials emission.

use crate::types::Package;
use chrono::{SecondsFormat, Utc};
use opsmith_core::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// A Software Bill of Materials in CycloneDX 1.4 JSON form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sbom {
    #[serde(rename = "bomFormat")]
    pub bom_format: String,
    #[serde(rename = "specVersion")]
    pub spec_version: String,
    pub version: u32,
    pub metadata: Metadata,
    pub components: Vec<Component>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    /// RFC 3339 UTC timestamp.
    pub timestamp: String,
    pub tools: Vec<Tool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub vendor: String,
    pub name: String,
    pub version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Component {
    #[serde(rename = "type")]
    pub kind: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "purl", skip_serializing_if = "Option::is_none")]
    pub package_url: Option<String>,
}

impl Sbom {
    /// Build a BOM with one library component per package.
    #[must_use]
    pub fn generate(packages: &[Package]) -> Self {
        let components = packages
            .iter()
            .map(|pkg| Component {
                kind: "library".to_string(),
                name: pkg.name.clone(),
                version: pkg.version.clone(),
                package_url: Some(build_purl(pkg)),
            })
            .collect();

        Self {
            bom_format: "CycloneDX".to_string(),
            spec_version: "1.4".to_string(),
            version: 1,
            metadata: Metadata {
                timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
                tools: vec![Tool {
                    vendor: "opsmith".to_string(),
                    name: "opsmith".to_string(),
                    version: env!("CARGO_PKG_VERSION").to_string(),
                }],
            },
            components,
        }
    }

    /// Write the BOM as pretty-printed JSON with a trailing newline.
    pub fn write(&self, path: &Path) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Package URL: `pkg:<type>/<name>@<version>`.
fn build_purl(pkg: &Package) -> String {
    format!(
        "pkg:{}/{}@{}",
        pkg.ecosystem.purl_type(),
        pkg.name,
        pkg.version
    )
}
