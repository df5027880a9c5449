//! Dependency-manifest parsers.
//!
//! Line-oriented parsing for `requirements.txt` and `go.mod`, JSON for
//! `package.json`. Invalid lines are skipped rather than failing the file.

use crate::types::{Ecosystem, Package};
use opsmith_core::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

/// Version comparators recognized in requirements lines, longest first so
/// `>=` wins over `>`.
const COMPARATORS: [&str; 6] = ["==", ">=", "<=", "~=", ">", "<"];

/// Parse a Python `requirements.txt` file.
pub fn parse_requirements_txt(path: &Path) -> Result<Vec<Package>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Io(std::io::Error::new(e.kind(), format!("{}: {e}", path.display()))))?;

    Ok(content
        .lines()
        .filter_map(|line| parse_requirement_line(line).ok())
        .collect())
}

/// Parse a single requirements line into a package.
///
/// Inline `#` comments are stripped, extras (`pkg[extra]`) are dropped from
/// the name, and a missing comparator yields version `latest`.
pub fn parse_requirement_line(line: &str) -> Result<Package> {
    let line = match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    };
    let line = line.trim();
    if line.is_empty() {
        return Err(Error::config("empty requirement line"));
    }

    let mut name = line;
    let mut version = "latest";
    for sep in COMPARATORS {
        if let Some(idx) = line.find(sep) {
            name = line[..idx].trim();
            version = line[idx + sep.len()..].trim();
            break;
        }
    }

    // Strip extras: package[extra]==1.0.0
    if let Some(idx) = name.find('[') {
        name = &name[..idx];
    }

    if name.is_empty() {
        return Err(Error::config("empty package name"));
    }

    Ok(Package::new(name, version, Ecosystem::PyPi))
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    dependencies: BTreeMap<String, String>,
    #[serde(default, rename = "devDependencies")]
    dev_dependencies: BTreeMap<String, String>,
}

/// Parse a Node `package.json`, emitting both dependencies and
/// devDependencies.
pub fn parse_package_json(path: &Path) -> Result<Vec<Package>> {
    let content = std::fs::read_to_string(path)?;
    let parsed: PackageJson = serde_json::from_str(&content)?;

    let mut packages = Vec::new();
    for (name, version) in parsed.dependencies.iter().chain(parsed.dev_dependencies.iter()) {
        packages.push(Package::new(name, clean_npm_version(version), Ecosystem::Npm));
    }
    Ok(packages)
}

/// Strip common npm range prefixes; wildcards collapse to `latest`.
fn clean_npm_version(version: &str) -> String {
    let mut version = version.trim();
    for prefix in ["^", "~", ">=", "<=", ">", "<", "="] {
        version = version.strip_prefix(prefix).unwrap_or(version);
    }
    let version = version.trim();

    if version.is_empty() || version == "*" || version == "x" {
        return "latest".to_string();
    }
    version.to_string()
}

/// Parse a `go.mod` file: the `require ( … )` block plus single-line
/// `require name version` statements.
pub fn parse_go_mod(path: &Path) -> Result<Vec<Package>> {
    let content = std::fs::read_to_string(path)?;

    let mut packages = Vec::new();
    let mut in_require = false;
    for raw in content.lines() {
        let line = raw.trim();

        if line.starts_with("require (") {
            in_require = true;
            continue;
        }
        if in_require && line == ")" {
            in_require = false;
            continue;
        }

        if in_require || line.starts_with("require ") {
            if let Ok(pkg) = parse_go_mod_line(line) {
                packages.push(pkg);
            }
        }
    }

    Ok(packages)
}

fn parse_go_mod_line(line: &str) -> Result<Package> {
    let line = line.strip_prefix("require ").unwrap_or(line).trim();
    let mut fields = line.split_whitespace();
    let (Some(name), Some(version)) = (fields.next(), fields.next()) else {
        return Err(Error::config("invalid go.mod line"));
    };
    Ok(Package::new(name, version, Ecosystem::Go))
}
