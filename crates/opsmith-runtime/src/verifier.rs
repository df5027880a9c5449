//! Download integrity verification.
//!
//! python-build-standalone publishes SHA-256 digests in its release notes;
//! they are fetched through the GitHub API and matched against the archive
//! filename. Node.js archives get a file-exists check only, a documented gap.

use opsmith_core::{Error, Platform, Result};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tracing::{debug, info};

const RELEASE_API_URL: &str =
    "https://api.github.com/repos/astral-sh/python-build-standalone/releases/tags";

/// How many lines below the filename the digest may appear in release notes.
const SHA_SEARCH_WINDOW: usize = 5;

#[derive(serde::Deserialize)]
struct Release {
    /// Release notes; null for releases without a body.
    body: Option<String>,
}

/// Verifies archive integrity against upstream-published digests.
pub struct Verifier {
    client: reqwest::Client,
    api_url: String,
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Verifier {
    #[must_use]
    pub fn new() -> Self {
        Self::with_api_url(RELEASE_API_URL)
    }

    /// Construct against an alternate release-metadata endpoint (tests).
    #[must_use]
    pub fn with_api_url(api_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("opsmith/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            api_url: api_url.into(),
        }
    }

    /// Compute the SHA-256 of a file and compare with `expected` (lowercase hex).
    pub async fn verify_sha256(&self, path: &Path, expected: &str) -> Result<()> {
        let actual = sha256_file(path).await?;
        if actual != expected {
            return Err(Error::integrity(format!(
                "checksum mismatch for {}: expected {expected}, got {actual}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Check that a downloaded archive exists and is a regular file.
    pub async fn verify_file_exists(&self, path: &Path) -> Result<()> {
        let meta = tokio::fs::metadata(path)
            .await
            .map_err(|_| Error::not_found(format!("file does not exist: {}", path.display())))?;
        if meta.is_dir() {
            return Err(Error::integrity(format!(
                "path is a directory, not a file: {}",
                path.display()
            )));
        }
        Ok(())
    }

    /// Fetch the expected SHA-256 for a python-build-standalone archive.
    ///
    /// Retrieves the release notes for `build_date` and scans them for the
    /// archive filename, then for a `sha256:<hex>` digest within the next
    /// few lines.
    pub async fn python_sha256(
        &self,
        version: &str,
        platform: &Platform,
        build_date: &str,
    ) -> Result<String> {
        let filename = format!(
            "cpython-{version}+{build_date}-{}-install_only.tar.gz",
            platform.python_triple()
        );
        info!(%filename, %build_date, "fetching SHA-256 from release notes");

        let url = format!("{}/{build_date}", self.api_url);
        let resp = self
            .client
            .get(&url)
            .header("Accept", "application/vnd.github.v3+json")
            .send()
            .await
            .map_err(|e| Error::network(format!("failed to fetch release data: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::http_status(
                format!("release metadata request failed for {build_date}"),
                status.as_u16(),
                body,
            ));
        }

        let release: Release = resp
            .json()
            .await
            .map_err(|e| Error::network(format!("failed to parse release data: {e}")))?;

        let notes = release.body.unwrap_or_default();
        let hash = extract_sha256_from_notes(&notes, &filename)?;
        debug!(digest = %&hash[..16], "found expected digest");
        Ok(hash)
    }
}

/// Scan release notes for `filename`, then for the first `sha256:<64 hex>`
/// within the following lines.
fn extract_sha256_from_notes(body: &str, filename: &str) -> Result<String> {
    let lines: Vec<&str> = body.lines().collect();
    let start = lines
        .iter()
        .position(|line| line.contains(filename))
        .ok_or_else(|| {
            Error::integrity(format!("filename {filename} not found in release notes"))
        })?;

    let pattern = Regex::new(r"sha256:\s*([a-fA-F0-9]{64})").expect("static regex");
    for line in lines.iter().skip(start).take(SHA_SEARCH_WINDOW) {
        if let Some(caps) = pattern.captures(line) {
            return Ok(caps[1].to_lowercase());
        }
    }

    Err(Error::integrity(format!(
        "SHA-256 digest not found near {filename} in release notes"
    )))
}

/// SHA-256 of a file, streamed in 8 KiB chunks, as lowercase hex.
pub(crate) async fn sha256_file(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; 8192];

    loop {
        let n = file.read(&mut buffer).await?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
