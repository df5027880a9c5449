//! Rate-limited vulnerability queries against the OSV database.

use crate::ratelimit::RateLimiter;
use crate::types::{Package, ScanResult, Vulnerability};
use opsmith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const OSV_API_URL: &str = "https://api.osv.dev/v1/query";

const MAX_NAME_LEN: usize = 256;
const MAX_VERSION_LEN: usize = 64;

#[derive(Serialize)]
struct QueryRequest<'a> {
    package: PackageQuery<'a>,
    version: &'a str,
}

#[derive(Serialize)]
struct PackageQuery<'a> {
    name: &'a str,
    ecosystem: &'a str,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    vulns: Vec<Vulnerability>,
}

/// Client for the OSV query endpoint.
///
/// Every outbound query acquires a token from the shared limiter first, so
/// the aggregate request rate stays inside the configured budget.
pub struct VulnScanner {
    client: reqwest::Client,
    limiter: RateLimiter,
    api_url: String,
}

impl Default for VulnScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl VulnScanner {
    /// Scanner against the public OSV endpoint at 1 query/second.
    #[must_use]
    pub fn new() -> Self {
        Self::with_api_url(OSV_API_URL, 1.0)
    }

    /// Scanner against an alternate endpoint and rate (tests).
    #[must_use]
    pub fn with_api_url(api_url: impl Into<String>, rate_per_sec: f64) -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(concat!("opsmith/", env!("CARGO_PKG_VERSION")))
                .timeout(Duration::from_secs(30))
                .build()
                .expect("default reqwest client"),
            limiter: RateLimiter::new(rate_per_sec),
            api_url: api_url.into(),
        }
    }

    /// Query vulnerabilities for a single package.
    ///
    /// Input is validated before any network I/O happens.
    pub async fn query(
        &self,
        package: &Package,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vulnerability>> {
        validate_package_name(&package.name)?;
        validate_version(&package.version)?;

        self.limiter.acquire(cancel).await?;

        let request = QueryRequest {
            package: PackageQuery {
                name: &package.name,
                ecosystem: package.ecosystem.osv_label(),
            },
            version: &package.version,
        };

        debug!(name = %package.name, version = %package.version, "querying OSV");
        let resp = self
            .client
            .post(&self.api_url)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::network(format!("OSV query failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::http_status(
                format!("OSV query failed for {}", package.name),
                status.as_u16(),
                body,
            ));
        }

        let decoded: QueryResponse = resp
            .json()
            .await
            .map_err(|e| Error::network(format!("failed to decode OSV response: {e}")))?;
        Ok(decoded.vulns)
    }

    /// Scan a batch of packages.
    ///
    /// Per-package errors land in the result list; the batch never aborts.
    pub async fn scan_packages(
        &self,
        packages: &[Package],
        cancel: &CancellationToken,
    ) -> Vec<ScanResult> {
        let mut results = Vec::with_capacity(packages.len());
        for package in packages {
            match self.query(package, cancel).await {
                Ok(vulnerabilities) => results.push(ScanResult {
                    package: package.clone(),
                    vulnerabilities,
                    error: None,
                }),
                Err(e) => results.push(ScanResult {
                    package: package.clone(),
                    vulnerabilities: Vec::new(),
                    error: Some(e.to_string()),
                }),
            }
        }
        results
    }
}

fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::config("package name cannot be empty"));
    }
    if name.contains("..") || name.contains('/') {
        return Err(Error::config("package name contains invalid characters"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::config("package name too long"));
    }
    Ok(())
}

fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() {
        return Err(Error::config("version cannot be empty"));
    }
    if version.contains("..") {
        return Err(Error::config("version contains invalid characters"));
    }
    if version.len() > MAX_VERSION_LEN {
        return Err(Error::config("version too long"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Ecosystem;
    use axum::Router;
    use axum::routing::post;

    #[test]
    fn test_validate_package_name() {
        assert!(validate_package_name("requests").is_ok());
        assert!(validate_package_name("").is_err());
        assert!(validate_package_name("a/b").is_err());
        assert!(validate_package_name("a..b").is_err());
        assert!(validate_package_name(&"x".repeat(257)).is_err());
    }

    #[test]
    fn test_validate_version() {
        assert!(validate_version("1.0.0").is_ok());
        assert!(validate_version("").is_err());
        assert!(validate_version("1..0").is_err());
        assert!(validate_version(&"9".repeat(65)).is_err());
    }

    #[tokio::test]
    async fn test_invalid_name_rejected_without_network() {
        // Point at an unroutable endpoint: validation must fire first.
        let scanner = VulnScanner::with_api_url("http://127.0.0.1:1/v1/query", 100.0);
        let cancel = CancellationToken::new();

        let pkg = Package::new("../etc", "1.0.0", Ecosystem::PyPi);
        let err = scanner.query(&pkg, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let pkg = Package::new("a/b", "1.0.0", Ecosystem::PyPi);
        assert!(scanner.query(&pkg, &cancel).await.is_err());
    }

    async fn spawn_stub(response: &'static str, status: u16) -> String {
        let app = Router::new().route(
            "/v1/query",
            post(move || async move {
                (
                    axum::http::StatusCode::from_u16(status).unwrap(),
                    [("content-type", "application/json")],
                    response,
                )
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/v1/query")
    }

    #[tokio::test]
    async fn test_query_decodes_vulns() {
        let url = spawn_stub(
            r#"{"vulns":[{"id":"GHSA-test","summary":"bad","details":"","severity":[{"type":"CVSS_V3","score":"CVSS:3.1/AV:N/C:H"}],"modified":"","published":""}]}"#,
            200,
        )
        .await;

        let scanner = VulnScanner::with_api_url(url, 100.0);
        let cancel = CancellationToken::new();
        let pkg = Package::new("requests", "2.19.0", Ecosystem::PyPi);

        let vulns = scanner.query(&pkg, &cancel).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].id, "GHSA-test");
        assert!(vulns[0].severity[0].is_critical());
    }

    #[tokio::test]
    async fn test_batch_captures_per_package_errors() {
        let url = spawn_stub(r#"{"vulns":[]}"#, 200).await;
        let scanner = VulnScanner::with_api_url(url, 100.0);
        let cancel = CancellationToken::new();

        let packages = vec![
            Package::new("ok-package", "1.0.0", Ecosystem::PyPi),
            Package::new("bad/name", "1.0.0", Ecosystem::PyPi),
        ];

        let results = scanner.scan_packages(&packages, &cancel).await;
        assert_eq!(results.len(), 2);
        assert!(results[0].error.is_none());
        assert!(results[1].error.is_some());
    }

    #[tokio::test]
    async fn test_http_error_carries_status_and_body() {
        let url = spawn_stub("quota exceeded", 429).await;
        let scanner = VulnScanner::with_api_url(url, 100.0);
        let cancel = CancellationToken::new();
        let pkg = Package::new("requests", "1.0.0", Ecosystem::PyPi);

        match scanner.query(&pkg, &cancel).await.unwrap_err() {
            Error::Network { status, body, .. } => {
                assert_eq!(status, Some(429));
                assert!(body.unwrap().contains("quota"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
