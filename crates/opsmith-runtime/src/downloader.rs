//! Archive download with a local cache.

use opsmith_core::{Error, Platform, Result};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// Base URL for python-build-standalone release downloads.
const PYTHON_BUILD_STANDALONE_URL: &str =
    "https://github.com/indygreg/python-build-standalone/releases/download";

/// Release date of the python-build-standalone build to install.
/// Callers cannot vary this per install.
pub(crate) const PYTHON_BUILD_DATE: &str = "20240107";

/// Base URL for official Node.js distributions.
const NODEJS_DIST_URL: &str = "https://nodejs.org/dist";

/// Downloads runtime archives into `<home>/cache/downloads`.
pub struct Downloader {
    cache_dir: PathBuf,
    client: reqwest::Client,
    platform: Platform,
    python_base: String,
    node_base: String,
}

impl Downloader {
    pub fn new(cache_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self::with_base_urls(
            cache_dir,
            platform,
            PYTHON_BUILD_STANDALONE_URL,
            NODEJS_DIST_URL,
        )
    }

    /// Construct against alternate distribution hosts (tests).
    pub fn with_base_urls(
        cache_dir: impl Into<PathBuf>,
        platform: Platform,
        python_base: impl Into<String>,
        node_base: impl Into<String>,
    ) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            client: reqwest::Client::builder()
                .user_agent(concat!("opsmith/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("default reqwest client"),
            platform,
            python_base: python_base.into(),
            node_base: node_base.into(),
        }
    }

    /// Download the python-build-standalone archive for `version`.
    ///
    /// Returns the cached archive path; a previously completed download
    /// short-circuits the network entirely.
    pub async fn download_python(&self, version: &str) -> Result<PathBuf> {
        if !self.platform.is_supported() {
            return Err(Error::config(format!(
                "unsupported platform: {}",
                self.platform
            )));
        }
        let url = self.python_url(version);
        self.fetch(&url).await
    }

    /// Download the Node.js distribution archive for `version`.
    pub async fn download_node(&self, version: &str) -> Result<PathBuf> {
        if !self.platform.is_supported() {
            return Err(Error::config(format!(
                "unsupported platform: {}",
                self.platform
            )));
        }
        let url = self.node_url(version);
        self.fetch(&url).await
    }

    /// The python-build-standalone archive filename for `version`.
    pub fn python_filename(&self, version: &str) -> String {
        format!(
            "cpython-{version}+{PYTHON_BUILD_DATE}-{}-install_only.tar.gz",
            self.platform.python_triple()
        )
    }

    fn python_url(&self, version: &str) -> String {
        format!(
            "{}/{PYTHON_BUILD_DATE}/{}",
            self.python_base,
            self.python_filename(version)
        )
    }

    fn node_url(&self, version: &str) -> String {
        let filename = format!(
            "node-v{version}-{}-{}.{}",
            self.platform.node_os(),
            self.platform.node_arch(),
            self.platform.archive_ext()
        );
        format!("{}/v{version}/{filename}", self.node_base)
    }

    /// Cache path an archive URL maps to.
    pub fn cache_path(&self, url: &str) -> PathBuf {
        let filename = url.rsplit('/').next().unwrap_or("download");
        self.cache_dir.join(filename)
    }

    /// Fetch a URL into the cache.
    ///
    /// The body is streamed to `<name>.part` and renamed into place only
    /// when the transfer completes, so an interrupted download never poses
    /// as a finished one.
    async fn fetch(&self, url: &str) -> Result<PathBuf> {
        tokio::fs::create_dir_all(&self.cache_dir).await?;

        let output = self.cache_path(url);
        if output.exists() {
            info!(file = %output.display(), "using cached download");
            return Ok(output);
        }

        info!(%url, "downloading");
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| Error::network(format!("download failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(Error::http_status(
                format!("download failed: {url}"),
                status.as_u16(),
                body,
            ));
        }

        let partial = partial_path(&output);
        let result = stream_to_file(resp, &partial).await;
        if let Err(e) = result {
            let _ = tokio::fs::remove_file(&partial).await;
            return Err(e);
        }

        tokio::fs::rename(&partial, &output).await?;
        debug!(file = %output.display(), "download complete");
        Ok(output)
    }
}

fn partial_path(output: &Path) -> PathBuf {
    let mut name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    name.push_str(".part");
    output.with_file_name(name)
}

async fn stream_to_file(resp: reqwest::Response, path: &Path) -> Result<()> {
    let mut file = tokio::fs::File::create(path).await?;
    let mut resp = resp;
    while let Some(chunk) = resp
        .chunk()
        .await
        .map_err(|e| Error::network(format!("download interrupted: {e}")))?
    {
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use opsmith_core::{Arch, Os};

    fn downloader(os: Os, arch: Arch) -> Downloader {
        Downloader::new("/tmp/cache", Platform::new(os, arch))
    }

    #[test]
    fn test_python_url_shape() {
        let d = downloader(Os::Linux, Arch::X86_64);
        assert_eq!(
            d.python_url("3.12.1"),
            "https://github.com/indygreg/python-build-standalone/releases/download/20240107/cpython-3.12.1+20240107-x86_64-unknown-linux-gnu-install_only.tar.gz"
        );
    }

    #[test]
    fn test_node_url_shape() {
        let d = downloader(Os::Darwin, Arch::Aarch64);
        assert_eq!(
            d.node_url("20.0.0"),
            "https://nodejs.org/dist/v20.0.0/node-v20.0.0-darwin-arm64.tar.gz"
        );

        let w = downloader(Os::Windows, Arch::X86_64);
        assert_eq!(
            w.node_url("20.0.0"),
            "https://nodejs.org/dist/v20.0.0/node-v20.0.0-win-x64.zip"
        );
    }

    #[test]
    fn test_cache_path_preserves_upstream_filename() {
        let d = downloader(Os::Linux, Arch::X86_64);
        let p = d.cache_path("https://nodejs.org/dist/v20.0.0/node-v20.0.0-linux-x64.tar.gz");
        assert_eq!(
            p,
            PathBuf::from("/tmp/cache/node-v20.0.0-linux-x64.tar.gz")
        );
    }

    #[test]
    fn test_partial_path() {
        let p = partial_path(Path::new("/tmp/cache/node.tar.gz"));
        assert_eq!(p, PathBuf::from("/tmp/cache/node.tar.gz.part"));
    }

    #[tokio::test]
    async fn test_unsupported_platform_rejected_before_network() {
        let d = downloader(Os::Windows, Arch::Aarch64);
        let err = d.download_python("3.12.1").await.unwrap_err();
        assert!(err.to_string().contains("unsupported platform"));
    }
}
