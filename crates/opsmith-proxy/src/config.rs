//! Proxy configuration types, loadable from a JSON file.

use opsmith_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Top-level proxy configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub routes: Vec<RouteConfig>,
}

impl ProxyConfig {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::config(format!("cannot read config {}: {e}", path.display()))
        })?;
        serde_json::from_str(&content)
            .map_err(|e| Error::config(format!("invalid config {}: {e}", path.display())))
    }
}

/// Listener addresses and logging targets.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Listen addresses; first is HTTP, second HTTPS.
    #[serde(default)]
    pub listen: Vec<String>,
    #[serde(default)]
    pub access_log: Option<String>,
    #[serde(default)]
    pub error_log: Option<String>,
}

impl GeneralConfig {
    /// The HTTP listen address, default `:80`.
    #[must_use]
    pub fn http_addr(&self) -> String {
        self.listen.first().cloned().unwrap_or_else(|| ":80".into())
    }

    /// The HTTPS listen address, default `:443`.
    #[must_use]
    pub fn https_addr(&self) -> String {
        self.listen.get(1).cloned().unwrap_or_else(|| ":443".into())
    }
}

/// TLS and ACME settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TlsConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Answer plain HTTP with a 301 to https.
    #[serde(default)]
    pub auto_redirect: bool,
    /// `letsencrypt` (default), `letsencrypt-staging`, or a directory URL.
    #[serde(default)]
    pub acme_provider: String,
    #[serde(default)]
    pub acme_email: String,
    /// Certificate cache directory; defaults to `<home>/certs`.
    #[serde(default)]
    pub cache_dir: Option<String>,
    /// Host whitelist; derived from route host patterns when empty.
    #[serde(default)]
    pub domains: Vec<String>,
}

/// One routing rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouteConfig {
    /// Host pattern: exact, `*`, or `*.domain`. Empty matches every host.
    #[serde(default)]
    pub host: String,
    /// Path pattern: exact, trailing `/*` prefix, or leading `/*` suffix.
    #[serde(default)]
    pub path: String,
    /// HTTP method, or `*`/empty for any.
    #[serde(default)]
    pub method: String,

    /// Single backend URL; shorthand for one-element `backends`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub backends: Vec<BackendConfig>,

    #[serde(default)]
    pub websocket: bool,
    #[serde(default)]
    pub strip_prefix: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub add_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub load_balance: LoadBalanceConfig,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub middleware: Vec<MiddlewareConfig>,

    #[serde(default)]
    pub static_serve: bool,
    #[serde(default)]
    pub static_root: String,
}

/// A configured backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default)]
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub weight: i64,
}

/// Load balancing settings for one route.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoadBalanceConfig {
    /// `round-robin` (default), `least-conn`, `ip-hash`, or `weighted`.
    #[serde(default)]
    pub strategy: String,
    #[serde(default)]
    pub health_check: Option<String>,
    #[serde(default)]
    pub health_interval: Option<String>,
}

/// Middleware entry on a route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiddlewareConfig {
    /// `logging`, `cors`, or `ratelimit`.
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub options: serde_json::Value,
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_listen_defaults() {
        let general = GeneralConfig::default();
        assert_eq!(general.http_addr(), ":80");
        assert_eq!(general.https_addr(), ":443");

        let general = GeneralConfig {
            listen: vec!["127.0.0.1:8080".into(), "127.0.0.1:8443".into()],
            ..Default::default()
        };
        assert_eq!(general.http_addr(), "127.0.0.1:8080");
        assert_eq!(general.https_addr(), "127.0.0.1:8443");
    }

    #[test]
    fn test_load_config_file() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("proxy.json");
        std::fs::write(
            &path,
            r#"{
                "general": {"listen": ["127.0.0.1:8080"]},
                "tls": {"enabled": false},
                "routes": [
                    {
                        "host": "*.example.com",
                        "path": "/api/*",
                        "method": "GET",
                        "backends": [{"name": "a", "url": "http://127.0.0.1:9001", "weight": 2}],
                        "load_balance": {"strategy": "weighted"},
                        "middleware": [{"type": "cors"}]
                    }
                ]
            }"#,
        )
        .unwrap();

        let config = ProxyConfig::load(&path).unwrap();
        assert_eq!(config.routes.len(), 1);
        let route = &config.routes[0];
        assert_eq!(route.host, "*.example.com");
        assert_eq!(route.backends[0].weight, 2);
        assert_eq!(route.load_balance.strategy, "weighted");
        assert_eq!(route.middleware[0].kind, "cors");
    }

    #[test]
    fn test_load_invalid_config() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(
            ProxyConfig::load(&path).unwrap_err(),
            Error::Config(_)
        ));
        assert!(ProxyConfig::load(&temp.path().join("missing.json")).is_err());
    }
}
