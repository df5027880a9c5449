//! Runtime routes, backends and health state.

use crate::balancer::{LoadBalancer, Strategy};
use crate::config::RouteConfig;
use crate::middleware::Middleware;
use chrono::{DateTime, Utc};
use http::HeaderMap;
use opsmith_core::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use url::Url;

/// Backend health status as last observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

/// Health bookkeeping for one backend.
#[derive(Debug)]
pub struct BackendHealth {
    status: RwLock<HealthStatus>,
    active_connections: AtomicI64,
    fail_count: AtomicU32,
    last_check: RwLock<DateTime<Utc>>,
}

impl Default for BackendHealth {
    fn default() -> Self {
        Self {
            status: RwLock::new(HealthStatus::Healthy),
            active_connections: AtomicI64::new(0),
            fail_count: AtomicU32::new(0),
            last_check: RwLock::new(Utc::now()),
        }
    }
}

impl BackendHealth {
    pub fn status(&self) -> HealthStatus {
        *self.status.read().expect("health lock")
    }

    pub fn set_status(&self, status: HealthStatus) {
        *self.status.write().expect("health lock") = status;
        *self.last_check.write().expect("health lock") = Utc::now();
    }

    pub fn connections(&self) -> i64 {
        self.active_connections.load(Ordering::Relaxed)
    }

    pub fn inc_connections(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn dec_connections(&self) {
        // Monotone during a request; never below zero.
        let _ = self
            .active_connections
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |n| {
                (n > 0).then_some(n - 1)
            });
    }

    pub fn record_failure(&self) {
        self.fail_count.fetch_add(1, Ordering::Relaxed);
    }

    pub fn fail_count(&self) -> u32 {
        self.fail_count.load(Ordering::Relaxed)
    }

    pub fn last_check(&self) -> DateTime<Utc> {
        *self.last_check.read().expect("health lock")
    }
}

/// A single upstream target.
#[derive(Debug)]
pub struct Backend {
    pub name: String,
    pub url: Url,
    pub weight: i64,
    pub health: BackendHealth,
}

impl Backend {
    /// Parse a backend URL, defaulting a missing scheme to http.
    pub fn parse(name: impl Into<String>, url_str: &str, weight: i64) -> Result<Self> {
        let normalized = if url_str.contains("://") {
            url_str.to_string()
        } else {
            format!("http://{url_str}")
        };
        let url = Url::parse(&normalized)
            .map_err(|e| Error::config(format!("invalid backend URL {url_str}: {e}")))?;

        Ok(Self {
            name: name.into(),
            url,
            weight,
            health: BackendHealth::default(),
        })
    }
}

/// A compiled routing rule: predicate, handler options, backends, balancer.
pub struct Route {
    pub host: String,
    pub path: String,
    pub method: String,
    pub websocket: bool,
    pub strip_prefix: String,
    pub add_headers: Vec<(String, String)>,
    pub static_serve: bool,
    pub static_root: PathBuf,
    pub backends: Vec<std::sync::Arc<Backend>>,
    pub balancer: LoadBalancer,
    pub middlewares: Vec<Middleware>,
    /// Upstream client with per-route connection pooling.
    pub client: reqwest::Client,
}

impl Route {
    /// Compile a configured route.
    pub fn build(config: &RouteConfig) -> Result<Self> {
        let mut backends = Vec::new();
        for backend in &config.backends {
            backends.push(std::sync::Arc::new(Backend::parse(
                &backend.name,
                &backend.url,
                backend.weight,
            )?));
        }
        if backends.is_empty() {
            if let Some(target) = &config.target {
                backends.push(std::sync::Arc::new(Backend::parse("default", target, 1)?));
            }
        }

        let strategy = Strategy::parse(&config.load_balance.strategy)?;
        let middlewares = config
            .middleware
            .iter()
            .map(Middleware::build)
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            host: config.host.clone(),
            path: config.path.clone(),
            method: config.method.clone(),
            websocket: config.websocket,
            strip_prefix: config.strip_prefix.clone(),
            add_headers: config
                .add_headers
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            static_serve: config.static_serve,
            static_root: PathBuf::from(&config.static_root),
            backends,
            balancer: LoadBalancer::new(strategy),
            middlewares,
            client: reqwest::Client::builder()
                .pool_max_idle_per_host(10)
                .pool_idle_timeout(std::time::Duration::from_secs(90))
                .build()
                .expect("default reqwest client"),
        })
    }

    /// Whether this route matches a request. Empty patterns match anything.
    #[must_use]
    pub fn matches(&self, host: &str, path: &str, method: &str) -> bool {
        if !self.host.is_empty() && !match_host(&self.host, host) {
            return false;
        }
        if !self.path.is_empty() && !match_path(&self.path, path) {
            return false;
        }
        if !self.method.is_empty() && self.method != "*" && self.method != method {
            return false;
        }
        true
    }
}

/// Host pattern match: exact, `*`, or `*.suffix`. The request host is
/// compared with its port stripped.
#[must_use]
pub fn match_host(pattern: &str, host: &str) -> bool {
    let host = host.rsplit_once(':').map_or(host, |(h, port)| {
        // Only strip a real port; an IPv6 literal also contains colons.
        if port.chars().all(|c| c.is_ascii_digit()) {
            h
        } else {
            host
        }
    });

    if pattern == "*" || pattern == host {
        return true;
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        // `*.example.com` matches `api.example.com`, not `example.com`.
        return pattern.starts_with("*.") && host.ends_with(suffix);
    }
    false
}

/// Path pattern match: exact, trailing `/*` prefix, leading `/*` suffix.
#[must_use]
pub fn match_path(pattern: &str, path: &str) -> bool {
    if pattern == path {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix("/*") {
        return path.starts_with(prefix) && path.len() > prefix.len();
    }
    if let Some(suffix) = pattern.strip_prefix("/*") {
        return path.ends_with(suffix);
    }
    false
}

/// Client IP: first `X-Forwarded-For` entry, then `X-Real-IP`, then the
/// peer address without its port.
#[must_use]
pub fn extract_client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    if let Some(xff) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = xff.split(',').next() {
            let first = first.trim();
            if !first.is_empty() {
                return first.to_string();
            }
        }
    }

    if let Some(xri) = headers.get("x-real-ip").and_then(|v| v.to_str().ok()) {
        if !xri.is_empty() {
            return xri.to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string()).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_match_host_exact_and_wildcard() {
        assert!(match_host("*", "anything.example.com"));
        assert!(match_host("example.com", "example.com"));
        assert!(match_host("example.com", "example.com:8080"));
        assert!(!match_host("example.com", "other.com"));

        assert!(match_host("*.example.com", "api.example.com"));
        assert!(match_host("*.example.com", "deep.api.example.com"));
        assert!(!match_host("*.example.com", "example.com"));
        assert!(!match_host("*.example.com", "evilexample.com"));
    }

    #[test]
    fn test_match_path() {
        assert!(match_path("/health", "/health"));
        assert!(!match_path("/health", "/healthz"));

        assert!(match_path("/api/*", "/api/x"));
        assert!(match_path("/api/*", "/api/"));
        assert!(!match_path("/api/*", "/api"));
        assert!(!match_path("/api/*", "/ap"));

        assert!(match_path("/*.jpg", "/images/cat.jpg"));
        assert!(!match_path("/*.jpg", "/images/cat.png"));
    }

    #[test]
    fn test_route_empty_patterns_match_everything() {
        let route = Route::build(&RouteConfig::default()).unwrap();
        assert!(route.matches("any.host", "/any/path", "DELETE"));
    }

    #[test]
    fn test_route_method_match() {
        let route = Route::build(&RouteConfig {
            method: "GET".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(route.matches("h", "/p", "GET"));
        assert!(!route.matches("h", "/p", "POST"));

        let any = Route::build(&RouteConfig {
            method: "*".into(),
            ..Default::default()
        })
        .unwrap();
        assert!(any.matches("h", "/p", "POST"));
    }

    #[test]
    fn test_backend_parse_defaults_scheme() {
        let backend = Backend::parse("b", "127.0.0.1:9000", 1).unwrap();
        assert_eq!(backend.url.scheme(), "http");
        assert!(Backend::parse("b", "http://[bad", 1).is_err());
    }

    #[test]
    fn test_target_becomes_single_backend() {
        let route = Route::build(&RouteConfig {
            target: Some("http://127.0.0.1:9000".into()),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(route.backends.len(), 1);
        assert_eq!(route.backends[0].name, "default");
    }

    #[test]
    fn test_connection_accounting_floor() {
        let health = BackendHealth::default();
        health.inc_connections();
        health.inc_connections();
        assert_eq!(health.connections(), 2);
        health.dec_connections();
        health.dec_connections();
        health.dec_connections();
        assert_eq!(health.connections(), 0);
    }

    #[test]
    fn test_extract_client_ip_precedence() {
        let mut headers = HeaderMap::new();
        let peer: SocketAddr = "10.0.0.9:51234".parse().unwrap();

        assert_eq!(extract_client_ip(&headers, Some(peer)), "10.0.0.9");

        headers.insert("x-real-ip", HeaderValue::from_static("172.16.0.5"));
        assert_eq!(extract_client_ip(&headers, Some(peer)), "172.16.0.5");

        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("203.0.113.7, 172.16.0.5"),
        );
        assert_eq!(extract_client_ip(&headers, Some(peer)), "203.0.113.7");
    }
}
