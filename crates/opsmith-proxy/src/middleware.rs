//! Per-route middleware: access logging, CORS, per-client rate limiting.

use crate::config::MiddlewareConfig;
use http::{HeaderMap, Method, StatusCode};
use opsmith_core::{Error, Result};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Instant;
use tracing::info;

/// Outcome of running a middleware before the handler.
pub enum Decision {
    /// Continue down the pipeline.
    Continue,
    /// Continue, adding these headers to the final response.
    AddHeaders(Vec<(String, String)>),
    /// Short-circuit with this status and headers.
    ShortCircuit(StatusCode, Vec<(String, String)>),
}

/// One middleware instance attached to a route.
#[derive(Debug)]
pub enum Middleware {
    Logging,
    Cors(Cors),
    RateLimit(IpRateLimiter),
}

impl Middleware {
    /// Build a middleware from its configuration entry.
    pub fn build(config: &MiddlewareConfig) -> Result<Self> {
        match config.kind.as_str() {
            "logging" => Ok(Middleware::Logging),
            "cors" => Ok(Middleware::Cors(Cors::from_options(&config.options))),
            "ratelimit" => {
                let rps = config.options.get("rps").and_then(|v| v.as_u64()).unwrap_or(10);
                let burst = config
                    .options
                    .get("burst")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(rps);
                Ok(Middleware::RateLimit(IpRateLimiter::new(rps, burst)))
            }
            other => Err(Error::config(format!("unknown middleware type: {other}"))),
        }
    }

    /// Run the pre-handler step.
    pub fn before(&self, method: &Method, headers: &HeaderMap, client_ip: &str) -> Decision {
        match self {
            Middleware::Logging => Decision::Continue,
            Middleware::Cors(cors) => cors.before(method, headers),
            Middleware::RateLimit(limiter) => {
                if limiter.allow(client_ip) {
                    Decision::Continue
                } else {
                    Decision::ShortCircuit(StatusCode::TOO_MANY_REQUESTS, Vec::new())
                }
            }
        }
    }

    /// Run the post-handler step (access logging).
    pub fn after(
        &self,
        method: &Method,
        path: &str,
        client_ip: &str,
        status: StatusCode,
        started: Instant,
    ) {
        if let Middleware::Logging = self {
            info!(
                client = client_ip,
                method = %method,
                path,
                status = status.as_u16(),
                elapsed_ms = started.elapsed().as_millis() as u64,
                "request"
            );
        }
    }
}

/// CORS header injection with preflight short-circuiting.
#[derive(Debug)]
pub struct Cors {
    allow_origins: Vec<String>,
    allow_methods: String,
    allow_headers: String,
    allow_all: bool,
}

impl Cors {
    fn from_options(options: &serde_json::Value) -> Self {
        let list = |key: &str| -> Vec<String> {
            options
                .get(key)
                .and_then(|v| v.as_array())
                .map(|items| {
                    items
                        .iter()
                        .filter_map(|i| i.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default()
        };

        let allow_origins = list("allow_origins");
        let allow_all = allow_origins.is_empty() || allow_origins.iter().any(|o| o == "*");

        let methods = list("allow_methods");
        let allow_methods = if methods.is_empty() {
            "GET, POST, PUT, DELETE, OPTIONS, PATCH".to_string()
        } else {
            methods.join(", ")
        };

        let headers = list("allow_headers");
        let allow_headers = if headers.is_empty() {
            "Accept, Content-Type, Content-Length, Accept-Encoding, Authorization".to_string()
        } else {
            headers.join(", ")
        };

        Self {
            allow_origins,
            allow_methods,
            allow_headers,
            allow_all,
        }
    }

    fn before(&self, method: &Method, headers: &HeaderMap) -> Decision {
        let origin = headers
            .get(http::header::ORIGIN)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();

        let allowed = self.allow_all || self.allow_origins.iter().any(|o| o == origin);
        let mut response_headers = Vec::new();
        if allowed && !origin.is_empty() {
            response_headers.push(("Access-Control-Allow-Origin".to_string(), origin.to_string()));
            response_headers.push((
                "Access-Control-Allow-Methods".to_string(),
                self.allow_methods.clone(),
            ));
            response_headers.push((
                "Access-Control-Allow-Headers".to_string(),
                self.allow_headers.clone(),
            ));
            response_headers.push((
                "Access-Control-Allow-Credentials".to_string(),
                "true".to_string(),
            ));
            response_headers.push(("Access-Control-Max-Age".to_string(), "3600".to_string()));
        }

        if method == Method::OPTIONS {
            return Decision::ShortCircuit(StatusCode::OK, response_headers);
        }
        if response_headers.is_empty() {
            Decision::Continue
        } else {
            Decision::AddHeaders(response_headers)
        }
    }
}

/// Per-client-IP token bucket.
#[derive(Debug)]
pub struct IpRateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    rps: f64,
    burst: f64,
}

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last: Instant,
}

impl IpRateLimiter {
    #[must_use]
    pub fn new(rps: u64, burst: u64) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            rps: rps.max(1) as f64,
            burst: burst.max(1) as f64,
        }
    }

    /// Whether a request from `ip` is inside its budget.
    pub fn allow(&self, ip: &str) -> bool {
        let mut buckets = self.buckets.lock().expect("bucket lock");
        let now = Instant::now();
        let bucket = buckets.entry(ip.to_string()).or_insert(Bucket {
            tokens: self.burst,
            last: now,
        });

        let elapsed = now.duration_since(bucket.last).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rps).min(self.burst);
        bucket.last = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
