//! Request dispatch: route lookup, middleware, backend forwarding.

use crate::middleware::Decision;
use crate::route::{Route, extract_client_ip};
use crate::router::RouterTable;
use crate::{statics, ws};
use axum::body::Body;
use http::header::{HeaderName, HeaderValue};
use http::{Request, Response, StatusCode};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};
use std::time::Instant;
use tracing::warn;

/// Request headers never forwarded upstream.
const HOP_HEADERS: [&str; 10] = [
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
    "host",
    "content-length",
];

/// Shared dispatcher state: the live route table plus the listener scheme.
#[derive(Clone)]
pub struct ProxyState {
    table: Arc<RwLock<Arc<RouterTable>>>,
    scheme: &'static str,
}

impl ProxyState {
    pub fn new(table: Arc<RwLock<Arc<RouterTable>>>, scheme: &'static str) -> Self {
        Self { table, scheme }
    }

    fn table(&self) -> Arc<RouterTable> {
        self.table.read().expect("router lock").clone()
    }
}

/// Handle one request end to end.
pub async fn dispatch(
    state: ProxyState,
    peer: Option<SocketAddr>,
    req: Request<Body>,
) -> Response<Body> {
    let table = state.table();

    let host = request_host(&req);
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let Some(route) = table.find(&host, &path, method.as_str()) else {
        return plain_response(StatusCode::NOT_FOUND, "not found");
    };

    let client_ip = extract_client_ip(req.headers(), peer);
    let started = Instant::now();

    // Middleware pre-pass, in declaration order.
    let mut extra_headers: Vec<(String, String)> = Vec::new();
    for middleware in &route.middlewares {
        match middleware.before(&method, req.headers(), &client_ip) {
            Decision::Continue => {}
            Decision::AddHeaders(mut headers) => extra_headers.append(&mut headers),
            Decision::ShortCircuit(status, mut headers) => {
                extra_headers.append(&mut headers);
                let mut resp = plain_response(status, "");
                apply_headers(&mut resp, &extra_headers);
                access_log(&route, &method, &path, &client_ip, resp.status(), started);
                return resp;
            }
        }
    }

    let mut resp = if route.static_serve {
        statics::serve(&route, req).await
    } else if route.websocket {
        ws::handle(route.clone(), req, client_ip.clone()).await
    } else {
        forward(&route, req, &host, &client_ip, state.scheme).await
    };

    apply_headers(&mut resp, &extra_headers);
    access_log(&route, &method, &path, &client_ip, resp.status(), started);
    resp
}

/// Proxy a request to a backend selected by the route's balancer.
async fn forward(
    route: &Route,
    req: Request<Body>,
    original_host: &str,
    client_ip: &str,
    scheme: &'static str,
) -> Response<Body> {
    let Some(backend) = route.balancer.select(&route.backends, client_ip) else {
        return plain_response(StatusCode::SERVICE_UNAVAILABLE, "no healthy backends available");
    };

    // Connection accounting brackets the proxied call, error paths included.
    backend.health.inc_connections();
    let _guard = ConnectionGuard(&backend);

    let mut target = backend.url.clone();
    let mut path = req.uri().path().to_string();
    if !backend.url.path().is_empty() && backend.url.path() != "/" {
        path = single_joining_slash(backend.url.path(), &path);
    }
    if !route.strip_prefix.is_empty() {
        if let Some(stripped) = path.strip_prefix(&route.strip_prefix) {
            path = stripped.to_string();
        }
        if !path.starts_with('/') {
            path = format!("/{path}");
        }
    }
    target.set_path(&path);
    target.set_query(req.uri().query());

    let method = req.method().clone();
    let mut builder = route.client.request(method, target.as_str());

    for (name, value) in req.headers() {
        if HOP_HEADERS.contains(&name.as_str()) {
            continue;
        }
        builder = builder.header(name, value);
    }
    for (name, value) in &route.add_headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder = builder
        .header("X-Forwarded-For", client_ip)
        .header("X-Forwarded-Proto", scheme)
        .header("X-Forwarded-Host", original_host);

    let body = reqwest::Body::wrap_stream(req.into_body().into_data_stream());
    let upstream = builder.body(body).send().await;

    match upstream {
        Ok(resp) => {
            let status = resp.status();
            let mut response = Response::builder().status(status);
            if let Some(headers) = response.headers_mut() {
                for (name, value) in resp.headers() {
                    if name == "transfer-encoding" || name == "connection" {
                        continue;
                    }
                    headers.insert(name.clone(), value.clone());
                }
            }
            response
                .body(Body::from_stream(resp.bytes_stream()))
                .unwrap_or_else(|_| plain_response(StatusCode::BAD_GATEWAY, "bad gateway"))
        }
        Err(e) => {
            warn!(backend = %backend.name, error = %e, "backend request failed");
            backend.health.record_failure();
            plain_response(StatusCode::BAD_GATEWAY, &format!("bad gateway: {e}"))
        }
    }
}

struct ConnectionGuard<'a>(&'a Arc<crate::route::Backend>);

impl Drop for ConnectionGuard<'_> {
    fn drop(&mut self) {
        self.0.health.dec_connections();
    }
}

fn request_host(req: &Request<Body>) -> String {
    if let Some(host) = req.headers().get(http::header::HOST).and_then(|v| v.to_str().ok()) {
        return host.to_string();
    }
    req.uri()
        .authority()
        .map(|a| a.to_string())
        .unwrap_or_default()
}

/// Join two URL path segments with exactly one slash.
fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

fn plain_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .body(Body::from(body.to_string()))
        .expect("static response")
}

fn apply_headers(resp: &mut Response<Body>, headers: &[(String, String)]) {
    for (name, value) in headers {
        let (Ok(name), Ok(value)) = (
            name.parse::<HeaderName>(),
            HeaderValue::from_str(value),
        ) else {
            continue;
        };
        resp.headers_mut().insert(name, value);
    }
}

fn access_log(
    route: &Route,
    method: &http::Method,
    path: &str,
    client_ip: &str,
    status: StatusCode,
    started: Instant,
) {
    for middleware in &route.middlewares {
        middleware.after(method, path, client_ip, status, started);
    }
}
