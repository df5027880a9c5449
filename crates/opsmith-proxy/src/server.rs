//! HTTP and HTTPS listeners over the shared route table.

use crate::config::ProxyConfig;
use crate::handler::{self, ProxyState};
use crate::router::RouterTable;
use crate::tls;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::response::Redirect;
use http::Request;
use opsmith_core::{Error, Home, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tracing::info;

/// The reverse proxy server: two listeners reading one router.
pub struct Server {
    config: ProxyConfig,
    table: Arc<RwLock<Arc<RouterTable>>>,
    http_handle: axum_server::Handle,
    https_handle: axum_server::Handle,
}

impl Server {
    /// Build a server from configuration, compiling every route.
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let table = RouterTable::build(&config)?;
        Ok(Self {
            config,
            table: Arc::new(RwLock::new(Arc::new(table))),
            http_handle: axum_server::Handle::new(),
            https_handle: axum_server::Handle::new(),
        })
    }

    /// Handle of the HTTP listener (exposes the bound address).
    #[must_use]
    pub fn http_handle(&self) -> axum_server::Handle {
        self.http_handle.clone()
    }

    /// Serve until shut down.
    ///
    /// With TLS enabled both listeners run; the HTTP one either proxies or,
    /// with auto-redirect, answers `301` to the https equivalent.
    pub async fn run(&self) -> Result<()> {
        let http_addr = parse_addr(&self.config.general.http_addr())?;

        if !self.config.tls.enabled {
            info!(addr = %http_addr, "starting HTTP server");
            return serve(http_addr, self.proxy_app("http"), self.http_handle.clone()).await;
        }

        let https_addr = parse_addr(&self.config.general.https_addr())?;
        let cert_dir = self.cert_dir();
        let route_hosts: Vec<String> =
            self.config.routes.iter().map(|r| r.host.clone()).collect();
        let domains = tls::certificate_domains(&self.config.tls, &route_hosts);
        let acceptor = tls::acme_acceptor(&self.config.tls, cert_dir, domains)?;

        let http_app = if self.config.tls.auto_redirect {
            redirect_app()
        } else {
            self.proxy_app("http")
        };

        info!(http = %http_addr, https = %https_addr, "starting HTTP and HTTPS servers");
        let https = axum_server::bind(https_addr)
            .acceptor(acceptor)
            .handle(self.https_handle.clone())
            .serve(
                self.proxy_app("https")
                    .into_make_service_with_connect_info::<SocketAddr>(),
            );
        let http = serve(http_addr, http_app, self.http_handle.clone());

        let (http_result, https_result) = tokio::join!(http, async {
            https
                .await
                .map_err(|e| Error::network(format!("HTTPS server error: {e}")))
        });
        http_result?;
        https_result
    }

    /// Swap in a router built from a new configuration.
    ///
    /// In-flight requests finish on the table they started with; new
    /// requests see the new one.
    pub fn reload(&self, config: &ProxyConfig) -> Result<()> {
        let table = RouterTable::build(config)?;
        *self.table.write().expect("router lock") = Arc::new(table);
        info!("configuration reloaded");
        Ok(())
    }

    /// Signal both listeners to shut down with a shared deadline.
    pub fn shutdown(&self, deadline: Duration) {
        info!("shutting down proxy server");
        self.http_handle.graceful_shutdown(Some(deadline));
        self.https_handle.graceful_shutdown(Some(deadline));
    }

    /// Current route table (for inspection and tests).
    #[must_use]
    pub fn table(&self) -> Arc<RouterTable> {
        self.table.read().expect("router lock").clone()
    }

    fn proxy_app(&self, scheme: &'static str) -> Router {
        let state = ProxyState::new(self.table.clone(), scheme);
        Router::new().fallback(
            move |ConnectInfo(peer): ConnectInfo<SocketAddr>, req: Request<Body>| {
                let state = state.clone();
                async move { handler::dispatch(state, Some(peer), req).await }
            },
        )
    }

    fn cert_dir(&self) -> PathBuf {
        self.config
            .tls
            .cache_dir
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(|| Home::default_location().certs_dir())
    }
}

async fn serve(addr: SocketAddr, app: Router, handle: axum_server::Handle) -> Result<()> {
    axum_server::bind(addr)
        .handle(handle)
        .serve(app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| Error::network(format!("HTTP server error: {e}")))
}

/// App answering every request with a 301 to the same URL under https.
fn redirect_app() -> Router {
    Router::new().fallback(|req: Request<Body>| async move {
        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");
        Redirect::permanent(&format!("https://{host}{path_and_query}"))
    })
}

/// Parse a listen address; a bare `:port` binds all interfaces.
fn parse_addr(addr: &str) -> Result<SocketAddr> {
    let normalized = if addr.starts_with(':') {
        format!("0.0.0.0{addr}")
    } else {
        addr.to_string()
    };
    normalized
        .parse()
        .map_err(|e| Error::config(format!("invalid listen address {addr}: {e}")))
}
