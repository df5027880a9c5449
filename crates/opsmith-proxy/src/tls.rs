//! ACME-backed TLS termination.
//!
//! Certificates are obtained on demand from the configured directory
//! (Let's Encrypt by default), cached on disk, and served for the
//! whitelisted domains only. Challenges are answered at the handshake layer
//! via TLS-ALPN-01.

use crate::config::TlsConfig;
use futures::StreamExt;
use opsmith_core::{Error, Result};
use rustls_acme::AcmeConfig;
use rustls_acme::axum::AxumAcceptor;
use rustls_acme::caches::DirCache;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Build the TLS acceptor and spawn the certificate maintenance task.
pub fn acme_acceptor(
    tls: &TlsConfig,
    cert_dir: PathBuf,
    domains: Vec<String>,
) -> Result<AxumAcceptor> {
    if domains.is_empty() {
        return Err(Error::config(
            "TLS enabled but no domains configured or derivable from routes",
        ));
    }

    let mut acme = AcmeConfig::new(domains).cache_option(Some(DirCache::new(cert_dir)));
    if !tls.acme_email.is_empty() {
        acme = acme.contact_push(format!("mailto:{}", tls.acme_email));
    }
    acme = match tls.acme_provider.as_str() {
        "" | "letsencrypt" => acme.directory_lets_encrypt(true),
        "letsencrypt-staging" => acme.directory_lets_encrypt(false),
        url => acme.directory(url),
    };

    let mut state = acme.state();

    // Pick a process-wide crypto provider before the first config is built.
    let _ = rustls::crypto::ring::default_provider().install_default();

    // TLS 1.2 floor, HTTP/2 preferred over HTTP/1.1.
    let mut server_config = rustls::ServerConfig::builder_with_protocol_versions(&[
        &rustls::version::TLS13,
        &rustls::version::TLS12,
    ])
    .with_no_client_auth()
    .with_cert_resolver(state.resolver());
    server_config.alpn_protocols = vec![b"h2".to_vec(), b"http/1.1".to_vec()];

    let acceptor = state.axum_acceptor(Arc::new(server_config));

    tokio::spawn(async move {
        loop {
            match state.next().await {
                Some(Ok(event)) => info!(?event, "acme event"),
                Some(Err(e)) => warn!(error = ?e, "acme error"),
                None => break,
            }
        }
    });

    Ok(acceptor)
}

/// Domains the certificate resolver may answer for: the configured list, or
/// every concrete (non-wildcard) route host pattern.
#[must_use]
pub fn certificate_domains(tls: &TlsConfig, route_hosts: &[String]) -> Vec<String> {
    if !tls.domains.is_empty() {
        return tls.domains.clone();
    }
    let mut domains: Vec<String> = route_hosts
        .iter()
        .filter(|h| !h.is_empty() && !h.contains('*'))
        .cloned()
        .collect();
    domains.dedup();
    domains
}
