//! End-to-end install flow against local distribution stubs.

use axum::Router;
use axum::extract::State;
use axum::routing::get;
use flate2::Compression;
use flate2::write::GzEncoder;
use opsmith_core::{Arch, Error, Home, Os, Platform};
use opsmith_runtime::RuntimeManager;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const VERSION: &str = "3.12.1";
const BUILD_DATE: &str = "20240107";

fn archive_filename() -> String {
    format!("cpython-{VERSION}+{BUILD_DATE}-x86_64-unknown-linux-gnu-install_only.tar.gz")
}

/// A minimal install_only-style tarball with an interpreter under bin/.
fn build_archive() -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));

    for (path, content) in [
        ("bin/python3", &b"#!/bin/sh\necho 3.12.1\n"[..]),
        ("bin/pip", &b"#!/bin/sh\n"[..]),
        ("lib/libpython.so", &b"elf"[..]),
    ] {
        let mut header = tar::Header::new_gnu();
        header.set_path(path).unwrap();
        header.set_size(content.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append(&header, content).unwrap();
    }

    builder.into_inner().unwrap().finish().unwrap()
}

#[derive(Clone)]
struct Stub {
    archive: Arc<Vec<u8>>,
    notes: String,
    downloads: Arc<AtomicUsize>,
}

/// Serve the distribution archive and the release metadata the verifier
/// reads the digest from.
async fn spawn_upstream(archive: Vec<u8>, digest: &str) -> (String, String, Arc<AtomicUsize>) {
    let downloads = Arc::new(AtomicUsize::new(0));
    let stub = Stub {
        archive: Arc::new(archive),
        notes: serde_json::json!({
            "tag_name": BUILD_DATE,
            "body": format!("## Release\n- {}\n  sha256:{digest}\n", archive_filename()),
        })
        .to_string(),
        downloads: downloads.clone(),
    };

    let app = Router::new()
        .route(
            "/dist/{date}/{filename}",
            get(|State(stub): State<Stub>| async move {
                stub.downloads.fetch_add(1, Ordering::SeqCst);
                stub.archive.as_ref().clone()
            }),
        )
        .route(
            "/releases/tags/{date}",
            get(|State(stub): State<Stub>| async move {
                ([("content-type", "application/json")], stub.notes.clone())
            }),
        )
        .with_state(stub);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (
        format!("http://{addr}/dist"),
        format!("http://{addr}/releases/tags"),
        downloads,
    )
}

fn manager(home: &TempDir, python_base: &str, release_api: &str) -> RuntimeManager {
    RuntimeManager::with_endpoints(
        Home::new(home.path()),
        Platform::new(Os::Linux, Arch::X86_64),
        python_base,
        "http://127.0.0.1:1/node",
        release_api,
    )
}

#[tokio::test]
async fn test_install_verifies_extracts_and_is_idempotent() {
    let archive = build_archive();
    let digest = format!("{:x}", Sha256::digest(&archive));
    let (python_base, release_api, downloads) = spawn_upstream(archive, &digest).await;

    let home = TempDir::new().unwrap();
    let mgr = manager(&home, &python_base, &release_api);

    let runtime = mgr.install("python@3.12.1").await.unwrap();
    assert!(runtime.path.join("bin/python3").is_file());
    assert!(runtime.path.join("bin/pip").is_file());
    assert_eq!(downloads.load(Ordering::SeqCst), 1);

    // The fetched archive keeps its upstream filename in the cache.
    assert!(
        home.path()
            .join("cache/downloads")
            .join(archive_filename())
            .exists()
    );

    // Second install returns the existing runtime without touching the
    // network.
    let again = mgr.install("python@3.12.1").await.unwrap();
    assert_eq!(again.path, runtime.path);
    assert_eq!(downloads.load(Ordering::SeqCst), 1);

    let listed = mgr.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].version, VERSION);

    mgr.remove("python@3.12.1").unwrap();
    assert!(!runtime.path.exists());
}

#[tokio::test]
async fn test_checksum_mismatch_aborts_install() {
    let archive = build_archive();
    let wrong_digest = "0".repeat(64);
    let (python_base, release_api, _downloads) = spawn_upstream(archive, &wrong_digest).await;

    let home = TempDir::new().unwrap();
    let mgr = manager(&home, &python_base, &release_api);

    let err = mgr.install("python@3.12.1").await.unwrap_err();
    assert!(matches!(err, Error::Integrity(_)), "got: {err}");
    assert!(!home.path().join("runtimes/python-3.12.1").exists());
}

#[tokio::test]
async fn test_missing_release_notes_skips_verification() {
    let archive = build_archive();
    let digest = format!("{:x}", Sha256::digest(&archive));
    let (python_base, _release_api, _downloads) = spawn_upstream(archive, &digest).await;

    let home = TempDir::new().unwrap();
    // Point the release API nowhere: the digest lookup fails, which only
    // downgrades verification to a logged warning.
    let mgr = manager(&home, &python_base, "http://127.0.0.1:1/releases/tags");

    let runtime = mgr.install("python@3.12.1").await.unwrap();
    assert!(runtime.path.join("bin/python3").is_file());
}
