//! Runtime provisioner.
//!
//! Fetches interpreter distributions (python-build-standalone, nodejs.org),
//! verifies their integrity, and extracts them under
//! `<home>/runtimes/<kind>-<version>` through a path-traversal-safe archive
//! layer.

mod downloader;
mod extractor;
mod manager;
mod spec;
mod verifier;

pub use downloader::Downloader;
pub use extractor::extract_archive;
pub use manager::{Runtime, RuntimeManager};
pub use spec::{RuntimeKind, RuntimeSpec};
pub use verifier::Verifier;
