//! opsmith CLI.
//!
//! Thin dispatcher over the core crates; all real behavior lives there.

// CLI binary prints to stdout/stderr by design.
#![allow(clippy::print_stdout, clippy::print_stderr)]

mod cli;
mod commands;

use clap::Parser;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with_target(false)
        .init();

    let args = cli::Cli::parse();
    if let Err(e) = commands::run(args).await {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}
