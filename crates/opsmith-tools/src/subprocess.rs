//! Cancellable subprocess execution for git, interpreters and pip.

use opsmith_core::{Error, Result};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Run a command to completion, capturing output.
///
/// The child is killed when `cancel` fires; a non-zero exit maps to a
/// subprocess error carrying stderr.
pub(crate) async fn run(
    program: &str,
    args: &[&str],
    cwd: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<String> {
    debug!(%program, ?args, "running command");

    let mut cmd = Command::new(program);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    if let Some(dir) = cwd {
        cmd.current_dir(dir);
    }

    let child = cmd
        .spawn()
        .map_err(|e| Error::subprocess(format!("failed to spawn {program}: {e}")))?;

    let output = tokio::select! {
        () = cancel.cancelled() => {
            return Err(Error::subprocess(format!("{program} cancelled")));
        }
        result = child.wait_with_output() => result
            .map_err(|e| Error::subprocess(format!("{program} failed: {e}")))?,
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(Error::subprocess(format!(
            "{program} {} exited with {}: {}",
            args.join(" "),
            output.status,
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let cancel = CancellationToken::new();
        let out = run("echo", &["hello"], None, &cancel).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_subprocess_error() {
        let cancel = CancellationToken::new();
        let err = run("sh", &["-c", "echo boom >&2; exit 3"], None, &cancel)
            .await
            .unwrap_err();
        match err {
            Error::Subprocess(msg) => assert!(msg.contains("boom")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_cancellation_kills_child() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = run("sleep", &["30"], None, &cancel).await.unwrap_err();
        assert!(matches!(err, Error::Subprocess(_)));
    }

    #[tokio::test]
    async fn test_missing_program() {
        let cancel = CancellationToken::new();
        let err = run("definitely-not-a-real-binary", &[], None, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Subprocess(_)));
    }
}
