//! Periodic health probing of supervised processes.

use crate::config::HealthCheckKind;
use crate::manager::Manager;
use opsmith_core::{Error, Result};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Interval of the shared probe tick.
const PROBE_INTERVAL: Duration = Duration::from_secs(30);

/// Probes running processes and triggers supervised restarts on failure.
pub struct HealthChecker {
    manager: Manager,
    client: reqwest::Client,
}

impl HealthChecker {
    #[must_use]
    pub fn new(manager: Manager) -> Self {
        Self {
            manager,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("default reqwest client"),
        }
    }

    /// Run the monitor loop until cancelled. One 30-second tick probes every
    /// running process with health checks enabled.
    pub async fn run(&self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(PROBE_INTERVAL);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first interval tick fires immediately; skip it.
        ticker.tick().await;

        loop {
            tokio::select! {
                () = cancel.cancelled() => return,
                _ = ticker.tick() => self.check_all().await,
            }
        }
    }

    /// Probe every running process once.
    pub async fn check_all(&self) {
        for (name, handle) in self.manager.handles().await {
            if !handle.is_running() || !handle.config.health_check.enabled {
                continue;
            }

            let config = &handle.config.health_check;
            let result = match config.kind {
                HealthCheckKind::Http => self.check_http(&config.endpoint, config.timeout()).await,
                HealthCheckKind::Tcp => check_tcp(&config.endpoint, config.timeout()).await,
                HealthCheckKind::Process => check_process(handle.pid()),
            };

            match result {
                Ok(()) => debug!(process = %name, "health check passed"),
                Err(e) => {
                    warn!(process = %name, error = %e, "health check failed");
                    if handle.config.auto_restart {
                        info!(process = %name, "restarting process after failed health check");
                        if let Err(e) = self.manager.restart(&name).await {
                            warn!(process = %name, error = %e, "failed to restart process");
                        }
                    }
                }
            }
        }
    }

    async fn check_http(&self, endpoint: &str, timeout: Duration) -> Result<()> {
        let resp = self
            .client
            .get(endpoint)
            .timeout(timeout)
            .send()
            .await
            .map_err(|e| Error::network(format!("health check failed: {e}")))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(Error::http_status(
                "unhealthy status code",
                status.as_u16(),
                String::new(),
            ));
        }
        Ok(())
    }
}

/// Connect within the timeout; the connection is closed immediately.
async fn check_tcp(endpoint: &str, timeout: Duration) -> Result<()> {
    if endpoint.is_empty() {
        return Err(Error::config("TCP health check endpoint not configured"));
    }

    let connect = tokio::net::TcpStream::connect(endpoint);
    match tokio::time::timeout(timeout, connect).await {
        Ok(Ok(_stream)) => Ok(()),
        Ok(Err(e)) => Err(Error::network(format!("TCP connection failed: {e}"))),
        Err(_) => Err(Error::network("TCP connection timed out")),
    }
}

/// Signal 0 existence check on the child pid.
fn check_process(pid: Option<u32>) -> Result<()> {
    let Some(pid) = pid else {
        return Err(Error::config("process not running"));
    };

    #[cfg(unix)]
    {
        nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid as i32), None)
            .map_err(|e| Error::config(format!("process check failed: {e}")))
    }
    #[cfg(not(unix))]
    {
        let _ = pid;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckConfig, ProcessConfig, ProcessStatus};

    #[tokio::test]
    async fn test_tcp_check_against_local_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let _ = listener.accept().await;
            }
        });

        check_tcp(&addr.to_string(), Duration::from_secs(2))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_tcp_check_refused_and_unconfigured() {
        assert!(check_tcp("127.0.0.1:1", Duration::from_secs(1)).await.is_err());
        assert!(check_tcp("", Duration::from_secs(1)).await.is_err());
    }

    #[tokio::test]
    async fn test_http_check() {
        let app = axum::Router::new()
            .route("/healthz", axum::routing::get(|| async { "ok" }))
            .route(
                "/broken",
                axum::routing::get(|| async {
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR
                }),
            );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let checker = HealthChecker::new(Manager::new());
        checker
            .check_http(&format!("http://{addr}/healthz"), Duration::from_secs(2))
            .await
            .unwrap();
        assert!(
            checker
                .check_http(&format!("http://{addr}/broken"), Duration::from_secs(2))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn test_process_check_on_live_child() {
        let mgr = Manager::new();
        mgr.start(ProcessConfig {
            name: "probe-me".to_string(),
            command: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
            env: Default::default(),
            auto_restart: false,
            max_retries: 0,
            health_check: HealthCheckConfig {
                enabled: true,
                kind: HealthCheckKind::Process,
                ..Default::default()
            },
        })
        .await
        .unwrap();

        let info = mgr.get("probe-me").await.unwrap();
        assert_eq!(info.status, ProcessStatus::Running);
        check_process(info.pid).unwrap();

        let checker = HealthChecker::new(mgr.clone());
        checker.check_all().await;
        // A passing probe must not disturb the process.
        assert_eq!(
            mgr.get("probe-me").await.unwrap().status,
            ProcessStatus::Running
        );

        mgr.stop("probe-me").await.unwrap();
    }

    #[test]
    fn test_process_check_missing_pid() {
        assert!(check_process(None).is_err());
    }
}
