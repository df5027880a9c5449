//! Process lifecycle management.

use crate::config::{ProcessConfig, ProcessStatus};
use chrono::{DateTime, Utc};
use opsmith_core::{Error, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::process::{Child, Command};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Fixed pause between exit and auto-restart.
const RESTART_BACKOFF: Duration = Duration::from_secs(2);

/// How long a stopping process gets between SIGTERM and SIGKILL.
const GRACEFUL_STOP_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug)]
struct ProcessState {
    status: ProcessStatus,
    restart_count: u32,
    pid: Option<u32>,
    started_at: DateTime<Utc>,
}

/// Shared handle between the registry, the monitor task and health probes.
pub(crate) struct ProcessHandle {
    pub(crate) config: ProcessConfig,
    state: Mutex<ProcessState>,
    /// Fired by `stop` to request graceful termination.
    stop: CancellationToken,
    /// Notified by the monitor once the child is fully down.
    exited: tokio::sync::Notify,
}

impl ProcessHandle {
    fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            state: Mutex::new(ProcessState {
                status: ProcessStatus::Starting,
                restart_count: 0,
                pid: None,
                started_at: Utc::now(),
            }),
            stop: CancellationToken::new(),
            exited: tokio::sync::Notify::new(),
        }
    }

    pub(crate) fn status(&self) -> ProcessStatus {
        self.state.lock().expect("state lock").status
    }

    pub(crate) fn pid(&self) -> Option<u32> {
        self.state.lock().expect("state lock").pid
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status() == ProcessStatus::Running
    }

    fn set_status(&self, status: ProcessStatus) {
        self.state.lock().expect("state lock").status = status;
    }

    fn mark_running(&self, pid: Option<u32>) {
        let mut state = self.state.lock().expect("state lock");
        state.status = ProcessStatus::Running;
        state.pid = pid;
        state.started_at = Utc::now();
    }

    fn bump_restart(&self) -> u32 {
        let mut state = self.state.lock().expect("state lock");
        state.restart_count += 1;
        state.restart_count
    }

    fn restart_count(&self) -> u32 {
        self.state.lock().expect("state lock").restart_count
    }
}

/// Point-in-time view of a supervised process.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub name: String,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    pub restart_count: u32,
    pub started_at: DateTime<Utc>,
}

/// Supervises local child processes.
///
/// Cheap to clone; all clones share the same registry.
#[derive(Clone)]
pub struct Manager {
    processes: Arc<RwLock<HashMap<String, Arc<ProcessHandle>>>>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a process. Rejects a name that is already running.
    pub async fn start(&self, config: ProcessConfig) -> Result<()> {
        {
            let processes = self.processes.read().await;
            if let Some(existing) = processes.get(&config.name) {
                if existing.is_running() {
                    return Err(Error::config(format!(
                        "process {} is already running",
                        config.name
                    )));
                }
            }
        }

        let name = config.name.clone();
        let handle = Arc::new(ProcessHandle::new(config));

        let child = match spawn_child(&handle.config) {
            Ok(child) => child,
            Err(e) => {
                handle.set_status(ProcessStatus::Failed);
                return Err(Error::subprocess(format!(
                    "failed to start process {name}: {e}"
                )));
            }
        };
        handle.mark_running(child.id());
        info!(process = %name, pid = ?child.id(), "process started");

        self.processes
            .write()
            .await
            .insert(name.clone(), handle.clone());

        tokio::spawn(monitor(handle, child));
        Ok(())
    }

    /// Stop a running process: SIGTERM, a grace period, then SIGKILL.
    ///
    /// The entry is removed from the registry on success.
    pub async fn stop(&self, name: &str) -> Result<()> {
        let handle = {
            let processes = self.processes.read().await;
            processes
                .get(name)
                .cloned()
                .ok_or_else(|| Error::not_found(format!("process {name} not found")))?
        };

        if !handle.is_running() {
            return Err(Error::config(format!("process {name} is not running")));
        }

        info!(process = %name, "stopping process");
        let exited = handle.exited.notified();
        handle.stop.cancel();

        // The monitor owns the child and performs the actual termination.
        if tokio::time::timeout(GRACEFUL_STOP_TIMEOUT + Duration::from_secs(5), exited)
            .await
            .is_err()
        {
            warn!(process = %name, "timed out waiting for process to exit");
        }

        self.processes.write().await.remove(name);
        Ok(())
    }

    /// Stop then start with the retained configuration.
    pub async fn restart(&self, name: &str) -> Result<()> {
        let config = {
            let processes = self.processes.read().await;
            processes
                .get(name)
                .map(|h| h.config.clone())
                .ok_or_else(|| Error::not_found(format!("process {name} not found")))?
        };

        self.stop(name).await?;
        self.start(config).await
    }

    /// Stop every supervised process.
    pub async fn stop_all(&self) -> Result<()> {
        let names: Vec<String> = {
            let processes = self.processes.read().await;
            processes.keys().cloned().collect()
        };
        for name in names {
            if let Err(e) = self.stop(&name).await {
                warn!(process = %name, error = %e, "failed to stop process");
            }
        }
        Ok(())
    }

    /// Snapshot of all supervised processes.
    pub async fn list(&self) -> Vec<ProcessInfo> {
        let processes = self.processes.read().await;
        processes
            .iter()
            .map(|(name, handle)| {
                let state = handle.state.lock().expect("state lock");
                ProcessInfo {
                    name: name.clone(),
                    status: state.status,
                    pid: state.pid,
                    restart_count: state.restart_count,
                    started_at: state.started_at,
                }
            })
            .collect()
    }

    /// Snapshot of one process.
    pub async fn get(&self, name: &str) -> Option<ProcessInfo> {
        let processes = self.processes.read().await;
        processes.get(name).map(|handle| {
            let state = handle.state.lock().expect("state lock");
            ProcessInfo {
                name: name.to_string(),
                status: state.status,
                pid: state.pid,
                restart_count: state.restart_count,
                started_at: state.started_at,
            }
        })
    }

    pub(crate) async fn handles(&self) -> Vec<(String, Arc<ProcessHandle>)> {
        let processes = self.processes.read().await;
        processes
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }
}

fn spawn_child(config: &ProcessConfig) -> std::io::Result<Child> {
    let mut cmd = Command::new(&config.command);
    cmd.args(&config.args)
        .stdin(Stdio::null())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    if let Some(dir) = &config.working_dir {
        cmd.current_dir(dir);
    }
    for (key, value) in &config.env {
        cmd.env(key, value);
    }
    cmd.spawn()
}

/// Wait for the child to exit, auto-restarting while retries remain.
///
/// One long-lived task per process; it owns the `Child` and is the only
/// place termination signals are delivered.
async fn monitor(handle: Arc<ProcessHandle>, mut child: Child) {
    let name = handle.config.name.clone();

    loop {
        tokio::select! {
            () = handle.stop.cancelled() => {
                terminate(&handle, &mut child).await;
                handle.set_status(ProcessStatus::Stopped);
                handle.exited.notify_waiters();
                return;
            }
            result = child.wait() => {
                handle.set_status(ProcessStatus::Stopped);

                let exit_ok = matches!(&result, Ok(status) if status.success());
                let retries_left = handle.config.auto_restart
                    && handle.restart_count() < handle.config.max_retries;

                if !retries_left {
                    if exit_ok {
                        info!(process = %name, "process stopped");
                    } else {
                        handle.set_status(ProcessStatus::Failed);
                        error!(process = %name, ?result, "process failed");
                    }
                    handle.exited.notify_waiters();
                    return;
                }

                let attempt = handle.bump_restart();
                warn!(
                    process = %name,
                    attempt,
                    max = handle.config.max_retries,
                    "process exited, restarting"
                );
                handle.set_status(ProcessStatus::Starting);

                tokio::select! {
                    () = handle.stop.cancelled() => {
                        handle.set_status(ProcessStatus::Stopped);
                        handle.exited.notify_waiters();
                        return;
                    }
                    () = tokio::time::sleep(RESTART_BACKOFF) => {}
                }

                match spawn_child(&handle.config) {
                    Ok(new_child) => {
                        handle.mark_running(new_child.id());
                        child = new_child;
                    }
                    Err(e) => {
                        error!(process = %name, error = %e, "failed to restart process");
                        handle.set_status(ProcessStatus::Failed);
                        handle.exited.notify_waiters();
                        return;
                    }
                }
            }
        }
    }
}

/// SIGTERM, wait out the grace period, then SIGKILL.
async fn terminate(handle: &Arc<ProcessHandle>, child: &mut Child) {
    #[cfg(unix)]
    if let Some(pid) = handle.pid() {
        let _ = nix::sys::signal::kill(
            nix::unistd::Pid::from_raw(pid as i32),
            nix::sys::signal::Signal::SIGTERM,
        );
    }
    #[cfg(not(unix))]
    let _ = handle;

    match tokio::time::timeout(GRACEFUL_STOP_TIMEOUT, child.wait()).await {
        Ok(_) => {}
        Err(_) => {
            warn!("graceful stop timed out, killing");
            let _ = child.kill().await;
        }
    }
}
