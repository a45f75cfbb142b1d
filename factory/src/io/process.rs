//! Helpers for launching long-lived deployment processes and signaling them.
//!
//! Unlike short-lived commands, a deployment outlives the call that started it,
//! so stdout/stderr are redirected to a log file instead of pipes that somebody
//! would have to keep draining.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use tokio::process::{Child, Command};
use tracing::{debug, error, instrument, warn};

/// File inside the artifact directory receiving the service's stdout/stderr.
pub const SERVICE_LOG: &str = "service.log";

/// What to run for a deployment: `<program> <args..> serve-artifact --artifact <dir> --port <port>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launcher {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl Launcher {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    /// Launcher re-executing the running binary.
    pub fn current_exe() -> Result<Self> {
        let exe = std::env::current_exe().context("resolve current executable")?;
        Ok(Self::new(exe))
    }

    fn command(&self, artifact_dir: &Path, port: u16) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg("serve-artifact")
            .arg("--artifact")
            .arg(artifact_dir)
            .arg("--port")
            .arg(port.to_string())
            .current_dir(artifact_dir);
        cmd
    }
}

/// Spawned deployment process plus where its output goes.
#[derive(Debug)]
pub struct SpawnedService {
    pub child: Child,
    pub pid: u32,
    pub log_path: PathBuf,
}

/// Spawn the artifact server, then wait `grace` so immediate bind failures surface.
///
/// Returns an error if the process could not be spawned or exited during the grace delay.
/// Returning `Ok` does not mean the service accepts connections yet.
#[instrument(skip_all, fields(port = port, artifact = %artifact_dir.display()))]
pub async fn spawn_service(
    launcher: &Launcher,
    artifact_dir: &Path,
    port: u16,
    grace: Duration,
) -> Result<SpawnedService> {
    let log_path = artifact_dir.join(SERVICE_LOG);
    let log = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("open service log {}", log_path.display()))?;
    let log_err = log.try_clone().context("clone service log handle")?;

    let mut cmd = launcher.command(artifact_dir, port);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(log))
        .stderr(Stdio::from(log_err));

    debug!("spawning deployment process");
    let mut child = match cmd.spawn() {
        Ok(c) => c,
        Err(e) => {
            error!(err = %e, program = %launcher.program.display(), "failed to spawn deployment");
            return Err(e).context("spawn deployment process");
        }
    };
    let pid = child
        .id()
        .ok_or_else(|| anyhow!("spawned process has no pid"))?;

    tokio::time::sleep(grace).await;
    if let Some(status) = child.try_wait().context("poll deployment process")? {
        warn!(pid, exit_code = ?status.code(), "deployment exited during grace period");
        return Err(anyhow!(
            "deployment process exited during startup with status {:?} (see {})",
            status.code(),
            log_path.display()
        ));
    }

    debug!(pid, "deployment process started");
    Ok(SpawnedService {
        child,
        pid,
        log_path,
    })
}

/// Ask `child` to exit (SIGTERM), escalating to SIGKILL after `timeout`.
///
/// Returns the exit status, or `None` if the process could not be reaped.
#[instrument(skip_all, fields(pid = child.id(), timeout_ms = timeout.as_millis() as u64))]
pub async fn terminate_child(child: &mut Child, timeout: Duration) -> Result<Option<ExitStatus>> {
    if let Some(status) = child.try_wait().context("poll process before terminate")? {
        debug!("process already exited");
        return Ok(Some(status));
    }

    if let Some(pid) = child.id() {
        send_terminate(pid);
    }

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(status) => Ok(Some(status.context("wait for process after terminate")?)),
        Err(_) => {
            warn!("process ignored terminate, killing");
            child.kill().await.context("kill process")?;
            Ok(child.try_wait().context("poll process after kill")?)
        }
    }
}

/// Best-effort SIGTERM to a pid. Returns whether the signal was delivered.
#[cfg(unix)]
pub fn send_terminate(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), Signal::SIGTERM) {
        Ok(()) => true,
        Err(e) => {
            debug!(pid, err = %e, "SIGTERM not delivered");
            false
        }
    }
}

#[cfg(unix)]
pub fn send_kill(pid: u32) -> bool {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), Signal::SIGKILL).is_ok()
}

/// Liveness check for a pid we hold no handle for: signal 0, failure means dead.
#[cfg(unix)]
pub fn pid_is_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    kill(Pid::from_raw(raw), None).is_ok()
}

/// SIGTERM a pid we hold no handle for, then SIGKILL if it outlives `timeout`.
///
/// Returns whether the pid is gone afterwards.
pub async fn terminate_pid(pid: u32, timeout: Duration) -> bool {
    if !pid_is_alive(pid) {
        return true;
    }
    send_terminate(pid);
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if !pid_is_alive(pid) {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    warn!(pid, "pid ignored terminate, killing");
    send_kill(pid);
    tokio::time::sleep(Duration::from_millis(100)).await;
    !pid_is_alive(pid)
}

#[cfg(not(unix))]
pub fn send_terminate(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn send_kill(_pid: u32) -> bool {
    false
}

#[cfg(not(unix))]
pub fn pid_is_alive(_pid: u32) -> bool {
    false
}
