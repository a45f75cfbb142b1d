//! Deployment lifecycle: allocate a port, package, launch, verify, stop.
//!
//! A [`DeploymentManager`] owns the only [`PortAllocator`] of the process and
//! shares its [`ProcessRegistry`] with the watchdog and the stress harness.
//! Process handles exist only for deployments launched by this process; for
//! anything else the recorded pid is the fallback for liveness and stop.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agents::Memory;
use crate::core::audit::deployment_snippet;
use crate::core::types::{DeploymentId, DeploymentStatus, RunId};
use crate::error::FactoryError;
use crate::io::artifact::{self, ArtifactManifest};
use crate::io::catalog::{DeploymentCatalog, DeploymentRecord, NewDeployment};
use crate::io::config::FactoryConfig;
use crate::io::paths::FactoryPaths;
use crate::io::ports::PortAllocator;
use crate::io::probe::{LivenessProbe, Readiness};
use crate::io::process::{Launcher, pid_is_alive, spawn_service, terminate_pid};
use crate::registry::{ProcessHandle, ProcessRegistry};

/// Version stamped on every packaged artifact.
pub const ARTIFACT_VERSION: &str = "v1.0.0";

const PROCESS_GONE_NOTE: &str = "status check: process not alive";

#[derive(Debug, Clone, Deserialize)]
pub struct DeployRequest {
    pub goal: String,
    #[serde(default)]
    pub source_run_id: Option<RunId>,
}

impl DeployRequest {
    pub fn for_goal(goal: impl Into<String>) -> Self {
        Self {
            goal: goal.into(),
            source_run_id: None,
        }
    }
}

/// Result of a deploy call. A launched but unreachable deployment still
/// reports its id and endpoint, with `verified = false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    pub id: DeploymentId,
    pub goal: String,
    pub port: u16,
    pub endpoint: String,
    pub status: DeploymentStatus,
    pub pid: u32,
    pub verified: bool,
}

/// Recorded deployment plus its observed process liveness.
#[derive(Debug, Clone, Serialize)]
pub struct DeploymentReport {
    #[serde(flatten)]
    pub record: DeploymentRecord,
    pub alive: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub id: DeploymentId,
    pub endpoint: String,
    pub ready: bool,
    pub elapsed_secs: f64,
}

/// Something that can turn a goal into a running deployment.
#[async_trait]
pub trait Deploy: Send + Sync {
    async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome>;
}

pub struct DeploymentManager {
    config: FactoryConfig,
    deploy_root: PathBuf,
    launcher: Launcher,
    allocator: PortAllocator,
    registry: ProcessRegistry,
    catalog: DeploymentCatalog,
    probe: LivenessProbe,
    memory: Arc<dyn Memory>,
}

impl DeploymentManager {
    pub fn with_launcher(
        paths: &FactoryPaths,
        config: &FactoryConfig,
        memory: Arc<dyn Memory>,
        launcher: Launcher,
    ) -> Result<Self> {
        let catalog = DeploymentCatalog::new(&paths.deployments_path);
        let allocator = PortAllocator::new(config.start_port);
        // Ports of recorded running deployments stay reserved for watchdog relaunches.
        for dep in catalog.with_status(DeploymentStatus::Running)? {
            allocator.reserve(dep.port);
        }
        Ok(Self {
            config: config.clone(),
            deploy_root: paths.deploy_root(config),
            launcher,
            allocator,
            registry: ProcessRegistry::new(),
            catalog,
            probe: LivenessProbe::new(config.probe_timeout(), config.liveness_path.clone())?,
            memory,
        })
    }

    pub fn config(&self) -> &FactoryConfig {
        &self.config
    }

    pub fn registry(&self) -> &ProcessRegistry {
        &self.registry
    }

    pub fn catalog(&self) -> &DeploymentCatalog {
        &self.catalog
    }

    pub fn deploy_root(&self) -> &Path {
        &self.deploy_root
    }

    /// Create the record, allocate a port, package and launch, then run one
    /// delayed liveness check that never fails the deploy.
    #[instrument(skip_all, fields(goal = %request.goal))]
    pub async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome> {
        let goal = request.goal.trim();
        if goal.is_empty() {
            return Err(FactoryError::InvalidInput("goal must not be empty".to_string()).into());
        }

        let port = self.allocator.allocate()?;
        let record = match self.catalog.create(NewDeployment {
            source_run_id: request.source_run_id,
            goal: goal.to_string(),
            port,
            version: ARTIFACT_VERSION.to_string(),
        }) {
            Ok(record) => record,
            Err(e) => {
                self.allocator.release(port);
                return Err(e);
            }
        };

        let pid = match self.launch(&record).await {
            Ok(pid) => pid,
            Err(e) => {
                let reason = format!("{e:#}");
                warn!(deployment_id = record.id, port, err = %reason, "deployment launch failed");
                self.discard(&record, &reason).await;
                return Err(FactoryError::Spawn { port, reason }.into());
            }
        };
        info!(deployment_id = record.id, port, pid, "deployment launched");

        let snippet = deployment_snippet(
            goal,
            &record.endpoint,
            &record.version,
            DeploymentStatus::Running,
        );
        if let Err(e) = self.memory.add(&format!("deploy:{}", record.id), &snippet) {
            warn!(deployment_id = record.id, err = %e, "failed to record deployment snippet");
        }

        let verified = self.fire_and_check(record.id, port).await;
        Ok(DeployOutcome {
            id: record.id,
            goal: record.goal,
            port,
            endpoint: record.endpoint,
            status: DeploymentStatus::Running,
            pid,
            verified,
        })
    }

    async fn launch(&self, record: &DeploymentRecord) -> Result<u32> {
        let manifest = ArtifactManifest {
            deployment_id: record.id,
            goal: record.goal.clone(),
            version: record.version.clone(),
            liveness_path: self.config.liveness_path.clone(),
            created_at: Utc::now(),
        };
        let dir = artifact::package(&self.deploy_root, &manifest)?;
        self.catalog.set_artifact_path(record.id, &dir)?;

        let service = spawn_service(&self.launcher, &dir, record.port, self.config.grace()).await?;
        let pid = service.pid;
        self.registry
            .insert(record.id, ProcessHandle::new(service, record.port));
        self.catalog.set_status(
            record.id,
            DeploymentStatus::Running,
            Some(pid),
            &format!("launched pid={pid}"),
        )?;
        Ok(pid)
    }

    /// Undo a failed launch: kill anything registered, free the port, mark stopped.
    async fn discard(&self, record: &DeploymentRecord, reason: &str) {
        if let Some(handle) = self.registry.remove(record.id) {
            if let Err(e) = handle.terminate(self.config.stop_timeout()).await {
                warn!(deployment_id = record.id, err = %e, "failed to terminate discarded deployment");
            }
        }
        self.allocator.release(record.port);
        if let Err(e) = self.catalog.set_status(
            record.id,
            DeploymentStatus::Stopped,
            None,
            &format!("launch failed: {reason}"),
        ) {
            warn!(deployment_id = record.id, err = %e, "failed to mark deployment stopped");
        }
    }

    /// Sleep the verify delay, probe once, and note the outcome.
    pub async fn fire_and_check(&self, id: DeploymentId, port: u16) -> bool {
        tokio::time::sleep(self.config.verify_delay()).await;
        let url = self.probe.url(port);
        let ok = self.probe.check(port).await;
        let note = if ok {
            info!(deployment_id = id, url = %url, "deployment answered liveness check");
            format!("liveness ok at {url}")
        } else {
            warn!(deployment_id = id, url = %url, "deployment did not answer liveness check");
            format!("liveness check failed at {url}")
        };
        self.note(id, &note);
        ok
    }

    /// Poll `port` until it answers or `timeout` elapses.
    pub async fn wait_ready(&self, port: u16, timeout: Duration) -> Readiness {
        self.probe
            .wait_ready(port, timeout, self.config.poll_interval())
            .await
    }

    /// Registry handle when this process launched it, else signal 0 on the recorded pid.
    pub fn is_alive(&self, record: &DeploymentRecord) -> bool {
        match self.registry.is_alive(record.id) {
            Some(alive) => alive,
            None => record.process_id.is_some_and(pid_is_alive),
        }
    }

    /// SIGTERM, escalate after the stop timeout, mark stopped. Idempotent.
    #[instrument(skip(self), fields(deployment_id = id))]
    pub async fn stop(&self, id: DeploymentId, reason: &str) -> Result<DeploymentRecord> {
        let record = self.catalog.get(id)?;
        let timeout = self.config.stop_timeout();
        if let Some(handle) = self.registry.remove(id) {
            if let Err(e) = handle.terminate(timeout).await {
                warn!(err = %e, "failed to terminate deployment process");
            }
        } else if let Some(pid) = record.process_id {
            if !terminate_pid(pid, timeout).await {
                warn!(pid, "deployment process survived kill");
            }
        }
        self.allocator.release(record.port);

        if record.status == DeploymentStatus::Stopped {
            debug!("deployment already stopped");
            return Ok(record);
        }
        let record = self
            .catalog
            .set_status(id, DeploymentStatus::Stopped, None, reason)?;
        info!(port = record.port, "deployment stopped");
        Ok(record)
    }

    pub async fn rollback(&self, id: DeploymentId) -> Result<DeploymentRecord> {
        self.stop(id, "rollback").await
    }

    /// Recorded state plus real liveness. A running record whose process is
    /// gone gets one note per divergence; the watchdog owns the restart.
    pub fn status(&self, id: DeploymentId) -> Result<DeploymentReport> {
        let mut record = self.catalog.get(id)?;
        let alive = self.is_alive(&record);
        if record.status == DeploymentStatus::Running && !alive {
            let already_noted = record
                .notes
                .last()
                .is_some_and(|n| n.message == PROCESS_GONE_NOTE);
            if !already_noted {
                warn!(deployment_id = id, "recorded running but process is not alive");
                record = self.catalog.append_note(id, PROCESS_GONE_NOTE)?;
            }
        }
        Ok(DeploymentReport { record, alive })
    }

    pub fn list(&self, limit: usize) -> Result<Vec<DeploymentRecord>> {
        self.catalog.recent(limit)
    }

    /// Adaptive readiness wait against an existing deployment.
    pub async fn verify(&self, id: DeploymentId, timeout: Option<Duration>) -> Result<VerifyReport> {
        let record = self.catalog.get(id)?;
        let timeout = timeout.unwrap_or_else(|| self.config.ready_timeout());
        let readiness = self.wait_ready(record.port, timeout).await;
        let note = if readiness.ready {
            format!("verified ready in {:.2}s", readiness.elapsed_secs)
        } else {
            warn!(deployment_id = id, "deployment not ready before timeout");
            format!("not ready after {:.2}s", readiness.elapsed_secs)
        };
        self.note(id, &note);
        Ok(VerifyReport {
            id,
            endpoint: record.endpoint,
            ready: readiness.ready,
            elapsed_secs: readiness.elapsed_secs,
        })
    }

    /// Relaunch a dead deployment from its recorded artifact on its recorded port.
    #[instrument(skip_all, fields(deployment_id = record.id, port = record.port))]
    pub async fn restart(&self, record: &DeploymentRecord) -> Result<u32> {
        let dir = record
            .artifact_path
            .as_deref()
            .ok_or_else(|| anyhow!("deployment {} has no artifact path", record.id))?;
        if self.catalog.get(record.id)?.status != DeploymentStatus::Running {
            bail!("deployment {} stopped before restart", record.id);
        }
        self.allocator.reserve(record.port);
        if let Some(stale) = self.registry.remove(record.id) {
            // Reap the exited child before its replacement is registered.
            if let Err(e) = stale.terminate(self.config.stop_timeout()).await {
                debug!(err = %e, "stale handle cleanup failed");
            }
        }

        let service = spawn_service(&self.launcher, dir, record.port, self.config.grace()).await?;
        let pid = service.pid;
        self.registry
            .insert(record.id, ProcessHandle::new(service, record.port));
        self.catalog.set_status(
            record.id,
            DeploymentStatus::Running,
            Some(pid),
            &format!("watchdog restart pid={pid}"),
        )?;
        Ok(pid)
    }

    fn note(&self, id: DeploymentId, note: &str) {
        if let Err(e) = self.catalog.append_note(id, note) {
            warn!(deployment_id = id, err = %e, "failed to append deployment note");
        }
    }
}

#[async_trait]
impl Deploy for DeploymentManager {
    async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome> {
        DeploymentManager::deploy(self, request).await
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};
    use crate::test_support::{RecordingMemory, fast_config, sleeper_launcher};

    fn manager(root: &Path, launcher: Launcher) -> (DeploymentManager, Arc<RecordingMemory>) {
        let memory = Arc::new(RecordingMemory::default());
        let paths = FactoryPaths::new(root);
        let manager =
            DeploymentManager::with_launcher(&paths, &fast_config(), memory.clone(), launcher)
                .expect("manager");
        (manager, memory)
    }

    #[tokio::test]
    async fn unreachable_deployment_still_reports_endpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, memory) = manager(temp.path(), sleeper_launcher());

        let outcome = manager
            .deploy(DeployRequest::for_goal("notes api"))
            .await
            .expect("deploy");
        assert!(outcome.id > 0);
        assert_eq!(outcome.endpoint, format!("http://127.0.0.1:{}", outcome.port));
        assert!(!outcome.verified);
        assert_eq!(outcome.status, DeploymentStatus::Running);
        assert!(manager.status(outcome.id).expect("status").alive);
        assert!(memory.contains("[DEPLOY]"));

        let record = manager.catalog().get(outcome.id).expect("record");
        assert!(record.artifact_path.expect("artifact").join("artifact.json").exists());
        assert!(record.notes.iter().any(|n| n.message.starts_with("liveness check failed")));

        manager.rollback(outcome.id).await.expect("rollback");
    }

    #[tokio::test]
    async fn status_notes_a_dead_running_deployment_once() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, _) = manager(temp.path(), sleeper_launcher());
        let outcome = manager
            .deploy(DeployRequest::for_goal("notes api"))
            .await
            .expect("deploy");

        assert!(crate::io::process::send_kill(outcome.pid));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let first = manager.status(outcome.id).expect("status");
        assert!(!first.alive);
        assert_eq!(first.record.status, DeploymentStatus::Running);
        let last = first.record.notes.last().expect("note");
        assert_eq!(last.message, "status check: process not alive");

        let second = manager.status(outcome.id).expect("status");
        assert_eq!(second.record.notes.len(), first.record.notes.len());

        manager.rollback(outcome.id).await.expect("rollback");
    }

    #[tokio::test]
    async fn stopping_twice_is_idempotent() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, _) = manager(temp.path(), sleeper_launcher());
        let outcome = manager
            .deploy(DeployRequest::for_goal("g"))
            .await
            .expect("deploy");

        let first = manager.stop(outcome.id, "rollback").await.expect("stop");
        let second = manager.stop(outcome.id, "rollback").await.expect("stop again");
        assert_eq!(first.status, DeploymentStatus::Stopped);
        assert_eq!(second, first);
        assert!(manager.registry().is_empty());
        assert!(!manager.status(outcome.id).expect("status").alive);
    }

    #[tokio::test]
    async fn failed_launch_marks_stopped_and_frees_port() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, _) = manager(temp.path(), Launcher::new("false"));

        let err = manager
            .deploy(DeployRequest::for_goal("g"))
            .await
            .unwrap_err();
        let Some(FactoryError::Spawn { port, .. }) = err.downcast_ref::<FactoryError>() else {
            panic!("expected spawn error, got {err:#}");
        };
        let record = manager.catalog().get(1).expect("record");
        assert_eq!(record.status, DeploymentStatus::Stopped);
        assert_eq!(record.port, *port);
        assert!(record.notes.iter().any(|n| n.message.starts_with("launch failed")));
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn stop_falls_back_to_recorded_pid() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (first, _) = manager(temp.path(), sleeper_launcher());
        let outcome = first
            .deploy(DeployRequest::for_goal("g"))
            .await
            .expect("deploy");

        // A second manager over the same state has no handle, only the pid.
        let (second, _) = manager(temp.path(), sleeper_launcher());
        let report = second.status(outcome.id).expect("status");
        assert!(report.alive);
        // The first manager still owns the child; let it reap on exit.
        let reaper = first.registry().remove(outcome.id).expect("handle");
        let stopped = second.stop(outcome.id, "rollback").await.expect("stop");
        assert_eq!(stopped.status, DeploymentStatus::Stopped);
        reaper
            .terminate(Duration::from_secs(1))
            .await
            .expect("reap");
    }

    #[tokio::test]
    async fn missing_deployment_is_not_found() {
        let temp = tempfile::tempdir().expect("tempdir");
        let (manager, _) = manager(temp.path(), sleeper_launcher());
        let err = manager.rollback(99).await.unwrap_err();
        assert_eq!(classify(&err), ErrorKind::NotFound);
        let err = manager
            .deploy(DeployRequest::for_goal("  "))
            .await
            .unwrap_err();
        assert_eq!(classify(&err), ErrorKind::InvalidInput);
    }
}
