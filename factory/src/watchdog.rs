//! Background reconciliation: relaunch deployments recorded as running whose
//! process has died.
//!
//! A relaunch that fails leaves the deployment recorded as running, so the next
//! tick retries it. Per-deployment errors are logged and never end the loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::core::types::{DeploymentId, DeploymentStatus};
use crate::deployer::DeploymentManager;

pub struct Watchdog {
    manager: Arc<DeploymentManager>,
    interval: Duration,
}

impl Watchdog {
    pub fn new(manager: Arc<DeploymentManager>, interval: Duration) -> Self {
        Self { manager, interval }
    }

    /// One reconciliation pass; returns the ids that were restarted.
    #[instrument(skip_all)]
    pub async fn tick(&self) -> Result<Vec<DeploymentId>> {
        let running = self
            .manager
            .catalog()
            .with_status(DeploymentStatus::Running)?;
        let mut restarted = Vec::new();
        for record in running {
            if self.manager.is_alive(&record) {
                continue;
            }
            if record.artifact_path.is_none() {
                warn!(deployment_id = record.id, "dead deployment has no artifact to relaunch");
                continue;
            }
            warn!(deployment_id = record.id, port = record.port, "deployment process is dead, relaunching");
            match self.manager.restart(&record).await {
                Ok(pid) => {
                    info!(deployment_id = record.id, pid, "deployment restarted");
                    restarted.push(record.id);
                }
                Err(e) => {
                    warn!(deployment_id = record.id, err = %format!("{e:#}"), "restart failed, retrying next tick");
                }
            }
        }
        Ok(restarted)
    }

    /// Spawn the reconciliation loop; the first pass runs immediately.
    pub fn start(self) -> WatchdogHandle {
        let token = CancellationToken::new();
        let cancel = token.clone();
        let task = tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "watchdog started");
            loop {
                match self.tick().await {
                    Ok(restarted) if !restarted.is_empty() => {
                        debug!(count = restarted.len(), "watchdog pass restarted deployments");
                    }
                    Ok(_) => {}
                    Err(e) => warn!(err = %format!("{e:#}"), "watchdog pass failed"),
                }
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = tokio::time::sleep(self.interval) => {}
                }
            }
            info!("watchdog stopped");
        });
        WatchdogHandle { token, task }
    }
}

/// Owner of a running watchdog loop.
pub struct WatchdogHandle {
    token: CancellationToken,
    task: JoinHandle<()>,
}

impl WatchdogHandle {
    /// Cancel the loop and wait for the in-flight pass to finish.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(e) = self.task.await {
            warn!(err = %e, "watchdog task ended abnormally");
        }
    }

    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::deployer::DeployRequest;
    use crate::io::paths::FactoryPaths;
    use crate::io::process::send_kill;
    use crate::test_support::{RecordingMemory, fast_config, sleeper_launcher};

    fn manager(root: &std::path::Path) -> Arc<DeploymentManager> {
        let paths = FactoryPaths::new(root);
        Arc::new(
            DeploymentManager::with_launcher(
                &paths,
                &fast_config(),
                Arc::new(RecordingMemory::default()),
                sleeper_launcher(),
            )
            .expect("manager"),
        )
    }

    #[tokio::test]
    async fn tick_restarts_killed_deployment_on_same_port() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = manager(temp.path());
        let outcome = manager
            .deploy(DeployRequest::for_goal("g"))
            .await
            .expect("deploy");

        assert!(send_kill(outcome.pid));
        tokio::time::sleep(Duration::from_millis(200)).await;

        let watchdog = Watchdog::new(manager.clone(), Duration::from_secs(60));
        let restarted = watchdog.tick().await.expect("tick");
        assert_eq!(restarted, vec![outcome.id]);

        let record = manager.catalog().get(outcome.id).expect("record");
        assert_eq!(record.status, DeploymentStatus::Running);
        assert_eq!(record.port, outcome.port);
        let new_pid = record.process_id.expect("pid");
        assert_ne!(new_pid, outcome.pid);
        let note = record.notes.last().expect("note");
        assert_eq!(note.message, format!("watchdog restart pid={new_pid}"));

        assert!(watchdog.tick().await.expect("tick").is_empty());
        manager.rollback(outcome.id).await.expect("rollback");
    }

    #[tokio::test]
    async fn failed_relaunch_stays_running_and_is_retried() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = manager(temp.path());
        let outcome = manager
            .deploy(DeployRequest::for_goal("g"))
            .await
            .expect("deploy");
        let artifact = manager
            .catalog()
            .get(outcome.id)
            .expect("record")
            .artifact_path
            .expect("artifact path");
        let parked = temp.path().join("parked-artifact");

        assert!(send_kill(outcome.pid));
        tokio::time::sleep(Duration::from_millis(200)).await;
        std::fs::rename(&artifact, &parked).expect("park artifact");

        let watchdog = Watchdog::new(manager.clone(), Duration::from_secs(60));
        assert!(watchdog.tick().await.expect("tick").is_empty());
        let record = manager.catalog().get(outcome.id).expect("record");
        assert_eq!(record.status, DeploymentStatus::Running);
        assert_eq!(record.process_id, Some(outcome.pid));

        std::fs::rename(&parked, &artifact).expect("restore artifact");
        assert_eq!(watchdog.tick().await.expect("tick"), vec![outcome.id]);
        let record = manager.catalog().get(outcome.id).expect("record");
        assert_eq!(record.port, outcome.port);
        assert_ne!(record.process_id, Some(outcome.pid));

        manager.rollback(outcome.id).await.expect("rollback");
    }

    #[tokio::test]
    async fn stopped_deployments_are_left_alone() {
        let temp = tempfile::tempdir().expect("tempdir");
        let manager = manager(temp.path());
        let outcome = manager
            .deploy(DeployRequest::for_goal("g"))
            .await
            .expect("deploy");
        manager.rollback(outcome.id).await.expect("rollback");

        let watchdog = Watchdog::new(manager.clone(), Duration::from_secs(60));
        assert!(watchdog.tick().await.expect("tick").is_empty());
        assert!(manager.registry().is_empty());
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let temp = tempfile::tempdir().expect("tempdir");
        let handle = Watchdog::new(manager(temp.path()), Duration::from_secs(3600)).start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(handle.is_running());
        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("shutdown in time");
    }
}
