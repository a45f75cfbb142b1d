//! Concurrent deployment lifecycle exercise.
//!
//! Launches `n` deployments at once, waits for all of them to answer the
//! liveness probe under one shared timeout, then stops everything it
//! launched. Cleanup runs regardless of how verification went.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tracing::{info, instrument, warn};

use crate::core::types::{DeploymentId, RunStatus};
use crate::deployer::{DeployOutcome, DeployRequest, DeploymentManager};
use crate::io::catalog::{NewRun, RunCatalog, RunUpdate};
use crate::io::process::send_terminate;

pub const STRESS_LOG: &str = "stress_test.log";

#[derive(Debug, Clone, Serialize)]
pub struct StressSummary {
    pub at: DateTime<Utc>,
    pub requested: usize,
    pub launched: Vec<DeploymentId>,
    pub failed_launches: usize,
    pub ready: usize,
    pub not_ready: usize,
    /// Mean time-to-ready over ready deployments.
    pub avg_ready_secs: Option<f64>,
    pub elapsed_secs: f64,
    pub stopped: Vec<DeploymentId>,
}

pub struct StressHarness {
    manager: Arc<DeploymentManager>,
    runs: Arc<RunCatalog>,
}

impl StressHarness {
    pub fn new(manager: Arc<DeploymentManager>, runs: Arc<RunCatalog>) -> Self {
        Self { manager, runs }
    }

    pub fn log_path(&self) -> PathBuf {
        self.manager.deploy_root().join(STRESS_LOG)
    }

    #[instrument(skip(self))]
    pub async fn run(&self, n: usize, timeout: Duration) -> Result<StressSummary> {
        let started = Instant::now();

        let mut run_ids = Vec::with_capacity(n);
        for i in 0..n {
            let run = self.runs.create(NewRun {
                request_id: format!("stress-{i}"),
                goal: format!("stress deployment {i}"),
                chosen_model: "none".to_string(),
                plan_snapshot: "{}".to_string(),
                context: String::new(),
                notes: "stress run".to_string(),
            })?;
            run_ids.push(run.id);
        }

        let launches = join_all(run_ids.iter().enumerate().map(|(i, run_id)| {
            self.manager.deploy(DeployRequest {
                goal: format!("stress deployment {i}"),
                source_run_id: Some(*run_id),
            })
        }))
        .await;

        let mut outcomes: Vec<DeployOutcome> = Vec::new();
        for (run_id, launch) in run_ids.iter().zip(launches) {
            let update = match launch {
                Ok(outcome) => {
                    let update = RunUpdate {
                        status: Some(RunStatus::Deployed),
                        deployment_id: Some(outcome.id),
                        ..RunUpdate::default()
                    };
                    outcomes.push(outcome);
                    update
                }
                Err(e) => {
                    warn!(run_id, err = %format!("{e:#}"), "stress launch failed");
                    RunUpdate {
                        status: Some(RunStatus::Failed),
                        notes: Some(format!("launch failed: {e:#}")),
                        ..RunUpdate::default()
                    }
                }
            };
            if let Err(e) = self.runs.update(*run_id, update) {
                warn!(run_id, err = %e, "failed to record stress run");
            }
        }
        let launched: Vec<DeploymentId> = outcomes.iter().map(|o| o.id).collect();
        let failed_launches = n - outcomes.len();

        let readiness = join_all(
            outcomes
                .iter()
                .map(|o| self.manager.wait_ready(o.port, timeout)),
        )
        .await;
        let ready_secs: Vec<f64> = readiness
            .iter()
            .filter(|r| r.ready)
            .map(|r| r.elapsed_secs)
            .collect();
        let ready = ready_secs.len();
        let avg_ready_secs =
            (!ready_secs.is_empty()).then(|| ready_secs.iter().sum::<f64>() / ready as f64);

        let stopped = self.cleanup(&outcomes).await;

        let summary = StressSummary {
            at: Utc::now(),
            requested: n,
            launched,
            failed_launches,
            ready,
            not_ready: n - ready,
            avg_ready_secs,
            elapsed_secs: started.elapsed().as_secs_f64(),
            stopped,
        };
        info!(
            ready = summary.ready,
            not_ready = summary.not_ready,
            elapsed_secs = summary.elapsed_secs,
            "stress run finished"
        );
        self.append_log(&summary)?;
        Ok(summary)
    }

    /// Roll back every launched deployment; on failure fall back to SIGTERM on its pid.
    async fn cleanup(&self, outcomes: &[DeployOutcome]) -> Vec<DeploymentId> {
        let mut stopped = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match self.manager.rollback(outcome.id).await {
                Ok(_) => stopped.push(outcome.id),
                Err(e) => {
                    warn!(deployment_id = outcome.id, err = %format!("{e:#}"), "rollback failed, signaling pid");
                    self.manager.registry().remove(outcome.id);
                    if send_terminate(outcome.pid) {
                        stopped.push(outcome.id);
                    }
                }
            }
        }
        stopped
    }

    fn append_log(&self, summary: &StressSummary) -> Result<()> {
        let path = self.log_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(summary).context("serialize stress summary")?;
        line.push('\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("open {}", path.display()))?;
        file.write_all(line.as_bytes())
            .with_context(|| format!("append {}", path.display()))?;
        Ok(())
    }
}
