//! Audit snippet formatting for the memory collaborator.

use crate::core::types::{DeploymentStatus, RunStatus};

/// One-line summary of an orchestrator run.
pub fn orchestrator_snippet(
    goal: &str,
    model: &str,
    score: f64,
    status: RunStatus,
    endpoint: Option<&str>,
) -> String {
    format!(
        "[ORCH]\ngoal: \"{goal}\"\nmodel: {model}\nscore: {score:.2} status: {status}\ndeployment: {}",
        endpoint.unwrap_or("none")
    )
}

/// Adaptive-threshold context recorded alongside the run snippet.
pub fn adaptive_eval_snippet(score: f64, threshold: f64, avg_reward: f64) -> String {
    format!(
        "[ORCH adaptive] score={score:.2}, threshold={threshold:.2}, reward_avg={avg_reward:.2}"
    )
}

/// Per-evaluation reward entry.
pub fn reward_snippet(model: &str, score: f64, reward: f64) -> String {
    format!("[EVAL] model={model}, score={score:.2}, reward={reward:+.2}")
}

pub fn deployment_snippet(goal: &str, endpoint: &str, version: &str, status: DeploymentStatus) -> String {
    format!("[DEPLOY]\ngoal: {goal}\nendpoint: {endpoint}\nversion: {version}\nstatus: {status}")
}
