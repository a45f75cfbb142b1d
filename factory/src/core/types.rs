//! Shared deterministic types for factory core logic.
//!
//! These types define stable contracts between the orchestrator, the deployment
//! manager and the persisted catalogs. They must not depend on I/O.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Catalog-assigned run identifier (always > 0).
pub type RunId = u64;

/// Catalog-assigned deployment identifier (always > 0).
pub type DeploymentId = u64;

/// Lifecycle status of an orchestrator run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Partial,
    Success,
    Deployed,
    Failed,
}

impl RunStatus {
    /// `success`, `deployed` and `failed` end a run; `partial` loops back.
    pub fn is_terminal(self) -> bool {
        matches!(self, RunStatus::Success | RunStatus::Deployed | RunStatus::Failed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Partial => "partial",
            RunStatus::Success => "success",
            RunStatus::Deployed => "deployed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a deployment record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Initializing,
    Running,
    Stopped,
}

impl DeploymentStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeploymentStatus::Initializing => "initializing",
            DeploymentStatus::Running => "running",
            DeploymentStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for DeploymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Primary task category derived from a plan, used for model routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Design,
    Deployment,
    Testing,
    Coding,
    Planning,
}

impl TaskType {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskType::Design => "design",
            TaskType::Deployment => "deployment",
            TaskType::Testing => "testing",
            TaskType::Coding => "coding",
            TaskType::Planning => "planning",
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Evaluator verdict derived from a numeric score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EvalStatus {
    Pass,
    Improve,
    Fail,
}

/// Raw status reported by the supervisor after executing plan steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecStatus {
    Success,
    Partial,
    Error,
}

/// One ordered plan step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanStep {
    pub action: String,
    pub rationale: String,
}

/// Planner output: an ordered list of steps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    pub steps: Vec<PlanStep>,
}
