//! Collaborators of the orchestrator.
//!
//! Each collaborator is a narrow trait with one deterministic heuristic
//! implementation. The orchestrator only sees the traits, so tests swap in
//! scripted versions (see `test_support`).

use anyhow::Result;

use crate::core::types::{Plan, TaskType};

pub mod builder;
pub mod evaluator;
pub mod memory;
pub mod planner;
pub mod reward;
pub mod router;
pub mod supervisor;

pub use builder::{Repair, TemplateBuilder};
pub use evaluator::{EvalInput, Evaluation, HeuristicEvaluator};
pub use memory::JsonlMemory;
pub use planner::HeuristicPlanner;
pub use reward::RollingReward;
pub use router::{ModelChoice, WeightedRouter};
pub use supervisor::{Execution, HeuristicSupervisor};

/// Turns a goal into ordered steps.
pub trait Planner: Send + Sync {
    fn plan(&self, goal: &str) -> Result<Plan>;
}

/// Picks a model for a task type and learns from rewards.
pub trait Router: Send + Sync {
    /// Never fails; an empty registry yields a `not-configured` choice.
    fn route(&self, task_type: TaskType) -> ModelChoice;

    /// Apply a reward to `model`'s weight; returns the new weight if the model is known.
    fn adjust_weight(&self, model: &str, reward: f64) -> Option<f64>;
}

/// Executes plan steps for a goal.
pub trait Supervisor: Send + Sync {
    fn execute(&self, goal: &str, plan: &Plan) -> Result<Execution>;
}

/// Scores an execution in `[0, 1]`.
pub trait Evaluator: Send + Sync {
    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Evaluation>;
}

/// Produces a revision for an evaluation in the repair zone.
pub trait Builder: Send + Sync {
    fn repair(&self, evaluation: &Evaluation) -> Result<Repair>;
}

/// Snippet store searched for context and written for audit.
pub trait Memory: Send + Sync {
    fn search(&self, query: &str, limit: usize) -> Result<Vec<String>>;
    fn add(&self, key: &str, text: &str) -> Result<()>;
}

/// Rolling average of score deltas between attempts.
pub trait RewardSignal: Send + Sync {
    fn average_reward(&self) -> f64;
    fn record(&self, model: &str, reward: f64);
}
