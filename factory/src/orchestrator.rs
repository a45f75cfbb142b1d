//! Attempt/repair loop driving one goal from plan to (optional) deployment.
//!
//! Per run: plan and route once, then execute → evaluate → decide until the
//! run succeeds, fails, or spends its attempt budget. Scores in the repair zone
//! trigger a builder revision and another attempt. The success threshold is
//! re-derived from the reward signal on every decision.

use std::sync::Arc;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::agents::{
    Builder, EvalInput, Evaluator, HeuristicEvaluator, HeuristicPlanner, HeuristicSupervisor,
    Memory, Planner, RewardSignal, RollingReward, Router, Supervisor, TemplateBuilder,
    WeightedRouter,
};
use crate::agents::reward::DEFAULT_REWARD_WINDOW;
use crate::core::audit::{adaptive_eval_snippet, orchestrator_snippet, reward_snippet};
use crate::core::policy::{
    self, DEFAULT_MAX_ATTEMPTS, choose_primary_task_type, compute_reward, max_attempts_or,
};
use crate::core::types::{DeploymentId, RunId, RunStatus};
use crate::deployer::{Deploy, DeployOutcome, DeployRequest};
use crate::error::FactoryError;
use crate::io::catalog::{NewRun, RewardCatalog, RunCatalog, RunRecord, RunUpdate};
use crate::io::config::FactoryConfig;

/// Context snippets fetched from memory per run.
const CONTEXT_SNIPPETS: usize = 3;

/// The orchestrator's collaborators.
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub router: Arc<dyn Router>,
    pub supervisor: Arc<dyn Supervisor>,
    pub evaluator: Arc<dyn Evaluator>,
    pub builder: Arc<dyn Builder>,
    pub memory: Arc<dyn Memory>,
    pub reward: Arc<dyn RewardSignal>,
}

impl Collaborators {
    /// Deterministic heuristic implementations over `config.models`, with
    /// rewards persisted in `rewards`.
    pub fn heuristic(
        config: &FactoryConfig,
        memory: Arc<dyn Memory>,
        rewards: Arc<RewardCatalog>,
    ) -> Self {
        Self {
            planner: Arc::new(HeuristicPlanner),
            router: Arc::new(WeightedRouter::new(config.models.clone())),
            supervisor: Arc::new(HeuristicSupervisor),
            evaluator: Arc::new(HeuristicEvaluator::new()),
            builder: Arc::new(TemplateBuilder::new()),
            memory,
            reward: Arc::new(RollingReward::new(rewards, DEFAULT_REWARD_WINDOW)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RunRequest {
    pub goal: String,
    /// Non-positive or absent values use the default budget.
    #[serde(default)]
    pub max_attempts: Option<i64>,
    #[serde(default)]
    pub deploy: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeploymentRef {
    pub id: DeploymentId,
    pub endpoint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub request_id: String,
    pub status: RunStatus,
    pub score: f64,
    pub attempts: u32,
    pub deployment: Option<DeploymentRef>,
}

pub struct Orchestrator {
    agents: Collaborators,
    runs: Arc<RunCatalog>,
    deployer: Arc<dyn Deploy>,
    default_attempts: u32,
}

impl Orchestrator {
    pub fn new(agents: Collaborators, runs: Arc<RunCatalog>, deployer: Arc<dyn Deploy>) -> Self {
        Self {
            agents,
            runs,
            deployer,
            default_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Budget used when a request omits `max_attempts` or passes a non-positive value.
    pub fn with_default_attempts(mut self, attempts: u32) -> Self {
        self.default_attempts = attempts;
        self
    }

    pub fn average_reward(&self) -> f64 {
        self.agents.reward.average_reward()
    }

    /// Current success cutoff, derived from the live reward average.
    pub fn success_threshold(&self) -> f64 {
        policy::success_threshold(self.agents.reward.average_reward())
    }

    /// Whether a score earns another attempt under the current threshold.
    pub fn should_repair(&self, new_score: f64, attempt: u32, max_attempts: u32) -> bool {
        policy::should_repair(new_score, attempt, max_attempts, self.success_threshold())
    }

    #[instrument(skip_all, fields(goal = %request.goal, deploy = request.deploy))]
    pub async fn run(&self, request: RunRequest) -> Result<RunOutcome> {
        let goal = request.goal.trim().to_string();
        if goal.is_empty() {
            return Err(FactoryError::InvalidInput("goal must not be empty".to_string()).into());
        }
        let max_attempts = max_attempts_or(request.max_attempts, self.default_attempts);
        let request_id = new_request_id();

        let plan = self.agents.planner.plan(&goal).context("plan goal")?;
        let task_type = choose_primary_task_type(&plan);
        let choice = self.agents.router.route(task_type);
        if !choice.configured {
            warn!(task_type = %task_type, "no models configured, continuing unrouted");
        }
        let context = self
            .agents
            .memory
            .search(&goal, CONTEXT_SNIPPETS)
            .context("fetch context")?
            .join("\n---\n");

        let run = self.runs.create(NewRun {
            request_id: request_id.clone(),
            goal: goal.clone(),
            chosen_model: choice.model_name.clone(),
            plan_snapshot: serde_json::to_string(&plan).context("serialize plan")?,
            context: context.clone(),
            notes: "orchestrator started".to_string(),
        })?;
        info!(
            run_id = run.id,
            task_type = %task_type,
            model = %choice.model_name,
            max_attempts,
            "run started"
        );

        let mut attempts = 0;
        let mut prev_score = 0.0;
        let mut score = 0.0;
        let mut status = RunStatus::Running;
        let mut deployment: Option<DeployOutcome> = None;

        while attempts < max_attempts {
            attempts += 1;
            let execution = self
                .agents
                .supervisor
                .execute(&goal, &plan)
                .context("execute plan")?;
            let evaluation = self
                .agents
                .evaluator
                .evaluate(&EvalInput {
                    goal: &goal,
                    plan: &plan,
                    context: &context,
                    result: &execution.result,
                })
                .context("evaluate execution")?;
            score = evaluation.score;
            self.feed_reward(&request_id, attempts, &choice.model_name, prev_score, score);
            prev_score = score;

            let threshold = self.success_threshold();
            debug!(attempt = attempts, score, threshold, "attempt evaluated");

            if score >= threshold {
                status = RunStatus::Success;
                if request.deploy {
                    let outcome = self
                        .deployer
                        .deploy(DeployRequest {
                            goal: goal.clone(),
                            source_run_id: Some(run.id),
                        })
                        .await
                        .context("deploy successful run")?;
                    status = RunStatus::Deployed;
                    deployment = Some(outcome);
                }
                self.runs.update(
                    run.id,
                    RunUpdate {
                        attempt: Some(attempts),
                        status: Some(status),
                        score: Some(score),
                        output: Some(execution.result),
                        deployment_id: deployment.as_ref().map(|d| d.id),
                        notes: Some("orchestrator success".to_string()),
                        ..RunUpdate::default()
                    },
                )?;
                break;
            }

            if self.should_repair(score, attempts, max_attempts) {
                let repair = self
                    .agents
                    .builder
                    .repair(&evaluation)
                    .context("repair attempt")?;
                status = RunStatus::Partial;
                self.runs.update(
                    run.id,
                    RunUpdate {
                        attempt: Some(attempts),
                        status: Some(status),
                        score: Some(score),
                        output: Some(execution.result),
                        builder_revision_id: Some(repair.revision_id),
                        notes: Some("attempt repair".to_string()),
                        ..RunUpdate::default()
                    },
                )?;
                debug!(attempt = attempts, revision_id = repair.revision_id, "repairing");
                continue;
            }

            status = RunStatus::Failed;
            self.runs.update(
                run.id,
                RunUpdate {
                    attempt: Some(attempts),
                    status: Some(status),
                    score: Some(score),
                    output: Some(execution.result),
                    notes: Some("orchestrator failed".to_string()),
                    ..RunUpdate::default()
                },
            )?;
            break;
        }

        if request.deploy && deployment.is_none() {
            if let Some(outcome) = self.forced_deploy(run.id, &goal).await {
                status = RunStatus::Deployed;
                deployment = Some(outcome);
            }
        }

        let endpoint = deployment.as_ref().map(|d| d.endpoint.as_str());
        self.audit(
            &format!("orch:{request_id}"),
            &orchestrator_snippet(&goal, &choice.model_name, score, status, endpoint),
        );
        self.audit(
            &format!("orch-eval:{request_id}"),
            &adaptive_eval_snippet(
                score,
                self.success_threshold(),
                self.agents.reward.average_reward(),
            ),
        );

        info!(run_id = run.id, status = %status, score, attempts, "run finished");
        Ok(RunOutcome {
            run_id: run.id,
            request_id,
            status,
            score,
            attempts,
            deployment: deployment.map(|d| DeploymentRef {
                id: d.id,
                endpoint: d.endpoint,
            }),
        })
    }

    /// One best-effort deploy keyed off the goal; failures are logged, never returned.
    async fn forced_deploy(&self, run_id: RunId, goal: &str) -> Option<DeployOutcome> {
        let outcome = match self
            .deployer
            .deploy(DeployRequest::for_goal(goal))
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(run_id, err = %format!("{e:#}"), "forced deploy failed");
                return None;
            }
        };
        let update = RunUpdate {
            status: Some(RunStatus::Deployed),
            deployment_id: Some(outcome.id),
            notes: Some("forced deploy".to_string()),
            ..RunUpdate::default()
        };
        match self.runs.update(run_id, update) {
            Ok(_) => Some(outcome),
            Err(e) => {
                warn!(run_id, deployment_id = outcome.id, err = %format!("{e:#}"), "forced deploy not recorded");
                None
            }
        }
    }

    fn feed_reward(&self, request_id: &str, attempt: u32, model: &str, prev_score: f64, new_score: f64) {
        let reward = compute_reward(prev_score, new_score);
        self.agents.reward.record(model, reward);
        self.audit(
            &format!("eval:{request_id}:{attempt}"),
            &reward_snippet(model, new_score, reward),
        );
        if let Some(weight) = self.agents.router.adjust_weight(model, reward) {
            debug!(model, reward, weight, "reward applied");
        }
    }

    fn audit(&self, key: &str, snippet: &str) {
        if let Err(e) = self.agents.memory.add(key, snippet) {
            warn!(key, err = %e, "failed to record audit snippet");
        }
    }

    pub fn status(&self, run_id: RunId) -> Result<RunRecord> {
        self.runs.get(run_id)
    }

    /// Most recent runs first.
    pub fn history(&self, limit: usize) -> Result<Vec<RunRecord>> {
        self.runs.recent(limit)
    }
}

/// Random UUID (version 4 layout) identifying one run request.
fn new_request_id() -> String {
    let raw: u128 = rand::random();
    let raw = (raw & !(0xF << 76)) | (0x4 << 76);
    let raw = (raw & !(0x3 << 62)) | (0x2 << 62);
    let hex = format!("{raw:032x}");
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        CountingBuilder, FixedPlanner, FixedReward, FixedSupervisor, RecordingMemory,
        ScriptedDeployer, ScriptedEvaluator, plan_with,
    };

    struct Harness {
        orchestrator: Orchestrator,
        memory: Arc<RecordingMemory>,
        evaluator: Arc<ScriptedEvaluator>,
        builder: Arc<CountingBuilder>,
        reward: Arc<FixedReward>,
        deployer: Arc<ScriptedDeployer>,
        _temp: tempfile::TempDir,
    }

    fn harness(scores: &[f64], avg_reward: f64, deploys: Vec<std::result::Result<(), String>>) -> Harness {
        let temp = tempfile::tempdir().expect("tempdir");
        let memory = Arc::new(RecordingMemory::default());
        let evaluator = Arc::new(ScriptedEvaluator::new(scores));
        let builder = Arc::new(CountingBuilder::default());
        let reward = Arc::new(FixedReward::new(avg_reward));
        let deployer = Arc::new(ScriptedDeployer::new(deploys));
        let agents = Collaborators {
            planner: Arc::new(FixedPlanner(plan_with(&["Write python code"]))),
            router: Arc::new(WeightedRouter::new(FactoryConfig::default().models)),
            supervisor: Arc::new(FixedSupervisor("done".to_string())),
            evaluator: evaluator.clone(),
            builder: builder.clone(),
            memory: memory.clone(),
            reward: reward.clone(),
        };
        let runs = Arc::new(RunCatalog::new(temp.path().join("runs.json")));
        Harness {
            orchestrator: Orchestrator::new(agents, runs, deployer.clone()),
            memory,
            evaluator,
            builder,
            reward,
            deployer,
            _temp: temp,
        }
    }

    fn request(max_attempts: Option<i64>, deploy: bool) -> RunRequest {
        RunRequest {
            goal: "tiny notes api".to_string(),
            max_attempts,
            deploy,
        }
    }

    #[tokio::test]
    async fn first_attempt_success() {
        let h = harness(&[0.9], 0.0, Vec::new());
        let outcome = h.orchestrator.run(request(None, false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.attempts, 1);
        assert!(outcome.run_id > 0);
        assert_eq!(outcome.deployment, None);
        assert_eq!(outcome.request_id.len(), 36);

        let record = h.orchestrator.status(outcome.run_id).expect("status");
        assert_eq!(record.status, RunStatus::Success);
        assert_eq!(record.output, "done");
    }

    #[tokio::test]
    async fn repair_zone_retries_then_succeeds() {
        let h = harness(&[0.4, 0.9], 0.0, Vec::new());
        let outcome = h.orchestrator.run(request(None, false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Success);
        assert_eq!(outcome.attempts, 2);
        assert_eq!(h.builder.repairs(), 1);

        let record = h.orchestrator.status(outcome.run_id).expect("status");
        assert_eq!(record.attempt, 2);
        assert_eq!(record.builder_revision_id, Some(101));
    }

    #[tokio::test]
    async fn exhausted_budget_fails_with_last_score() {
        let h = harness(&[0.4], 0.0, Vec::new());
        let outcome = h.orchestrator.run(request(Some(0), false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.attempts, 2);
        assert!((outcome.score - 0.4).abs() < 1e-9);
    }

    #[tokio::test]
    async fn attempts_never_exceed_budget() {
        for max in 1..=4u32 {
            let h = harness(&[0.35], 0.0, Vec::new());
            let outcome = h
                .orchestrator
                .run(request(Some(i64::from(max)), false))
                .await
                .expect("run");
            assert_eq!(outcome.attempts, max);
            assert_eq!(h.evaluator.calls(), u64::from(max));
            assert_eq!(outcome.status, RunStatus::Failed);
        }
    }

    #[tokio::test]
    async fn low_score_fails_without_repair() {
        let h = harness(&[0.1], 0.0, Vec::new());
        let outcome = h.orchestrator.run(request(Some(5), false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(h.builder.repairs(), 0);
    }

    #[tokio::test]
    async fn high_reward_average_raises_the_bar() {
        let strict = harness(&[0.6], 0.7, Vec::new());
        assert!((strict.orchestrator.success_threshold() - 0.65).abs() < 1e-9);
        let outcome = strict.orchestrator.run(request(Some(1), false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Failed);

        let lenient = harness(&[0.6], 0.2, Vec::new());
        let outcome = lenient.orchestrator.run(request(Some(1), false)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Success);
    }

    #[tokio::test]
    async fn rewards_are_score_deltas() {
        let h = harness(&[0.4, 0.5], 0.0, Vec::new());
        h.orchestrator.run(request(None, false)).await.expect("run");
        let recorded = h.reward.recorded();
        assert_eq!(recorded.len(), 2);
        assert!((recorded[0] - 0.4).abs() < 1e-9);
        assert!((recorded[1] - 0.1).abs() < 1e-9);
    }

    #[tokio::test]
    async fn deploy_on_success_links_run() {
        let h = harness(&[0.9], 0.0, vec![Ok(())]);
        let outcome = h.orchestrator.run(request(None, true)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Deployed);
        let deployment = outcome.deployment.expect("deployment");
        assert_eq!(deployment.id, 1);

        let requests = h.deployer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source_run_id, Some(outcome.run_id));
        let record = h.orchestrator.status(outcome.run_id).expect("status");
        assert_eq!(record.deployment_id, Some(1));
        assert!(h.memory.contains(&format!("deployment: {}", deployment.endpoint)));
    }

    #[tokio::test]
    async fn forced_deploy_upgrades_failed_run() {
        let h = harness(&[0.1], 0.0, vec![Ok(())]);
        let outcome = h.orchestrator.run(request(None, true)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Deployed);
        let record = h.orchestrator.status(outcome.run_id).expect("status");
        assert_eq!(record.status, RunStatus::Deployed);
        assert_eq!(record.notes, "forced deploy");
        assert_eq!(record.deployment_id, outcome.deployment.map(|d| d.id));
        let requests = h.deployer.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].source_run_id, None);
    }

    #[tokio::test]
    async fn forced_deploy_failure_is_swallowed() {
        let h = harness(&[0.1], 0.0, vec![Err("no free port".to_string())]);
        let outcome = h.orchestrator.run(request(None, true)).await.expect("run");
        assert_eq!(outcome.status, RunStatus::Failed);
        assert_eq!(outcome.deployment, None);
        assert!(h.memory.contains("deployment: none"));
    }

    #[tokio::test]
    async fn audit_snippets_are_written() {
        let h = harness(&[0.9], 0.0, Vec::new());
        let outcome = h.orchestrator.run(request(None, false)).await.expect("run");
        let keys: Vec<String> = h.memory.added().into_iter().map(|(k, _)| k).collect();
        assert_eq!(
            keys,
            vec![
                format!("eval:{}:1", outcome.request_id),
                format!("orch:{}", outcome.request_id),
                format!("orch-eval:{}", outcome.request_id)
            ]
        );
    }

    #[tokio::test]
    async fn empty_router_still_runs() {
        let mut h = harness(&[0.9], 0.0, Vec::new());
        h.orchestrator.agents.router = Arc::new(WeightedRouter::new(Vec::new()));
        let outcome = h.orchestrator.run(request(None, false)).await.expect("run");
        let record = h.orchestrator.status(outcome.run_id).expect("status");
        assert_eq!(record.chosen_model, "not-configured");
    }

    #[tokio::test]
    async fn history_lists_newest_first() {
        let h = harness(&[0.9], 0.0, Vec::new());
        let first = h.orchestrator.run(request(None, false)).await.expect("run");
        let second = h.orchestrator.run(request(None, false)).await.expect("run");
        let ids: Vec<RunId> = h
            .orchestrator
            .history(10)
            .expect("history")
            .iter()
            .map(|r| r.id)
            .collect();
        assert_eq!(ids, vec![second.run_id, first.run_id]);
    }

    #[test]
    fn request_ids_look_like_uuids() {
        let id = new_request_id();
        let parts: Vec<&str> = id.split('-').collect();
        assert_eq!(
            parts.iter().map(|p| p.len()).collect::<Vec<_>>(),
            vec![8, 4, 4, 4, 12]
        );
        assert!(parts[2].starts_with('4'));
        assert_ne!(id, new_request_id());
    }
}
