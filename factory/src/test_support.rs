//! Test-only helpers: fast configs, launchers and scripted collaborators.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Mutex, PoisonError};

use anyhow::{Result, anyhow};
use async_trait::async_trait;

use crate::agents::{
    Builder, EvalInput, Evaluation, Execution, Memory, Planner, Repair, RewardSignal,
};
use crate::agents::builder::RepairStatus;
use crate::agents::evaluator::derive_status;
use crate::core::types::{DeploymentStatus, ExecStatus, Plan, PlanStep};
use crate::deployer::{Deploy, DeployOutcome, DeployRequest};
use crate::io::config::FactoryConfig;
use crate::io::process::Launcher;

static NEXT_PORT_BLOCK: AtomicU16 = AtomicU16::new(0);

/// Start port for one test, spaced apart from every other test in this
/// process and offset by pid so parallel test binaries rarely overlap.
pub fn next_port_base() -> u16 {
    let block = NEXT_PORT_BLOCK.fetch_add(1, Ordering::Relaxed) % 200;
    let offset = (std::process::id() % 40) as u16 * 1_000;
    20_000 + offset + block * 20
}

/// Config with short delays and its own port range.
pub fn fast_config() -> FactoryConfig {
    FactoryConfig {
        start_port: next_port_base(),
        grace_ms: 150,
        verify_delay_secs: 0,
        probe_timeout_secs: 1,
        ready_timeout_secs: 5,
        poll_interval_ms: 100,
        stop_timeout_secs: 1,
        watchdog_interval_secs: 1,
        ..FactoryConfig::default()
    }
}

/// Launcher whose process stays up without serving anything.
pub fn sleeper_launcher() -> Launcher {
    Launcher {
        program: "sh".into(),
        args: vec!["-c".to_string(), "exec sleep 30".to_string(), "sh".to_string()],
    }
}

pub fn plan_with(actions: &[&str]) -> Plan {
    Plan {
        steps: actions
            .iter()
            .map(|action| PlanStep {
                action: action.to_string(),
                rationale: "test".to_string(),
            })
            .collect(),
    }
}

/// Memory that keeps every added snippet and returns canned search results.
#[derive(Debug, Default)]
pub struct RecordingMemory {
    added: Mutex<Vec<(String, String)>>,
    pub search_results: Vec<String>,
}

impl RecordingMemory {
    pub fn added(&self) -> Vec<(String, String)> {
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.added().iter().any(|(_, text)| text.contains(needle))
    }
}

impl Memory for RecordingMemory {
    fn search(&self, _query: &str, limit: usize) -> Result<Vec<String>> {
        Ok(self.search_results.iter().take(limit).cloned().collect())
    }

    fn add(&self, key: &str, text: &str) -> Result<()> {
        self.added
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((key.to_string(), text.to_string()));
        Ok(())
    }
}

/// Planner returning the same plan for every goal.
#[derive(Debug, Clone)]
pub struct FixedPlanner(pub Plan);

impl Planner for FixedPlanner {
    fn plan(&self, _goal: &str) -> Result<Plan> {
        Ok(self.0.clone())
    }
}

/// Supervisor with a fixed result.
#[derive(Debug, Clone)]
pub struct FixedSupervisor(pub String);

impl crate::agents::Supervisor for FixedSupervisor {
    fn execute(&self, _goal: &str, _plan: &Plan) -> Result<Execution> {
        Ok(Execution {
            result: self.0.clone(),
            status: ExecStatus::Success,
        })
    }
}

/// Evaluator returning scripted scores in order; the last score repeats.
#[derive(Debug)]
pub struct ScriptedEvaluator {
    scores: Mutex<VecDeque<f64>>,
    calls: Mutex<u64>,
}

impl ScriptedEvaluator {
    pub fn new(scores: &[f64]) -> Self {
        Self {
            scores: Mutex::new(scores.iter().copied().collect()),
            calls: Mutex::new(0),
        }
    }

    pub fn calls(&self) -> u64 {
        *self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl crate::agents::Evaluator for ScriptedEvaluator {
    fn evaluate(&self, _input: &EvalInput<'_>) -> Result<Evaluation> {
        let mut calls = self.calls.lock().unwrap_or_else(PoisonError::into_inner);
        *calls += 1;
        let mut scores = self.scores.lock().unwrap_or_else(PoisonError::into_inner);
        let score = if scores.len() > 1 {
            scores.pop_front()
        } else {
            scores.front().copied()
        }
        .ok_or_else(|| anyhow!("scripted evaluator has no scores"))?;
        Ok(Evaluation {
            id: *calls,
            score,
            status: derive_status(score),
            feedback: String::new(),
        })
    }
}

/// Builder counting repairs.
#[derive(Debug, Default)]
pub struct CountingBuilder {
    repairs: Mutex<u64>,
}

impl CountingBuilder {
    pub fn repairs(&self) -> u64 {
        *self.repairs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Builder for CountingBuilder {
    fn repair(&self, evaluation: &Evaluation) -> Result<Repair> {
        let mut repairs = self.repairs.lock().unwrap_or_else(PoisonError::into_inner);
        *repairs += 1;
        Ok(Repair {
            revision_id: 100 + *repairs,
            evaluation_id: evaluation.id,
            diff_summary: "scripted".to_string(),
            old_score: evaluation.score,
            new_score: evaluation.score,
            status: RepairStatus::Unchanged,
        })
    }
}

/// Reward signal pinned to one average.
#[derive(Debug)]
pub struct FixedReward {
    pub average: f64,
    recorded: Mutex<Vec<f64>>,
}

impl FixedReward {
    pub fn new(average: f64) -> Self {
        Self {
            average,
            recorded: Mutex::new(Vec::new()),
        }
    }

    pub fn recorded(&self) -> Vec<f64> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl RewardSignal for FixedReward {
    fn average_reward(&self) -> f64 {
        self.average
    }

    fn record(&self, _model: &str, reward: f64) {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(reward);
    }
}

/// Deployer answering from a script: `Ok` entries hand out increasing ids,
/// `Err` entries fail the call.
#[derive(Debug)]
pub struct ScriptedDeployer {
    script: Mutex<VecDeque<std::result::Result<(), String>>>,
    requests: Mutex<Vec<DeployRequest>>,
}

impl ScriptedDeployer {
    pub fn new(script: Vec<std::result::Result<(), String>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<DeployRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl Deploy for ScriptedDeployer {
    async fn deploy(&self, request: DeployRequest) -> Result<DeployOutcome> {
        let step = self
            .script
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err("script exhausted".to_string()));
        let mut requests = self.requests.lock().unwrap_or_else(PoisonError::into_inner);
        requests.push(request.clone());
        let id = requests.len() as u64;
        step.map_err(|e| anyhow!(e))?;
        let port = 9000 + id as u16;
        Ok(DeployOutcome {
            id,
            goal: request.goal,
            port,
            endpoint: format!("http://127.0.0.1:{port}"),
            status: DeploymentStatus::Running,
            pid: 4242,
            verified: true,
        })
    }
}
