//! Step-by-step plan execution.
//!
//! Code-like steps produce an execution trace; everything else is skipped.
//! Nothing is actually run on the host.

use anyhow::Result;
use serde::Serialize;

use crate::core::types::{ExecStatus, Plan, PlanStep};

use super::Supervisor;

const CODE_KEYWORDS: [&str; 3] = ["code", "python", "script"];

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Execution {
    pub result: String,
    pub status: ExecStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StepStatus {
    Success,
    Skipped,
    Error,
}

#[derive(Debug, Clone)]
struct StepResult {
    stdout: String,
    stderr: String,
    status: StepStatus,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicSupervisor;

impl Supervisor for HeuristicSupervisor {
    fn execute(&self, _goal: &str, plan: &Plan) -> Result<Execution> {
        let results: Vec<StepResult> = plan.steps.iter().map(run_step).collect();
        Ok(Execution {
            result: aggregate(&results),
            status: status_from(&results),
        })
    }
}

fn run_step(step: &PlanStep) -> StepResult {
    let action = step.action.to_lowercase();
    if action.trim().is_empty() {
        StepResult {
            stdout: String::new(),
            stderr: "empty step action".to_string(),
            status: StepStatus::Error,
        }
    } else if CODE_KEYWORDS.iter().any(|k| action.contains(k)) {
        StepResult {
            stdout: format!("Supervisor executing step: {}", step.action),
            stderr: String::new(),
            status: StepStatus::Success,
        }
    } else {
        StepResult {
            stdout: String::new(),
            stderr: String::new(),
            status: StepStatus::Skipped,
        }
    }
}

fn aggregate(results: &[StepResult]) -> String {
    let mut parts = Vec::new();
    for (i, r) in results.iter().enumerate() {
        let out = r.stdout.trim();
        let err = r.stderr.trim();
        if !out.is_empty() {
            parts.push(format!("[step {i}] stdout:\n{out}"));
        }
        if !err.is_empty() {
            parts.push(format!("[step {i}] stderr:\n{err}"));
        }
    }
    if parts.is_empty() {
        "no-op".to_string()
    } else {
        parts.join("\n\n")
    }
}

fn status_from(results: &[StepResult]) -> ExecStatus {
    let any = |s: StepStatus| results.iter().any(|r| r.status == s);
    if !any(StepStatus::Error) {
        ExecStatus::Success
    } else if any(StepStatus::Success) {
        ExecStatus::Partial
    } else {
        ExecStatus::Error
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(actions: &[&str]) -> Plan {
        Plan {
            steps: actions
                .iter()
                .map(|a| PlanStep {
                    action: a.to_string(),
                    rationale: String::new(),
                })
                .collect(),
        }
    }

    #[test]
    fn code_steps_produce_output() {
        let exec = HeuristicSupervisor
            .execute("g", &plan(&["Outline scope", "Write python code"]))
            .expect("execute");
        assert_eq!(exec.result, "[step 1] stdout:\nSupervisor executing step: Write python code");
        assert_eq!(exec.status, ExecStatus::Success);
    }

    #[test]
    fn no_code_steps_is_noop() {
        let exec = HeuristicSupervisor
            .execute("g", &plan(&["Outline scope"]))
            .expect("execute");
        assert_eq!(exec.result, "no-op");
    }

    #[test]
    fn empty_step_next_to_code_is_partial() {
        let exec = HeuristicSupervisor
            .execute("g", &plan(&["Write python code", " "]))
            .expect("execute");
        assert_eq!(exec.status, ExecStatus::Partial);
        assert!(exec.result.contains("[step 1] stderr:\nempty step action"));
    }

    #[test]
    fn only_failed_steps_is_error() {
        let exec = HeuristicSupervisor
            .execute("g", &plan(&[""]))
            .expect("execute");
        assert_eq!(exec.status, ExecStatus::Error);
        let empty = HeuristicSupervisor
            .execute("g", &Plan::default())
            .expect("execute");
        assert_eq!(empty.status, ExecStatus::Success);
    }
}
