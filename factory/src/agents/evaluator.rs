//! Heuristic execution scoring.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::{Context, Result};
use serde::Serialize;

use crate::core::types::{EvalStatus, Plan};

use super::Evaluator;

/// What the evaluator looks at.
#[derive(Debug, Clone, Copy)]
pub struct EvalInput<'a> {
    pub goal: &'a str,
    pub plan: &'a Plan,
    pub context: &'a str,
    pub result: &'a str,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Evaluation {
    pub id: u64,
    pub score: f64,
    pub status: EvalStatus,
    pub feedback: String,
}

/// `pass` at 0.75 and above, `improve` from 0.4, otherwise `fail`.
pub fn derive_status(score: f64) -> EvalStatus {
    if score >= 0.75 {
        EvalStatus::Pass
    } else if score >= 0.4 {
        EvalStatus::Improve
    } else {
        EvalStatus::Fail
    }
}

/// Scores half on goal coverage (plan and result mention the goal), half on
/// output signal (some output, no error markers).
#[derive(Debug, Default)]
pub struct HeuristicEvaluator {
    next_id: AtomicU64,
}

impl HeuristicEvaluator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Evaluator for HeuristicEvaluator {
    fn evaluate(&self, input: &EvalInput<'_>) -> Result<Evaluation> {
        let plan_json = serde_json::to_string(input.plan).context("serialize plan for evaluation")?;
        let score = compute_score(input.goal, &plan_json, input.result);
        let status = derive_status(score);
        let id = self.next_id.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(Evaluation {
            id,
            score,
            status,
            feedback: feedback(input.goal, input.plan.steps.len(), input.result.len(), score),
        })
    }
}

fn coverage_score(goal: &str, plan_json: &str, result: &str) -> f64 {
    let goal = goal.to_lowercase();
    if goal.is_empty() {
        return 0.0;
    }
    let prefix: String = goal.chars().take(16).collect();
    let in_plan = plan_json.to_lowercase().contains(&prefix);
    let first_word = goal.split(' ').next().unwrap_or_default();
    let in_result = result.to_lowercase().contains(first_word);
    0.5 * f64::from(u8::from(in_plan)) + 0.5 * f64::from(u8::from(in_result))
}

fn signal_score(result: &str) -> f64 {
    let lower = result.to_lowercase();
    if lower.contains("traceback") || lower.contains("error") {
        return 0.1;
    }
    if result.is_empty() {
        return 0.2;
    }
    (0.2 + (result.len() as f64 / 200.0).min(0.8)).min(1.0)
}

fn compute_score(goal: &str, plan_json: &str, result: &str) -> f64 {
    let score = 0.5 * coverage_score(goal, plan_json, result) + 0.5 * signal_score(result);
    score.clamp(0.0, 1.0)
}

fn feedback(goal: &str, steps: usize, result_len: usize, score: f64) -> String {
    let mut text = format!(
        "Evaluation for goal: '{goal}'. Steps={steps}. Score={score:.2}. Result length={result_len}."
    );
    text.push_str(match derive_status(score) {
        EvalStatus::Fail => " Observed low signal or errors; tighten steps and rerun.",
        EvalStatus::Improve => " Adequate output; refine prompts or add tests.",
        EvalStatus::Pass => " Strong result.",
    });
    text
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlanStep;

    fn plan_for(goal: &str) -> Plan {
        Plan {
            steps: vec![PlanStep {
                action: format!("Analyze the goal: {goal}"),
                rationale: String::new(),
            }],
        }
    }

    #[test]
    fn status_bands() {
        assert_eq!(derive_status(0.75), EvalStatus::Pass);
        assert_eq!(derive_status(0.74), EvalStatus::Improve);
        assert_eq!(derive_status(0.4), EvalStatus::Improve);
        assert_eq!(derive_status(0.39), EvalStatus::Fail);
    }

    #[test]
    fn errors_in_output_score_low() {
        let plan = plan_for("notes");
        let eval = HeuristicEvaluator::new()
            .evaluate(&EvalInput {
                goal: "notes",
                plan: &plan,
                context: "",
                result: "Traceback: error",
            })
            .expect("evaluate");
        // coverage 0.5 (plan only) and signal 0.1
        assert!((eval.score - 0.3).abs() < 1e-9);
        assert_eq!(eval.status, EvalStatus::Fail);
    }

    #[test]
    fn covered_goal_with_output_passes() {
        let plan = plan_for("notes api");
        let result = format!("notes {}", "x".repeat(200));
        let eval = HeuristicEvaluator::new()
            .evaluate(&EvalInput {
                goal: "notes api",
                plan: &plan,
                context: "",
                result: &result,
            })
            .expect("evaluate");
        assert!((eval.score - 1.0).abs() < 1e-9);
        assert_eq!(eval.status, EvalStatus::Pass);
    }

    #[test]
    fn evaluation_ids_increase() {
        let evaluator = HeuristicEvaluator::new();
        let plan = Plan::default();
        let input = EvalInput {
            goal: "g",
            plan: &plan,
            context: "",
            result: "",
        };
        let a = evaluator.evaluate(&input).expect("evaluate");
        let b = evaluator.evaluate(&input).expect("evaluate");
        assert_eq!((a.id, b.id), (1, 2));
    }
}
