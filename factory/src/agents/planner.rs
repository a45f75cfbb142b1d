//! Heuristic planner producing a fixed step template per goal.

use anyhow::Result;

use crate::core::types::{Plan, PlanStep};
use crate::error::FactoryError;

use super::Planner;

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicPlanner;

impl Planner for HeuristicPlanner {
    fn plan(&self, goal: &str) -> Result<Plan> {
        let goal = goal.trim();
        if goal.is_empty() {
            return Err(FactoryError::InvalidInput("goal must not be empty".to_string()).into());
        }
        let lower = goal.to_lowercase();

        let mut steps = vec![step(
            &format!("Analyze the goal: {goal}"),
            "Pin down scope and acceptance before writing anything",
        )];
        steps.push(step(
            "Write python code for the core behavior",
            "Produce a runnable first version",
        ));
        steps.push(step(
            "Run pytest checks against the result",
            "Catch regressions before evaluation",
        ));
        if lower.contains("deploy") || lower.contains("api") || lower.contains("service") {
            steps.push(step(
                "Deploy the service and probe its health endpoint",
                "A goal that serves traffic is only done once it is reachable",
            ));
        }
        Ok(Plan { steps })
    }
}

fn step(action: &str, rationale: &str) -> PlanStep {
    PlanStep {
        action: action.to_string(),
        rationale: rationale.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, classify};

    #[test]
    fn plan_mentions_goal_first() {
        let plan = HeuristicPlanner.plan("notes app").expect("plan");
        assert_eq!(plan.steps[0].action, "Analyze the goal: notes app");
        assert_eq!(plan.steps.len(), 3);
    }

    #[test]
    fn service_goals_get_a_deploy_step() {
        let plan = HeuristicPlanner.plan("tiny notes API").expect("plan");
        let last = plan.steps.last().expect("steps");
        assert!(last.action.starts_with("Deploy"));
    }

    #[test]
    fn blank_goal_is_invalid_input() {
        let err = HeuristicPlanner.plan("   ").unwrap_err();
        assert_eq!(classify(&err), ErrorKind::InvalidInput);
    }
}
