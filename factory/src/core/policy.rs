//! Retry and repair policy for the orchestrator attempt loop.
//!
//! Everything here is a pure function of its inputs. The orchestrator supplies
//! live values (for example the current reward average) on every call so that
//! nothing in this module caches state.

use crate::core::types::{Plan, TaskType};

/// Attempts used when the caller does not supply a positive value.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Lower bound of the repair zone; scores below it are not worth repairing.
pub const REPAIR_FLOOR: f64 = 0.3;

/// Router weights are clamped into this range after every adjustment.
pub const MIN_MODEL_WEIGHT: f64 = 0.5;
pub const MAX_MODEL_WEIGHT: f64 = 2.0;
const WEIGHT_STEP: f64 = 0.05;

/// Ordered keyword table; the first group with a hit wins.
const TASK_KEYWORDS: [(TaskType, &[&str]); 4] = [
    (TaskType::Design, &["ui", "design"]),
    (TaskType::Deployment, &["deploy", "deployer"]),
    (TaskType::Testing, &["test", "pytest", "quality"]),
    (TaskType::Coding, &["code", "python", "script"]),
];

/// Derive the primary task type from the plan's step actions.
///
/// Falls back to [`TaskType::Planning`] when no keyword matches.
pub fn choose_primary_task_type(plan: &Plan) -> TaskType {
    let text = plan
        .steps
        .iter()
        .map(|step| step.action.to_lowercase())
        .collect::<Vec<_>>()
        .join(" ");

    TASK_KEYWORDS
        .iter()
        .find(|(_, keywords)| keywords.iter().any(|k| text.contains(k)))
        .map(|(task_type, _)| *task_type)
        .unwrap_or(TaskType::Planning)
}

/// Adaptive success cutoff for a given rolling reward average.
pub fn success_threshold(avg_reward: f64) -> f64 {
    if avg_reward < 0.3 {
        0.45
    } else if avg_reward > 0.6 {
        0.65
    } else {
        0.55
    }
}

/// True when another attempt is allowed and the score sits in `[0.3, threshold)`.
pub fn should_repair(new_score: f64, attempt: u32, max_attempts: u32, threshold: f64) -> bool {
    attempt < max_attempts && (REPAIR_FLOOR..threshold).contains(&new_score)
}

/// Normalize a user-supplied attempt budget; non-positive or absent falls back to `default`.
pub fn max_attempts_or(requested: Option<i64>, default: u32) -> u32 {
    match requested {
        Some(n) if n > 0 => u32::try_from(n).unwrap_or(u32::MAX),
        _ => default.max(1),
    }
}

/// Reward for moving from `prev_score` to `new_score`.
pub fn compute_reward(prev_score: f64, new_score: f64) -> f64 {
    new_score - prev_score
}

/// Apply a reward to a router weight, clamped to the allowed range.
pub fn adjust_weight(current: f64, reward: f64) -> f64 {
    (current + WEIGHT_STEP * reward).clamp(MIN_MODEL_WEIGHT, MAX_MODEL_WEIGHT)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::PlanStep;

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
    fn threshold_bands() {
        assert_eq!(success_threshold(0.2), 0.45);
        assert_eq!(success_threshold(0.5), 0.55);
        assert_eq!(success_threshold(0.7), 0.65);
    }

    #[test]
    fn threshold_is_monotonic_in_reward() {
        let samples = [-1.0, 0.0, 0.29, 0.3, 0.45, 0.6, 0.61, 1.0, 5.0];
        for pair in samples.windows(2) {
            assert!(success_threshold(pair[0]) <= success_threshold(pair[1]));
        }
    }

    #[test]
    fn repair_zone_is_half_open() {
        let threshold = 0.55;
        assert!(should_repair(0.3, 1, 2, threshold));
        assert!(should_repair(0.54, 1, 2, threshold));
        assert!(!should_repair(0.55, 1, 2, threshold));
        assert!(!should_repair(0.29, 1, 2, threshold));
    }

    #[test]
    fn repair_needs_remaining_attempts() {
        assert!(!should_repair(0.4, 2, 2, 0.55));
        assert!(!should_repair(0.4, 3, 2, 0.55));
    }

    #[test]
    fn task_type_first_match_wins() {
        assert_eq!(
            choose_primary_task_type(&plan(&["Design UI", "Deploy it"])),
            TaskType::Design
        );
        assert_eq!(
            choose_primary_task_type(&plan(&["Write tests", "Deploy service"])),
            TaskType::Deployment
        );
        assert_eq!(
            choose_primary_task_type(&plan(&["Run pytest checks"])),
            TaskType::Testing
        );
        assert_eq!(
            choose_primary_task_type(&plan(&["Write python script"])),
            TaskType::Coding
        );
        assert_eq!(
            choose_primary_task_type(&plan(&["Outline the scope"])),
            TaskType::Planning
        );
        assert_eq!(choose_primary_task_type(&Plan::default()), TaskType::Planning);
    }

    #[test]
    fn attempts_default_when_missing_or_non_positive() {
        assert_eq!(max_attempts_or(None, DEFAULT_MAX_ATTEMPTS), 2);
        assert_eq!(max_attempts_or(Some(0), 3), 3);
        assert_eq!(max_attempts_or(Some(5), 2), 5);
        assert_eq!(max_attempts_or(Some(-1), 2), 2);
    }

    #[test]
    fn weight_adjustment_is_clamped() {
        assert_eq!(adjust_weight(2.0, 10.0), MAX_MODEL_WEIGHT);
        assert_eq!(adjust_weight(0.5, -10.0), MIN_MODEL_WEIGHT);
        assert!((adjust_weight(1.0, 0.2) - 1.01).abs() < 1e-9);
    }
}
