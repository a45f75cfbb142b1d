//! Run record invariants.
//!
//! Validates that an update to a persisted run only moves forward:
//! - `attempt` never decreases.
//! - status follows `running -> {partial, success, deployed, failed}` and
//!   `partial -> {running, partial, success, deployed, failed}`.
//! - terminal statuses are never overwritten, except that `success` and
//!   `failed` may be upgraded to `deployed` once a deployment is obtained.

use crate::core::types::RunStatus;

/// Validate a run update from `(prev_attempt, prev_status)` to `(next_attempt, next_status)`.
///
/// Returns a list of stable error messages (empty on success).
pub fn validate_run_transition(
    prev_attempt: u32,
    prev_status: RunStatus,
    next_attempt: u32,
    next_status: RunStatus,
) -> Vec<String> {
    let mut errors = Vec::new();

    if next_attempt < prev_attempt {
        errors.push(format!(
            "attempt must not decrease (prev={}, next={})",
            prev_attempt, next_attempt
        ));
    }

    if !transition_allowed(prev_status, next_status) {
        errors.push(format!(
            "status transition {} -> {} is not allowed",
            prev_status, next_status
        ));
    }

    errors
}

/// Whether the state machine permits moving from `prev` to `next`.
pub fn transition_allowed(prev: RunStatus, next: RunStatus) -> bool {
    use RunStatus::{Deployed, Failed, Partial, Running, Success};

    match (prev, next) {
        (Running, Running) => true,
        (Running | Partial, Partial | Success | Deployed | Failed) => true,
        (Partial, Running) => true,
        (Success | Failed, Deployed) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::RunStatus::{Deployed, Failed, Partial, Running, Success};

    #[test]
    fn forward_transitions_are_allowed() {
        assert!(transition_allowed(Running, Partial));
        assert!(transition_allowed(Partial, Partial));
        assert!(transition_allowed(Partial, Success));
        assert!(transition_allowed(Running, Failed));
        assert!(transition_allowed(Failed, Deployed));
        assert!(transition_allowed(Success, Deployed));
    }

    #[test]
    fn terminal_statuses_are_not_overwritten() {
        for terminal in [Success, Deployed, Failed] {
            assert!(!transition_allowed(terminal, Running));
            assert!(!transition_allowed(terminal, Partial));
        }
        assert!(!transition_allowed(Deployed, Failed));
        assert!(!transition_allowed(Deployed, Deployed));
        assert!(!transition_allowed(Failed, Success));
    }

    #[test]
    fn decreasing_attempt_is_reported() {
        let errors = validate_run_transition(2, Partial, 1, Partial);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("attempt must not decrease"));
    }

    #[test]
    fn valid_update_has_no_errors() {
        assert!(validate_run_transition(1, Running, 2, Partial).is_empty());
    }
}
