//! Revision builder for evaluations in the repair zone.

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use serde::Serialize;

use crate::core::types::EvalStatus;

use super::{Builder, Evaluation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RepairStatus {
    Improved,
    Regressed,
    Unchanged,
}

pub fn status_from_delta(old_score: f64, new_score: f64) -> RepairStatus {
    if new_score > old_score {
        RepairStatus::Improved
    } else if new_score < old_score {
        RepairStatus::Regressed
    } else {
        RepairStatus::Unchanged
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Repair {
    pub revision_id: u64,
    pub evaluation_id: u64,
    pub diff_summary: String,
    pub old_score: f64,
    pub new_score: f64,
    pub status: RepairStatus,
}

/// Emits a templated patch description; the score moves only on the next attempt.
#[derive(Debug, Default)]
pub struct TemplateBuilder {
    next_revision: AtomicU64,
}

impl TemplateBuilder {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Builder for TemplateBuilder {
    fn repair(&self, evaluation: &Evaluation) -> Result<Repair> {
        let revision_id = self.next_revision.fetch_add(1, Ordering::Relaxed) + 1;
        let focus = match evaluation.status {
            EvalStatus::Fail => "split failing steps and add error handling",
            EvalStatus::Improve => "tighten step wording and add tests",
            EvalStatus::Pass => "no change needed",
        };
        Ok(Repair {
            revision_id,
            evaluation_id: evaluation.id,
            diff_summary: format!("rev {revision_id}: {focus}"),
            old_score: evaluation.score,
            new_score: evaluation.score,
            status: status_from_delta(evaluation.score, evaluation.score),
        })
    }
}
