//! Capability/latency/weight scoring router over the configured model registry.

use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use tracing::debug;

use crate::core::policy::adjust_weight;
use crate::core::types::TaskType;
use crate::io::config::ModelProfile;

use super::Router;

/// Model name reported when the registry is empty.
pub const NOT_CONFIGURED: &str = "not-configured";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ModelChoice {
    pub model_name: String,
    pub score: f64,
    pub configured: bool,
}

impl ModelChoice {
    pub fn not_configured() -> Self {
        Self {
            model_name: NOT_CONFIGURED.to_string(),
            score: 0.0,
            configured: false,
        }
    }
}

#[derive(Debug)]
pub struct WeightedRouter {
    models: Mutex<Vec<ModelProfile>>,
}

impl WeightedRouter {
    pub fn new(models: Vec<ModelProfile>) -> Self {
        Self {
            models: Mutex::new(models),
        }
    }

    pub fn weight(&self, model: &str) -> Option<f64> {
        self.models
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|m| m.name == model)
            .map(|m| m.weight)
    }
}

fn wanted_capabilities(task_type: TaskType) -> &'static [&'static str] {
    match task_type {
        TaskType::Planning => &["planning", "logic", "general"],
        TaskType::Coding => &["coding", "reasoning", "general"],
        TaskType::Design => &["design", "ui", "general"],
        TaskType::Testing => &["testing", "coding", "general"],
        TaskType::Deployment => &["deployment", "general"],
    }
}

/// Capability match dominates; lower latency and higher weight break ties.
fn score_model(task_type: TaskType, model: &ModelProfile) -> f64 {
    let wanted = wanted_capabilities(task_type);
    let matches = model
        .capabilities
        .iter()
        .any(|c| wanted.contains(&c.trim().to_lowercase().as_str()));
    let caps = if matches { 0.5 } else { 0.2 };
    let latency = model.avg_latency_ms.max(1.0);
    let speed = (1.0 / (1.0 + latency / 600.0)).clamp(0.0, 1.0) * 0.3;
    let weight = (model.weight / 2.0).clamp(0.0, 1.0) * 0.2;
    caps + speed + weight
}

impl Router for WeightedRouter {
    fn route(&self, task_type: TaskType) -> ModelChoice {
        let models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let best = models
            .iter()
            .map(|m| (m, score_model(task_type, m)))
            .fold(None::<(&ModelProfile, f64)>, |best, (m, s)| match best {
                Some((_, bs)) if bs >= s => best,
                _ => Some((m, s)),
            });
        match best {
            Some((model, score)) => {
                debug!(task_type = %task_type, model = %model.name, score, "routed");
                ModelChoice {
                    model_name: model.name.clone(),
                    score,
                    configured: true,
                }
            }
            None => {
                debug!(task_type = %task_type, "no models configured");
                ModelChoice::not_configured()
            }
        }
    }

    fn adjust_weight(&self, model: &str, reward: f64) -> Option<f64> {
        let mut models = self.models.lock().unwrap_or_else(PoisonError::into_inner);
        let profile = models.iter_mut().find(|m| m.name == model)?;
        profile.weight = adjust_weight(profile.weight, reward);
        debug!(model, reward, weight = profile.weight, "router weight adjusted");
        Some(profile.weight)
    }
}
