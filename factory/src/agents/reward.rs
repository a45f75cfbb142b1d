use std::sync::Arc;

use tracing::warn;

use super::RewardSignal;
use crate::io::catalog::RewardCatalog;

pub const DEFAULT_REWARD_WINDOW: usize = 20;

/// Average of the last `window` persisted rewards; `0.0` before any exist.
///
/// Rewards live in the shared reward catalog, so the average also moves with
/// runs from other processes on the same project root.
#[derive(Debug)]
pub struct RollingReward {
    window: usize,
    catalog: Arc<RewardCatalog>,
}

impl RollingReward {
    pub fn new(catalog: Arc<RewardCatalog>, window: usize) -> Self {
        Self {
            window: window.max(1),
            catalog,
        }
    }
}

impl RewardSignal for RollingReward {
    fn average_reward(&self) -> f64 {
        let rewards = match self.catalog.recent(self.window) {
            Ok(rewards) => rewards,
            Err(e) => {
                warn!(err = %format!("{e:#}"), "failed to read rewards, using 0.0");
                return 0.0;
            }
        };
        if rewards.is_empty() {
            return 0.0;
        }
        rewards.iter().map(|r| r.reward).sum::<f64>() / rewards.len() as f64
    }

    fn record(&self, model: &str, reward: f64) {
        if let Err(e) = self.catalog.record(model, reward) {
            warn!(model, reward, err = %format!("{e:#}"), "failed to persist reward");
        }
    }
}
