//! Factory configuration stored under `.factory/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

/// Factory configuration (TOML).
///
/// Missing fields default to values suitable for a single local host.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct FactoryConfig {
    /// First port tried by the allocator; scanning proceeds upward.
    pub start_port: u16,

    /// Directory holding one artifact directory per deployment id.
    /// Relative paths resolve against the project root.
    pub deploy_root: PathBuf,

    /// Program launched for each deployment. Defaults to the current executable.
    pub launcher: Option<PathBuf>,

    /// Grace delay after spawning a deployment, letting bind failures surface.
    pub grace_ms: u64,

    /// Delay before the single post-deploy liveness probe.
    pub verify_delay_secs: u64,

    /// Per-request timeout for every liveness probe.
    pub probe_timeout_secs: u64,

    /// Overall timeout for adaptive readiness polling.
    pub ready_timeout_secs: u64,

    /// Interval between adaptive readiness polls.
    pub poll_interval_ms: u64,

    /// Wait after SIGTERM before escalating to SIGKILL.
    pub stop_timeout_secs: u64,

    /// Watchdog reconciliation interval.
    pub watchdog_interval_secs: u64,

    /// Attempt budget when a run request does not specify one.
    pub max_attempts_default: u32,

    /// HTTP path every artifact serves for liveness.
    pub liveness_path: String,

    /// Model registry used by the router.
    pub models: Vec<ModelProfile>,
}

/// A routable model and its routing hints.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelProfile {
    pub name: String,
    pub capabilities: Vec<String>,
    pub weight: f64,
    pub avg_latency_ms: f64,
}

impl ModelProfile {
    fn new(name: &str, capabilities: &[&str], avg_latency_ms: f64) -> Self {
        Self {
            name: name.to_string(),
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            weight: 1.0,
            avg_latency_ms,
        }
    }
}

impl Default for FactoryConfig {
    fn default() -> Self {
        Self {
            start_port: 8001,
            deploy_root: PathBuf::from(".factory/deployments"),
            launcher: None,
            grace_ms: 500,
            verify_delay_secs: 3,
            probe_timeout_secs: 3,
            ready_timeout_secs: 15,
            poll_interval_ms: 1000,
            stop_timeout_secs: 3,
            watchdog_interval_secs: 60,
            max_attempts_default: 2,
            liveness_path: "/health".to_string(),
            models: vec![
                ModelProfile::new("gpt4", &["planning", "logic", "general"], 420.0),
                ModelProfile::new("claude3", &["coding", "reasoning", "general"], 350.0),
                ModelProfile::new("gemini", &["design", "ui", "vision", "general"], 300.0),
            ],
        }
    }
}

impl FactoryConfig {
    pub fn validate(&self) -> Result<()> {
        if self.start_port == 0 {
            return Err(anyhow!("start_port must be > 0"));
        }
        if self.probe_timeout_secs == 0 {
            return Err(anyhow!("probe_timeout_secs must be > 0"));
        }
        if self.ready_timeout_secs == 0 {
            return Err(anyhow!("ready_timeout_secs must be > 0"));
        }
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be > 0"));
        }
        if self.watchdog_interval_secs == 0 {
            return Err(anyhow!("watchdog_interval_secs must be > 0"));
        }
        if self.max_attempts_default == 0 {
            return Err(anyhow!("max_attempts_default must be > 0"));
        }
        if !self.liveness_path.starts_with('/') {
            return Err(anyhow!("liveness_path must start with '/'"));
        }
        for model in &self.models {
            if model.name.trim().is_empty() {
                return Err(anyhow!("models[].name must be non-empty"));
            }
        }
        Ok(())
    }

    pub fn grace(&self) -> Duration {
        Duration::from_millis(self.grace_ms)
    }

    pub fn verify_delay(&self) -> Duration {
        Duration::from_secs(self.verify_delay_secs)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `FactoryConfig::default()`.
pub fn load_config(path: &Path) -> Result<FactoryConfig> {
    if !path.exists() {
        let cfg = FactoryConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FactoryConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &FactoryConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    super::write_atomic(path, &buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_missing_returns_default() {
        let temp = tempfile::tempdir().expect("tempdir");
        let cfg = load_config(&temp.path().join("missing.toml")).expect("load");
        assert_eq!(cfg, FactoryConfig::default());
    }

    #[test]
    fn write_then_load_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        let cfg = FactoryConfig {
            start_port: 9100,
            launcher: Some(PathBuf::from("/usr/local/bin/factory")),
            ..FactoryConfig::default()
        };
        write_config(&path, &cfg).expect("write");
        let loaded = load_config(&path).expect("load");
        assert_eq!(loaded, cfg);
    }

    #[test]
    fn partial_file_fills_defaults() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("config.toml");
        fs::write(&path, "start_port = 9200\n").expect("write");
        let cfg = load_config(&path).expect("load");
        assert_eq!(cfg.start_port, 9200);
        assert_eq!(cfg.liveness_path, "/health");
        assert_eq!(cfg.models.len(), 3);
    }

    #[test]
    fn rejects_relative_liveness_path() {
        let cfg = FactoryConfig {
            liveness_path: "health".to_string(),
            ..FactoryConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("liveness_path"));
    }
}
