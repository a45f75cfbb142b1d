//! Wiring shared by the CLI and the HTTP API.

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;

use crate::agents::{JsonlMemory, Memory};
use crate::deployer::DeploymentManager;
use crate::io::catalog::{RewardCatalog, RunCatalog};
use crate::io::config::{FactoryConfig, load_config};
use crate::io::paths::FactoryPaths;
use crate::io::process::Launcher;
use crate::orchestrator::{Collaborators, Orchestrator};
use crate::stress::StressHarness;
use crate::watchdog::Watchdog;

/// Every long-lived component over one project root.
pub struct Factory {
    pub paths: FactoryPaths,
    pub config: FactoryConfig,
    pub runs: Arc<RunCatalog>,
    pub rewards: Arc<RewardCatalog>,
    pub deployer: Arc<DeploymentManager>,
    pub orchestrator: Arc<Orchestrator>,
}

impl Factory {
    /// Load `<root>/.factory/config.toml` (defaults when missing) and wire everything.
    pub fn open(root: &Path) -> Result<Self> {
        let paths = FactoryPaths::new(root);
        let config = load_config(&paths.config_path)?;
        Self::with_config(paths, config)
    }

    pub fn with_config(paths: FactoryPaths, config: FactoryConfig) -> Result<Self> {
        let launcher = match &config.launcher {
            Some(program) => Launcher::new(program),
            None => Launcher::current_exe()?,
        };
        Self::with_launcher(paths, config, launcher)
    }

    pub fn with_launcher(paths: FactoryPaths, config: FactoryConfig, launcher: Launcher) -> Result<Self> {
        config.validate()?;
        let memory: Arc<dyn Memory> = Arc::new(JsonlMemory::new(&paths.memory_path));
        let runs = Arc::new(RunCatalog::new(&paths.runs_path));
        let rewards = Arc::new(RewardCatalog::new(&paths.rewards_path));
        let deployer = Arc::new(DeploymentManager::with_launcher(
            &paths,
            &config,
            memory.clone(),
            launcher,
        )?);
        let orchestrator = Arc::new(Orchestrator::new(
            Collaborators::heuristic(&config, memory, rewards.clone()),
            runs.clone(),
            deployer.clone(),
        )
        .with_default_attempts(config.max_attempts_default));
        Ok(Self {
            paths,
            config,
            runs,
            rewards,
            deployer,
            orchestrator,
        })
    }

    pub fn watchdog(&self) -> Watchdog {
        Watchdog::new(self.deployer.clone(), self.config.watchdog_interval())
    }

    pub fn stress(&self) -> StressHarness {
        StressHarness::new(self.deployer.clone(), self.runs.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::config::write_config;
    use crate::orchestrator::RunRequest;

    #[test]
    fn open_reads_project_config() {
        let temp = tempfile::tempdir().expect("tempdir");
        let paths = FactoryPaths::new(temp.path());
        let cfg = FactoryConfig {
            start_port: 9300,
            launcher: Some("/bin/true".into()),
            ..FactoryConfig::default()
        };
        write_config(&paths.config_path, &cfg).expect("write");

        let factory = Factory::open(temp.path()).expect("open");
        assert_eq!(factory.config.start_port, 9300);
        assert_eq!(
            factory.deployer.deploy_root(),
            temp.path().join(".factory/deployments")
        );
    }

    #[tokio::test]
    async fn rewards_carry_over_to_the_next_open() {
        let temp = tempfile::tempdir().expect("tempdir");
        let launcher = || Launcher::new("/bin/true");
        let first = Factory::with_launcher(
            FactoryPaths::new(temp.path()),
            FactoryConfig::default(),
            launcher(),
        )
        .expect("first");
        first
            .orchestrator
            .run(RunRequest {
                goal: "tiny notes API".to_string(),
                max_attempts: Some(1),
                deploy: false,
            })
            .await
            .expect("run");
        let average = first.orchestrator.average_reward();
        assert!(average > 0.0);

        let second = Factory::with_launcher(
            FactoryPaths::new(temp.path()),
            FactoryConfig::default(),
            launcher(),
        )
        .expect("second");
        assert_eq!(second.rewards.recent(10).expect("rewards").len(), 1);
        assert!((second.orchestrator.average_reward() - average).abs() < 1e-9);
    }
}
