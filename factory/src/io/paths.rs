//! Filesystem layout under the project root.

use std::path::{Path, PathBuf};

use crate::io::config::FactoryConfig;

/// Well-known paths under `<root>/.factory/`.
#[derive(Debug, Clone)]
pub struct FactoryPaths {
    pub root: PathBuf,
    pub factory_dir: PathBuf,
    pub state_dir: PathBuf,
    pub config_path: PathBuf,
    pub runs_path: PathBuf,
    pub deployments_path: PathBuf,
    pub rewards_path: PathBuf,
    pub memory_path: PathBuf,
}

impl FactoryPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let factory_dir = root.join(".factory");
        let state_dir = factory_dir.join("state");
        Self {
            root: root.clone(),
            factory_dir: factory_dir.clone(),
            state_dir: state_dir.clone(),
            config_path: factory_dir.join("config.toml"),
            runs_path: state_dir.join("runs.json"),
            deployments_path: state_dir.join("deployments.json"),
            rewards_path: state_dir.join("rewards.json"),
            memory_path: state_dir.join("memory.jsonl"),
        }
    }

    /// Resolve the configured deployment root against the project root.
    pub fn deploy_root(&self, cfg: &FactoryConfig) -> PathBuf {
        resolve(&self.root, &cfg.deploy_root)
    }
}

fn resolve(root: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        root.join(path)
    }
}
