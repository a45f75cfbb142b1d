//! Persisted run and deployment catalogs (`.factory/state/*.json`).
//!
//! Each catalog is a single JSON document rewritten atomically on every
//! mutation. Read-modify-write cycles hold an in-process mutex plus an
//! exclusive `fd-lock` on a sibling `<file>.lock`, so the CLI, the API server
//! and its watchdog can share one state directory without losing updates.

use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use fd_lock::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::status_validator::validate_run_transition;
use crate::core::types::{DeploymentId, DeploymentStatus, RunId, RunStatus};
use crate::error::FactoryError;

/// A record with a catalog-assigned id.
pub trait Record: Clone + Serialize + DeserializeOwned {
    fn id(&self) -> u64;
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(bound = "T: Record")]
struct TableFile<T> {
    next_id: u64,
    records: Vec<T>,
}

impl<T> Default for TableFile<T> {
    fn default() -> Self {
        Self {
            next_id: 1,
            records: Vec::new(),
        }
    }
}

/// JSON-file table with monotonically increasing ids starting at 1.
#[derive(Debug)]
struct JsonTable<T> {
    path: PathBuf,
    lock: Mutex<()>,
    _record: std::marker::PhantomData<fn() -> T>,
}

impl<T: Record> JsonTable<T> {
    fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
            _record: std::marker::PhantomData,
        }
    }

    fn load(&self) -> Result<TableFile<T>> {
        if !self.path.exists() {
            return Ok(TableFile::default());
        }
        let contents = fs::read_to_string(&self.path)
            .with_context(|| format!("read catalog {}", self.path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("parse catalog {}", self.path.display()))
    }

    fn store(&self, table: &TableFile<T>) -> Result<()> {
        let mut buf = serde_json::to_string_pretty(table).context("serialize catalog")?;
        buf.push('\n');
        super::write_atomic(&self.path, &buf)
    }

    /// Run `body` holding the instance mutex and the cross-process file lock.
    fn exclusive<R>(&self, body: impl FnOnce() -> Result<R>) -> Result<R> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        let lock_path = lock_path_for(&self.path);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)
            .with_context(|| format!("open lock file {}", lock_path.display()))?;
        let mut file_lock = RwLock::new(file);
        let _held = file_lock
            .write()
            .with_context(|| format!("lock {}", lock_path.display()))?;
        body()
    }

    fn insert(&self, build: impl FnOnce(u64) -> T) -> Result<T> {
        self.exclusive(|| {
            let mut table = self.load()?;
            let record = build(table.next_id);
            table.next_id += 1;
            table.records.push(record.clone());
            self.store(&table)?;
            Ok(record)
        })
    }

    /// Apply `mutate` to record `id`; returns `None` when it does not exist.
    fn update(&self, id: u64, mutate: impl FnOnce(&mut T) -> Result<()>) -> Result<Option<T>> {
        self.exclusive(|| {
            let mut table = self.load()?;
            let Some(record) = table.records.iter_mut().find(|r| r.id() == id) else {
                return Ok(None);
            };
            mutate(record)?;
            let updated = record.clone();
            self.store(&table)?;
            Ok(Some(updated))
        })
    }

    fn get(&self, id: u64) -> Result<Option<T>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.records.into_iter().find(|r| r.id() == id))
    }

    fn all(&self) -> Result<Vec<T>> {
        let _guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(self.load()?.records)
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

// ---------------------------------------------------------------------------
// Runs
// ---------------------------------------------------------------------------

/// One goal's attempt sequence through the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub id: RunId,
    pub request_id: String,
    pub goal: String,
    pub attempt: u32,
    pub status: RunStatus,
    pub chosen_model: String,
    pub plan_snapshot: String,
    pub context: String,
    pub output: String,
    pub score: f64,
    pub builder_revision_id: Option<u64>,
    pub deployment_id: Option<DeploymentId>,
    pub notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Record for RunRecord {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Fields needed to create a run at attempt 1.
#[derive(Debug, Clone)]
pub struct NewRun {
    pub request_id: String,
    pub goal: String,
    pub chosen_model: String,
    pub plan_snapshot: String,
    pub context: String,
    pub notes: String,
}

/// Partial update of a run; `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct RunUpdate {
    pub attempt: Option<u32>,
    pub status: Option<RunStatus>,
    pub score: Option<f64>,
    pub output: Option<String>,
    pub builder_revision_id: Option<u64>,
    pub deployment_id: Option<DeploymentId>,
    pub notes: Option<String>,
}

#[derive(Debug)]
pub struct RunCatalog {
    table: JsonTable<RunRecord>,
}

impl RunCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            table: JsonTable::new(path),
        }
    }

    pub fn create(&self, new: NewRun) -> Result<RunRecord> {
        let now = Utc::now();
        let record = self.table.insert(|id| RunRecord {
            id,
            request_id: new.request_id,
            goal: new.goal,
            attempt: 1,
            status: RunStatus::Running,
            chosen_model: new.chosen_model,
            plan_snapshot: new.plan_snapshot,
            context: new.context,
            output: String::new(),
            score: 0.0,
            builder_revision_id: None,
            deployment_id: None,
            notes: new.notes,
            created_at: now,
            updated_at: now,
        })?;
        debug!(run_id = record.id, "run created");
        Ok(record)
    }

    /// Apply `update`, rejecting attempt regressions and backward status moves.
    pub fn update(&self, id: RunId, update: RunUpdate) -> Result<RunRecord> {
        let updated = self.table.update(id, |run| {
            let next_attempt = update.attempt.unwrap_or(run.attempt);
            let next_status = update.status.unwrap_or(run.status);
            let errors = validate_run_transition(run.attempt, run.status, next_attempt, next_status);
            if !errors.is_empty() {
                bail!("run {} update rejected:\n- {}", id, errors.join("\n- "));
            }
            run.attempt = next_attempt;
            run.status = next_status;
            if let Some(score) = update.score {
                run.score = score;
            }
            if let Some(output) = update.output {
                run.output = output;
            }
            if let Some(rev) = update.builder_revision_id {
                run.builder_revision_id = Some(rev);
            }
            if let Some(dep) = update.deployment_id {
                run.deployment_id = Some(dep);
            }
            if let Some(notes) = update.notes {
                run.notes = notes;
            }
            run.updated_at = Utc::now();
            Ok(())
        })?;
        let run = updated.ok_or(FactoryError::RunNotFound(id))?;
        debug!(run_id = id, attempt = run.attempt, status = %run.status, "run updated");
        Ok(run)
    }

    pub fn get(&self, id: RunId) -> Result<RunRecord> {
        Ok(self.table.get(id)?.ok_or(FactoryError::RunNotFound(id))?)
    }

    /// Most recent runs first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RunRecord>> {
        let mut runs = self.table.all()?;
        runs.reverse();
        runs.truncate(limit);
        Ok(runs)
    }
}

// ---------------------------------------------------------------------------
// Deployments
// ---------------------------------------------------------------------------

/// Timestamped reason for a deployment status change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentNote {
    pub at: DateTime<Utc>,
    pub message: String,
}

/// One running (or once-running) packaged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentRecord {
    pub id: DeploymentId,
    pub source_run_id: Option<RunId>,
    pub goal: String,
    pub port: u16,
    pub endpoint: String,
    pub version: String,
    pub status: DeploymentStatus,
    pub process_id: Option<u32>,
    pub artifact_path: Option<PathBuf>,
    pub notes: Vec<DeploymentNote>,
    pub created_at: DateTime<Utc>,
}

impl Record for DeploymentRecord {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Fields needed to create a deployment in status `initializing`.
#[derive(Debug, Clone)]
pub struct NewDeployment {
    pub source_run_id: Option<RunId>,
    pub goal: String,
    pub port: u16,
    pub version: String,
}

#[derive(Debug)]
pub struct DeploymentCatalog {
    table: JsonTable<DeploymentRecord>,
}

impl DeploymentCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            table: JsonTable::new(path),
        }
    }

    pub fn create(&self, new: NewDeployment) -> Result<DeploymentRecord> {
        let now = Utc::now();
        let record = self.table.insert(|id| DeploymentRecord {
            id,
            source_run_id: new.source_run_id,
            goal: new.goal,
            port: new.port,
            endpoint: endpoint_for(new.port),
            version: new.version,
            status: DeploymentStatus::Initializing,
            process_id: None,
            artifact_path: None,
            notes: vec![DeploymentNote {
                at: now,
                message: "created".to_string(),
            }],
            created_at: now,
        })?;
        debug!(deployment_id = record.id, port = record.port, "deployment created");
        Ok(record)
    }

    pub fn get(&self, id: DeploymentId) -> Result<DeploymentRecord> {
        Ok(self
            .table
            .get(id)?
            .ok_or(FactoryError::DeploymentNotFound(id))?)
    }

    /// Set status (and optionally pid), appending `note` to the existing notes.
    pub fn set_status(
        &self,
        id: DeploymentId,
        status: DeploymentStatus,
        process_id: Option<u32>,
        note: &str,
    ) -> Result<DeploymentRecord> {
        self.modify(id, |dep| {
            dep.status = status;
            if status == DeploymentStatus::Stopped {
                dep.process_id = None;
            } else if process_id.is_some() {
                dep.process_id = process_id;
            }
            push_note(dep, note);
        })
    }

    pub fn set_artifact_path(&self, id: DeploymentId, path: &Path) -> Result<DeploymentRecord> {
        self.modify(id, |dep| dep.artifact_path = Some(path.to_path_buf()))
    }

    /// Append a note without changing status.
    pub fn append_note(&self, id: DeploymentId, note: &str) -> Result<DeploymentRecord> {
        self.modify(id, |dep| push_note(dep, note))
    }

    pub fn with_status(&self, status: DeploymentStatus) -> Result<Vec<DeploymentRecord>> {
        Ok(self
            .table
            .all()?
            .into_iter()
            .filter(|d| d.status == status)
            .collect())
    }

    /// Most recent deployments first.
    pub fn recent(&self, limit: usize) -> Result<Vec<DeploymentRecord>> {
        let mut deployments = self.table.all()?;
        deployments.reverse();
        deployments.truncate(limit);
        Ok(deployments)
    }

    fn modify(
        &self,
        id: DeploymentId,
        mutate: impl FnOnce(&mut DeploymentRecord),
    ) -> Result<DeploymentRecord> {
        let updated = self.table.update(id, |dep| {
            mutate(dep);
            Ok(())
        })?;
        Ok(updated.ok_or(FactoryError::DeploymentNotFound(id))?)
    }
}

// ---------------------------------------------------------------------------
// Rewards
// ---------------------------------------------------------------------------

/// One score delta fed back after an evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: u64,
    pub model: String,
    pub reward: f64,
    pub created_at: DateTime<Utc>,
}

impl Record for RewardRecord {
    fn id(&self) -> u64 {
        self.id
    }
}

/// Append-only reward history shared by every process on one state directory.
#[derive(Debug)]
pub struct RewardCatalog {
    table: JsonTable<RewardRecord>,
}

impl RewardCatalog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            table: JsonTable::new(path),
        }
    }

    pub fn record(&self, model: &str, reward: f64) -> Result<RewardRecord> {
        self.table.insert(|id| RewardRecord {
            id,
            model: model.to_string(),
            reward,
            created_at: Utc::now(),
        })
    }

    /// Most recent rewards first.
    pub fn recent(&self, limit: usize) -> Result<Vec<RewardRecord>> {
        let mut rewards = self.table.all()?;
        rewards.reverse();
        rewards.truncate(limit);
        Ok(rewards)
    }
}

pub fn endpoint_for(port: u16) -> String {
    format!("http://127.0.0.1:{port}")
}

fn push_note(dep: &mut DeploymentRecord, note: &str) {
    if note.is_empty() {
        return;
    }
    dep.notes.push(DeploymentNote {
        at: Utc::now(),
        message: note.to_string(),
    });
}
