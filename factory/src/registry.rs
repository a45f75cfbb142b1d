//! In-memory table of live deployment processes.
//!
//! The registry exclusively owns each deployment's child handle. It is shared
//! (`Arc`) between the deployment manager, the watchdog and the stress harness;
//! a single mutex guards the map, and handles are taken out of it before any
//! `await` so the lock is never held across a suspension point.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use tokio::process::Child;
use tracing::{debug, warn};

use crate::core::types::DeploymentId;
use crate::io::process::{SpawnedService, terminate_child};

/// Live process of one deployment.
#[derive(Debug)]
pub struct ProcessHandle {
    child: Child,
    pid: u32,
    port: u16,
    log_path: PathBuf,
}

impl ProcessHandle {
    pub fn new(service: SpawnedService, port: u16) -> Self {
        Self {
            child: service.child,
            pid: service.pid,
            port,
            log_path: service.log_path,
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn log_path(&self) -> &PathBuf {
        &self.log_path
    }

    /// `false` once the child has exited (it is reaped here).
    pub fn is_alive(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(status)) => {
                debug!(pid = self.pid, exit_code = ?status.code(), "deployment process exited");
                false
            }
            Err(e) => {
                warn!(pid = self.pid, err = %e, "failed to poll deployment process");
                false
            }
        }
    }

    /// Graceful termination, escalating to a kill after `timeout`.
    pub async fn terminate(mut self, timeout: Duration) -> Result<Option<ExitStatus>> {
        terminate_child(&mut self.child, timeout).await
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRegistry {
    inner: Arc<Mutex<HashMap<DeploymentId, ProcessHandle>>>,
}

impl ProcessRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handle`, returning any handle previously held for `id`.
    pub fn insert(&self, id: DeploymentId, handle: ProcessHandle) -> Option<ProcessHandle> {
        debug!(deployment_id = id, pid = handle.pid, "registering process");
        self.lock().insert(id, handle)
    }

    pub fn remove(&self, id: DeploymentId) -> Option<ProcessHandle> {
        self.lock().remove(&id)
    }

    /// Liveness of the registered handle; `None` when nothing is registered.
    pub fn is_alive(&self, id: DeploymentId) -> Option<bool> {
        self.lock().get_mut(&id).map(ProcessHandle::is_alive)
    }

    pub fn pid(&self, id: DeploymentId) -> Option<u32> {
        self.lock().get(&id).map(ProcessHandle::pid)
    }

    pub fn contains(&self, id: DeploymentId) -> bool {
        self.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<DeploymentId> {
        let mut ids: Vec<DeploymentId> = self.lock().keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<DeploymentId, ProcessHandle>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
