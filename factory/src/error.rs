//! User-facing error classification.
//!
//! Internal plumbing uses `anyhow`. Operations that callers need to tell apart
//! (missing record, bad input, exhausted ports, failed spawn) raise a
//! [`FactoryError`] inside the `anyhow::Error`, recovered with
//! [`classify`].

use thiserror::Error;

use crate::core::types::{DeploymentId, RunId};

#[derive(Debug, Error)]
pub enum FactoryError {
    #[error("run {0} not found")]
    RunNotFound(RunId),

    #[error("deployment {0} not found")]
    DeploymentNotFound(DeploymentId),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("no free port at or above {start}")]
    NoFreePort { start: u16 },

    #[error("failed to launch deployment on port {port}: {reason}")]
    Spawn { port: u16, reason: String },
}

/// Coarse category used by the CLI exit codes and the HTTP API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    InvalidInput,
    Internal,
}

/// Classify an error chain by the first [`FactoryError`] it carries.
pub fn classify(err: &anyhow::Error) -> ErrorKind {
    match err.downcast_ref::<FactoryError>() {
        Some(FactoryError::RunNotFound(_) | FactoryError::DeploymentNotFound(_)) => {
            ErrorKind::NotFound
        }
        Some(FactoryError::InvalidInput(_)) => ErrorKind::InvalidInput,
        _ => ErrorKind::Internal,
    }
}
