//! Deployment artifacts: packaging a manifest on disk and serving it.
//!
//! An artifact is a directory `<deploy_root>/<deployment_id>/` holding
//! `artifact.json`. The factory binary serves it in `serve-artifact` mode, so a
//! deployment can be relaunched later from `(artifact_path, port)` alone.

use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::State;
use axum::response::Json;
use axum::routing::get;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tracing::info;

use crate::core::types::DeploymentId;

pub const MANIFEST_FILE: &str = "artifact.json";

/// Marker reported by a healthy artifact.
pub const ONLINE_STATUS: &str = "online";

/// Persisted description of a packaged artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactManifest {
    pub deployment_id: DeploymentId,
    pub goal: String,
    pub version: String,
    pub liveness_path: String,
    pub created_at: DateTime<Utc>,
}

/// Write the manifest into `<deploy_root>/<deployment_id>/` and return that directory.
pub fn package(deploy_root: &Path, manifest: &ArtifactManifest) -> Result<PathBuf> {
    let dir = deploy_root.join(manifest.deployment_id.to_string());
    fs::create_dir_all(&dir).with_context(|| format!("create artifact dir {}", dir.display()))?;
    let mut buf = serde_json::to_string_pretty(manifest).context("serialize artifact manifest")?;
    buf.push('\n');
    super::write_atomic(&dir.join(MANIFEST_FILE), &buf)?;
    Ok(dir)
}

pub fn load_manifest(artifact_dir: &Path) -> Result<ArtifactManifest> {
    let path = artifact_dir.join(MANIFEST_FILE);
    let contents = fs::read_to_string(&path)
        .with_context(|| format!("read artifact manifest {}", path.display()))?;
    serde_json::from_str(&contents).with_context(|| format!("parse {}", path.display()))
}

/// Fixed liveness payload for a manifest.
pub fn liveness_payload(manifest: &ArtifactManifest) -> Value {
    json!({
        "status": ONLINE_STATUS,
        "goal": manifest.goal,
        "deployment_id": manifest.deployment_id,
        "version": manifest.version,
    })
}

pub fn router(manifest: ArtifactManifest) -> Router {
    let path = manifest.liveness_path.clone();
    Router::new()
        .route(&path, get(liveness))
        .with_state(manifest)
}

async fn liveness(State(manifest): State<ArtifactManifest>) -> Json<Value> {
    Json(liveness_payload(&manifest))
}

/// Serve an artifact on `127.0.0.1:port` until the process is terminated.
pub async fn serve(artifact_dir: &Path, port: u16) -> Result<()> {
    let manifest = load_manifest(artifact_dir)?;
    let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(
        addr = %addr,
        deployment_id = manifest.deployment_id,
        "serving artifact"
    );
    axum::serve(listener, router(manifest))
        .await
        .context("serve artifact")?;
    Ok(())
}
