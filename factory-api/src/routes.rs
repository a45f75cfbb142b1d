//! HTTP route handlers over the orchestrator and deployment manager.

use std::time::Duration;

use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use factory::deployer::{DeployOutcome, DeployRequest, DeploymentReport, VerifyReport};
use factory::error::{ErrorKind, FactoryError, classify};
use factory::io::catalog::{DeploymentRecord, RunRecord};
use factory::orchestrator::{RunOutcome, RunRequest};

use crate::state::AppState;

/// Build the API router.
pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        .route("/runs", post(start_run).get(list_runs))
        .route("/runs/{id}", get(get_run))
        .route("/deployments", post(create_deployment).get(list_deployments))
        .route("/deployments/{id}", get(get_deployment))
        .route("/deployments/{id}/rollback", post(rollback_deployment))
        .route("/deployments/{id}/verify", post(verify_deployment))
}

/// An anyhow error rendered as `{"error": ...}` with a status from its kind.
pub struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match classify(&self.0) {
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            warn!(err = %format!("{:#}", self.0), "request failed");
        }
        (status, Json(json!({ "error": format!("{:#}", self.0) }))).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

/// Unwrap a JSON body, reporting malformed payloads as invalid input.
fn json_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| ApiError(FactoryError::InvalidInput(rejection.body_text()).into()))
}

#[derive(Deserialize)]
struct Limit {
    limit: Option<usize>,
}

#[derive(Deserialize)]
struct VerifyParams {
    timeout_secs: Option<u64>,
}

async fn health() -> &'static str {
    "ok"
}

/// POST /api/runs - drive a goal through the repair loop.
async fn start_run(
    State(state): State<AppState>,
    payload: Result<Json<RunRequest>, JsonRejection>,
) -> ApiResult<RunOutcome> {
    let request = json_body(payload)?;
    Ok(Json(state.factory.orchestrator.run(request).await?))
}

/// GET /api/runs?limit=N - recent runs, newest first.
async fn list_runs(
    State(state): State<AppState>,
    Query(params): Query<Limit>,
) -> ApiResult<Vec<RunRecord>> {
    Ok(Json(
        state
            .factory
            .orchestrator
            .history(params.limit.unwrap_or(10))?,
    ))
}

async fn get_run(State(state): State<AppState>, Path(id): Path<u64>) -> ApiResult<RunRecord> {
    Ok(Json(state.factory.orchestrator.status(id)?))
}

/// POST /api/deployments - package and launch a deployment.
async fn create_deployment(
    State(state): State<AppState>,
    payload: Result<Json<DeployRequest>, JsonRejection>,
) -> ApiResult<DeployOutcome> {
    let request = json_body(payload)?;
    Ok(Json(state.factory.deployer.deploy(request).await?))
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(params): Query<Limit>,
) -> ApiResult<Vec<DeploymentRecord>> {
    Ok(Json(state.factory.deployer.list(params.limit.unwrap_or(20))?))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<DeploymentReport> {
    Ok(Json(state.factory.deployer.status(id)?))
}

async fn rollback_deployment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> ApiResult<DeploymentRecord> {
    Ok(Json(state.factory.deployer.rollback(id).await?))
}

async fn verify_deployment(
    State(state): State<AppState>,
    Path(id): Path<u64>,
    Query(params): Query<VerifyParams>,
) -> ApiResult<VerifyReport> {
    let timeout = params.timeout_secs.map(Duration::from_secs);
    Ok(Json(state.factory.deployer.verify(id, timeout).await?))
}
