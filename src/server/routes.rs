use crate::api::{ApiResponse, LogPayload};
use crate::commitlog::{CommitLog, LogError};
use crate::doer::Doer;
use crate::server::middleware::{self, RequestId};
use axum::extract::rejection::{JsonRejection, PathRejection, QueryRejection};
use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use http::StatusCode;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub(crate) struct AppState {
    pub(crate) logger: slog::Logger,
    pub(crate) doer: Arc<Doer>,
    pub(crate) commit_log: Arc<CommitLog>,
    pub(crate) token: String,
}

pub(crate) fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/do", post(submit))
        .route("/log/prepare", get(prepared).post(prepare))
        .route("/log/commit", get(committed).post(commit))
        .route("/log/rollback", post(rollback))
        .route("/log/record/:id", get(record))
        .route("/log/compact", post(compact))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::check_auth,
        ))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            middleware::identify_request,
        ))
        .with_state(state)
}

/// Success with enveloped data.
struct Data<T>(T);

impl<T: Serialize> IntoResponse for Data<T> {
    fn into_response(self) -> Response {
        Json(ApiResponse {
            data: Some(self.0),
            error: None,
        })
        .into_response()
    }
}

/// Failure with enveloped message and the taxonomy's status code.
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        ApiError {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl From<LogError> for ApiError {
    fn from(err: LogError) -> Self {
        ApiError {
            status: err.status_code(),
            message: err.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(ApiResponse::<()> {
                data: None,
                error: Some(self.message),
            }),
        )
            .into_response()
    }
}

#[derive(Deserialize)]
struct DoParams {
    #[serde(rename = "ignore-version", default = "default_ignore_version")]
    ignore_version: bool,
}

fn default_ignore_version() -> bool {
    true
}

async fn submit(
    State(state): State<Arc<AppState>>,
    Extension(request_id): Extension<RequestId>,
    params: Result<Query<DoParams>, QueryRejection>,
    payload: Result<Json<LogPayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;

    if let Err(err) = state.doer.submit(payload, params.ignore_version).await {
        slog::warn!(state.logger, "submit failed"; "req" => %request_id, "error" => %err);
        return Err(err.into());
    }
    Ok(StatusCode::OK)
}

async fn prepared(State(state): State<Arc<AppState>>) -> Result<Data<LogPayload>, ApiError> {
    Ok(Data(state.commit_log.prepared()?))
}

async fn prepare(
    State(state): State<Arc<AppState>>,
    payload: Result<Json<LogPayload>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(payload) = payload.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    state.commit_log.prepare(&payload)?;
    Ok(StatusCode::OK)
}

async fn committed(State(state): State<Arc<AppState>>) -> Result<Data<LogPayload>, ApiError> {
    Ok(Data(state.commit_log.committed()?))
}

async fn commit(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.commit_log.commit()?;
    Ok(StatusCode::OK)
}

async fn rollback(State(state): State<Arc<AppState>>) -> Result<StatusCode, ApiError> {
    state.commit_log.rollback()?;
    Ok(StatusCode::OK)
}

async fn record(
    State(state): State<Arc<AppState>>,
    id: Result<Path<u64>, PathRejection>,
) -> Result<Data<LogPayload>, ApiError> {
    let Path(id) = id.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    Ok(Data(state.commit_log.record(id)?))
}

#[derive(Deserialize)]
struct CompactParams {
    #[serde(default = "default_keep")]
    keep: u64,
}

fn default_keep() -> u64 {
    10_000
}

async fn compact(
    State(state): State<Arc<AppState>>,
    params: Result<Query<CompactParams>, QueryRejection>,
) -> Result<StatusCode, ApiError> {
    let Query(params) = params.map_err(|rejection| ApiError::bad_request(rejection.body_text()))?;
    state.commit_log.compact(params.keep)?;
    Ok(StatusCode::OK)
}
