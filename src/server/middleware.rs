use crate::api::ApiResponse;
use crate::server::AppState;
use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use http::{HeaderValue, StatusCode};
use rand::Rng;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;

/// Request id attached to incoming requests and echoed back in
/// `X-Request-Id`.
#[derive(Clone)]
pub(crate) struct RequestId(pub(crate) String);

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

pub(crate) async fn identify_request(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let id = RequestId(format!("{:08x}", rand::thread_rng().gen::<u32>()));
    let start = Instant::now();
    slog::info!(state.logger, "request started";
        "req" => %id, "method" => %request.method(), "uri" => %request.uri());

    request.extensions_mut().insert(id.clone());
    let mut response = next.run(request).await;

    if let Ok(header) = HeaderValue::from_str(&id.0) {
        response.headers_mut().insert("x-request-id", header);
    }
    slog::info!(state.logger, "request finished";
        "req" => %id,
        "status" => response.status().as_u16(),
        "latency_ms" => start.elapsed().as_secs_f64() * 1000.0);

    response
}

pub(crate) async fn check_auth(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if state.token.is_empty() {
        // No token configured, auth is disabled.
        return next.run(request).await;
    }

    let supplied = request
        .headers()
        .get("x-api-key")
        .and_then(|value| value.to_str().ok());
    if supplied != Some(state.token.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ApiResponse::<()> {
                data: None,
                error: Some("invalid token".to_string()),
            }),
        )
            .into_response();
    }

    next.run(request).await
}
