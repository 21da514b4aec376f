//! HTTP API for analysis submission and the classifier surface.
//!
//! Provides:
//! - `POST /api/analyses` - submit a repository analysis (202 + analysisId)
//! - `POST /api/analyses/{id}/cancel` - request cancellation
//! - `POST /api/batch` - submit a batch analysis (202 + batchId)
//! - `GET /health` - basic daemon health check
//! - `GET /api/errors/statistics` - aggregate error statistics
//! - `GET /api/errors/correlated/{correlationId}` - correlation query
//! - `POST /api/errors/{id}/resolve` - mark an error resolved
//!
//! Every failure is classified and returned as the stable error envelope.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use repolens_common::errors::{
    ClassifiedError, ErrorCategory, ErrorClassifier, ErrorCode, TimeRange,
};

use crate::events::EventBus;
use crate::pipeline::AnalysisPipeline;
use crate::ws::ws_handler;

/// Shared state for HTTP and WebSocket handlers.
pub struct AppState {
    pub events: EventBus,
    pub classifier: Arc<ErrorClassifier>,
    pub pipeline: Arc<AnalysisPipeline>,
    pub version: &'static str,
    pub started_at: Instant,
    /// When true, error envelopes include sanitized context.
    pub verbose_errors: bool,
}

/// Create the full daemon router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/api/analyses", post(submit_handler))
        .route("/api/analyses/{id}/cancel", post(cancel_handler))
        .route("/api/batch", post(batch_handler))
        .route("/api/errors/statistics", get(statistics_handler))
        .route(
            "/api/errors/correlated/{correlation_id}",
            get(correlated_handler),
        )
        .route("/api/errors/{id}/resolve", post(resolve_handler))
        .with_state(state)
}

/// Map an error category to an HTTP status for the envelope.
fn status_for(error: &ClassifiedError) -> StatusCode {
    match error.category {
        ErrorCategory::PathValidation => match error.code {
            ErrorCode::PathNotFound => StatusCode::NOT_FOUND,
            _ => StatusCode::BAD_REQUEST,
        },
        ErrorCategory::PathPermission => StatusCode::FORBIDDEN,
        ErrorCategory::Network | ErrorCategory::HttpRequest => StatusCode::BAD_GATEWAY,
        ErrorCategory::LlmProvider | ErrorCategory::LlmQuota => StatusCode::BAD_GATEWAY,
        ErrorCategory::Analysis | ErrorCategory::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_response(state: &AppState, error: &ClassifiedError) -> Response {
    let envelope = state
        .classifier
        .create_error_response(error, state.verbose_errors);
    (status_for(error), Json(envelope)).into_response()
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": state.version,
        "uptime_seconds": state.started_at.elapsed().as_secs(),
    }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SubmitRequest {
    path: PathBuf,
}

async fn submit_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<SubmitRequest>,
) -> Response {
    match state.pipeline.start_analysis(request.path).await {
        Ok(analysis_id) => (
            StatusCode::ACCEPTED,
            Json(json!({ "analysisId": analysis_id })),
        )
            .into_response(),
        Err(error) => error_response(&state, &error),
    }
}

async fn cancel_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    if state.pipeline.cancel(&id).await {
        (StatusCode::OK, Json(json!({ "cancelled": true }))).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "cancelled": false, "reason": "unknown or finished analysis" })),
        )
            .into_response()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchRequest {
    paths: Vec<PathBuf>,
}

async fn batch_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<BatchRequest>,
) -> Response {
    match state.pipeline.start_batch(request.paths).await {
        Ok(batch_id) => (StatusCode::ACCEPTED, Json(json!({ "batchId": batch_id }))).into_response(),
        Err(error) => error_response(&state, &error),
    }
}

#[derive(Debug, Deserialize)]
struct StatisticsQuery {
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
}

async fn statistics_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<StatisticsQuery>,
) -> impl IntoResponse {
    let time_range = match (query.start, query.end) {
        (Some(start), Some(end)) => Some(TimeRange { start, end }),
        _ => None,
    };
    Json(state.classifier.get_error_statistics(time_range))
}

async fn correlated_handler(
    State(state): State<Arc<AppState>>,
    Path(correlation_id): Path<String>,
) -> Response {
    match state.classifier.get_correlated_errors(&correlation_id) {
        Some(correlation) => Json(correlation).into_response(),
        None => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "no errors for correlation id", "correlationId": correlation_id })),
        )
            .into_response(),
    }
}

#[derive(Debug, Deserialize)]
struct ResolveRequest {
    resolution: String,
}

async fn resolve_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(request): Json<ResolveRequest>,
) -> Response {
    if state.classifier.resolve_error(&id, request.resolution) {
        Json(json!({ "resolved": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(json!({ "resolved": false, "reason": "unknown error id" })),
        )
            .into_response()
    }
}
