//! HTTP endpoints — the inbound boundary for platform adapters and operators.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tracing::error;

use crate::error::{DatabaseError, Error, SessionError};
use crate::session::{SessionEngine, SessionStatus, parse_answer_payload, render};

/// Shared state for the routes.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<SessionEngine>,
}

/// Answer body: either explicit fields or a raw button payload.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum AnswerRequest {
    Fields { index: usize, letter: String },
    Payload { payload: String },
}

struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Session(SessionError::InvalidChoice { .. }) => StatusCode::BAD_REQUEST,
            Error::Session(SessionError::QuestionNotFound(_) | SessionError::NoRoom { .. })
            | Error::Database(DatabaseError::NotFound { .. }) => StatusCode::NOT_FOUND,
            Error::Session(SessionError::Incomplete { .. }) => StatusCode::CONFLICT,
            e if e.is_retryable() => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (
            status,
            Json(serde_json::json!({
                "error": self.0.to_string(),
                "retryable": self.0.is_retryable(),
            })),
        )
            .into_response()
    }
}

fn bad_request(message: &str) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(serde_json::json!({"error": message})),
    )
        .into_response()
}

/// Status body: the snapshot plus its chat rendering.
fn status_body(status: &SessionStatus) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "user_id": status.user_id,
        "phase": status.phase,
        "answered": status.answered,
        "total": status.total,
        "text": render::status_text(status),
    }))
}

/// POST /api/rooms/{user_id}
async fn open_room(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let outcome = state.engine.open_room(&user_id).await?;
    let status = if outcome.created {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(outcome)).into_response())
}

/// DELETE /api/rooms/{user_id}
async fn close_room(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.close_room(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sessions/{user_id}/answers
async fn submit_answer(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
    Json(body): Json<AnswerRequest>,
) -> Result<Response, ApiError> {
    let (index, letter) = match body {
        AnswerRequest::Fields { index, letter } => (index, letter),
        AnswerRequest::Payload { payload } => match parse_answer_payload(&payload) {
            Some(decoded) => decoded,
            None => return Ok(bad_request("Malformed answer payload")),
        },
    };
    let outcome = state.engine.submit_answer(&user_id, index, &letter).await?;
    Ok(Json(outcome).into_response())
}

/// POST /api/sessions/{user_id}/resume
async fn resume(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let status = state.engine.resume(&user_id).await?;
    Ok(status_body(&status).into_response())
}

/// GET /api/sessions/{user_id}/status
async fn status(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let status = state.engine.request_status(&user_id).await?;
    Ok(status_body(&status).into_response())
}

/// GET /api/sessions/{user_id}/ranking
async fn ranking(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Response, ApiError> {
    let matches = state.engine.request_ranking(&user_id).await?;
    Ok(Json(serde_json::json!({
        "text": render::ranking_text(&user_id, &matches),
        "user_id": user_id,
        "matches": matches,
    }))
    .into_response())
}

/// POST /api/sessions/{user_id}/reset
async fn reset(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.engine.reset_session(&user_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/stats
async fn stats(State(state): State<AppState>) -> Result<Response, ApiError> {
    let stats = state.engine.stats().await?;
    Ok(Json(stats).into_response())
}

async fn health() -> &'static str {
    "ok"
}

/// Build the service router.
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/rooms/{user_id}", post(open_room).delete(close_room))
        .route("/api/sessions/{user_id}/answers", post(submit_answer))
        .route("/api/sessions/{user_id}/resume", post(resume))
        .route("/api/sessions/{user_id}/status", get(status))
        .route("/api/sessions/{user_id}/ranking", get(ranking))
        .route("/api/sessions/{user_id}/reset", post(reset))
        .with_state(state)
}
