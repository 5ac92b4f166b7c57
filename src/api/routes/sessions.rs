//! Session endpoints.

use crate::api::error::{ApiError, ApiResult};
use crate::orchestrator::Orchestrator;
use crate::session::SessionSummary;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct TriggerRequest {
    pub meeting_url: String,
    /// Scheduled start; defaults to now.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,
}

pub fn router(orchestrator: Orchestrator) -> Router {
    Router::new()
        .route("/", post(trigger).get(list_sessions))
        .route("/:id", get(get_session))
        .route("/:id/join", post(join_session))
        .with_state(orchestrator)
}

/// POST /sessions - Register a meeting. A meeting already being handled returns
/// its existing session.
async fn trigger(
    State(orchestrator): State<Orchestrator>,
    Json(request): Json<TriggerRequest>,
) -> ApiResult<(StatusCode, Json<SessionSummary>)> {
    let start_time = request.start_time.unwrap_or_else(Utc::now);
    let id = orchestrator.trigger(&request.meeting_url, start_time).await?;
    info!("API trigger for {} -> session {}", request.meeting_url, id);

    let summary = orchestrator
        .status(&id)
        .await
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))?;
    Ok((StatusCode::CREATED, Json(summary)))
}

/// GET /sessions
async fn list_sessions(State(orchestrator): State<Orchestrator>) -> Json<Vec<SessionSummary>> {
    Json(orchestrator.list().await)
}

/// GET /sessions/:id
async fn get_session(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<Json<SessionSummary>> {
    orchestrator
        .status(&id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::SessionNotFound(id.clone()))
}

/// POST /sessions/:id/join - Launch join-with-retry in the background.
async fn join_session(
    State(orchestrator): State<Orchestrator>,
    Path(id): Path<String>,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let Some(summary) = orchestrator.status(&id).await else {
        return Err(ApiError::SessionNotFound(id.clone()));
    };
    if summary.end_time.is_some() {
        return Err(ApiError::AlreadyFinalized {
            id,
            state: summary.state,
        });
    }
    if !orchestrator.join_now(&id).await {
        return Err(ApiError::JoinRunning(id));
    }
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "session_id": id, "joining": true })),
    ))
}
