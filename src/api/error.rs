//! JSON error responses for the session API.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::session::SessionState;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Trigger failures come from bad input (an unusable meeting URL).
    #[error("{0}")]
    InvalidMeeting(String),
    #[error("Session {0} not found")]
    SessionNotFound(String),
    #[error("Session {id} already finalized as {state}")]
    AlreadyFinalized { id: String, state: SessionState },
    #[error("A join is already running for session {0}")]
    JoinRunning(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::InvalidMeeting(_) => StatusCode::BAD_REQUEST,
            Self::SessionNotFound(_) => StatusCode::NOT_FOUND,
            Self::AlreadyFinalized { .. } | Self::JoinRunning(_) => StatusCode::CONFLICT,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({
            "error": true,
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        Self::InvalidMeeting(err.to_string())
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
