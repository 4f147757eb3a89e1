use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::session::SessionError;

/// Error returned by control API handlers.
#[derive(Debug)]
pub enum ApiError {
    /// Request is missing required fields.
    BadRequest(String),
    Unauthorized,
    Session(SessionError),
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        Self::Session(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": message }))).into_response()
            }
            Self::Unauthorized => {
                (StatusCode::UNAUTHORIZED, Json(json!({ "error": "Unauthorized" }))).into_response()
            }
            Self::Session(err) => {
                let status = match err {
                    SessionError::InvalidInput(_) | SessionError::EmptyMessage => {
                        StatusCode::BAD_REQUEST
                    }
                    // Callers check `success`, not the status code.
                    SessionError::AlreadyConnected | SessionError::Transport(_) => StatusCode::OK,
                };
                let body = json!({ "success": false, "error": err.to_string() });
                (status, Json(body)).into_response()
            }
        }
    }
}
