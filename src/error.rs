//! Error types and error handling for the application
//!
//! This module defines custom error types that can be converted to HTTP responses.
//! All errors implement `IntoResponse` to provide consistent error formatting.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Application-level error types
///
/// All errors that can occur before the event stream starts are represented
/// by this enum. Each variant implements automatic conversion to HTTP
/// responses via `IntoResponse`. Failures that occur after the first frame
/// has been written are reported inside the stream instead (see the bridge).
#[derive(Error, Debug)]
pub enum AppError {
    /// Request payload is malformed (missing or non-array `messages` field)
    #[error("{0}")]
    InvalidInput(String),

    /// No usable turns remained after normalization
    #[error("Conversation contains no usable messages")]
    EmptyConversation,

    /// Internal server error (catch-all for unexpected errors)
    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // 400-class failures carry `{error}`, 500-class carry
        // `{error, message}` so clients can show a diagnostic.
        let (status, body) = match &self {
            AppError::InvalidInput(_) | AppError::EmptyConversation => (
                StatusCode::BAD_REQUEST,
                json!({ "error": self.to_string() }),
            ),
            AppError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({
                    "error": "Internal server error",
                    "message": self.to_string(),
                }),
            ),
        };

        (status, Json(body)).into_response()
    }
}
