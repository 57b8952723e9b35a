//! Domain errors and their HTTP mapping.
//!
//! HTTP handlers translate every known failure into one of these variants;
//! the `IntoResponse` impl maps each variant to a status code and a
//! `{"detail": ...}` body. Internal errors never leak implementation detail
//! to clients; the full message goes to the log instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::error::Error;
use std::fmt;

#[derive(Debug, Clone)]
pub enum ApiError {
    /// Malformed request body, invalid query parameters, relative upload
    /// path, and the like. 400.
    Validation(String),
    /// Unknown conversation or event id. 404.
    NotFound(String),
    /// Missing or invalid session API key. 401.
    Auth(String),
    /// Illegal state transition, e.g. pausing a finished conversation. 400.
    Conflict(String),
    /// Failure writing events or metadata. Fatal for the conversation. 500.
    Persistence(String),
    /// Anything else. 500 with a generic detail.
    Internal(String),
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Validation(msg) => write!(f, "Validation error: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not found: {}", msg),
            ApiError::Auth(msg) => write!(f, "Authentication error: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::Persistence(msg) => write!(f, "Persistence error: {}", msg),
            ApiError::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::Validation(msg) => {
                log::info!("request validation failed: {}", msg);
                (StatusCode::BAD_REQUEST, msg.clone())
            }
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Auth(msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::Conflict(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Persistence(msg) => {
                log::error!("persistence failure: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "persistence failure".to_string(),
                )
            }
            ApiError::Internal(msg) => {
                log::error!("internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal server error".to_string(),
                )
            }
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<std::io::Error> for ApiError {
    fn from(err: std::io::Error) -> Self {
        ApiError::Persistence(err.to_string())
    }
}
