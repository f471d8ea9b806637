//! Errors surfaced to HTTP callers.

use axum::Json;
use axum::http::{HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use std::path::PathBuf;
use thiserror::Error;

use crate::limiter::WindowKind;

/// Everything a request can end with other than a served response.
///
/// Each variant maps to its own status code and a short machine-readable
/// reason, rendered as `{"error": "<reason>"}`.
#[derive(Error, Debug)]
pub enum ServeError {
    /// Private path, load failure or missing content.
    #[error("not found")]
    NotFound,

    #[error("You have reached maximum request limit.")]
    RateLimited { window: WindowKind },

    #[error("{0}")]
    InvalidRequest(String),

    #[error("search type not found")]
    StrategyNotFound(String),

    #[error("{0}")]
    StrategyError(String),

    #[error("Failed to reload configuration: {0}")]
    ConfigParse(String),

    #[error("Failed to write snapshot {}: {reason}", path.display())]
    StorageWrite { path: PathBuf, reason: String },
}

impl ServeError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServeError::NotFound => StatusCode::NOT_FOUND,
            ServeError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ServeError::InvalidRequest(_) | ServeError::StrategyNotFound(_) => {
                StatusCode::BAD_REQUEST
            }
            ServeError::StrategyError(_)
            | ServeError::ConfigParse(_)
            | ServeError::StorageWrite { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServeError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(serde_json::json!({ "error": self.to_string() }));
        let mut response = (status, body).into_response();

        if let ServeError::RateLimited { window } = &self {
            let retry = window.duration().as_secs().max(1);
            if let Ok(value) = HeaderValue::from_str(&retry.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }

        response
    }
}
