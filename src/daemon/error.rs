//! HTTP-facing errors.

use crate::daemon::llm::InferenceError;
use crate::protocol::ErrorBody;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use std::any::Any;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Ollama service is not running. Please start Ollama and try again.")]
    Unavailable { details: String },
    #[error("Ollama API error: {0}")]
    Downstream(#[from] InferenceError),
    #[error("An unexpected error occurred")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Unavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Downstream(_) | ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody::new(self.to_string());
        let body = match &self {
            ApiError::Unavailable { details } => body.with_details(details.clone()),
            ApiError::Internal(details) => {
                error!("Unexpected error: {}", details);
                body.with_details(details.clone())
            }
            _ => body,
        };
        (self.status(), Json(body)).into_response()
    }
}

/// Response for a handler that panicked.
pub fn panic_response(err: Box<dyn Any + Send + 'static>) -> Response {
    let details = if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else {
        "handler panicked".to_string()
    };
    ApiError::Internal(details).into_response()
}
