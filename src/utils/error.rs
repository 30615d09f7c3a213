//! Error types and handling
//!
//! Common error types used across the server.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Encoding error: {0}")]
    Encoding(String),

    #[error("Not ready: {0}")]
    Precondition(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    #[error("Worker error: {0}")]
    Worker(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<png::EncodingError> for AppError {
    fn from(error: png::EncodingError) -> Self {
        AppError::Encoding(format!("png: {}", error))
    }
}

impl From<hound::Error> for AppError {
    fn from(error: hound::Error) -> Self {
        AppError::Encoding(format!("wav: {}", error))
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(error: tokio::task::JoinError) -> Self {
        AppError::Worker(error.to_string())
    }
}

/// Error response for HTTP clients
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Io(_) => "IO_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Encoding(_) => "ENCODING_ERROR",
            AppError::Precondition(_) => "NOT_READY",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::InvalidMessage(_) => "INVALID_MESSAGE",
            AppError::Worker(_) => "WORKER_ERROR",
            AppError::Config(_) => "CONFIG_ERROR",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidMessage(_) | AppError::Precondition(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(error: AppError) -> Self {
        ErrorResponse {
            code: error.code().to_string(),
            message: error.to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(ErrorResponse::from(self))).into_response()
    }
}

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_maps_to_404() {
        let response = AppError::NotFound("conn-1".into()).into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_response_code() {
        let response = ErrorResponse::from(AppError::Precondition("resolution unknown".into()));
        assert_eq!(response.code, "NOT_READY");
        assert!(response.message.contains("resolution unknown"));
    }
}
