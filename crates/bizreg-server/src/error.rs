//! Server-specific error types

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use thiserror::Error;

use crate::api::response::ErrorResponse;
use crate::ingest::error::{FileError, ImportError};
use crate::store::StoreError;

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    File(#[from] FileError),

    #[error(transparent)]
    Import(#[from] ImportError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    fn parts(&self) -> (StatusCode, &'static str, String) {
        match self {
            AppError::File(e) => {
                let (status, code) = match e {
                    FileError::TooLarge { .. } => (StatusCode::PAYLOAD_TOO_LARGE, "FILE_TOO_LARGE"),
                    FileError::UnsupportedContentType(_) => {
                        (StatusCode::UNSUPPORTED_MEDIA_TYPE, "UNSUPPORTED_FILE_TYPE")
                    },
                    FileError::MissingFile => (StatusCode::BAD_REQUEST, "MISSING_FILE"),
                    FileError::Empty => (StatusCode::BAD_REQUEST, "EMPTY_FILE"),
                    FileError::MissingColumn(_) => (StatusCode::BAD_REQUEST, "MISSING_COLUMN"),
                    FileError::Unreadable(_) => (StatusCode::BAD_REQUEST, "UNREADABLE_FILE"),
                };
                (status, code, e.to_string())
            },
            AppError::Import(ImportError::Stream(e)) => {
                (StatusCode::BAD_REQUEST, "UNREADABLE_FILE", e.to_string())
            },
            AppError::Import(e) => {
                tracing::error!("Import error: {}", e);
                (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "The company store is unavailable".to_string(),
                )
            },
            AppError::Store(e) => {
                tracing::error!("Store error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "A storage error occurred".to_string(),
                )
            },
            AppError::NotFound(message) => (StatusCode::NOT_FOUND, "NOT_FOUND", message.clone()),
            AppError::BadRequest(message) => {
                (StatusCode::BAD_REQUEST, "BAD_REQUEST", message.clone())
            },
            AppError::Io(e) => {
                tracing::error!("IO error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An IO error occurred".to_string(),
                )
            },
            AppError::Internal(message) => {
                tracing::error!("Internal error: {}", message);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = self.parts();
        (status, Json(ErrorResponse::new(code, message))).into_response()
    }
}

/// Alias for Result with AppError
pub type ApiResult<T> = Result<T, AppError>;
