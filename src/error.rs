use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::geo::CoordinateError;
use crate::storage::StoreError;

#[derive(Debug, Error)]
pub enum AppError {
    // Request validation
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Bad request: {0}")]
    BadRequest(String),
    #[error("{0}")]
    Coordinate(#[from] CoordinateError),

    // Device registry
    #[error("Registration failed: {0}")]
    Registration(#[source] StoreError),

    // Storage
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    // Internal errors
    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            // 400 Bad Request
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Coordinate(e) => (StatusCode::BAD_REQUEST, e.to_string()),

            // 500 Internal Server Error
            AppError::Registration(e) => {
                tracing::error!("Registration failed: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Registration failed".to_string(),
                )
            }
            AppError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Storage error".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "ok": false,
            "error": message
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
