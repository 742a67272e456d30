use axum::{http::StatusCode, Json};
use serde::Serialize;
use tracing::warn;
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

fn error_response(status: StatusCode, message: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: message.into(),
        }),
    )
}

pub fn not_found(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::NOT_FOUND, message)
}

pub fn bad_request(message: impl Into<String>) -> ApiError {
    error_response(StatusCode::BAD_REQUEST, message)
}

/// Helper to log an upstream failure and return a generic bad gateway error
pub fn bad_gateway<E: std::fmt::Display>(err: E) -> ApiError {
    warn!("Upstream error: {}", err);
    error_response(StatusCode::BAD_GATEWAY, "Upstream service unavailable")
}
