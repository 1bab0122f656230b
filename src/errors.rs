use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// Error body returned for every failed request.
///
/// Handlers never panic on failure; everything funnels through
/// [`ServiceError::into_response`] and comes out as this shape.
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Always `false`.
    pub success: bool,
    /// HTTP status category (e.g. "Bad Request", "Internal Server Error").
    pub error: String,
    /// Human-readable error description.
    pub message: String,
    /// ISO 8601 timestamp when the error occurred.
    pub timestamp: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    /// Malformed or missing submission fields; rejected before any persistence.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Client-computed total disagrees with the server recomputation.
    #[error("Total amount mismatch. Please refresh and try again. (client: {client}, server: {server})")]
    TotalMismatch { client: i64, server: i64 },

    /// Requested status transition is not legal from the current state.
    #[error("Invalid status transition: {0}")]
    InvalidStatus(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// An order with the same id but different content already exists.
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Downstream gateway or persistence failure during order submission.
    #[error("Failed to create order: {0}")]
    OrderCreation(String),

    /// Repository read/write failure.
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Payment gateway request failed or returned an error body.
    #[error("Payment gateway error: {0}")]
    Gateway(String),

    /// Gateway notification carried a signature that does not verify.
    #[error("Invalid notification signature")]
    InvalidSignature,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Single source of truth for error-to-status mapping.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) | Self::TotalMismatch { .. } | Self::InvalidStatus(_) => {
                StatusCode::BAD_REQUEST
            }
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidSignature => StatusCode::UNAUTHORIZED,
            Self::Gateway(_) => StatusCode::BAD_GATEWAY,
            Self::OrderCreation(_) | Self::Persistence(_) | Self::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Message suitable for HTTP responses. Persistence and internal errors
    /// return generic text so implementation details do not leak.
    pub fn response_message(&self) -> String {
        match self {
            Self::Persistence(_) => "Persistence error".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::TotalMismatch { .. } => {
                "Total amount mismatch. Please refresh and try again.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

impl From<serde_json::Error> for ServiceError {
    fn from(err: serde_json::Error) -> Self {
        ServiceError::Internal(format!("serialization error: {err}"))
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::Validation(err.to_string())
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = self.response_message();
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "request failed");
        } else {
            tracing::warn!(error = %self, status = status.as_u16(), "request rejected");
        }

        let body = ErrorResponse {
            success: false,
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message,
            timestamp: chrono::Utc::now().to_rfc3339(),
        };

        (status, Json(body)).into_response()
    }
}
