use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HubError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Authentication required")]
    AuthRequired,

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Rate limit exceeded, retry after {retry_after}s")]
    RateLimited { retry_after: u64 },

    #[error("Not authorized: {0}")]
    NotAuthorized(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HubError {
    /// Stable machine-readable code used in WebSocket `error` events
    /// and HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Config(_) => "CONFIG_ERROR",
            Self::AuthRequired => "AUTH_REQUIRED",
            Self::Auth(_) => "AUTH_ERROR",
            Self::RateLimited { .. } => "RATE_LIMITED",
            Self::NotAuthorized(_) => "NOT_AUTHORIZED",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Message safe to send to a client. Internal details are masked in
    /// production; the full error is always logged server-side.
    pub fn client_message(&self) -> String {
        match self {
            Self::Config(_) | Self::Internal(_) if is_production() => {
                "Internal server error".to_string()
            }
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Serialize)]
struct ErrorBody {
    code: String,
    message: String,
}

/// Check if running in production mode (based on RUN_MODE env var)
fn is_production() -> bool {
    std::env::var("RUN_MODE")
        .map(|m| m == "production" || m == "prod")
        .unwrap_or(false)
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = match &self {
            HubError::Config(_) | HubError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            HubError::AuthRequired | HubError::Auth(_) => StatusCode::UNAUTHORIZED,
            HubError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            HubError::NotAuthorized(_) => StatusCode::FORBIDDEN,
            HubError::InvalidPayload(_) => StatusCode::BAD_REQUEST,
            HubError::NotFound(_) => StatusCode::NOT_FOUND,
        };

        // Always log the detailed error server-side
        tracing::error!(
            code = %self.code(),
            status = %status.as_u16(),
            message = %self,
            "API error"
        );

        let body = ErrorResponse {
            error: ErrorBody {
                code: self.code().to_string(),
                message: self.client_message(),
            },
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, HubError>;
