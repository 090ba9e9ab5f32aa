use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use sketchpad_core::error::{ChatError, GENERIC_FAILURE_MESSAGE, RATE_LIMIT_MESSAGE};
use thiserror::Error;
use tracing::{error, warn};

use crate::provider::ProviderError;
use crate::repositories::StoreError;

/// Failure of a route, rendered as `{message}` with a matching status.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{message}")]
    Status { status: StatusCode, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "Authentication required")
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn rate_limited() -> Self {
        Self::new(StatusCode::TOO_MANY_REQUESTS, RATE_LIMIT_MESSAGE)
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Status { status, .. } => *status,
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Provider(err) => provider_status(err),
        }
    }

    fn public_message(&self) -> String {
        match self {
            ApiError::Status { message, .. } => message.clone(),
            // Storage details stay in the server log.
            ApiError::Store(_) => GENERIC_FAILURE_MESSAGE.to_string(),
            ApiError::Provider(ProviderError::Status { status, message }) if *status < 500 => {
                ChatError::from_status(*status, message.clone())
                    .message()
                    .to_string()
            }
            ApiError::Provider(_) => {
                ChatError::from_status(self.status().as_u16(), None).user_message()
            }
        }
    }
}

/// Upstream 4xx pass through, 5xx become 502, unreachable becomes 503.
fn provider_status(err: &ProviderError) -> StatusCode {
    match err {
        ProviderError::Status { status, .. } if *status < 500 => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
        }
        ProviderError::Status { .. } | ProviderError::Malformed(_) => StatusCode::BAD_GATEWAY,
        ProviderError::Transport(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        match &self {
            ApiError::Store(err) => error!(error = %err, "Storage failure"),
            ApiError::Provider(err) => warn!(error = %err, status = status.as_u16(), "Provider failure"),
            ApiError::Status { .. } if status.is_server_error() => error!(error = %self, "Request failed"),
            ApiError::Status { .. } => {}
        }
        (status, Json(json!({ "message": self.public_message() }))).into_response()
    }
}
