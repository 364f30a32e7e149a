use std::time::Duration;

use axum::{Json, http::StatusCode, response::{IntoResponse, Response}};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::error;

/// Errors surfaced by the sync server's HTTP routes.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Config(msg) => {
                error!("configuration error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Server is misconfigured".to_string(),
                )
            }
        };

        let body = Json(ErrorResponse {
            error: status.to_string(),
            message: error_message,
        });

        (status, body).into_response()
    }
}

/// Error body returned by the lesson API on non-2xx responses.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

/// Failures talking to the remote lesson API.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApiError {
    #[error("network error: {0}")]
    Network(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("HTTP {status}: {message}")]
    Status {
        status: u16,
        message: String,
        body: Option<ApiErrorBody>,
    },

    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("user is not authenticated")]
    NotAuthenticated,
}

impl ApiError {
    pub fn from_status(status: u16, body: Option<ApiErrorBody>) -> Self {
        let message = body
            .as_ref()
            .and_then(|b| b.message.clone().or_else(|| b.error.clone()))
            .unwrap_or_else(|| format!("request failed with status {}", status));
        ApiError::Status {
            status,
            message,
            body,
        }
    }

    /// HTTP status, or 0 for transport-level failures.
    pub fn status(&self) -> u16 {
        match self {
            ApiError::Status { status, .. } => *status,
            ApiError::NotAuthenticated => 401,
            _ => 0,
        }
    }

    pub fn is_network_error(&self) -> bool {
        matches!(self, ApiError::Network(_) | ApiError::Timeout(_))
    }

    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status())
    }

    pub fn is_server_error(&self) -> bool {
        (500..600).contains(&self.status())
    }

    /// Network failures, 429 and 5xx may succeed on a later attempt.
    /// Everything else is surfaced immediately.
    pub fn is_retryable(&self) -> bool {
        self.is_network_error() || self.status() == 429 || self.is_server_error()
    }

    /// Message suitable for showing to the learner.
    pub fn user_message(&self) -> String {
        match self {
            ApiError::Network(_) => {
                "Network error. Check your internet connection.".to_string()
            }
            ApiError::Timeout(after) => {
                format!("The server did not respond in time ({} ms).", after.as_millis())
            }
            ApiError::UnexpectedResponse(_) => {
                "The server returned an unexpected response.".to_string()
            }
            ApiError::InvalidInput(msg) => msg.clone(),
            ApiError::NotAuthenticated => {
                "Authorization error. Please sign in again.".to_string()
            }
            ApiError::Status {
                status, message, ..
            } => match status {
                400 => "Invalid request. Check the submitted data.".to_string(),
                401 => "Authorization error. Please sign in again.".to_string(),
                403 => "Access denied. You are not allowed to do this.".to_string(),
                404 => "Resource not found.".to_string(),
                409 => "Data conflict. The resource may already exist.".to_string(),
                422 => "Validation error.".to_string(),
                429 => "Too many requests. Try again later.".to_string(),
                500 => "Internal server error. Try again later.".to_string(),
                502..=504 => "The server is temporarily unavailable. Try again later.".to_string(),
                _ => message.clone(),
            },
        }
    }
}
