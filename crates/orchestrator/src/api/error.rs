//! Unified API error handling with structured responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, warn};

use crate::callback::CallbackError;
use crate::events::AppendError;
use crate::params::ValidationFailure;
use crate::runner::RegistryError;
use crate::runs::{QueueError, RunCreateError};
use crate::session::SessionError;

/// API error type with structured responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("resource not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("parameter validation failed")]
    Validation(Box<ValidationFailure>),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// Event append to a finished session.
    #[error("session is terminal: {0}")]
    Terminal(String),

    #[error("deadline exceeded: {0}")]
    DeadlineExceeded(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("internal server error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) | Self::Terminal(_) => StatusCode::CONFLICT,
            Self::DeadlineExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Validation(_) => "validation_error",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Terminal(_) => "terminal",
            Self::DeadlineExceeded(_) => "deadline_exceeded",
            Self::ServiceUnavailable(_) => "unavailable",
            Self::Internal(_) => "internal_error",
        }
    }

    /// Extra payload for errors that carry structure beyond the message.
    fn details(&self) -> Option<Value> {
        match self {
            Self::Validation(failure) => serde_json::to_value(failure).ok(),
            _ => None,
        }
    }
}

/// Structured error response: `{error, message, details?}`.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.error_code();
        let message = self.to_string();

        match &self {
            ApiError::Internal(msg) => {
                error!(error_code = code, message = %msg, "API error");
            }
            ApiError::ServiceUnavailable(msg) => {
                warn!(error_code = code, message = %msg, "service unavailable");
            }
            _ => {
                tracing::debug!(error_code = code, message = %message, "client error");
            }
        }

        let body = ErrorBody {
            error: code,
            message,
            details: self.details(),
        };
        (status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(id) => ApiError::NotFound(format!("session {id}")),
            SessionError::DuplicateName(name) => {
                ApiError::Conflict(format!("session name already in use: {name}"))
            }
            SessionError::ParentNotFound(name) => {
                ApiError::BadRequest(format!("parent session not found: {name}"))
            }
            SessionError::ResultNotReady => {
                ApiError::NotFound("session result not ready".to_string())
            }
            SessionError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RunCreateError> for ApiError {
    fn from(err: RunCreateError) -> Self {
        match err {
            RunCreateError::AgentNotFound(name) => ApiError::NotFound(format!("agent {name}")),
            RunCreateError::SessionNotFound(id) => ApiError::NotFound(format!("session {id}")),
            RunCreateError::ParentNotFound(name) => {
                ApiError::BadRequest(format!("parent session not found: {name}"))
            }
            RunCreateError::DuplicateSession(name) => {
                ApiError::Conflict(format!("session name already in use: {name}"))
            }
            RunCreateError::Validation(failure) => ApiError::Validation(failure),
            RunCreateError::Placeholder(e) => ApiError::BadRequest(e.to_string()),
            RunCreateError::Busy(id) => {
                ApiError::Conflict(format!("session {id} has an active run"))
            }
            RunCreateError::Invalid(msg) => ApiError::BadRequest(msg),
            RunCreateError::DeadlineExceeded => {
                ApiError::DeadlineExceeded("session did not finish within the wait".to_string())
            }
            RunCreateError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::RunNotFound(id) => ApiError::NotFound(format!("run {id}")),
            QueueError::RunnerNotFound(id) => ApiError::NotFound(format!("runner {id}")),
            QueueError::Conflict => {
                ApiError::Conflict("run is not in a transitionable state".to_string())
            }
            QueueError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::NotFound(id) => ApiError::NotFound(format!("runner {id}")),
            RegistryError::AgentConflict(name) => {
                ApiError::Conflict(format!("agent name already registered: {name}"))
            }
            RegistryError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<AppendError> for ApiError {
    fn from(err: AppendError) -> Self {
        match err {
            AppendError::SessionNotFound(id) => ApiError::NotFound(format!("session {id}")),
            AppendError::SessionTerminal => {
                ApiError::Terminal("no further events accepted".to_string())
            }
            AppendError::Conflict => {
                ApiError::Conflict("another writer holds the session log".to_string())
            }
            AppendError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<CallbackError> for ApiError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::NotFound(id) => ApiError::NotFound(format!("callback {id}")),
            CallbackError::Internal(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Internal(err.to_string())
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = Result<T, ApiError>;
