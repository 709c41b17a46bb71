use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::AuthError;
use crate::resilience::CallError;
use crate::response::ApiResponse;
use crate::rpc::{Code, RpcError};

/// Error surfaced at the public HTTP boundary. `Display` is the user-safe
/// message; causes are logged, never returned.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{message}")]
    Validation { message: String, details: Option<Value> },
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
    #[error("Too many requests")]
    TooManyRequests,
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("Internal server error")]
    Internal(String),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        AppError::Validation {
            message: message.into(),
            details: None,
        }
    }

    pub fn internal(cause: impl std::fmt::Display) -> Self {
        AppError::Internal(cause.to_string())
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Validation { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::Forbidden(_) => "FORBIDDEN",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::TooManyRequests => "TOO_MANY_REQUESTS",
            AppError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let details = match &self {
            AppError::Validation { details, .. } => details.clone(),
            _ => None,
        };
        if let AppError::Internal(cause) = &self {
            error!("Internal error: {}", cause);
        }
        let body = ApiResponse::failure(self.code(), self.to_string(), details);
        (status, Json(body)).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::InvalidCredentials | AuthError::InvalidState | AuthError::UnverifiedEmail => {
                AppError::Unauthorized(err.to_string())
            }
            AuthError::InvalidToken { ref reason } => {
                debug!("Token rejected: {}", reason);
                AppError::Unauthorized(err.to_string())
            }
            AuthError::Inactive => AppError::Forbidden(err.to_string()),
            AuthError::Validation(message) => AppError::validation(message),
            AuthError::Conflict => AppError::Conflict(err.to_string()),
            AuthError::InvalidInitData(ref cause) => {
                debug!("Telegram init data rejected: {}", cause);
                AppError::BadRequest(err.to_string())
            }
            AuthError::NotFound => AppError::NotFound(err.to_string()),
            AuthError::NotConfigured(_) => AppError::ServiceUnavailable(err.to_string()),
            AuthError::Identity(ref cause) => {
                warn!("Identity provider failure: {}", cause);
                AppError::ServiceUnavailable(err.to_string())
            }
            AuthError::Internal(cause) => AppError::Internal(cause),
        }
    }
}

impl From<RpcError> for AppError {
    fn from(err: RpcError) -> Self {
        match err.code {
            Code::InvalidArgument | Code::OutOfRange | Code::FailedPrecondition => {
                AppError::validation(err.message)
            }
            // Ownership failures are reported as absence.
            Code::NotFound | Code::PermissionDenied => AppError::NotFound(err.message),
            Code::AlreadyExists => AppError::Conflict(err.message),
            Code::Unauthenticated => AppError::Unauthorized("Invalid or expired token".to_string()),
            Code::ResourceExhausted => AppError::TooManyRequests,
            Code::Unavailable | Code::DeadlineExceeded | Code::Aborted | Code::Cancelled => {
                warn!("Downstream unavailable: {}", err);
                AppError::ServiceUnavailable("Service temporarily unavailable".to_string())
            }
            _ => AppError::Internal(err.to_string()),
        }
    }
}

impl From<CallError<RpcError>> for AppError {
    fn from(err: CallError<RpcError>) -> Self {
        match err {
            CallError::CircuitOpen(name) => {
                warn!("Circuit '{}' is open, failing fast", name);
                AppError::ServiceUnavailable("Service temporarily unavailable".to_string())
            }
            CallError::Timeout(after) => {
                warn!("Downstream call timed out after {:?}", after);
                AppError::ServiceUnavailable("Service temporarily unavailable".to_string())
            }
            CallError::Inner(inner) => inner.into(),
        }
    }
}
