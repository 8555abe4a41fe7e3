use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::{controller::ControllerError, state::QueueError};

/// Player input that cannot become a queued command. The message is sent back to chat.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    /// Both wheels would end up slow.
    #[error("Only one wheel is allowed under 75% speed.")]
    WheelsTooSlow,
    /// `mt`/`pt` without a usable position.
    #[error("`{command}` needs a position, e.g. `{command} 1200`")]
    InvalidPosition {
        /// Command that was rejected.
        command: String,
    },
    /// A chain contained something that cannot be chained.
    #[error("`{token}` cannot be used in a command chain")]
    NotChainable {
        /// Offending token.
        token: String,
    },
    /// A chain exceeded the configured length.
    #[error("Too many commands, {max} is the limit")]
    ChainTooLong {
        /// Configured maximum.
        max: usize,
    },
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The machine link is down.
    #[error("machine unavailable")]
    Unavailable(#[source] ControllerError),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Operation cannot be performed in the current state.
    #[error("invalid state: {0}")]
    InvalidState(String),
    /// Requested player was not found.
    #[error("not found: {0}")]
    NotFound(String),
}

impl From<ControllerError> for ServiceError {
    fn from(err: ControllerError) -> Self {
        ServiceError::Unavailable(err)
    }
}

impl From<CommandError> for ServiceError {
    fn from(err: CommandError) -> Self {
        ServiceError::InvalidInput(err.to_string())
    }
}

impl From<QueueError> for ServiceError {
    fn from(err: QueueError) -> Self {
        ServiceError::InvalidState(err.to_string())
    }
}

impl From<ValidationErrors> for AppError {
    fn from(err: ValidationErrors) -> Self {
        AppError::BadRequest(format!("validation failed: {}", err))
    }
}

/// Application-level errors that are converted to HTTP responses.
#[derive(Debug, Error)]
pub enum AppError {
    /// Bad request with invalid input.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Machine unreachable.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Unavailable(source) => AppError::ServiceUnavailable(source.to_string()),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::InvalidState(message) => AppError::Conflict(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        let payload = Json(ErrorBody {
            message: self.to_string(),
        });

        (status, payload).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_http_statuses() {
        let conflict = AppError::from(ServiceError::from(QueueError::Full { max: 2 }));
        assert_eq!(conflict.into_response().status(), StatusCode::CONFLICT);

        let bad = AppError::from(ServiceError::from(CommandError::WheelsTooSlow));
        assert_eq!(bad.into_response().status(), StatusCode::BAD_REQUEST);

        let down = AppError::from(ServiceError::from(ControllerError::NotConnected));
        assert_eq!(down.into_response().status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
