use axum::{Json, http::StatusCode, response::IntoResponse};
use serde::Serialize;
use thiserror::Error;
use validator::ValidationErrors;

use crate::dao::{
    models::{ChallengeId, EventId, TeamId},
    storage::StorageError,
};

/// Closed set of outcomes a flag submission can fail with.
///
/// No solve is recorded for any variant. `IncorrectFlag` still commits the
/// attempt counter; every other variant rolls the transaction back.
#[derive(Debug, Error)]
pub enum SubmissionError {
    /// The team already holds a solve for this challenge.
    #[error("already solved")]
    AlreadySolved,
    /// The submitted value does not match the stored flag.
    #[error("incorrect flag")]
    IncorrectFlag,
    /// No challenge link exists for the pair.
    #[error("challenge `{challenge_id}` is not linked to event `{event_id}`")]
    ChallengeNotFound {
        event_id: EventId,
        challenge_id: ChallengeId,
    },
    /// The team has no participation row for the event.
    #[error("team `{team_id}` is not registered to event `{event_id}`")]
    NotRegistered { event_id: EventId, team_id: TeamId },
    /// Transaction, lock, or IO failure. The transaction was rolled back.
    #[error("persistence failure")]
    Persistence(#[from] StorageError),
}

/// Errors that can occur in service layer operations.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage backend rejected or failed the operation.
    #[error("storage error")]
    Storage(#[from] StorageError),
    /// Flag submission failed.
    #[error(transparent)]
    Submission(#[from] SubmissionError),
    /// Caller identity is missing.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Caller identity is known but not allowed.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Invalid input provided by the client.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Requested resource was not found.
    #[error("not found: {0}")]
    NotFound(String),
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
    /// Unauthorized access attempt.
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    /// Authenticated caller lacks the required role or membership.
    #[error("forbidden: {0}")]
    Forbidden(String),
    /// Requested resource not found.
    #[error("not found: {0}")]
    NotFound(String),
    /// Conflict with current state.
    #[error("conflict: {0}")]
    Conflict(String),
    /// Internal server error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<StorageError> for AppError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound { .. } => AppError::NotFound(err.to_string()),
            StorageError::Conflict { .. } => AppError::Conflict(err.to_string()),
            StorageError::Unavailable { .. } | StorageError::InvalidRow { .. } => {
                AppError::Internal("internal server error".into())
            }
        }
    }
}

impl From<SubmissionError> for AppError {
    fn from(err: SubmissionError) -> Self {
        match err {
            SubmissionError::AlreadySolved => AppError::Conflict(err.to_string()),
            SubmissionError::IncorrectFlag => AppError::BadRequest(err.to_string()),
            SubmissionError::ChallengeNotFound { .. } => AppError::NotFound(err.to_string()),
            SubmissionError::NotRegistered { .. } => {
                AppError::Forbidden("event registration required".into())
            }
            SubmissionError::Persistence(_) => AppError::Internal("internal server error".into()),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Storage(source) => source.into(),
            ServiceError::Submission(source) => source.into(),
            ServiceError::Unauthorized(message) => AppError::Unauthorized(message),
            ServiceError::Forbidden(message) => AppError::Forbidden(message),
            ServiceError::InvalidInput(message) => AppError::BadRequest(message),
            ServiceError::NotFound(message) => AppError::NotFound(message),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = self.status();
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
    fn submission_errors_map_to_documented_statuses() {
        let status = |err: SubmissionError| AppError::from(err).status();

        assert_eq!(status(SubmissionError::AlreadySolved), StatusCode::CONFLICT);
        assert_eq!(status(SubmissionError::IncorrectFlag), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(SubmissionError::Persistence(StorageError::unavailable(
                "commit failed",
                std::io::Error::other("disk gone"),
            ))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status(SubmissionError::NotRegistered {
                event_id: 1,
                team_id: 2
            }),
            StatusCode::FORBIDDEN
        );
    }

    #[test]
    fn persistence_details_stay_opaque() {
        let err = AppError::from(ServiceError::Storage(StorageError::unavailable(
            "connection reset by peer",
            std::io::Error::other("reset"),
        )));
        assert!(!err.to_string().contains("connection reset"));
    }
}
