use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use diesel::result::DatabaseErrorKind;
use serde::Serialize;
use std::fmt::Display;

use crate::improvement::ImprovementError;
use crate::validation::ValidationError;
use crate::workflow::WorkflowError;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    message: String,
}

impl AppError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "unauthorized")
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(StatusCode::FORBIDDEN, message)
    }

    pub fn not_found() -> Self {
        Self::new(StatusCode::NOT_FOUND, "resource not found")
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(StatusCode::CONFLICT, message)
    }

    pub fn payload_too_large(message: impl Into<String>) -> Self {
        Self::new(StatusCode::PAYLOAD_TOO_LARGE, message)
    }

    pub fn internal<E: Display>(error: E) -> Self {
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, error.to_string())
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status;
        let body = Json(ErrorResponse {
            error: self.message,
        });
        (status, body).into_response()
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl From<diesel::result::Error> for AppError {
    fn from(value: diesel::result::Error) -> Self {
        match value {
            diesel::result::Error::NotFound => AppError::not_found(),
            diesel::result::Error::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
                AppError::conflict(format!("conflicting record: {}", info.message()))
            }
            _ => AppError::internal(value),
        }
    }
}

impl From<WorkflowError> for AppError {
    fn from(value: WorkflowError) -> Self {
        let status = match value {
            WorkflowError::IllegalTransition { .. } | WorkflowError::StaleStatus { .. } => {
                StatusCode::CONFLICT
            }
            WorkflowError::ReviewerRequired => StatusCode::FORBIDDEN,
            WorkflowError::MissingReason => StatusCode::BAD_REQUEST,
        };
        AppError::new(status, value.to_string())
    }
}

impl From<ImprovementError> for AppError {
    fn from(value: ImprovementError) -> Self {
        let status = match value {
            ImprovementError::IllegalStep { .. }
            | ImprovementError::StaleStatus { .. }
            | ImprovementError::Closed => StatusCode::CONFLICT,
            ImprovementError::InvalidVerdict(_) | ImprovementError::MissingNotes => {
                StatusCode::BAD_REQUEST
            }
        };
        AppError::new(status, value.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(value: ValidationError) -> Self {
        match value {
            ValidationError::FileTooLarge { .. } => AppError::payload_too_large(value.to_string()),
            _ => AppError::bad_request(value.to_string()),
        }
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(value: anyhow::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        AppError::internal(value)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        AppError::internal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::{Action, DocumentStatus};

    #[test]
    fn workflow_errors_map_to_http_statuses() {
        let illegal: AppError = WorkflowError::IllegalTransition {
            from: DocumentStatus::Archived,
            action: Action::Approve,
        }
        .into();
        assert_eq!(illegal.status(), StatusCode::CONFLICT);

        let reviewer: AppError = WorkflowError::ReviewerRequired.into();
        assert_eq!(reviewer.status(), StatusCode::FORBIDDEN);

        let reason: AppError = WorkflowError::MissingReason.into();
        assert_eq!(reason.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn oversized_upload_maps_to_payload_too_large() {
        let err: AppError = ValidationError::FileTooLarge {
            size: 10,
            limit: 5,
        }
        .into();
        assert_eq!(err.status(), StatusCode::PAYLOAD_TOO_LARGE);
    }

    #[test]
    fn missing_row_maps_to_not_found() {
        let err: AppError = diesel::result::Error::NotFound.into();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
