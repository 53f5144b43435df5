use crate::import::ImportError;
use crate::models::ValidationIssue;
use crate::quiz::QuizError;
use crate::store::StoreError;
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use serde::Serialize;
use tracing::error;

#[derive(Debug, Clone, Serialize)]
pub struct ErrorDetail {
    pub field: String,
    pub issue: String,
}

impl From<ValidationIssue> for ErrorDetail {
    fn from(issue: ValidationIssue) -> Self {
        Self {
            field: issue.field,
            issue: issue.issue,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorBody {
    pub error: ErrorPayload,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorPayload {
    pub code: &'static str,
    pub message: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

#[derive(Debug)]
pub struct AppError {
    pub status: StatusCode,
    pub code: &'static str,
    pub message: String,
    pub details: Vec<ErrorDetail>,
    pub request_id: String,
}

impl AppError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>, request_id: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
            details: Vec::new(),
            request_id: request_id.into(),
        }
    }

    pub fn with_details(mut self, details: Vec<ErrorDetail>) -> Self {
        self.details = details;
        self
    }

    pub fn validation(message: impl Into<String>, issues: Vec<ValidationIssue>, request_id: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_ERROR", message, request_id)
            .with_details(issues.into_iter().map(ErrorDetail::from).collect())
    }

    pub fn from_store(err: StoreError, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        match err {
            StoreError::NotFound(what) => {
                Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", format!("{what} not found"), request_id)
            }
            StoreError::Conflict(message) => Self::new(StatusCode::CONFLICT, "CONFLICT", message, request_id),
            StoreError::Backend(message) => {
                error!("store unavailable: {}", message);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "STORE_UNAVAILABLE",
                    "question store is unavailable",
                    request_id,
                )
            }
            StoreError::Serialization(message) => {
                error!("store returned malformed data: {}", message);
                Self::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", "malformed stored data", request_id)
            }
        }
    }

    pub fn from_import(err: ImportError, request_id: impl Into<String>) -> Self {
        let request_id = request_id.into();
        let message = err.to_string();
        match err {
            ImportError::UnknownSubject(_) => Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message, request_id),
            ImportError::Store { committed, source } => {
                error!("import aborted after {} rows: {}", committed, source);
                Self::new(StatusCode::SERVICE_UNAVAILABLE, "STORE_UNAVAILABLE", message, request_id)
            }
            ImportError::NoSheet
            | ImportError::EmptySheet
            | ImportError::Unreadable(_)
            | ImportError::UnsupportedFormat(_) => {
                Self::new(StatusCode::BAD_REQUEST, "IMPORT_ERROR", message, request_id)
            }
        }
    }

    pub fn from_quiz(err: QuizError, request_id: impl Into<String>) -> Self {
        let code = match err {
            QuizError::EmptyPool => "EMPTY_POOL",
            QuizError::Finished => "SESSION_FINISHED",
            QuizError::InvalidOption { .. } | QuizError::MalformedDeck { .. } => "VALIDATION_ERROR",
        };
        let status = match err {
            QuizError::EmptyPool => StatusCode::UNPROCESSABLE_ENTITY,
            QuizError::Finished => StatusCode::CONFLICT,
            QuizError::InvalidOption { .. } | QuizError::MalformedDeck { .. } => StatusCode::BAD_REQUEST,
        };
        Self::new(status, code, err.to_string(), request_id)
    }
}

/// Flattens `validator` output into the envelope's detail list.
pub fn validation_details(errors: &validator::ValidationErrors) -> Vec<ErrorDetail> {
    let mut details: Vec<ErrorDetail> = errors
        .field_errors()
        .into_iter()
        .map(|(field, errs)| ErrorDetail {
            field: field.to_string(),
            issue: errs
                .iter()
                .map(|e| {
                    e.message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| e.code.to_string())
                })
                .collect::<Vec<_>>()
                .join(", "),
        })
        .collect();
    details.sort_by(|a, b| a.field.cmp(&b.field));
    details
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let payload = ErrorBody {
            error: ErrorPayload {
                code: self.code,
                message: self.message,
                details: self.details,
                request_id: self.request_id,
            },
        };
        (self.status, Json(payload)).into_response()
    }
}
