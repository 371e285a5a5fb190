//! Error handling module for the Secret Santa backend.
//!
//! Provides centralized error types with mapping to HTTP status codes and response envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};

/// Error codes as constants to avoid stringly-typed errors.
pub mod codes {
    pub const UNAUTHORIZED: &str = "UNAUTHORIZED";
    pub const NOT_FOUND: &str = "NOT_FOUND";
    pub const GROUP_ARCHIVED: &str = "GROUP_ARCHIVED";
    pub const INSUFFICIENT_MEMBERS: &str = "INSUFFICIENT_MEMBERS";
    pub const NO_VALID_ASSIGNMENT: &str = "NO_VALID_ASSIGNMENT";
    pub const ALREADY_ARCHIVED: &str = "ALREADY_ARCHIVED";
    pub const MISSING_CONTACT_INFO: &str = "MISSING_CONTACT_INFO";
    pub const DELIVERY_FAILURE: &str = "DELIVERY_FAILURE";
    pub const VALIDATION_ERROR: &str = "VALIDATION_ERROR";
    pub const CONFLICT: &str = "CONFLICT";
    pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";
    pub const DATABASE_ERROR: &str = "DATABASE_ERROR";
    pub const BAD_REQUEST: &str = "BAD_REQUEST";
}

/// Application error type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Authentication required
    Unauthorized(String),
    /// Group, member or match missing
    NotFound(String),
    /// Group is archived; no further runs or notifications
    GroupArchived(String),
    /// Fewer than two members in the group
    InsufficientMembers(String),
    /// Matcher exhausted its attempts
    NoValidAssignment(String),
    /// Match already notified, or nothing left to notify
    AlreadyArchived(String),
    /// Giver lacks the contact field the channel needs
    MissingContactInfo(String),
    /// Provider rejected the message or timed out
    DeliveryFailure(String),
    /// Malformed input
    Validation(String),
    /// Concurrent modification (run version or member version moved)
    Conflict(String),
    /// Database error
    Database(String),
    /// Internal server error
    Internal(String),
    /// Bad request
    BadRequest(String),
}

impl AppError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::GroupArchived(_) => StatusCode::BAD_REQUEST,
            AppError::InsufficientMembers(_) => StatusCode::BAD_REQUEST,
            AppError::NoValidAssignment(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::AlreadyArchived(_) => StatusCode::BAD_REQUEST,
            AppError::MissingContactInfo(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::DeliveryFailure(_) => StatusCode::BAD_GATEWAY,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
        }
    }

    /// Get the error code for this error.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Unauthorized(_) => codes::UNAUTHORIZED,
            AppError::NotFound(_) => codes::NOT_FOUND,
            AppError::GroupArchived(_) => codes::GROUP_ARCHIVED,
            AppError::InsufficientMembers(_) => codes::INSUFFICIENT_MEMBERS,
            AppError::NoValidAssignment(_) => codes::NO_VALID_ASSIGNMENT,
            AppError::AlreadyArchived(_) => codes::ALREADY_ARCHIVED,
            AppError::MissingContactInfo(_) => codes::MISSING_CONTACT_INFO,
            AppError::DeliveryFailure(_) => codes::DELIVERY_FAILURE,
            AppError::Validation(_) => codes::VALIDATION_ERROR,
            AppError::Conflict(_) => codes::CONFLICT,
            AppError::Database(_) => codes::DATABASE_ERROR,
            AppError::Internal(_) => codes::INTERNAL_ERROR,
            AppError::BadRequest(_) => codes::BAD_REQUEST,
        }
    }

    /// Get the error message.
    pub fn message(&self) -> &str {
        match self {
            AppError::Unauthorized(msg)
            | AppError::NotFound(msg)
            | AppError::GroupArchived(msg)
            | AppError::InsufficientMembers(msg)
            | AppError::NoValidAssignment(msg)
            | AppError::AlreadyArchived(msg)
            | AppError::MissingContactInfo(msg)
            | AppError::DeliveryFailure(msg)
            | AppError::Validation(msg)
            | AppError::Conflict(msg)
            | AppError::Database(msg)
            | AppError::Internal(msg)
            | AppError::BadRequest(msg) => msg,
        }
    }

    /// Whether the same call may succeed if simply retried later.
    ///
    /// `NoValidAssignment` is excluded: a fresh shuffle may succeed, but the
    /// caller has to decide to start another run.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::DeliveryFailure(_) | AppError::Conflict(_) | AppError::Database(_)
        )
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error_code(), self.message())
    }
}

impl std::error::Error for AppError {}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        AppError::Database(format!("Database error: {}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON error: {:?}", err);
        AppError::BadRequest(format!("JSON error: {}", err))
    }
}

/// Error details in the response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: String,
    pub message: String,
    pub retryable: bool,
}

/// Error response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: ErrorDetails,
}

impl ErrorResponse {
    pub fn new(error: &AppError) -> Self {
        Self {
            success: false,
            error: ErrorDetails {
                code: error.error_code().to_string(),
                message: error.message().to_string(),
                retryable: error.is_retryable(),
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse::new(&self);
        (status, Json(body)).into_response()
    }
}
