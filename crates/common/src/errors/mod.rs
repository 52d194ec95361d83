//! Error types for the attendance services
//!
//! Provides a comprehensive error handling system with:
//! - Distinct error types for every resolver failure
//! - A coarse taxonomy (`ErrorKind`) for UI feedback
//! - HTTP status code mapping
//! - Structured error responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias using AppError
pub type Result<T> = std::result::Result<T, AppError>;

/// Coarse failure taxonomy shared by every operation
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NotFound,
    InvalidState,
    PolicyViolation,
    Conflict,
    Validation,
    Unauthorized,
    Forbidden,
    Internal,
}

/// Error codes for machine-readable error identification
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Validation errors (1xxx)
    ValidationError,
    InvalidFormat,
    InvalidCredential,

    // Authentication errors (2xxx)
    Unauthorized,
    InvalidToken,
    ExpiredToken,

    // Authorization errors (3xxx)
    Forbidden,
    OrganizationMismatch,

    // Resource errors (4xxx)
    NotFound,
    OrganizationNotFound,
    SubscriberNotFound,
    SessionNotFound,
    ScheduledSessionNotFound,
    CardNotFound,
    RecordNotFound,
    NoActiveSession,

    // State errors (5xxx)
    SessionClosed,
    AlreadyClosed,
    AlreadyCheckedIn,
    AlreadyCheckedOut,
    AttendanceCompleted,
    CardUnassigned,
    CardInactive,
    CardAlreadyAssigned,
    SubscriberAlreadyHasCard,
    ScheduleInactive,

    // Policy errors (6xxx)
    MethodNotAllowed,
    NotScheduledOnDate,
    InvalidQrCode,
    QrCodeExpired,
    RateLimited,

    // Conflict errors (7xxx)
    Conflict,
    CardAlreadyRegistered,

    // Database errors (8xxx)
    DatabaseError,
    ConnectionError,

    // Internal errors (9xxx)
    InternalError,
    ConfigurationError,
    SerializationError,
}

impl ErrorCode {
    /// Get the numeric code for this error
    pub fn as_code(&self) -> u16 {
        match self {
            // Validation (1xxx)
            ErrorCode::ValidationError => 1001,
            ErrorCode::InvalidFormat => 1002,
            ErrorCode::InvalidCredential => 1003,

            // Auth (2xxx)
            ErrorCode::Unauthorized => 2001,
            ErrorCode::InvalidToken => 2002,
            ErrorCode::ExpiredToken => 2003,

            // Authz (3xxx)
            ErrorCode::Forbidden => 3001,
            ErrorCode::OrganizationMismatch => 3002,

            // Resources (4xxx)
            ErrorCode::NotFound => 4001,
            ErrorCode::OrganizationNotFound => 4002,
            ErrorCode::SubscriberNotFound => 4003,
            ErrorCode::SessionNotFound => 4004,
            ErrorCode::ScheduledSessionNotFound => 4005,
            ErrorCode::CardNotFound => 4006,
            ErrorCode::RecordNotFound => 4007,
            ErrorCode::NoActiveSession => 4008,

            // State (5xxx)
            ErrorCode::SessionClosed => 5001,
            ErrorCode::AlreadyClosed => 5002,
            ErrorCode::AlreadyCheckedIn => 5003,
            ErrorCode::AlreadyCheckedOut => 5004,
            ErrorCode::AttendanceCompleted => 5005,
            ErrorCode::CardUnassigned => 5006,
            ErrorCode::CardInactive => 5007,
            ErrorCode::CardAlreadyAssigned => 5008,
            ErrorCode::SubscriberAlreadyHasCard => 5009,
            ErrorCode::ScheduleInactive => 5010,

            // Policy (6xxx)
            ErrorCode::MethodNotAllowed => 6001,
            ErrorCode::NotScheduledOnDate => 6002,
            ErrorCode::InvalidQrCode => 6003,
            ErrorCode::QrCodeExpired => 6004,
            ErrorCode::RateLimited => 6005,

            // Conflicts (7xxx)
            ErrorCode::Conflict => 7001,
            ErrorCode::CardAlreadyRegistered => 7002,

            // Database (8xxx)
            ErrorCode::DatabaseError => 8001,
            ErrorCode::ConnectionError => 8002,

            // Internal (9xxx)
            ErrorCode::InternalError => 9001,
            ErrorCode::ConfigurationError => 9002,
            ErrorCode::SerializationError => 9003,
        }
    }

    /// Stable label for metrics
    pub fn as_label(&self) -> &'static str {
        match self {
            ErrorCode::ValidationError => "validation_error",
            ErrorCode::InvalidFormat => "invalid_format",
            ErrorCode::InvalidCredential => "invalid_credential",
            ErrorCode::Unauthorized => "unauthorized",
            ErrorCode::InvalidToken => "invalid_token",
            ErrorCode::ExpiredToken => "expired_token",
            ErrorCode::Forbidden => "forbidden",
            ErrorCode::OrganizationMismatch => "organization_mismatch",
            ErrorCode::NotFound => "not_found",
            ErrorCode::OrganizationNotFound => "organization_not_found",
            ErrorCode::SubscriberNotFound => "subscriber_not_found",
            ErrorCode::SessionNotFound => "session_not_found",
            ErrorCode::ScheduledSessionNotFound => "scheduled_session_not_found",
            ErrorCode::CardNotFound => "card_not_found",
            ErrorCode::RecordNotFound => "record_not_found",
            ErrorCode::NoActiveSession => "no_active_session",
            ErrorCode::SessionClosed => "session_closed",
            ErrorCode::AlreadyClosed => "already_closed",
            ErrorCode::AlreadyCheckedIn => "already_checked_in",
            ErrorCode::AlreadyCheckedOut => "already_checked_out",
            ErrorCode::AttendanceCompleted => "attendance_completed",
            ErrorCode::CardUnassigned => "card_unassigned",
            ErrorCode::CardInactive => "card_inactive",
            ErrorCode::CardAlreadyAssigned => "card_already_assigned",
            ErrorCode::SubscriberAlreadyHasCard => "subscriber_already_has_card",
            ErrorCode::ScheduleInactive => "schedule_inactive",
            ErrorCode::MethodNotAllowed => "method_not_allowed",
            ErrorCode::NotScheduledOnDate => "not_scheduled_on_date",
            ErrorCode::InvalidQrCode => "invalid_qr_code",
            ErrorCode::QrCodeExpired => "qr_code_expired",
            ErrorCode::RateLimited => "rate_limited",
            ErrorCode::Conflict => "conflict",
            ErrorCode::CardAlreadyRegistered => "card_already_registered",
            ErrorCode::DatabaseError => "database_error",
            ErrorCode::ConnectionError => "connection_error",
            ErrorCode::InternalError => "internal_error",
            ErrorCode::ConfigurationError => "configuration_error",
            ErrorCode::SerializationError => "serialization_error",
        }
    }
}

/// Application error types
#[derive(Error, Debug)]
pub enum AppError {
    // Validation errors
    #[error("Validation failed: {message}")]
    Validation {
        message: String,
        field: Option<String>,
    },

    #[error("Invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("Invalid credential: {message}")]
    InvalidCredential { message: String },

    // Authentication errors
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    ExpiredToken,

    // Authorization errors
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("This belongs to a different organization")]
    OrganizationMismatch,

    // Resource errors
    #[error("Resource not found: {resource_type} with id {id}")]
    NotFound { resource_type: String, id: String },

    #[error("Organization not found: {id}")]
    OrganizationNotFound { id: String },

    #[error("Subscriber not found: {id}")]
    SubscriberNotFound { id: String },

    #[error("Session not found: {id}")]
    SessionNotFound { id: String },

    #[error("Scheduled session not found: {id}")]
    ScheduledSessionNotFound { id: String },

    #[error("Card not recognized: {card_uid}")]
    CardNotFound { card_uid: String },

    #[error("Attendance record not found: {id}")]
    RecordNotFound { id: String },

    #[error("No active session found for this organization")]
    NoActiveSession,

    // State errors
    #[error("Session has ended")]
    SessionClosed { id: String },

    #[error("Session is already closed: {id}")]
    AlreadyClosed { id: String },

    #[error("Already checked in to this session")]
    AlreadyCheckedIn { record_id: String },

    #[error("Already checked out of this session")]
    AlreadyCheckedOut { record_id: String },

    #[error("Attendance for this session is already complete")]
    AttendanceCompleted { session_id: String },

    #[error("Card is not assigned to any subscriber: {card_uid}")]
    CardUnassigned { card_uid: String },

    #[error("Card is inactive: {card_uid}")]
    CardInactive { card_uid: String },

    #[error("Card is already assigned to another subscriber: {card_uid}")]
    CardAlreadyAssigned { card_uid: String },

    #[error("Subscriber already has an active card: {subscriber_id}")]
    SubscriberAlreadyHasCard { subscriber_id: String },

    #[error("Scheduled session is inactive: {id}")]
    ScheduleInactive { id: String },

    // Policy errors
    #[error("This check-in method is not allowed for this session: {method}")]
    MethodNotAllowed { method: String },

    #[error("Session is not scheduled on {date}")]
    NotScheduledOnDate { date: String },

    #[error("QR code is invalid")]
    InvalidQrCode,

    #[error("QR code has expired")]
    QrCodeExpired,

    #[error("Rate limit exceeded: {limit} requests per second")]
    RateLimited { limit: u32 },

    // Conflict errors
    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Card is already registered: {card_uid}")]
    CardAlreadyRegistered { card_uid: String },

    // Database errors
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Database connection error: {message}")]
    DatabaseConnection { message: String },

    // Internal errors
    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    /// Get the error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation { .. } => ErrorCode::ValidationError,
            AppError::InvalidFormat { .. } => ErrorCode::InvalidFormat,
            AppError::InvalidCredential { .. } => ErrorCode::InvalidCredential,
            AppError::Unauthorized { .. } => ErrorCode::Unauthorized,
            AppError::InvalidToken => ErrorCode::InvalidToken,
            AppError::ExpiredToken => ErrorCode::ExpiredToken,
            AppError::Forbidden { .. } => ErrorCode::Forbidden,
            AppError::OrganizationMismatch => ErrorCode::OrganizationMismatch,
            AppError::NotFound { .. } => ErrorCode::NotFound,
            AppError::OrganizationNotFound { .. } => ErrorCode::OrganizationNotFound,
            AppError::SubscriberNotFound { .. } => ErrorCode::SubscriberNotFound,
            AppError::SessionNotFound { .. } => ErrorCode::SessionNotFound,
            AppError::ScheduledSessionNotFound { .. } => ErrorCode::ScheduledSessionNotFound,
            AppError::CardNotFound { .. } => ErrorCode::CardNotFound,
            AppError::RecordNotFound { .. } => ErrorCode::RecordNotFound,
            AppError::NoActiveSession => ErrorCode::NoActiveSession,
            AppError::SessionClosed { .. } => ErrorCode::SessionClosed,
            AppError::AlreadyClosed { .. } => ErrorCode::AlreadyClosed,
            AppError::AlreadyCheckedIn { .. } => ErrorCode::AlreadyCheckedIn,
            AppError::AlreadyCheckedOut { .. } => ErrorCode::AlreadyCheckedOut,
            AppError::AttendanceCompleted { .. } => ErrorCode::AttendanceCompleted,
            AppError::CardUnassigned { .. } => ErrorCode::CardUnassigned,
            AppError::CardInactive { .. } => ErrorCode::CardInactive,
            AppError::CardAlreadyAssigned { .. } => ErrorCode::CardAlreadyAssigned,
            AppError::SubscriberAlreadyHasCard { .. } => ErrorCode::SubscriberAlreadyHasCard,
            AppError::ScheduleInactive { .. } => ErrorCode::ScheduleInactive,
            AppError::MethodNotAllowed { .. } => ErrorCode::MethodNotAllowed,
            AppError::NotScheduledOnDate { .. } => ErrorCode::NotScheduledOnDate,
            AppError::InvalidQrCode => ErrorCode::InvalidQrCode,
            AppError::QrCodeExpired => ErrorCode::QrCodeExpired,
            AppError::RateLimited { .. } => ErrorCode::RateLimited,
            AppError::Conflict { .. } => ErrorCode::Conflict,
            AppError::CardAlreadyRegistered { .. } => ErrorCode::CardAlreadyRegistered,
            AppError::Database(_) => ErrorCode::DatabaseError,
            AppError::DatabaseConnection { .. } => ErrorCode::ConnectionError,
            AppError::Internal { .. } => ErrorCode::InternalError,
            AppError::Configuration { .. } => ErrorCode::ConfigurationError,
            AppError::Serialization(_) => ErrorCode::SerializationError,
            AppError::Other(_) => ErrorCode::InternalError,
        }
    }

    /// Coarse taxonomy used to pick UI treatment
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Validation { .. }
            | AppError::InvalidFormat { .. }
            | AppError::InvalidCredential { .. } => ErrorKind::Validation,

            AppError::Unauthorized { .. } | AppError::InvalidToken | AppError::ExpiredToken => {
                ErrorKind::Unauthorized
            }

            AppError::Forbidden { .. } => ErrorKind::Forbidden,

            AppError::NotFound { .. }
            | AppError::OrganizationNotFound { .. }
            | AppError::SubscriberNotFound { .. }
            | AppError::SessionNotFound { .. }
            | AppError::ScheduledSessionNotFound { .. }
            | AppError::CardNotFound { .. }
            | AppError::RecordNotFound { .. }
            | AppError::NoActiveSession => ErrorKind::NotFound,

            AppError::SessionClosed { .. }
            | AppError::AlreadyClosed { .. }
            | AppError::AlreadyCheckedIn { .. }
            | AppError::AlreadyCheckedOut { .. }
            | AppError::AttendanceCompleted { .. }
            | AppError::CardUnassigned { .. }
            | AppError::CardInactive { .. }
            | AppError::CardAlreadyAssigned { .. }
            | AppError::SubscriberAlreadyHasCard { .. }
            | AppError::ScheduleInactive { .. } => ErrorKind::InvalidState,

            AppError::OrganizationMismatch
            | AppError::MethodNotAllowed { .. }
            | AppError::NotScheduledOnDate { .. }
            | AppError::InvalidQrCode
            | AppError::QrCodeExpired
            | AppError::RateLimited { .. } => ErrorKind::PolicyViolation,

            AppError::Conflict { .. } | AppError::CardAlreadyRegistered { .. } => {
                ErrorKind::Conflict
            }

            AppError::Database(_)
            | AppError::DatabaseConnection { .. }
            | AppError::Internal { .. }
            | AppError::Configuration { .. }
            | AppError::Serialization(_)
            | AppError::Other(_) => ErrorKind::Internal,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            _ => match self.kind() {
                ErrorKind::Validation => StatusCode::BAD_REQUEST,
                ErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
                ErrorKind::Forbidden => StatusCode::FORBIDDEN,
                ErrorKind::NotFound => StatusCode::NOT_FOUND,
                ErrorKind::InvalidState | ErrorKind::Conflict => StatusCode::CONFLICT,
                ErrorKind::PolicyViolation => StatusCode::UNPROCESSABLE_ENTITY,
                ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    /// Message safe to show to an end user
    ///
    /// Store-layer faults collapse to a generic message; everything else
    /// carries its own wording.
    pub fn public_message(&self) -> String {
        match self.kind() {
            ErrorKind::Internal => "Something went wrong, please try again".to_string(),
            _ => self.to_string(),
        }
    }

    /// Check if this error should be logged at error level
    pub fn is_server_error(&self) -> bool {
        self.status_code().is_server_error()
    }

    /// Check if this error is a client error
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// Structured error response for API
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorDetails,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorDetails {
    pub code: ErrorCode,
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let code = self.code();

        // Log based on severity
        if self.is_server_error() {
            tracing::error!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Server error"
            );
        } else if self.is_client_error() {
            tracing::warn!(
                error = %self,
                code = ?code,
                status = status.as_u16(),
                "Client error"
            );
        }

        let field = match &self {
            AppError::Validation { field, .. } => field.clone(),
            _ => None,
        };

        let body = ErrorResponse {
            error: ErrorDetails {
                code,
                kind: self.kind(),
                message: self.public_message(),
                field,
            },
        };

        (status, Json(body)).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal {
            message: err.to_string(),
        }
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        let field = err.field_errors().keys().next().map(|f| f.to_string());
        AppError::Validation {
            message: err.to_string(),
            field,
        }
    }
}
