//! Error Types for the Symposium API
//!
//! This module defines error handling for the API layer, including:
//! - ApiError struct for structured error responses
//! - ErrorCode enum for categorizing errors
//! - IntoResponse implementation for Axum HTTP responses
//!
//! All errors are serialized as JSON with appropriate HTTP status codes.
//! The same ApiError shape is used for the push channel's error envelopes.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use symposium_core::{
    ProtocolError, RegistryError, SessionError, SymposiumError, TurnError, ValidationError,
};

// ============================================================================
// ERROR CODE ENUM
// ============================================================================

/// Error codes for API responses.
///
/// Each error code maps to a specific HTTP status code and represents
/// a category of error that can occur during API operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // ========================================================================
    // Validation Errors (400)
    // ========================================================================
    /// Request validation failed
    ValidationFailed,

    /// Request contains invalid input data
    InvalidInput,

    /// Required field is missing from request
    MissingField,

    /// Field value is out of valid range
    InvalidRange,

    /// Field format is incorrect
    InvalidFormat,

    /// Push channel protocol rules were violated
    ProtocolViolation,

    // ========================================================================
    // Not Found Errors (404)
    // ========================================================================
    /// Requested session does not exist
    SessionNotFound,

    /// Requested agent does not exist
    AgentNotFound,

    /// Requested paper does not exist in the paper store
    PaperNotFound,

    // ========================================================================
    // Conflict Errors (409)
    // ========================================================================
    /// Session has reached its terminal phase
    SessionClosed,

    // ========================================================================
    // Capacity Errors (429)
    // ========================================================================
    /// Agent registry is at its active-agent ceiling
    CapacityExceeded,

    // ========================================================================
    // Turn Errors (502, 504)
    // ========================================================================
    /// Every participant failed the turn
    TurnFailed,

    /// Every participant timed out; the turn deadline elapsed
    TurnTimeout,

    // ========================================================================
    // Server Errors (500, 503)
    // ========================================================================
    /// Internal server error
    InternalError,

    /// Service is temporarily unavailable
    ServiceUnavailable,
}

impl ErrorCode {
    /// Get the HTTP status code for this error code.
    pub fn status_code(&self) -> StatusCode {
        match self {
            // Validation errors
            ErrorCode::ValidationFailed
            | ErrorCode::InvalidInput
            | ErrorCode::MissingField
            | ErrorCode::InvalidRange
            | ErrorCode::InvalidFormat
            | ErrorCode::ProtocolViolation => StatusCode::BAD_REQUEST,

            // Not found errors
            ErrorCode::SessionNotFound
            | ErrorCode::AgentNotFound
            | ErrorCode::PaperNotFound => StatusCode::NOT_FOUND,

            // Conflict errors
            ErrorCode::SessionClosed => StatusCode::CONFLICT,

            // Capacity errors
            ErrorCode::CapacityExceeded => StatusCode::TOO_MANY_REQUESTS,

            // Turn errors
            ErrorCode::TurnFailed => StatusCode::BAD_GATEWAY,
            ErrorCode::TurnTimeout => StatusCode::GATEWAY_TIMEOUT,

            // Server errors
            ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorCode::InternalError => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Get a default message for this error code.
    pub fn default_message(&self) -> &'static str {
        match self {
            // Validation
            ErrorCode::ValidationFailed => "Request validation failed",
            ErrorCode::InvalidInput => "Invalid input data",
            ErrorCode::MissingField => "Required field is missing",
            ErrorCode::InvalidRange => "Value is out of valid range",
            ErrorCode::InvalidFormat => "Invalid format",
            ErrorCode::ProtocolViolation => "Protocol violation",

            // Not Found
            ErrorCode::SessionNotFound => "Session not found",
            ErrorCode::AgentNotFound => "Agent not found",
            ErrorCode::PaperNotFound => "Paper not found",

            // Conflict
            ErrorCode::SessionClosed => "Session is closed",

            // Capacity
            ErrorCode::CapacityExceeded => "Active agent limit reached",

            // Turn
            ErrorCode::TurnFailed => "All participants failed the turn",
            ErrorCode::TurnTimeout => "Turn deadline elapsed with no responses",

            // Server
            ErrorCode::InternalError => "Internal server error",
            ErrorCode::ServiceUnavailable => "Service temporarily unavailable",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

// ============================================================================
// API ERROR STRUCT
// ============================================================================

/// Structured error response for API operations.
///
/// This type is returned by all API endpoints when an error occurs.
/// It provides a consistent error format across REST and WebSocket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct ApiError {
    /// Error code categorizing the error
    pub code: ErrorCode,

    /// Human-readable error message
    pub message: String,

    /// Optional additional details (field errors, failed participants, etc.)
    #[serde(skip_serializing_if = "Option::is_none")]
    #[cfg_attr(feature = "openapi", schema(value_type = Option<Object>))]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    /// Create a new API error with the given code, using the default message.
    pub fn from_code(code: ErrorCode) -> Self {
        Self {
            code,
            message: code.default_message().to_string(),
            details: None,
        }
    }

    /// Add additional details to the error.
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    // ========================================================================
    // Convenience constructors for common errors
    // ========================================================================

    /// Create a ValidationFailed error.
    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    /// Create an InvalidInput error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// Create a MissingField error.
    pub fn missing_field(field: &str) -> Self {
        Self::new(
            ErrorCode::MissingField,
            format!("Required field '{}' is missing", field),
        )
    }

    /// Create an InvalidRange error.
    pub fn invalid_range(field: &str, min: impl fmt::Display, max: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::InvalidRange,
            format!("Field '{}' must be between {} and {}", field, min, max),
        )
    }

    /// Create an InvalidFormat error.
    pub fn invalid_format(field: &str, expected: &str) -> Self {
        Self::new(
            ErrorCode::InvalidFormat,
            format!("Field '{}' has invalid format, expected {}", field, expected),
        )
    }

    /// Create a ProtocolViolation error.
    pub fn protocol_violation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ProtocolViolation, message)
    }

    /// Create a SessionNotFound error.
    pub fn session_not_found(session_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SessionNotFound,
            format!("Session {} not found", session_id),
        )
    }

    /// Create an AgentNotFound error.
    pub fn agent_not_found(agent_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::AgentNotFound,
            format!("Agent {} not found", agent_id),
        )
    }

    /// Create a PaperNotFound error.
    pub fn paper_not_found(paper_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::PaperNotFound,
            format!("Paper {} not found", paper_id),
        )
    }

    /// Create a SessionClosed error.
    pub fn session_closed(session_id: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::SessionClosed,
            format!("Session {} is closed", session_id),
        )
    }

    /// Create a CapacityExceeded error.
    pub fn capacity_exceeded(limit: usize) -> Self {
        Self::new(
            ErrorCode::CapacityExceeded,
            format!("Active agent limit of {} reached", limit),
        )
    }

    /// Create a TurnFailed error.
    pub fn turn_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TurnFailed, message)
    }

    /// Create a TurnTimeout error.
    pub fn turn_timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::TurnTimeout, message)
    }

    /// Create an InternalError.
    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    /// Create a ServiceUnavailable error.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

// ============================================================================
// AXUM INTEGRATION
// ============================================================================

/// Implement IntoResponse for ApiError to enable automatic error handling in Axum.
///
/// This allows ApiError to be returned directly from Axum handlers:
/// ```ignore
/// async fn handler() -> Result<Json<Response>, ApiError> {
///     Err(ApiError::session_not_found(session_id))
/// }
/// ```
impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = Json(self);
        (status, body).into_response()
    }
}

// ============================================================================
// CONVERSIONS FROM DOMAIN ERRORS
// ============================================================================

/// Convert from the coordination error taxonomy to ApiError.
impl From<SymposiumError> for ApiError {
    fn from(err: SymposiumError) -> Self {
        match err {
            SymposiumError::Validation(e) => ApiError::from(e),
            SymposiumError::Registry(e) => ApiError::from(e),
            SymposiumError::Session(e) => ApiError::from(e),
            SymposiumError::Turn(e) => ApiError::from(e),
            SymposiumError::Protocol(e) => ApiError::from(e),
            SymposiumError::Config(e) => {
                tracing::error!("Configuration error surfaced in request path: {:?}", e);
                ApiError::internal_error("Invalid server configuration")
            }
            SymposiumError::Model { detail } => {
                tracing::warn!(detail = %detail, "model failure");
                ApiError::turn_failed(detail)
            }
        }
    }
}

impl From<ValidationError> for ApiError {
    fn from(err: ValidationError) -> Self {
        match err {
            ValidationError::RequiredFieldMissing { field } => ApiError::missing_field(&field),
            ValidationError::ParticipantCountOutOfRange { min, max, .. } => {
                ApiError::invalid_range("participant_paper_ids", min, max)
            }
            ValidationError::UnknownConversationType { value } => ApiError::validation_failed(
                format!("Unknown conversation type: {}", value),
            ),
            ValidationError::InvalidContext { paper_id, reason } => ApiError::validation_failed(
                format!("Paper {} cannot back an agent: {}", paper_id, reason),
            ),
            ValidationError::InvalidValue { field, reason } => {
                ApiError::invalid_input(format!("Invalid value for {}: {}", field, reason))
            }
        }
    }
}

impl From<RegistryError> for ApiError {
    fn from(err: RegistryError) -> Self {
        match err {
            RegistryError::CapacityExceeded { limit } => ApiError::capacity_exceeded(limit),
            RegistryError::AgentNotFound { agent_id } => ApiError::agent_not_found(agent_id),
            RegistryError::PaperNotFound { paper_id } => ApiError::paper_not_found(paper_id),
        }
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound { session_id } => ApiError::session_not_found(session_id),
            SessionError::Closed { session_id } => ApiError::session_closed(session_id),
            SessionError::ParticipantsImmutable { session_id } => ApiError::new(
                ErrorCode::SessionClosed,
                format!("Participants of session {} are immutable", session_id),
            ),
        }
    }
}

impl From<TurnError> for ApiError {
    fn from(err: TurnError) -> Self {
        match err {
            TurnError::DeadlineElapsed { .. } => ApiError::turn_timeout(err.to_string()),
            TurnError::TotalTurnFailure { ref failures, .. } => {
                ApiError::turn_failed(err.to_string())
                    .with_details(serde_json::json!({ "failures": failures }))
            }
        }
    }
}

impl From<ProtocolError> for ApiError {
    fn from(err: ProtocolError) -> Self {
        ApiError::protocol_violation(err.to_string())
    }
}

/// Convert from serde_json::Error to ApiError.
impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {:?}", err);
        ApiError::invalid_input(format!("Invalid JSON: {}", err))
    }
}

/// Convert from uuid::Error to ApiError.
impl From<uuid::Error> for ApiError {
    fn from(err: uuid::Error) -> Self {
        ApiError::invalid_format("id", &format!("valid UUID: {}", err))
    }
}

// ============================================================================
// RESULT TYPE ALIAS
// ============================================================================

/// Result type alias for API operations.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use symposium_core::new_entity_id;

    #[test]
    fn test_error_code_status_mapping() {
        assert_eq!(ErrorCode::ValidationFailed.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::ProtocolViolation.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(ErrorCode::SessionNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::PaperNotFound.status_code(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorCode::SessionClosed.status_code(), StatusCode::CONFLICT);
        assert_eq!(ErrorCode::CapacityExceeded.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(ErrorCode::TurnFailed.status_code(), StatusCode::BAD_GATEWAY);
        assert_eq!(ErrorCode::TurnTimeout.status_code(), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(ErrorCode::InternalError.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_api_error_constructors() {
        let id = new_entity_id();
        let err = ApiError::session_not_found(id);
        assert_eq!(err.code, ErrorCode::SessionNotFound);
        assert!(err.message.contains(&id.to_string()));

        let err = ApiError::missing_field("topic");
        assert_eq!(err.code, ErrorCode::MissingField);
        assert!(err.message.contains("topic"));

        let err = ApiError::capacity_exceeded(50);
        assert_eq!(err.status_code(), StatusCode::TOO_MANY_REQUESTS);
        assert!(err.message.contains("50"));
    }

    #[test]
    fn test_domain_error_mapping() {
        let err: ApiError = SymposiumError::from(SessionError::Closed {
            session_id: new_entity_id(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::SessionClosed);

        let err: ApiError = SymposiumError::from(TurnError::DeadlineElapsed {
            session_id: new_entity_id(),
            turn_index: 3,
        })
        .into();
        assert_eq!(err.code, ErrorCode::TurnTimeout);

        let err: ApiError = SymposiumError::from(TurnError::TotalTurnFailure {
            session_id: new_entity_id(),
            turn_index: 1,
            failures: vec!["p1: boom".to_string()],
        })
        .into();
        assert_eq!(err.code, ErrorCode::TurnFailed);
        assert!(err.details.is_some());

        let err: ApiError = SymposiumError::from(RegistryError::PaperNotFound {
            paper_id: "ghost".to_string(),
        })
        .into();
        assert_eq!(err.code, ErrorCode::PaperNotFound);

        let err: ApiError = SymposiumError::from(ValidationError::ParticipantCountOutOfRange {
            count: 9,
            min: 2,
            max: 5,
        })
        .into();
        assert_eq!(err.code, ErrorCode::InvalidRange);
    }

    #[test]
    fn test_error_serialization() -> Result<(), serde_json::Error> {
        let err = ApiError::session_closed(new_entity_id());
        let json = serde_json::to_string(&err)?;

        assert!(json.contains("SESSION_CLOSED"));

        let deserialized: ApiError = serde_json::from_str(&json)?;
        assert_eq!(deserialized, err);
        Ok(())
    }

    #[test]
    fn test_error_display() {
        let err = ApiError::turn_timeout("no responses before the deadline");
        let display = format!("{}", err);

        assert!(display.contains("TurnTimeout"));
        assert!(display.contains("deadline"));
    }
}
