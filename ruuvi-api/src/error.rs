//! HTTP error responses.
//!
//! Every failure leaves the API as a JSON body `{"code", "message"}` (plus
//! `details` for range errors) with the status implied by the code. Engine
//! errors are converted here so handlers can use `?` throughout.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use ruuvi_core::{ConfigError, RuuviError};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// Machine-readable failure category, serialized as `SCREAMING_SNAKE_CASE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// Missing or unknown bearer token.
    Forbidden,
    /// The engine refused the arguments, e.g. `n < 1`.
    ValidationFailed,
    /// A query parameter could not be parsed.
    InvalidInput,
    /// A numeric parameter is outside its accepted bounds.
    InvalidRange,
    /// Requested columns are unknown or leave out time or identity.
    InvalidColumn,
    InternalError,
    /// Store or decode failure; the cause is only logged.
    DatabaseError,
    /// Too many requests already in flight.
    ServiceUnavailable,
    /// The request deadline passed before the store answered.
    Timeout,
}

impl ErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::ValidationFailed
            | Self::InvalidInput
            | Self::InvalidRange
            | Self::InvalidColumn => StatusCode::BAD_REQUEST,
            Self::InternalError | Self::DatabaseError => StatusCode::INTERNAL_SERVER_ERROR,
            Self::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Timeout => StatusCode::GATEWAY_TIMEOUT,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// JSON error body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    pub code: ErrorCode,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            details: None,
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.code.status_code()
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Forbidden, message)
    }

    pub fn validation_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ValidationFailed, message)
    }

    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidInput, message)
    }

    /// `field` outside `min..=max`; the bounds are repeated in `details`.
    pub fn invalid_range(field: &str, min: i64, max: i64) -> Self {
        Self {
            details: Some(json!({ "field": field, "min": min, "max": max })),
            ..Self::new(
                ErrorCode::InvalidRange,
                format!("{} must be between {} and {}", field, min, max),
            )
        }
    }

    pub fn invalid_column(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidColumn, message)
    }

    pub fn internal_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }

    pub fn database_error(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ServiceUnavailable, message)
    }

    pub fn timeout(operation: &str) -> Self {
        Self::new(
            ErrorCode::Timeout,
            format!("{} did not finish before the deadline", operation),
        )
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self)).into_response()
    }
}

/// Client-caused failures keep their message. Store and decode failures are
/// logged in full and returned as a generic database error.
impl From<RuuviError> for ApiError {
    fn from(err: RuuviError) -> Self {
        match err.root() {
            RuuviError::InvalidColumn(e) => ApiError::invalid_column(e.to_string()),
            RuuviError::Validation(e) => ApiError::validation_failed(e.to_string()),
            RuuviError::DeadlineExceeded => ApiError::timeout("latest"),
            RuuviError::Config(e) => {
                tracing::error!(error = %err, "Configuration error");
                ApiError::internal_error(e.to_string())
            }
            RuuviError::Decode(_) | RuuviError::Connection(_) | RuuviError::Device { .. } => {
                tracing::error!(error = %err, "Database error");
                ApiError::database_error("Database operation failed")
            }
        }
    }
}

impl From<ConfigError> for ApiError {
    fn from(err: ConfigError) -> Self {
        ApiError::from(RuuviError::Config(err))
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!(error = %err, "Response serialization failed");
        ApiError::internal_error(format!("Failed to serialize response: {}", err))
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use ruuvi_core::{ConnectionError, InvalidColumnError, ValidationError};

    #[test]
    fn test_status_per_code() {
        let cases = [
            (ErrorCode::Forbidden, StatusCode::FORBIDDEN),
            (ErrorCode::InvalidInput, StatusCode::BAD_REQUEST),
            (ErrorCode::InvalidColumn, StatusCode::BAD_REQUEST),
            (ErrorCode::DatabaseError, StatusCode::INTERNAL_SERVER_ERROR),
            (ErrorCode::ServiceUnavailable, StatusCode::SERVICE_UNAVAILABLE),
            (ErrorCode::Timeout, StatusCode::GATEWAY_TIMEOUT),
        ];
        for (code, status) in cases {
            assert_eq!(code.status_code(), status, "{}", code);
        }
    }

    #[test]
    fn test_range_error_carries_bounds() -> Result<(), serde_json::Error> {
        let err = ApiError::invalid_range("n", 1, 1000);
        assert_eq!(err.message, "n must be between 1 and 1000");
        assert_eq!(
            serde_json::to_value(&err)?,
            serde_json::json!({
                "code": "INVALID_RANGE",
                "message": "n must be between 1 and 1000",
                "details": {"field": "n", "min": 1, "max": 1000}
            })
        );
        Ok(())
    }

    #[test]
    fn test_invalid_column_maps_to_bad_request() {
        let err = RuuviError::from(InvalidColumnError::Unknown {
            column: "co2".to_string(),
        })
        .for_device("Kitchen");
        let api: ApiError = err.into();
        assert_eq!(api.code, ErrorCode::InvalidColumn);
        assert_eq!(api.status_code(), StatusCode::BAD_REQUEST);
        assert!(api.message.contains("co2"));
    }

    #[test]
    fn test_deadline_maps_to_gateway_timeout() {
        let api: ApiError = RuuviError::DeadlineExceeded.for_device("Sauna").into();
        assert_eq!(api.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn test_validation_maps_to_bad_request() {
        let api: ApiError = RuuviError::from(ValidationError::LimitTooSmall { n: 0 }).into();
        assert_eq!(api.code, ErrorCode::ValidationFailed);
    }

    #[test]
    fn test_store_failure_is_generic() {
        let err = RuuviError::from(ConnectionError::lost("server closed the connection"));
        let api: ApiError = err.into();
        assert_eq!(api.code, ErrorCode::DatabaseError);
        assert_eq!(api.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!api.message.contains("server closed"));
    }

    #[test]
    fn test_body_without_details() -> Result<(), serde_json::Error> {
        let body = serde_json::to_value(ApiError::forbidden("Invalid or missing bearer token"))?;
        assert_eq!(
            body,
            serde_json::json!({"code": "FORBIDDEN", "message": "Invalid or missing bearer token"})
        );
        Ok(())
    }

    #[test]
    fn test_display_names_code() {
        let err = ApiError::timeout("latest");
        assert_eq!(err.to_string(), "Timeout: latest did not finish before the deadline");
    }
}
