use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use std::error::Error;
use std::fmt;

/// The primary error type for the application.
///
/// Every handler returns [`AppResult`], so the variant chosen here decides the
/// HTTP status the client sees.
#[derive(Debug)]
pub enum AppError {
    /// For internal server errors that are not expected to be handled by the client.
    Internal(anyhow::Error),
    /// For requests that break a business rule (unavailable copy, wrong status, ...).
    BadRequest(String),
    /// For when a requested resource is not found.
    NotFound(String),
    /// For when a request conflicts with existing rows (duplicates, references).
    Conflict(String),
    /// For when a service is temporarily unavailable.
    ServiceUnavailable(String),
    /// For errors related to database operations.
    Database(String),
    /// For when user input is invalid.
    InvalidInput(String),
    /// For when the caller is not logged in or the token is invalid.
    Unauthorized(String),
    /// For when the caller is logged in but lacks the role.
    Forbidden(String),
    /// For failures talking to the payment gateway.
    Gateway(String),
    /// For when a client has sent too many requests in a given amount of time.
    RateLimited {
        /// The number of seconds to wait before retrying the request.
        retry_after_seconds: u64,
    },
    /// For when a specific field in a request fails validation.
    ValidationError {
        /// The name of the field that failed validation.
        field: String,
        /// A message describing the validation error.
        message: String,
    },
    /// For errors related to I/O operations.
    IoError(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(e) => write!(f, "Internal error: {}", e),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            AppError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {}", msg),
            AppError::Database(msg) => write!(f, "Database error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            AppError::Gateway(msg) => write!(f, "Payment gateway error: {}", msg),
            AppError::RateLimited { retry_after_seconds } => {
                write!(f, "Rate limited. Retry after {} seconds", retry_after_seconds)
            }
            AppError::ValidationError { field, message } => {
                write!(f, "Validation error on field '{}': {}", field, message)
            }
            AppError::IoError(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl Error for AppError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            AppError::Internal(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_code, error_message, details) = match self {
            AppError::Internal(e) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg, None),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg, None),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg, None),
            AppError::ServiceUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg, None)
            }
            AppError::Database(msg) => {
                let error_id = uuid::Uuid::new_v4();
                tracing::error!(%error_id, "Database error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                    Some(json!({ "error_id": error_id.to_string() })),
                )
            }
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, "INVALID_INPUT", msg, None),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg, None),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg, None),
            AppError::Gateway(msg) => {
                tracing::warn!("Payment gateway error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    "GATEWAY_ERROR",
                    "The payment gateway could not be reached".to_string(),
                    Some(json!({ "details": msg })),
                )
            }
            AppError::RateLimited { retry_after_seconds } => (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                format!("Too many requests. Please retry after {} seconds", retry_after_seconds),
                Some(json!({ "retry_after_seconds": retry_after_seconds })),
            ),
            AppError::ValidationError { field, message } => (
                StatusCode::BAD_REQUEST,
                "VALIDATION_ERROR",
                format!("Validation failed for field '{}'", field),
                Some(json!({ "field": field, "message": message })),
            ),
            AppError::IoError(msg) => {
                tracing::error!("I/O error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "IO_ERROR",
                    "An I/O error occurred".to_string(),
                    None,
                )
            }
        };

        let mut body = json!({
            "error": {
                "code": error_code,
                "message": error_message,
            },
            "status": status.as_u16(),
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });

        if let Some(details) = details {
            body["error"]["details"] = details;
        }

        (status, Json(body)).into_response()
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err)
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => AppError::NotFound("Record not found".to_string()),
            sqlx::Error::Database(db_err) => {
                if db_err.is_unique_violation() {
                    AppError::Conflict(format!("Duplicate value: {}", db_err.message()))
                } else if db_err.is_foreign_key_violation() {
                    AppError::Conflict("Record is still referenced by other records".to_string())
                } else if matches!(db_err.code().as_deref(), Some("5" | "517")) {
                    // SQLITE_BUSY, SQLITE_BUSY_SNAPSHOT
                    AppError::Conflict("The record was changed concurrently, please retry".to_string())
                } else {
                    AppError::Database(format!("Database error: {}", db_err.message()))
                }
            }
            sqlx::Error::PoolTimedOut => {
                AppError::ServiceUnavailable("Database connection pool timed out".to_string())
            }
            _ => AppError::Database(format!("Database error: {}", err)),
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(format!("{}: {}", err.kind(), err))
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        use jsonwebtoken::errors::ErrorKind;
        match err.kind() {
            ErrorKind::ExpiredSignature => AppError::Unauthorized("Token expired".to_string()),
            ErrorKind::InvalidToken | ErrorKind::InvalidSignature | ErrorKind::Base64(_) | ErrorKind::Json(_) => {
                AppError::Unauthorized("Invalid token".to_string())
            }
            _ => AppError::Internal(anyhow::anyhow!("jwt error: {}", err)),
        }
    }
}

impl From<bcrypt::BcryptError> for AppError {
    fn from(err: bcrypt::BcryptError) -> Self {
        AppError::Internal(anyhow::anyhow!("password hashing failed: {}", err))
    }
}

impl From<rust_xlsxwriter::XlsxError> for AppError {
    fn from(err: rust_xlsxwriter::XlsxError) -> Self {
        AppError::Internal(anyhow::anyhow!("xlsx export failed: {}", err))
    }
}

impl From<crate::payment::sepay::GatewayError> for AppError {
    fn from(err: crate::payment::sepay::GatewayError) -> Self {
        AppError::Gateway(err.to_string())
    }
}

/// A type alias for `Result<T, AppError>`, used throughout the application.
pub type AppResult<T> = Result<T, AppError>;

/// An extension trait for `Option` that provides a convenient way to convert
/// an `Option` to a `Result` with a `NotFound` error.
pub trait OptionExt<T> {
    /// Converts an `Option<T>` to a `Result<T, AppError>`.
    ///
    /// # Arguments
    ///
    /// * `entity` - A string describing the entity that was not found.
    fn ok_or_not_found(self, entity: &str) -> AppResult<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn ok_or_not_found(self, entity: &str) -> AppResult<T> {
        self.ok_or_else(|| AppError::NotFound(format!("{} not found", entity)))
    }
}

/// Helpers for validating request payloads.
pub mod validation {
    use super::*;

    /// Trims `value` and checks it is non-empty and at most `max_len` characters.
    ///
    /// Returns the trimmed string so callers store the normalized form.
    pub fn required_text(value: &str, field: &str, max_len: usize) -> AppResult<String> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::ValidationError {
                field: field.to_string(),
                message: "Value cannot be empty".to_string(),
            });
        }
        if trimmed.chars().count() > max_len {
            return Err(AppError::ValidationError {
                field: field.to_string(),
                message: format!("Value must be at most {} characters", max_len),
            });
        }
        Ok(trimmed.to_string())
    }

    /// Like [`required_text`] but for optional fields; blank strings become `None`.
    pub fn optional_text(value: Option<&str>, field: &str, max_len: usize) -> AppResult<Option<String>> {
        match value.map(str::trim) {
            None | Some("") => Ok(None),
            Some(v) => required_text(v, field, max_len).map(Some),
        }
    }

    /// Validates that a number is zero or positive.
    pub fn validate_non_negative(value: Option<i64>, field: &str) -> AppResult<()> {
        if let Some(v) = value {
            if v < 0 {
                return Err(AppError::ValidationError {
                    field: field.to_string(),
                    message: format!("Value must not be negative, got {}", v),
                });
            }
        }
        Ok(())
    }

    /// Very small shape check: one '@', something before it, a dot after it.
    pub fn validate_email(value: Option<&str>) -> AppResult<()> {
        if let Some(email) = value.map(str::trim).filter(|v| !v.is_empty()) {
            let valid = match email.split_once('@') {
                Some((local, domain)) => {
                    !local.is_empty()
                        && !domain.contains('@')
                        && domain.contains('.')
                        && !domain.starts_with('.')
                        && !domain.ends_with('.')
                        && !email.contains(char::is_whitespace)
                }
                None => false,
            };
            if !valid {
                return Err(AppError::ValidationError {
                    field: "email".to_string(),
                    message: format!("'{}' is not a valid email address", email),
                });
            }
        }
        Ok(())
    }

    /// Password policy for accounts.
    pub fn validate_password(password: &str) -> AppResult<()> {
        if password.chars().count() < 6 {
            return Err(AppError::ValidationError {
                field: "password".to_string(),
                message: "Password must be at least 6 characters".to_string(),
            });
        }
        if password.len() > 72 {
            // bcrypt ignores everything after 72 bytes
            return Err(AppError::ValidationError {
                field: "password".to_string(),
                message: "Password must be at most 72 bytes".to_string(),
            });
        }
        Ok(())
    }
}
