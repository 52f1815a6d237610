// HTTP API Error Types
use axum::{http::StatusCode, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::auth::AuthError;
use crate::database::store::StoreError;
use crate::identity::{IdentityError, Outcome};

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),
    InvalidJson(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 409 Conflict
    Conflict(String),
    WriteConflict(String),

    // 422 Unprocessable Entity, carries the plan limit that was hit
    QuotaExceeded { limit: u32 },

    // 500 Internal Server Error
    InternalServerError(String),

    // 503 Service Unavailable
    ServiceUnavailable(String),
}

impl ApiError {
    /// Get HTTP status code
    pub fn status_code(&self) -> u16 {
        match self {
            ApiError::BadRequest(_) => 400,
            ApiError::InvalidJson(_) => 400,
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::Conflict(_) => 409,
            ApiError::WriteConflict(_) => 409,
            ApiError::QuotaExceeded { .. } => 422,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> String {
        match self {
            ApiError::BadRequest(msg)
            | ApiError::InvalidJson(msg)
            | ApiError::Unauthorized(msg)
            | ApiError::Forbidden(msg)
            | ApiError::NotFound(msg)
            | ApiError::Conflict(msg)
            | ApiError::WriteConflict(msg)
            | ApiError::InternalServerError(msg)
            | ApiError::ServiceUnavailable(msg) => msg.clone(),
            ApiError::QuotaExceeded { limit } => format!("Plan limit of {} reached", limit),
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::InvalidJson(_) => "INVALID_JSON",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Conflict(_) => "CONFLICT",
            ApiError::WriteConflict(_) => "WRITE_CONFLICT",
            ApiError::QuotaExceeded { .. } => "QUOTA_EXCEEDED",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Convert to JSON response body
    pub fn to_json(&self) -> Value {
        let mut body = json!({
            "error": true,
            "message": self.message(),
            "code": self.error_code()
        });
        match self {
            ApiError::QuotaExceeded { limit } => body["limit"] = json!(limit),
            ApiError::WriteConflict(_) => body["retryable"] = json!(true),
            _ => {}
        }
        body
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    /// Generic refusal; never says which ownership check failed
    pub fn forbidden() -> Self {
        ApiError::Forbidden("Not allowed to act on this resource".to_string())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    /// Unwrap an identity outcome, mapping the non-applied cases to errors
    pub fn from_outcome<T>(outcome: Outcome<T>, what: &str) -> Result<T, ApiError> {
        match outcome {
            Outcome::Applied(value) => Ok(value),
            Outcome::NotFound => Err(ApiError::not_found(format!("{} not found", what))),
            Outcome::Unauthorized => Err(ApiError::forbidden()),
            Outcome::QuotaExceeded { limit } => Err(ApiError::QuotaExceeded { limit }),
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::SecretNotConfigured => {
                tracing::error!("JWT secret not configured");
                ApiError::internal_server_error("Authentication is not available")
            }
            other => ApiError::unauthorized(other.to_string()),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Connection(msg) => {
                tracing::error!("Storage connection error: {}", msg);
                ApiError::ServiceUnavailable("Storage temporarily unavailable".to_string())
            }
            other => {
                // Don't expose storage details to clients
                tracing::error!("Storage error: {}", other);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

impl From<IdentityError> for ApiError {
    fn from(err: IdentityError) -> Self {
        match err {
            IdentityError::WriteConflict(msg) => {
                tracing::warn!("Write conflict surfaced to client: {}", msg);
                ApiError::WriteConflict("The resource changed concurrently, please retry".to_string())
            }
            IdentityError::Storage(e) => e.into(),
            IdentityError::InvalidInput(msg) => ApiError::bad_request(msg),
            IdentityError::Document(e) => ApiError::bad_request(e.to_string()),
            IdentityError::AlreadyOwnsTenant => ApiError::Conflict(err.to_string()),
            IdentityError::SlugTaken(_) => ApiError::Conflict(err.to_string()),
            IdentityError::SlugUnavailable(_) => ApiError::Conflict(err.to_string()),
            IdentityError::Blob(crate::blob::BlobError::InvalidName(name)) => {
                ApiError::bad_request(format!("Invalid image name: {}", name))
            }
            IdentityError::Blob(e) => {
                tracing::error!("Blob storage error: {}", e);
                ApiError::internal_server_error("Failed to store image")
            }
            IdentityError::Catalog(e) => {
                tracing::error!("Plan catalog error: {}", e);
                ApiError::internal_server_error("An error occurred while processing your request")
            }
        }
    }
}

// Standard error trait implementations
impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message())
    }
}

impl std::error::Error for ApiError {}

// Automatic HTTP response conversion for Axum
impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let status = StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        (status, Json(self.to_json())).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_body_carries_limit() {
        let body = ApiError::QuotaExceeded { limit: 2 }.to_json();
        assert_eq!(body["code"], "QUOTA_EXCEEDED");
        assert_eq!(body["limit"], 2);
    }

    #[test]
    fn test_storage_details_are_hidden() {
        let err: ApiError = IdentityError::Storage(StoreError::Backend("relation documents missing".to_string())).into();
        assert_eq!(err.status_code(), 500);
        assert!(!err.message().contains("documents"));
    }
}
