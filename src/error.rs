// HTTP API Error Types
use axum::{
    http::{header, HeaderValue, StatusCode},
    response::IntoResponse,
    Json,
};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

/// Field name -> list of messages, rendered as `fieldErrors` in the problem body
pub type FieldErrors = BTreeMap<String, Vec<String>>;

/// HTTP API error with appropriate status codes and client-friendly messages
#[derive(Debug, Clone)]
pub enum ApiError {
    // 400 Bad Request
    BadRequest(String),

    // 401 Unauthorized
    Unauthorized(String),

    // 403 Forbidden
    Forbidden(String),

    // 404 Not Found
    NotFound(String),

    // 422 Unprocessable Entity (validation failure on write)
    UnprocessableEntity {
        message: String,
        field_errors: FieldErrors,
    },

    // 429 Too Many Requests
    RateLimited {
        message: String,
        retry_after: u64,
    },

    // 500 - misconfigured resource, field, callback or plugin
    ServerConfiguration(String),

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
            ApiError::Unauthorized(_) => 401,
            ApiError::Forbidden(_) => 403,
            ApiError::NotFound(_) => 404,
            ApiError::UnprocessableEntity { .. } => 422,
            ApiError::RateLimited { .. } => 429,
            ApiError::ServerConfiguration(_) => 500,
            ApiError::InternalServerError(_) => 500,
            ApiError::ServiceUnavailable(_) => 503,
        }
    }

    /// Get client-safe error message
    pub fn message(&self) -> &str {
        match self {
            ApiError::BadRequest(msg) => msg,
            ApiError::Unauthorized(msg) => msg,
            ApiError::Forbidden(msg) => msg,
            ApiError::NotFound(msg) => msg,
            ApiError::UnprocessableEntity { message, .. } => message,
            ApiError::RateLimited { message, .. } => message,
            ApiError::ServerConfiguration(msg) => msg,
            ApiError::InternalServerError(msg) => msg,
            ApiError::ServiceUnavailable(msg) => msg,
        }
    }

    /// Get error code for client handling
    pub fn error_code(&self) -> &'static str {
        match self {
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::UnprocessableEntity { .. } => "UNPROCESSABLE_ENTITY",
            ApiError::RateLimited { .. } => "TOO_MANY_REQUESTS",
            ApiError::ServerConfiguration(_) => "SERVER_CONFIGURATION",
            ApiError::InternalServerError(_) => "INTERNAL_SERVER_ERROR",
            ApiError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
        }
    }

    /// Help URI describing this class of problem
    pub fn instance(&self) -> Option<&'static str> {
        match self {
            ApiError::BadRequest(_) => Some("https://tools.ietf.org/html/rfc7231#section-6.5.1"),
            ApiError::Unauthorized(_) => Some("https://tools.ietf.org/html/rfc7235#section-3.1"),
            ApiError::Forbidden(_) => Some("https://tools.ietf.org/html/rfc7231#section-6.5.3"),
            ApiError::NotFound(_) => Some("https://tools.ietf.org/html/rfc7231#section-6.5.4"),
            ApiError::UnprocessableEntity { .. } => {
                Some("https://tools.ietf.org/html/rfc4918#section-11.2")
            }
            ApiError::RateLimited { .. } => Some("https://tools.ietf.org/html/rfc6585#section-4"),
            ApiError::ServiceUnavailable(_) => {
                Some("https://tools.ietf.org/html/rfc7231#section-6.6.4")
            }
            ApiError::ServerConfiguration(_) | ApiError::InternalServerError(_) => None,
        }
    }

    /// Seconds a rate-limited client should wait before retrying
    pub fn retry_after(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited { retry_after, .. } => Some(*retry_after),
            _ => None,
        }
    }

    pub fn field_errors(&self) -> Option<&FieldErrors> {
        match self {
            ApiError::UnprocessableEntity { field_errors, .. } => Some(field_errors),
            _ => None,
        }
    }

    /// Convert to the machine-readable problem body
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("code".into(), json!(self.status_code()));
        body.insert("title".into(), json!(self.error_code()));
        body.insert("message".into(), json!(self.message()));
        if let Some(instance) = self.instance() {
            body.insert("instance".into(), json!(instance));
        }
        body.insert(
            "fieldErrors".into(),
            json!(self.field_errors().cloned().unwrap_or_default()),
        );
        Value::Object(body)
    }
}

// Static constructor methods
impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }

    pub fn unprocessable_entity(message: impl Into<String>, field_errors: FieldErrors) -> Self {
        ApiError::UnprocessableEntity {
            message: message.into(),
            field_errors,
        }
    }

    pub fn rate_limited(message: impl Into<String>, retry_after: u64) -> Self {
        ApiError::RateLimited {
            message: message.into(),
            retry_after: retry_after.max(1),
        }
    }

    pub fn server_configuration(message: impl Into<String>) -> Self {
        ApiError::ServerConfiguration(message.into())
    }

    pub fn internal_server_error(message: impl Into<String>) -> Self {
        ApiError::InternalServerError(message.into())
    }

    pub fn service_unavailable(message: impl Into<String>) -> Self {
        ApiError::ServiceUnavailable(message.into())
    }
}

// Convert other error types to ApiError
impl From<crate::database::manager::DatabaseError> for ApiError {
    fn from(err: crate::database::manager::DatabaseError) -> Self {
        use crate::database::manager::DatabaseError;
        match err {
            DatabaseError::ConfigMissing(name) => {
                ApiError::server_configuration(format!("Missing configuration: {}", name))
            }
            DatabaseError::InvalidDatabaseUrl | DatabaseError::InvalidIdentifier(_) => {
                tracing::error!("Database configuration error: {}", err);
                ApiError::server_configuration("Database is misconfigured")
            }
            DatabaseError::Sqlx(sqlx::Error::PoolTimedOut)
            | DatabaseError::Sqlx(sqlx::Error::Io(_)) => {
                ApiError::service_unavailable("Database temporarily unavailable")
            }
            DatabaseError::Sqlx(sqlx_err) => {
                // Log the real error but return generic message
                tracing::error!("SQLx error: {}", sqlx_err);
                ApiError::internal_server_error("Database error occurred")
            }
        }
    }
}

impl From<serde_json::Error> for ApiError {
    fn from(err: serde_json::Error) -> Self {
        tracing::error!("JSON serialization error: {}", err);
        ApiError::internal_server_error("Failed to format response")
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
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let mut response = (status, Json(self.to_json())).into_response();
        if let Some(seconds) = self.retry_after() {
            if let Ok(value) = HeaderValue::from_str(&seconds.to_string()) {
                response.headers_mut().insert(header::RETRY_AFTER, value);
            }
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn problem_body_carries_field_errors() {
        let mut errors = FieldErrors::new();
        errors.insert("label".into(), vec!["This field is required".into()]);
        let err = ApiError::unprocessable_entity("Invalid input", errors);

        let body = err.to_json();
        assert_eq!(body["code"], 422);
        assert_eq!(body["message"], "Invalid input");
        assert_eq!(body["fieldErrors"]["label"][0], "This field is required");
        assert!(body["instance"].is_string());
    }

    #[test]
    fn rate_limited_sets_retry_after_header() {
        let response = ApiError::rate_limited("slow down", 42).into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
    }

    #[test]
    fn retry_after_never_zero() {
        assert_eq!(ApiError::rate_limited("x", 0).retry_after(), Some(1));
    }

    #[test]
    fn configuration_faults_are_server_errors() {
        let err = ApiError::server_configuration("unknown callback 'nope'");
        assert_eq!(err.status_code(), 500);
        assert_eq!(err.to_json()["fieldErrors"], json!({}));
    }
}
