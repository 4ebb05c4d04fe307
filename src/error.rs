//! # Error Handling
//!
//! Domain error taxonomy for the alert pipeline plus the unified API error that renders
//! them as `application/problem+json` with trace ID propagation.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::{Alert, AlertStatus};
use crate::telemetry;

/// Errors surfaced by ingestion and the lifecycle engine.
#[derive(Debug, Error)]
pub enum AlertError {
    /// Malformed event or score; fatal, the caller must fix the input.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Transient store failure; retry with backoff. Nothing was persisted.
    #[error("alert store unavailable: {0}")]
    StoreUnavailable(String),
    /// Optimistic concurrency mismatch; carries the authoritative alert.
    #[error("version conflict: expected {expected}, current {}", .current.version)]
    Conflict { expected: i64, current: Box<Alert> },
    #[error("transition from {from} to {to} is not allowed")]
    InvalidTransition { from: AlertStatus, to: AlertStatus },
    #[error("viewer is not authorized for this alert")]
    Forbidden,
    #[error("alert {0} not found")]
    NotFound(Uuid),
}

impl AlertError {
    /// Whether a caller may retry the same request unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AlertError::StoreUnavailable(_))
    }
}

/// Errors produced behind the alert store boundary. Raw storage errors never cross it.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("store operation timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(error: sea_orm::DbErr) -> Self {
        tracing::warn!(?error, "Alert store operation failed");
        StoreError::Unavailable(error.to_string())
    }
}

impl From<StoreError> for AlertError {
    fn from(error: StoreError) -> Self {
        AlertError::StoreUnavailable(error.to_string())
    }
}

/// Per-session push failure. Always handled inside the dispatcher.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum DeliveryFailure {
    #[error("session transport closed")]
    Closed,
    #[error("session send timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
    #[error("session delivery cancelled")]
    Cancelled,
}

/// Unified API error response structure
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    /// HTTP status code for the response
    #[serde(skip_serializing, skip_deserializing)]
    pub status: StatusCode,
    /// Error code for programmatic handling
    pub code: Box<str>,
    /// Human-readable error message
    pub message: Box<str>,
    /// Additional error details (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds (optional)
    pub retry_after: Option<u64>,
    /// Correlation trace ID for debugging (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    /// Create a new API error with the given status code and message
    pub fn new<S: Into<String>>(status: StatusCode, code: S, message: S) -> Self {
        Self {
            status,
            code: code.into().into_boxed_str(),
            message: message.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: Self::current_trace_id(),
        }
    }

    /// Add details to the error
    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    /// Set retry after delay
    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }

    pub fn not_found(message: &str) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn internal_server_error(message: &str) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            message,
        )
    }

    /// Extract current trace ID from the active tracing span (falls back to generated correlation ID)
    fn current_trace_id() -> Option<Box<str>> {
        telemetry::current_trace_id()
            .map(|trace_id| trace_id.into_boxed_str())
            .or_else(|| {
                Some(format!("corr-{}", &uuid::Uuid::new_v4().to_string()[..8]).into_boxed_str())
            })
    }
}

/// Detects unique-constraint violations across the supported backends.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::{RuntimeErr, SqlErr};

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    if matches!(error.sql_err(), Some(SqlErr::UniqueConstraintViolation(_))) {
        return true;
    }

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        if code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str) {
            return true;
        }
    }

    false
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert(
            "content-type",
            HeaderValue::from_static("application/problem+json"),
        );

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

impl From<AlertError> for ApiError {
    fn from(error: AlertError) -> Self {
        match error {
            AlertError::InvalidInput(message) => {
                Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
            }
            AlertError::StoreUnavailable(message) => {
                tracing::error!(error = %message, "Alert store unavailable");
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Alert store unavailable",
                )
                .with_retry_after(1)
            }
            AlertError::Conflict { expected, current } => {
                let message = format!(
                    "Alert was modified concurrently (expected version {}, current {})",
                    expected, current.version
                );
                let details = serde_json::json!({ "current": *current });
                Self::new(StatusCode::CONFLICT, "CONFLICT", &message).with_details(details)
            }
            AlertError::InvalidTransition { from, to } => Self::new(
                StatusCode::UNPROCESSABLE_ENTITY,
                "INVALID_TRANSITION",
                &format!("Transition from {} to {} is not allowed", from, to),
            )
            .with_details(serde_json::json!({ "from": from, "to": to })),
            AlertError::Forbidden => forbidden(Some("Not authorized for this alert")),
            AlertError::NotFound(id) => Self::not_found(&format!("Alert {} not found", id)),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::internal_server_error("An internal error occurred")
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", &message)
    }
}

/// Create an unauthorized error (401)
pub fn unauthorized(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Authentication required");
    ApiError::new(StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg)
}

/// Create a forbidden error (403)
pub fn forbidden(message: Option<&str>) -> ApiError {
    let msg = message.unwrap_or("Insufficient permissions");
    ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", msg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Severity;
    use serde_json::json;

    fn sample_alert(version: i64) -> Alert {
        let now = chrono::Utc::now().into();
        Alert {
            id: Uuid::new_v4(),
            source_event_id: "evt-1".to_string(),
            tenant_scope: Uuid::new_v4(),
            owner_id: None,
            severity: Severity::High,
            score: 0.9,
            status: AlertStatus::Investigating,
            assignee: Some("analyst-1".to_string()),
            version,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_api_error_basic() {
        let error = ApiError::new(
            StatusCode::BAD_REQUEST,
            "VALIDATION_FAILED",
            "Test error message",
        );

        assert_eq!(error.code, Box::from("VALIDATION_FAILED"));
        assert_eq!(error.message, Box::from("Test error message"));
        assert_eq!(error.details, None);
        assert_eq!(error.retry_after, None);
    }

    #[test]
    fn test_content_type_header() {
        let error = ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", "Test error");

        let response = error.into_response();

        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/problem+json"
        );
    }

    #[test]
    fn test_trace_id_generation() {
        let error = ApiError::internal_server_error("Test error");

        let trace_id = error.trace_id.unwrap();
        assert!(trace_id.starts_with("corr-"));
        assert_eq!(trace_id.len(), 13);
    }

    #[test]
    fn conflict_carries_current_alert() {
        let current = sample_alert(2);
        let api_error: ApiError = AlertError::Conflict {
            expected: 1,
            current: Box::new(current.clone()),
        }
        .into();

        assert_eq!(api_error.status, StatusCode::CONFLICT);
        assert_eq!(api_error.code, Box::from("CONFLICT"));
        let details = api_error.details.unwrap();
        assert_eq!(details["current"]["version"], json!(2));
        assert_eq!(details["current"]["id"], json!(current.id));
    }

    #[test]
    fn store_unavailable_sets_retry_after() {
        let api_error: ApiError = AlertError::StoreUnavailable("pool timed out".into()).into();
        assert_eq!(api_error.status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(api_error.retry_after, Some(1));
        // Raw store messages stay in the logs
        assert!(!api_error.message.contains("pool"));

        let response = api_error.into_response();
        assert_eq!(response.headers().get("retry-after").unwrap(), "1");
    }

    #[test]
    fn forbidden_is_distinct_from_not_found() {
        let forbidden: ApiError = AlertError::Forbidden.into();
        let missing: ApiError = AlertError::NotFound(Uuid::new_v4()).into();

        assert_eq!(forbidden.status, StatusCode::FORBIDDEN);
        assert_eq!(missing.status, StatusCode::NOT_FOUND);
    }

    #[test]
    fn invalid_transition_maps_to_unprocessable() {
        let api_error: ApiError = AlertError::InvalidTransition {
            from: AlertStatus::Resolved,
            to: AlertStatus::Open,
        }
        .into();

        assert_eq!(api_error.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(api_error.code, Box::from("INVALID_TRANSITION"));
        assert_eq!(api_error.details.unwrap()["from"], json!("resolved"));
    }

    #[test]
    fn only_store_unavailable_is_retryable() {
        assert!(AlertError::StoreUnavailable("down".into()).is_retryable());
        assert!(!AlertError::InvalidInput("nan".into()).is_retryable());
        assert!(!AlertError::Forbidden.is_retryable());
    }

    #[test]
    fn db_errors_are_mapped_behind_the_store_boundary() {
        let store_error: StoreError = sea_orm::DbErr::Custom("socket closed".into()).into();
        assert!(matches!(store_error, StoreError::Unavailable(_)));

        let alert_error: AlertError = StoreError::Timeout { timeout_ms: 50 }.into();
        assert!(matches!(alert_error, AlertError::StoreUnavailable(_)));
    }

    #[test]
    fn test_auth_error_helpers() {
        let auth_error = unauthorized(None);
        assert_eq!(auth_error.status, StatusCode::UNAUTHORIZED);
        assert_eq!(auth_error.message, Box::from("Authentication required"));

        let forbidden_error = forbidden(Some("Admin access required"));
        assert_eq!(forbidden_error.status, StatusCode::FORBIDDEN);
        assert_eq!(forbidden_error.message, Box::from("Admin access required"));
    }
}
