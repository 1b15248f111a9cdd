//! # Error Handling
//!
//! Unified HTTP error envelope with trace id propagation, plus the error type returned by
//! sync orchestration.

use axum::{
    extract::rejection::JsonRejection,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
};
use sea_orm::DbErr;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use utoipa::ToSchema;

use crate::models::sync_state::{SyncStateView, SyncType};
use crate::queue::QueueError;
use crate::source::SourceError;
use crate::telemetry;

/// Error body returned by every failing route
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Always `false`; mirrors the success envelope
    pub success: bool,
    /// Human-readable error message
    #[serde(rename = "error")]
    pub message: Box<str>,
    /// Error code for programmatic handling
    pub code: Box<str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Box<serde_json::Value>>,
    /// Suggested retry delay in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<Box<str>>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            status,
            success: false,
            message: message.into().into_boxed_str(),
            code: code.into().into_boxed_str(),
            details: None,
            retry_after: None,
            trace_id: telemetry::current_trace_id().map(String::into_boxed_str),
        }
    }

    pub fn with_details<V: Into<serde_json::Value>>(mut self, details: V) -> Self {
        self.details = Some(Box::new(details.into()));
        self
    }

    pub fn with_retry_after(mut self, seconds: u64) -> Self {
        self.retry_after = Some(seconds);
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));

        if let Some(retry_after) = self.retry_after
            && let Ok(header_value) = HeaderValue::from_str(&retry_after.to_string())
        {
            headers.insert("retry-after", header_value);
        }

        (self.status, headers, axum::Json(self)).into_response()
    }
}

/// Failures surfaced by sync orchestration
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("A {sync_type} sync is already in progress for store {store_id}")]
    AlreadyInProgress {
        store_id: String,
        sync_type: SyncType,
        state: Box<SyncStateView>,
    },

    #[error("Invalid sync options: {0}")]
    InvalidOptions(String),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Storage error: {0}")]
    Storage(#[from] DbErr),

    #[error("Queue error: {0}")]
    Queue(#[from] QueueError),
}

impl From<anyhow::Error> for ApiError {
    fn from(error: anyhow::Error) -> Self {
        tracing::error!("Internal error: {:?}", error);

        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INTERNAL_SERVER_ERROR",
            "An internal error occurred",
        )
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        let message = match rejection {
            JsonRejection::JsonDataError(err) => format!("Invalid JSON: {}", err.body_text()),
            JsonRejection::JsonSyntaxError(err) => format!("JSON syntax error: {}", err),
            JsonRejection::MissingJsonContentType(_) => {
                "Missing 'Content-Type: application/json' header".to_string()
            }
            _ => "Invalid request body".to_string(),
        };

        Self::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message)
    }
}

impl From<DbErr> for ApiError {
    fn from(error: DbErr) -> Self {
        match error {
            DbErr::RecordNotFound(record) => Self::new(
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                format!("Record not found: {}", record),
            ),
            DbErr::Conn(connection_err) => {
                tracing::error!("Database connection error: {:?}", connection_err);
                Self::new(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "SERVICE_UNAVAILABLE",
                    "Database service unavailable",
                )
            }
            other => {
                tracing::error!("Database error: {:?}", other);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Database error occurred",
                )
            }
        }
    }
}

impl From<QueueError> for ApiError {
    fn from(error: QueueError) -> Self {
        match error {
            QueueError::Storage(db) => db.into(),
            QueueError::Payload(err) => {
                tracing::error!("Queue payload error: {:?}", err);
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_SERVER_ERROR",
                    "Queue payload could not be encoded",
                )
            }
        }
    }
}

impl From<SyncError> for ApiError {
    fn from(error: SyncError) -> Self {
        match error {
            SyncError::AlreadyInProgress { ref state, .. } => {
                let details = serde_json::to_value(state.as_ref()).unwrap_or_default();
                conflict(&error.to_string()).with_details(json!({ "state": details }))
            }
            SyncError::InvalidOptions(message) => {
                validation_error(&message, json!({ "field": "options" }))
            }
            SyncError::Source(source) => {
                let retry_after = match &source {
                    SourceError::RateLimited { retry_after } => Some(*retry_after),
                    _ => None,
                };
                let status = match &source {
                    SourceError::Api { status, .. } => Some(*status),
                    _ => None,
                };
                let mut api = ApiError::new(StatusCode::BAD_GATEWAY, "SOURCE_ERROR", source.to_string())
                    .with_details(json!({ "upstream_status": status }));
                if let Some(seconds) = retry_after {
                    api = api.with_retry_after(seconds);
                }
                api
            }
            SyncError::Storage(db) => db.into(),
            SyncError::Queue(queue) => queue.into(),
        }
    }
}

pub fn not_found(message: &str) -> ApiError {
    ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
}

pub fn conflict(message: &str) -> ApiError {
    ApiError::new(StatusCode::CONFLICT, "CONFLICT", message)
}

/// Create a validation error with field details
pub fn validation_error(message: &str, field_errors: serde_json::Value) -> ApiError {
    ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION_FAILED", message).with_details(field_errors)
}
