use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::fmt;

/// A single field-scoped problem, either found locally or reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Application-specific error types.
#[derive(Debug, Clone)]
pub enum AppError {
    /// Local form validation failed. Never reaches the network.
    Validation(Vec<FieldError>),
    /// The backend answered with a non-2xx status.
    Api {
        /// HTTP status returned by the backend.
        status: u16,
        /// Top-level `error` message from the body, or a generic fallback.
        message: String,
        /// Per-field details from the body, when present.
        details: Vec<FieldError>,
    },
    /// The event is not legal for the current wizard state.
    IllegalTransition {
        /// State the wizard was in.
        from: String,
        /// Event that was rejected.
        event: String,
    },
    /// Another transition is already in flight for the same flow.
    Busy,
    /// Resource not found error.
    NotFound(String),
    /// Bad request error (invalid input).
    BadRequest(String),
    /// Transport or decoding failure talking to the backend.
    ExternalApiError(String),
    /// Internal error.
    InternalError(String),
    /// Error with context chain for better debugging.
    WithContext {
        /// The underlying source of the error.
        source: Box<AppError>,
        /// Additional context message.
        context: String,
    },
}

impl AppError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    /// HTTP status carried by a backend error, looking through context wrappers.
    pub fn api_status(&self) -> Option<u16> {
        match self {
            AppError::Api { status, .. } => Some(*status),
            AppError::WithContext { source, .. } => source.api_status(),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool {
        self.api_status() == Some(404)
    }

    /// Message suitable for inline display next to the failing control.
    pub fn user_message(&self) -> String {
        match self {
            AppError::Validation(errors) => errors
                .iter()
                .map(|e| e.message.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            AppError::Api { .. } => format!("Error: {}", compose_api_message(self)),
            AppError::WithContext { source, .. } => source.user_message(),
            other => other.to_string(),
        }
    }
}

fn compose_api_message(err: &AppError) -> String {
    match err {
        AppError::Api {
            message, details, ..
        } if !details.is_empty() => {
            let joined = details
                .iter()
                .map(|d| format!("{}: {}", d.field, d.message))
                .collect::<Vec<_>>()
                .join(", ");
            format!("{} ({})", message, joined)
        }
        AppError::Api { message, .. } => message.clone(),
        other => other.to_string(),
    }
}

impl fmt::Display for AppError {
    /// Formats the error for display.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Validation(errors) => {
                let fields = errors
                    .iter()
                    .map(|e| format!("{}: {}", e.field, e.message))
                    .collect::<Vec<_>>()
                    .join(", ");
                write!(f, "Validation failed: {}", fields)
            }
            AppError::Api { status, .. } => {
                write!(f, "API error {}: {}", status, compose_api_message(self))
            }
            AppError::IllegalTransition { from, event } => {
                write!(f, "Illegal transition: {} is not allowed in {}", event, from)
            }
            AppError::Busy => write!(f, "A transition is already in progress"),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::ExternalApiError(msg) => write!(f, "External API error: {}", msg),
            AppError::InternalError(msg) => write!(f, "Internal error: {}", msg),
            AppError::WithContext { source, context } => {
                write!(f, "{}: {}", context, source)
            }
        }
    }
}

impl std::error::Error for AppError {}

impl IntoResponse for AppError {
    /// Maps each variant to an HTTP status and a JSON body the browser can render inline.
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            AppError::Validation(errors) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                json!({ "error": self.user_message(), "details": errors }),
            ),
            AppError::Api {
                status, details, ..
            } => {
                tracing::warn!("Backend rejected request: {}", self);
                let code = StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY);
                (
                    code,
                    json!({ "error": self.user_message(), "details": details }),
                )
            }
            AppError::IllegalTransition { .. } => {
                tracing::error!("{}", self);
                (StatusCode::CONFLICT, json!({ "error": self.to_string() }))
            }
            AppError::Busy => (StatusCode::CONFLICT, json!({ "error": self.to_string() })),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, json!({ "error": msg })),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, json!({ "error": msg })),
            AppError::ExternalApiError(msg) => {
                tracing::error!("External API error: {}", msg);
                (
                    StatusCode::BAD_GATEWAY,
                    json!({ "error": "External service error" }),
                )
            }
            AppError::InternalError(msg) => {
                tracing::error!("Internal error: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({ "error": "Internal server error" }),
                )
            }
            AppError::WithContext { source, context } => {
                tracing::error!("Error with context: {} -> {}", context, source);
                let status = source.as_ref().clone().into_response().status();
                (status, json!({ "error": context }))
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::ExternalApiError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::InternalError(format!("JSON error: {}", err))
    }
}

/// Extension trait for adding context to errors.
/// Similar to `anyhow::Context` but for our `AppError` type.
pub trait ResultExt<T> {
    /// Add context to an error.
    fn context(self, context: impl Into<String>) -> Result<T, AppError>;
}

impl<T> ResultExt<T> for Result<T, AppError> {
    fn context(self, context: impl Into<String>) -> Result<T, AppError> {
        self.map_err(|e| AppError::WithContext {
            source: Box::new(e),
            context: context.into(),
        })
    }
}
