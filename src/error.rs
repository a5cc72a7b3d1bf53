//! # Error Handling
//!
//! One error type for the whole booth, carrying enough context to be logged on the
//! server and translated into a structured `{success:false, message}` body for the
//! client.
//!
//! ## Architecture
//!
//! - **Error Types**: [`BoothError`] variants follow the failure taxonomy of the
//!   request flow (validation, conflict, not found, upstream, timeout, decode,
//!   unknown template, out-of-order state)
//! - **Error Context**: every variant carries an [`ErrorContext`] with a timestamp,
//!   the operation in progress and an optional recovery hint for the client
//! - **Classification**: [`Retryable`] and [`classify`] answer "should the client
//!   simply resubmit?" without matching on variants at call sites
//! - **HTTP mapping**: [`BoothError::status_code`] and the axum `IntoResponse` impl
//!
//! ## Usage
//!
//! ```rust
//! use photobooth::error::{BoothError, Retryable};
//!
//! let error = BoothError::timeout("background removal", 30_000)
//!     .with_recovery_suggestion("Press Next again to retry");
//!
//! assert_eq!(error.category(), "timeout");
//! assert!(error.is_retryable());
//! ```

use std::{collections::HashMap, error::Error as StdError, fmt, time::SystemTime};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use tracing::{error, warn};

/// Metadata about when and where an error occurred
#[derive(Debug, Clone)]
pub struct ErrorContext {
    /// When the error occurred
    pub timestamp: SystemTime,
    /// The operation being performed when the error occurred
    pub operation: Option<String>,
    /// Additional context about the error
    pub context: Option<String>,
    /// Suggested recovery action, shown to the client
    pub recovery_suggestion: Option<String>,
    /// Whether the client may simply resubmit
    pub retryable: bool,
    /// Additional metadata as key-value pairs
    pub metadata: HashMap<String, String>,
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self {
            timestamp: SystemTime::now(),
            operation: None,
            context: None,
            recovery_suggestion: None,
            retryable: false,
            metadata: HashMap::new(),
        }
    }
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Base error type for the photobooth
#[derive(Debug)]
pub enum BoothError {
    /// Configuration validation errors
    Config {
        field: String,
        value: String,
        reason: String,
        context: ErrorContext,
    },
    /// Missing or malformed request fields
    Validation {
        field: String,
        constraint: String,
        value: String,
        context: ErrorContext,
    },
    /// Uniqueness violations (duplicate visitor email)
    Conflict {
        resource: String,
        key: String,
        context: ErrorContext,
    },
    /// Nothing available under the requested name
    NotFound {
        resource: String,
        reason: String,
        context: ErrorContext,
    },
    /// An external collaborator failed
    Upstream {
        service: String,
        reason: String,
        source: Option<Box<dyn StdError + Send + Sync>>,
        context: ErrorContext,
    },
    /// An external collaborator did not answer in time
    Timeout {
        operation: String,
        duration_ms: u64,
        context: ErrorContext,
    },
    /// Image bytes could not be decoded
    Decode {
        input: String,
        reason: String,
        context: ErrorContext,
    },
    /// Layout key does not name a preconfigured template
    UnknownTemplate {
        template_id: String,
        context: ErrorContext,
    },
    /// Out-of-order session step
    State {
        current_state: String,
        attempted_operation: String,
        reason: String,
        context: ErrorContext,
    },
    /// I/O errors
    Io {
        operation: String,
        path: Option<String>,
        source: std::io::Error,
        context: ErrorContext,
    },
    /// External library errors
    External {
        library: String,
        source: Box<dyn StdError + Send + Sync>,
        context: ErrorContext,
    },
}

impl BoothError {
    /// Create a configuration error
    pub fn config(
        field: impl Into<String>,
        value: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Config {
            field: field.into(),
            value: value.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a validation error
    pub fn validation(
        field: impl Into<String>,
        constraint: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::Validation {
            field: field.into(),
            constraint: constraint.into(),
            value: value.into(),
            context: ErrorContext::new(),
        }
    }

    /// Shorthand for a required field that was absent or blank
    pub fn missing(field: impl Into<String>) -> Self {
        Self::validation(field, "is required", "")
    }

    /// Create a conflict error
    pub fn conflict(resource: impl Into<String>, key: impl Into<String>) -> Self {
        Self::Conflict {
            resource: resource.into(),
            key: key.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a not-found error
    pub fn not_found(resource: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an upstream error
    pub fn upstream(service: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Upstream {
            service: service.into(),
            reason: reason.into(),
            source: None,
            context: ErrorContext::new(),
        }
    }

    /// Create an upstream error that keeps the underlying cause
    pub fn upstream_with_source(
        service: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::Upstream {
            service: service.into(),
            reason: source.to_string(),
            source: Some(Box::new(source)),
            context: ErrorContext::new(),
        }
    }

    /// Create a timeout error
    pub fn timeout(operation: impl Into<String>, duration_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            duration_ms,
            context: ErrorContext::new(),
        }
    }

    /// Create a decode error
    pub fn decode(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Decode {
            input: input.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an unknown-template error
    pub fn unknown_template(template_id: impl Into<String>) -> Self {
        Self::UnknownTemplate {
            template_id: template_id.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create a state error
    pub fn state(
        current_state: impl Into<String>,
        attempted_operation: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::State {
            current_state: current_state.into(),
            attempted_operation: attempted_operation.into(),
            reason: reason.into(),
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error
    pub fn io(operation: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            operation: operation.into(),
            path: None,
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an I/O error tied to a path
    pub fn io_at(
        operation: impl Into<String>,
        path: impl AsRef<std::path::Path>,
        source: std::io::Error,
    ) -> Self {
        Self::Io {
            operation: operation.into(),
            path: Some(path.as_ref().display().to_string()),
            source,
            context: ErrorContext::new(),
        }
    }

    /// Create an external library error
    pub fn external(
        library: impl Into<String>,
        source: impl StdError + Send + Sync + 'static,
    ) -> Self {
        Self::External {
            library: library.into(),
            source: Box::new(source),
            context: ErrorContext::new(),
        }
    }

    /// Translate a reqwest failure, keeping timeouts distinguishable.
    pub fn from_http(service: &str, error: reqwest::Error, timeout_ms: u64) -> Self {
        if error.is_timeout() {
            Self::timeout(service, timeout_ms).retryable()
        } else {
            Self::upstream_with_source(service, error).retryable()
        }
    }

    /// Add context to the error
    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context_mut().context = Some(context.into());
        self
    }

    /// Add operation context
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.context_mut().operation = Some(operation.into());
        self
    }

    /// Add recovery suggestion
    pub fn with_recovery_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context_mut().recovery_suggestion = Some(suggestion.into());
        self
    }

    /// Mark as retryable
    pub fn retryable(mut self) -> Self {
        self.context_mut().retryable = true;
        self
    }

    /// Add metadata
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context_mut().metadata.insert(key.into(), value.into());
        self
    }

    /// Get the error context
    pub fn context(&self) -> &ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Conflict { context, .. } => context,
            Self::NotFound { context, .. } => context,
            Self::Upstream { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Decode { context, .. } => context,
            Self::UnknownTemplate { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    fn context_mut(&mut self) -> &mut ErrorContext {
        match self {
            Self::Config { context, .. } => context,
            Self::Validation { context, .. } => context,
            Self::Conflict { context, .. } => context,
            Self::NotFound { context, .. } => context,
            Self::Upstream { context, .. } => context,
            Self::Timeout { context, .. } => context,
            Self::Decode { context, .. } => context,
            Self::UnknownTemplate { context, .. } => context,
            Self::State { context, .. } => context,
            Self::Io { context, .. } => context,
            Self::External { context, .. } => context,
        }
    }

    /// Get the error category as a string
    pub fn category(&self) -> &'static str {
        match self {
            Self::Config { .. } => "config",
            Self::Validation { .. } => "validation",
            Self::Conflict { .. } => "conflict",
            Self::NotFound { .. } => "not_found",
            Self::Upstream { .. } => "upstream",
            Self::Timeout { .. } => "timeout",
            Self::Decode { .. } => "decode",
            Self::UnknownTemplate { .. } => "unknown_template",
            Self::State { .. } => "state",
            Self::Io { .. } => "io",
            Self::External { .. } => "external",
        }
    }

    /// HTTP status the request boundary answers with
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Conflict { .. } | Self::State { .. } => StatusCode::CONFLICT,
            Self::NotFound { .. } | Self::UnknownTemplate { .. } => StatusCode::NOT_FOUND,
            Self::Decode { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Self::Upstream { .. } => StatusCode::BAD_GATEWAY,
            Self::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            Self::Config { .. } | Self::Io { .. } | Self::External { .. } => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl fmt::Display for BoothError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BoothError::Config {
                field,
                value,
                reason,
                ..
            } => {
                if value.is_empty() {
                    write!(f, "Configuration error in '{}': {}", field, reason)
                } else {
                    write!(
                        f,
                        "Configuration error in '{}': {} (value: {})",
                        field, reason, value
                    )
                }
            }
            BoothError::Validation {
                field,
                constraint,
                value,
                ..
            } => {
                if value.is_empty() {
                    write!(f, "'{}' {}", field, constraint)
                } else {
                    write!(f, "'{}' {} (value: {})", field, constraint, value)
                }
            }
            BoothError::Conflict { resource, key, .. } => {
                write!(f, "{} '{}' already exists", resource, key)
            }
            BoothError::NotFound {
                resource, reason, ..
            } => {
                write!(f, "{} not found: {}", resource, reason)
            }
            BoothError::Upstream {
                service, reason, ..
            } => {
                write!(f, "{} failed: {}", service, reason)
            }
            BoothError::Timeout {
                operation,
                duration_ms,
                ..
            } => {
                write!(f, "Timeout during {} after {}ms", operation, duration_ms)
            }
            BoothError::Decode { input, reason, .. } => {
                write!(f, "Could not decode {}: {}", input, reason)
            }
            BoothError::UnknownTemplate { template_id, .. } => {
                write!(f, "Unknown layout template '{}'", template_id)
            }
            BoothError::State {
                current_state,
                attempted_operation,
                reason,
                ..
            } => {
                write!(
                    f,
                    "Cannot {} while session is '{}': {}",
                    attempted_operation, current_state, reason
                )
            }
            BoothError::Io {
                operation,
                path,
                source,
                ..
            } => {
                if let Some(path) = path {
                    write!(
                        f,
                        "I/O error during {} on '{}': {}",
                        operation, path, source
                    )
                } else {
                    write!(f, "I/O error during {}: {}", operation, source)
                }
            }
            BoothError::External {
                library, source, ..
            } => {
                write!(f, "External library error in {}: {}", library, source)
            }
        }
    }
}

impl StdError for BoothError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            Self::External { source, .. } => Some(source.as_ref()),
            Self::Upstream {
                source: Some(source),
                ..
            } => Some(source.as_ref()),
            _ => None,
        }
    }
}

/// Result type alias using our custom error type
pub type BoothResult<T> = Result<T, BoothError>;

/// Trait for errors the client can fix by resubmitting the same step
pub trait Retryable {
    /// Check if this error can be retried
    fn is_retryable(&self) -> bool;

    /// Get the recommended wait before resubmitting, in milliseconds
    fn retry_delay_ms(&self) -> Option<u64> {
        None
    }
}

impl Retryable for BoothError {
    fn is_retryable(&self) -> bool {
        self.context().retryable
            || matches!(
                self,
                Self::Timeout { .. } | Self::Upstream { .. } | Self::Io { .. }
            )
    }

    fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            Self::Timeout { .. } => Some(2000),
            Self::Upstream { .. } => Some(1000),
            Self::Io { .. } => Some(500),
            _ => None,
        }
    }
}

/// Trait for errors that provide recovery suggestions
pub trait HasRecoverySuggestion {
    fn recovery_suggestion(&self) -> Option<&str>;
}

impl HasRecoverySuggestion for BoothError {
    fn recovery_suggestion(&self) -> Option<&str> {
        self.context().recovery_suggestion.as_deref()
    }
}

/// Error classification utilities
pub mod classify {
    use super::*;

    /// Check if an error is transient (may resolve itself)
    pub fn is_transient(error: &BoothError) -> bool {
        matches!(
            error,
            BoothError::Timeout { .. } | BoothError::Upstream { .. }
        )
    }

    /// Check if the visitor can fix the error by changing their input
    pub fn is_user_correctable(error: &BoothError) -> bool {
        matches!(
            error,
            BoothError::Validation { .. }
                | BoothError::Conflict { .. }
                | BoothError::NotFound { .. }
                | BoothError::Decode { .. }
                | BoothError::UnknownTemplate { .. }
                | BoothError::State { .. }
        )
    }
}

impl From<std::io::Error> for BoothError {
    fn from(error: std::io::Error) -> Self {
        Self::io("unknown", error)
    }
}

impl From<serde_json::Error> for BoothError {
    fn from(error: serde_json::Error) -> Self {
        Self::external("serde_json", error)
    }
}

impl From<rusqlite::Error> for BoothError {
    fn from(error: rusqlite::Error) -> Self {
        Self::external("rusqlite", error)
    }
}

impl From<image::ImageError> for BoothError {
    fn from(error: image::ImageError) -> Self {
        match error {
            image::ImageError::Decoding(_) | image::ImageError::Unsupported(_) => {
                Self::decode("image", error.to_string())
            }
            other => Self::external("image", other),
        }
    }
}

impl From<booth_scale::cpu::ScaleError> for BoothError {
    fn from(error: booth_scale::cpu::ScaleError) -> Self {
        Self::external("booth_scale", error)
    }
}

impl IntoResponse for BoothError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if classify::is_user_correctable(&self) {
            warn!(category = self.category(), error = %self, "request rejected");
        } else {
            error!(category = self.category(), error = %self, "request failed");
        }

        let mut body = json!({
            "success": false,
            "message": self.to_string(),
            "category": self.category(),
            "retryable": self.is_retryable(),
        });
        if let Some(hint) = self.recovery_suggestion() {
            body["hint"] = json!(hint);
        }
        if let Some(delay) = self.retry_delay_ms() {
            body["retryAfterMs"] = json!(delay);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let error = BoothError::config("port", "0", "must be greater than 0");
        assert_eq!(error.category(), "config");
        assert!(!error.is_retryable());
        assert_eq!(error.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_error_with_context() {
        let error = BoothError::upstream("remove.bg", "HTTP 500")
            .with_context("cutting out capture IMG_004.JPG")
            .with_recovery_suggestion("press Next again");

        assert_eq!(error.category(), "upstream");
        assert!(error.is_retryable());
        assert_eq!(error.recovery_suggestion(), Some("press Next again"));
        assert_eq!(error.status_code(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_status_mapping_follows_taxonomy() {
        assert_eq!(BoothError::missing("email").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            BoothError::conflict("visitor", "a@b.c").status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            BoothError::unknown_template("layout9").status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            BoothError::decode("cutout", "bad header").status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            BoothError::timeout("mail transmission", 20_000).status_code(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[test]
    fn test_missing_field_message_has_no_empty_value() {
        assert_eq!(BoothError::missing("email").to_string(), "'email' is required");
    }

    #[test]
    fn test_error_classification() {
        assert!(classify::is_user_correctable(&BoothError::conflict("visitor", "x")));
        assert!(classify::is_transient(&BoothError::timeout("upload", 10)));
        assert!(!classify::is_transient(&BoothError::missing("name")));
    }

    #[test]
    fn test_user_correctable_errors_answer_with_client_statuses() {
        let correctable = [
            BoothError::missing("email"),
            BoothError::conflict("visitor", "a@b.c"),
            BoothError::not_found("capture", "none yet"),
            BoothError::decode("cutout", "bad header"),
            BoothError::unknown_template("layout9"),
        ];
        for error in correctable {
            assert!(classify::is_user_correctable(&error), "{error}");
            assert!(error.status_code().is_client_error(), "{error}");
        }

        let operational = [
            BoothError::timeout("remove.bg", 25_000),
            BoothError::upstream("smtp", "refused"),
            BoothError::config("port", "0", "must be greater than 0"),
        ];
        for error in operational {
            assert!(!classify::is_user_correctable(&error), "{error}");
            assert!(error.status_code().is_server_error(), "{error}");
        }
    }

    #[test]
    fn test_image_decode_errors_map_to_decode() {
        let err = image::load_from_memory(b"definitely not an image").unwrap_err();
        assert_eq!(BoothError::from(err).category(), "decode");
    }
}
