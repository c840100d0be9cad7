use std::time::Duration;
use thiserror::Error;

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path or configuration key that caused the error (e.g., "sync.max_concurrency", "record[2].guid")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected range, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "sync_engine", "config_loader")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate outcome of a batch reconciliation where at least one record failed.
///
/// Successful records are already persisted; this is a report, not a rollback signal.
#[derive(Debug, Error)]
#[error("partial sync: {succeeded} succeeded, {failed} failed")]
pub struct PartialSyncError {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<Error>,
}

impl PartialSyncError {
    pub fn new(succeeded: usize, errors: Vec<Error>) -> Self {
        Self {
            succeeded,
            failed: errors.len(),
            errors,
        }
    }
}

/// Unified error type for the sync core.
#[derive(Debug, Error)]
pub enum Error {
    #[error("{entity} not found: {key}")]
    NotFound { entity: &'static str, key: String },

    #[error("Validation error: {message}{}", format_context(.context))]
    Validation {
        message: String,
        context: ErrorContext,
    },

    #[error("Remote error: HTTP {} ({}): {message}", format_status(.status), retry_class(.retryable))]
    Remote {
        status: Option<u16>,
        message: String,
        retryable: bool,
    },

    #[error(transparent)]
    PartialSync(#[from] PartialSyncError),

    #[error("Resource exhausted: {message}")]
    ResourceExhausted {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Runtime error: {message}{}", format_context(.context))]
    Runtime {
        message: String,
        context: ErrorContext,
    },

    #[error("Network transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

fn format_status(status: &Option<u16>) -> String {
    status.map(|s| s.to_string()).unwrap_or_else(|| "-".into())
}

fn retry_class(retryable: &bool) -> &'static str {
    if *retryable {
        "transient"
    } else {
        "permanent"
    }
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn not_found(entity: &'static str, key: impl ToString) -> Self {
        Error::NotFound {
            entity,
            key: key.to_string(),
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::validation_with_context(msg, ErrorContext::new())
    }

    /// Create a new validation error with structured context
    pub fn validation_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Validation {
            message: msg.into(),
            context,
        }
    }

    /// Create a new configuration error with structured context
    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    /// Create a new runtime error with structured context
    pub fn runtime_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Runtime {
            message: msg.into(),
            context,
        }
    }

    pub fn remote(status: Option<u16>, msg: impl Into<String>, retryable: bool) -> Self {
        Error::Remote {
            status,
            message: msg.into(),
            retryable,
        }
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Error::Conflict {
            message: msg.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Whether repeating the same call later may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Remote { retryable, .. } => *retryable,
            Error::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Error::ResourceExhausted { .. } => true,
            _ => false,
        }
    }

    /// Machine-readable error code used in response bodies and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NotFound { .. } => "not_found",
            Error::Validation { .. } => "invalid_request",
            Error::Remote { .. } | Error::Transport(_) => "remote_unavailable",
            Error::PartialSync(_) => "partial_sync",
            Error::ResourceExhausted { .. } => "rate_limited",
            Error::Conflict { .. } => "conflict",
            Error::Configuration { .. } => "configuration",
            Error::Runtime { .. }
            | Error::Io(_)
            | Error::Serialization(_)
            | Error::Yaml(_) => "internal",
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. }
            | Error::Validation { context, .. }
            | Error::Runtime { context, .. } => Some(context),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_sync_counts() {
        let err = PartialSyncError::new(
            3,
            vec![Error::not_found("episode", "a"), Error::conflict("dup")],
        );
        assert_eq!(err.succeeded, 3);
        assert_eq!(err.failed, 2);
        assert_eq!(err.to_string(), "partial sync: 3 succeeded, 2 failed");
    }

    #[test]
    fn test_validation_display_includes_context() {
        let err = Error::validation_with_context(
            "limit out of range",
            ErrorContext::new()
                .with_field_path("limit")
                .with_source("sync_engine"),
        );
        let text = err.to_string();
        assert!(text.contains("limit out of range"));
        assert!(text.contains("field: limit"));
        assert!(text.contains("source: sync_engine"));
        assert_eq!(err.code(), "invalid_request");
    }

    #[test]
    fn test_remote_retryable_classification() {
        assert!(Error::remote(Some(503), "busy", true).is_retryable());
        assert!(!Error::remote(Some(404), "gone", false).is_retryable());
        assert!(!Error::not_found("episode", 1).is_retryable());
        assert!(Error::not_found("episode", 1).is_not_found());
    }
}
