//! Error types for the HyDocPusher core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. Public
//! operations return the error of their own subsystem, and the transform
//! pipeline folds everything it can hit into [`TransformError`].
//!
//! The split that matters to callers is between [`ValidationError`] (the
//! message itself is bad; retrying cannot help, dead-letter it) and the
//! `Transformation` variant of [`TransformError`] (an internal failure the
//! calling layer may retry).

use thiserror::Error;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration and classification rule store loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config or rules file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse / serialize error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A required environment variable is not set.
    #[error("required environment variable '{var}' is not set (referenced by config field '{field}')")]
    EnvVarMissing { var: String, field: String },

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading or writing a config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Validation errors
// ---------------------------------------------------------------------------

/// Input or output schema violations. Never retryable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The upstream event reports a failed publish.
    #[error("source message indicates failure: {0}")]
    SourceRejected(String),

    /// The raw message could not be decoded into a source document.
    #[error("malformed source message: {0}")]
    MalformedMessage(String),

    /// One or more required fields are empty.
    #[error("missing required fields: {}", .fields.join(", "))]
    MissingFields { fields: Vec<String> },

    /// A field is present but its value is out of range or badly formatted.
    #[error("invalid value for '{field}': {detail}")]
    InvalidField { field: String, detail: String },
}

impl ValidationError {
    pub(crate) fn invalid(field: &str, detail: impl Into<String>) -> Self {
        Self::InvalidField {
            field: field.to_string(),
            detail: detail.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Attachment errors
// ---------------------------------------------------------------------------

/// Resolution-level attachment failures.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AttachmentError {
    /// The publish URL is empty, so no body attachment can be built.
    #[error("publish URL is empty; cannot build body attachment")]
    EmptyPublishUrl,

    /// The publish URL is neither absolute nor a path.
    #[error("malformed publish URL: {0}")]
    MalformedPublishUrl(String),

    /// The assembled list violates its own invariants.
    #[error("inconsistent attachment list: {0}")]
    Inconsistent(String),
}

impl AttachmentError {
    /// Whether this failure must abort the whole transform. Anything else
    /// degrades to a body-only attachment list.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::EmptyPublishUrl | Self::MalformedPublishUrl(_))
    }
}

/// Why a single attachment source produced no candidates.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// A JSON side channel did not decode into a list of entries.
    #[error("invalid JSON in {field}: {detail}")]
    InvalidJson { field: String, detail: String },

    /// The rendered body could not be scanned.
    #[error("malformed markup: {0}")]
    Markup(String),

    /// An entry of an attachment array has the wrong shape.
    #[error("malformed entry {index} in {field}: {detail}")]
    MalformedEntry {
        field: String,
        index: usize,
        detail: String,
    },
}

// ---------------------------------------------------------------------------
// Transform errors
// ---------------------------------------------------------------------------

/// Error returned by [`TransformCoordinator::transform`](crate::transform::TransformCoordinator::transform).
#[derive(Debug, Error)]
pub enum TransformError {
    /// Not retryable; the caller should dead-letter the message.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Internal failure; the caller decides whether to retry.
    #[error("transformation failed: {message}")]
    Transformation {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl TransformError {
    pub(crate) fn transformation<E>(message: impl Into<String>, cause: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Transformation {
            message: message.into(),
            source: Some(Box::new(cause)),
        }
    }

    /// Whether a retry of the same message could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transformation { .. })
    }

    /// Short label for logs and operator output.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Transformation { .. } => "transformation",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_messages() {
        let err = ValidationError::MissingFields {
            fields: vec!["did".into(), "docdate".into()],
        };
        assert_eq!(err.to_string(), "missing required fields: did, docdate");

        let err = ConfigError::InvalidValue {
            field: "site.domain".into(),
            detail: "must not be empty".into(),
        };
        assert!(err.to_string().contains("site.domain"));

        let err = SourceError::InvalidJson {
            field: "DOCUMENT_RELATED_PIC".into(),
            detail: "expected value".into(),
        };
        assert!(err.to_string().contains("DOCUMENT_RELATED_PIC"));
    }

    #[test]
    fn test_retry_classification() {
        let err: TransformError = ValidationError::SourceRejected("boom".into()).into();
        assert!(!err.is_retryable());
        assert_eq!(err.kind(), "validation");

        let err = TransformError::transformation(
            "failed to build body attachment",
            AttachmentError::MalformedPublishUrl("::".into()),
        );
        assert!(err.is_retryable());
        assert_eq!(err.kind(), "transformation");
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_attachment_error_fatality() {
        assert!(AttachmentError::EmptyPublishUrl.is_fatal());
        assert!(AttachmentError::MalformedPublishUrl("x".into()).is_fatal());
        assert!(!AttachmentError::Inconsistent("dup".into()).is_fatal());
    }
}
