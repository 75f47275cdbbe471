//! Error types for the storage target engine
//!
//! Provides structured error types for size parsing, target document
//! loading, validation, reconciliation and the storage backends.

use thiserror::Error;

/// Unified error type for the engine
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {0}")]
    Internal(String),

    // =========================================================================
    // Desired Tree Errors
    // =========================================================================
    /// The desired tree failed validation; carries the rendered report summary
    #[error("Validation failed with {count} violation(s): {summary}")]
    Validation { count: usize, summary: String },

    /// A declaration in the desired tree is internally inconsistent
    #[error("Configuration error: {0}")]
    Configuration(String),

    // =========================================================================
    // Backend Errors
    // =========================================================================
    /// A create/destroy/write call failed; the diagnostic is the backend's text verbatim
    #[error("Backend operation failed: {operation} {target}: {diagnostic}")]
    Backend {
        operation: String,
        target: String,
        diagnostic: String,
    },

    #[error("Backend unavailable: {backend} - {reason}")]
    BackendUnavailable { backend: String, reason: String },

    #[error("{kind} not found: {name}")]
    NotFound { kind: String, name: String },

    // =========================================================================
    // Parse Errors
    // =========================================================================
    #[error("Size parse error: {0}")]
    SizeParse(String),

    #[error("Target document error: {0}")]
    Document(String),

    #[error("JSON parse error: {0}")]
    JsonParse(#[from] serde_json::Error),

    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    // =========================================================================
    // IO Errors
    // =========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Coarse classification of an error, following the error taxonomy
/// surfaced to the checkpoint orchestrator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Configuration,
    Backend,
    NotFound,
    Parse,
    Internal,
}

impl Error {
    /// Shorthand for a backend failure
    pub fn backend(
        operation: impl Into<String>,
        target: impl Into<String>,
        diagnostic: impl Into<String>,
    ) -> Self {
        Error::Backend {
            operation: operation.into(),
            target: target.into(),
            diagnostic: diagnostic.into(),
        }
    }

    /// Shorthand for a missing pool/dataset/disk
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Error::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation { .. } => ErrorKind::Validation,
            Error::Configuration(_) => ErrorKind::Configuration,
            Error::Backend { .. } | Error::BackendUnavailable { .. } | Error::Io(_) => {
                ErrorKind::Backend
            }
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::SizeParse(_)
            | Error::Document(_)
            | Error::JsonParse(_)
            | Error::YamlParse(_) => ErrorKind::Parse,
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Check if this error reports a missing entity
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Error::Configuration(_))
    }

    /// Check if this error was raised before any backend call was made.
    ///
    /// Such errors leave the physical storage untouched.
    pub fn is_preflight(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::Configuration | ErrorKind::Parse
        )
    }
}

/// Result type alias for the engine
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let err = Error::backend("create_pool", "rpool", "cannot create 'rpool': pool already exists");
        assert_eq!(err.kind(), ErrorKind::Backend);
        assert!(!err.is_preflight());

        let err = Error::Configuration("volume 'swap' has no size".into());
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.is_preflight());

        let err = Error::not_found("pool", "tank");
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "pool not found: tank");
    }

    #[test]
    fn test_backend_diagnostic_preserved() {
        let diag = "cannot open 'c0t1d0': no such device in /dev/dsk";
        let err = Error::backend("create_pool", "tank", diag);
        assert!(err.to_string().ends_with(diag));
    }
}
