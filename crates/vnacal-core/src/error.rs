//! Error types for calibration operations.

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Broad classification of an [`Error`], as reported to an [`ErrorHandler`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Invalid argument, index, dimension or frequency.
    Usage,
    /// Allocation or I/O failure.
    System,
    /// Singular or non-finite numeric result.
    Math,
    /// Malformed calibration file.
    Syntax,
    /// Unsupported calibration file version.
    Version,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorCategory::Usage => "usage",
            ErrorCategory::System => "system",
            ErrorCategory::Math => "math",
            ErrorCategory::Syntax => "syntax",
            ErrorCategory::Version => "version",
        };
        f.write_str(name)
    }
}

/// Errors that can occur while building, solving, applying or storing a
/// calibration.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid use of the API, detected before any numeric routine runs.
    #[error("{0}")]
    Usage(String),

    /// Resource exhaustion.
    #[error("{0}")]
    System(String),

    /// Singular or non-finite result at some frequency.
    #[error("{0}")]
    Math(String),

    /// Structural problem in a calibration file.
    #[error("{message}")]
    Syntax { message: String },

    /// Calibration file version not understood by this library.
    #[error("unsupported calibration file version: {0}")]
    Version(String),

    /// I/O error reading or writing a calibration file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML error reading or writing a calibration file.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub fn usage(message: impl Into<String>) -> Self {
        Error::Usage(message.into())
    }

    pub fn math(message: impl Into<String>) -> Self {
        Error::Math(message.into())
    }

    pub fn syntax(message: impl Into<String>) -> Self {
        Error::Syntax {
            message: message.into(),
        }
    }

    /// Category reported to error handlers.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Usage(_) => ErrorCategory::Usage,
            Error::System(_) | Error::Io(_) => ErrorCategory::System,
            Error::Math(_) => ErrorCategory::Math,
            Error::Syntax { .. } | Error::Yaml(_) => ErrorCategory::Syntax,
            Error::Version(_) => ErrorCategory::Version,
        }
    }
}

impl From<std::collections::TryReserveError> for Error {
    fn from(err: std::collections::TryReserveError) -> Self {
        Error::System(format!("allocation failed: {err}"))
    }
}

/// Result type for calibration operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Callback receiving every error returned from a public entry point.
pub type ErrorHandler = Arc<dyn Fn(ErrorCategory, &str) + Send + Sync>;

/// Pass `err` through an optional handler and hand it back for returning.
pub(crate) fn report(handler: Option<&ErrorHandler>, err: Error) -> Error {
    let message = err.to_string();
    match err.category() {
        ErrorCategory::Math => tracing::warn!(category = %err.category(), "{message}"),
        _ => tracing::debug!(category = %err.category(), "{message}"),
    }
    if let Some(handler) = handler {
        handler(err.category(), &message);
    }
    err
}
