//! Unified error handling for the request runtime
//!
//! Every fallible operation in the crate returns [`RuntimeResult`]. Errors
//! raised by component behaviors travel through dispatch unchanged.

use std::fmt;

/// Why a single path segment could not be resolved
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolutionCause {
    /// No accessor of any kind exists for the segment
    NoSuchProperty,

    /// The last accessor strategy was found but failed when invoked
    AccessFailed(String),
}

impl fmt::Display for ResolutionCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResolutionCause::NoSuchProperty => write!(f, "no matching getter, field or method"),
            ResolutionCause::AccessFailed(msg) => write!(f, "accessor failed: {msg}"),
        }
    }
}

/// Unified error types for the runtime
#[derive(Debug)]
pub enum RuntimeError {
    /// Configuration-related errors
    Configuration(String),

    /// No context or registry is active where one is required
    IllegalState(String),

    /// Caller passed an unusable argument
    InvalidArgument(String),

    /// Property path could not be read
    PropertyResolution {
        segment: String,
        source_type: String,
        source: String,
        cause: ResolutionCause,
    },

    /// Property path could not be written
    Assignment {
        path: String,
        target_type: String,
        reason: String,
    },

    /// Multipart body could not be parsed
    UploadParse(String),

    /// Character encoding is not supported
    UnsupportedEncoding(String),

    /// Raised by components, behaviors and request handlers
    Component(String),

    /// I/O errors
    Io(std::io::Error),

    /// Internal system errors
    Internal(String),
}

impl RuntimeError {
    /// True for resolution failures caused by a missing accessor
    pub fn is_no_such_property(&self) -> bool {
        matches!(
            self,
            RuntimeError::PropertyResolution {
                cause: ResolutionCause::NoSuchProperty,
                ..
            }
        )
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::Configuration(msg) => write!(f, "Configuration error: {msg}"),
            RuntimeError::IllegalState(msg) => write!(f, "Illegal state: {msg}"),
            RuntimeError::InvalidArgument(msg) => write!(f, "Invalid argument: {msg}"),
            RuntimeError::PropertyResolution {
                segment,
                source_type,
                source,
                cause,
            } => write!(
                f,
                "Property resolution failed for '{segment}' on ({source_type}) {source}: {cause}"
            ),
            RuntimeError::Assignment {
                path,
                target_type,
                reason,
            } => write!(f, "Property assignment failed for '{path}' on ({target_type}): {reason}"),
            RuntimeError::UploadParse(msg) => write!(f, "Upload parse failed: {msg}"),
            RuntimeError::UnsupportedEncoding(msg) => write!(f, "Unsupported encoding: {msg}"),
            RuntimeError::Component(msg) => write!(f, "Component error: {msg}"),
            RuntimeError::Io(err) => write!(f, "I/O error: {err}"),
            RuntimeError::Internal(msg) => write!(f, "Internal error: {msg}"),
        }
    }
}

impl std::error::Error for RuntimeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuntimeError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for RuntimeError {
    fn from(err: std::io::Error) -> Self {
        RuntimeError::Io(err)
    }
}

/// Result type alias for runtime operations
pub type RuntimeResult<T> = std::result::Result<T, RuntimeError>;

/// Helper trait for adding context to errors
pub trait ErrorContext<T> {
    fn with_context(self, context: &str) -> RuntimeResult<T>;
}

impl<T, E> ErrorContext<T> for std::result::Result<T, E>
where
    E: fmt::Display,
{
    fn with_context(self, context: &str) -> RuntimeResult<T> {
        self.map_err(|e| crate::internal_error!("{}: {}", context, e))
    }
}

/// Build a [`RuntimeError::Configuration`] from a message or format string
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::core::error::RuntimeError::Configuration($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::RuntimeError::Configuration(format!($fmt, $($arg)*))
    };
}

/// Build a [`RuntimeError::Internal`] from a message or format string
#[macro_export]
macro_rules! internal_error {
    ($msg:expr) => {
        $crate::core::error::RuntimeError::Internal($msg.to_string())
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::core::error::RuntimeError::Internal(format!($fmt, $($arg)*))
    };
}
