//! Error Types for the Bridge
//!
//! Every internal layer returns [`BridgeResult`]. Only the host-facing
//! [`Bridge`](crate::Bridge) turns failures into sentinel returns and parks
//! them in the error channel.
//!
//! ## Error Categories
//!
//! - Lifecycle misuse (`NotInitialized`)
//! - Module resolution failures
//! - Attribute lookups and assignments
//! - Call failures (non-callable targets, raised exceptions)
//! - Value conversion failures
//! - Conditions raised by code run through `execute`/`evaluate`

use std::fmt;

use pyo3::exceptions::PyImportError;
use pyo3::prelude::*;
use pyo3::types::PyTracebackMethods;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

// ============================================================================
// Captured Python exception
// ============================================================================

/// A Python exception captured by value.
///
/// Holding the rendered parts rather than the `PyErr` lets the error outlive
/// the exclusivity token and the interpreter itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PyException {
    /// Exception type name (e.g. `"ValueError"`)
    pub type_name: String,
    /// `str()` of the exception value
    pub message: String,
    /// Formatted traceback, when the exception carried one
    pub traceback: Option<String>,
}

impl PyException {
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            message: message.into(),
            traceback: None,
        }
    }

    /// Render a `PyErr` into its parts.
    pub fn from_py_err(py: Python<'_>, err: &PyErr) -> Self {
        let type_name = err
            .get_type(py)
            .name()
            .map(|name| name.to_string())
            .unwrap_or_else(|_| "<unknown>".to_string());
        let message = err
            .value(py)
            .str()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let traceback = err.traceback(py).and_then(|tb| tb.format().ok());

        Self {
            type_name,
            message,
            traceback,
        }
    }
}

impl fmt::Display for PyException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.type_name)
        } else {
            write!(f, "{}: {}", self.type_name, self.message)
        }
    }
}

// ============================================================================
// Conversion errors
// ============================================================================

/// Failure while marshalling a value across the boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Native integer outside the 64-bit signed range
    #[error("integer {value} does not fit in a 64-bit signed integer")]
    IntegerOverflow {
        /// Decimal rendering of the native integer
        value: String,
    },

    /// Text that is not valid UTF-8 (or cannot be handed to the interpreter)
    #[error("invalid text: {reason}")]
    InvalidText {
        /// Description of the encoding problem
        reason: String,
    },

    /// Mapping key whose native form cannot be hashed
    #[error("unhashable mapping key of native type '{type_name}'")]
    UnhashableKey {
        /// Native type of the key
        type_name: String,
    },

    /// Native type with no host representation (strict fidelity only)
    #[error("unsupported native type '{type_name}'")]
    Unsupported {
        /// Native type name
        type_name: String,
    },

    /// Native container reachable from itself
    #[error("cyclic native structure through a '{type_name}'")]
    Cycle {
        /// Type of the container that closes the cycle
        type_name: String,
    },

    /// Nesting beyond the configured limit
    #[error("value nested deeper than {limit} levels")]
    DepthExceeded {
        /// Configured limit
        limit: usize,
    },

    /// The interpreter raised while building or reading a container
    #[error("native conversion failed: {0}")]
    Native(PyException),
}

impl ConversionError {
    pub fn integer_overflow(value: impl Into<String>) -> Self {
        ConversionError::IntegerOverflow {
            value: value.into(),
        }
    }

    pub fn invalid_text(reason: impl Into<String>) -> Self {
        ConversionError::InvalidText {
            reason: reason.into(),
        }
    }

    pub fn unhashable_key(type_name: impl Into<String>) -> Self {
        ConversionError::UnhashableKey {
            type_name: type_name.into(),
        }
    }

    pub fn unsupported(type_name: impl Into<String>) -> Self {
        ConversionError::Unsupported {
            type_name: type_name.into(),
        }
    }

    pub fn cycle(type_name: impl Into<String>) -> Self {
        ConversionError::Cycle {
            type_name: type_name.into(),
        }
    }

    pub fn native(py: Python<'_>, err: &PyErr) -> Self {
        ConversionError::Native(PyException::from_py_err(py, err))
    }
}

// ============================================================================
// Bridge errors
// ============================================================================

/// Bridge error types
#[derive(Error, Debug, Clone)]
pub enum BridgeError {
    /// Operation attempted before `start()` or after `stop()`
    #[error("Python interpreter not initialized")]
    NotInitialized,

    /// Module name could not be resolved or its top level raised
    #[error("cannot import module '{module}': {exception}")]
    Import {
        /// Dotted module name
        module: String,
        /// What the import machinery raised
        exception: PyException,
    },

    /// Attribute missing, or assignment rejected
    #[error("attribute '{attribute}' of module '{module}': {message}")]
    Attribute {
        /// Dotted module name
        module: String,
        /// Attribute name
        attribute: String,
        /// Interpreter message
        message: String,
    },

    /// Resolved attribute is not callable
    #[error("'{target}' is not callable (it is a '{type_name}')")]
    NotCallable {
        /// `module.function`
        target: String,
        /// Native type of the attribute
        type_name: String,
    },

    /// The callee raised
    #[error("call to '{target}' raised {exception}")]
    Call {
        /// `module.function`
        target: String,
        /// The raised exception
        exception: PyException,
    },

    /// Value conversion failed
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    /// Code run in the global execution context raised
    #[error("{0}")]
    Raised(PyException),
}

impl BridgeError {
    /// Create an import error from whatever the import machinery raised.
    pub fn import(py: Python<'_>, module: impl Into<String>, err: &PyErr) -> Self {
        BridgeError::Import {
            module: module.into(),
            exception: PyException::from_py_err(py, err),
        }
    }

    /// Create an attribute error from whatever `getattr`/`setattr` raised.
    pub fn attribute(
        py: Python<'_>,
        module: impl Into<String>,
        attribute: impl Into<String>,
        err: &PyErr,
    ) -> Self {
        BridgeError::Attribute {
            module: module.into(),
            attribute: attribute.into(),
            message: PyException::from_py_err(py, err).message,
        }
    }

    pub fn not_callable(target: impl Into<String>, type_name: impl Into<String>) -> Self {
        BridgeError::NotCallable {
            target: target.into(),
            type_name: type_name.into(),
        }
    }

    pub fn call(py: Python<'_>, target: impl Into<String>, err: &PyErr) -> Self {
        BridgeError::Call {
            target: target.into(),
            exception: PyException::from_py_err(py, err),
        }
    }

    pub fn raised(py: Python<'_>, err: &PyErr) -> Self {
        BridgeError::Raised(PyException::from_py_err(py, err))
    }

    /// Classify into the bridge's error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            BridgeError::NotInitialized => ErrorKind::NotInitialized,
            BridgeError::Import { .. } => ErrorKind::Import,
            BridgeError::Attribute { .. } => ErrorKind::Attribute,
            BridgeError::NotCallable { .. } | BridgeError::Call { .. } => ErrorKind::Call,
            BridgeError::Conversion(_) => ErrorKind::Conversion,
            BridgeError::Raised(_) => ErrorKind::Raised,
        }
    }

    /// The Python exception behind this error, if the interpreter raised one.
    pub fn exception(&self) -> Option<&PyException> {
        match self {
            BridgeError::Import { exception, .. }
            | BridgeError::Call { exception, .. }
            | BridgeError::Raised(exception)
            | BridgeError::Conversion(ConversionError::Native(exception)) => Some(exception),
            _ => None,
        }
    }

    /// One-line message as surfaced by `last_error()`.
    ///
    /// Interpreter-raised conditions render as the stringified exception
    /// value only; type and traceback are dropped.
    pub fn message(&self) -> String {
        match self {
            BridgeError::Import { exception, .. }
            | BridgeError::Call { exception, .. }
            | BridgeError::Raised(exception) => exception.message.clone(),
            BridgeError::Attribute { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    pub fn is_not_initialized(&self) -> bool {
        matches!(self, BridgeError::NotInitialized)
    }

    pub fn is_conversion_error(&self) -> bool {
        matches!(self, BridgeError::Conversion(_))
    }
}

/// Error classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotInitialized,
    Import,
    Attribute,
    Call,
    Conversion,
    Raised,
}

impl ErrorKind {
    /// Classify a bare `PyErr` that surfaced outside any bridge operation.
    pub fn of_py_err(py: Python<'_>, err: &PyErr) -> Self {
        if err.is_instance_of::<PyImportError>(py) {
            ErrorKind::Import
        } else {
            ErrorKind::Raised
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::NotInitialized => "NotInitialized",
            ErrorKind::Import => "ImportError",
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Call => "CallError",
            ErrorKind::Conversion => "ConversionError",
            ErrorKind::Raised => "Raised",
        };
        f.write_str(name)
    }
}

// ============================================================================
// Detailed report
// ============================================================================

/// Full rendering of a failure, including the parts `last_error()` drops.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorReport {
    pub kind: ErrorKind,
    /// Same text `last_error()` would have returned
    pub message: String,
    /// Python exception type, when the interpreter raised
    pub exception_type: Option<String>,
    /// Formatted Python traceback
    pub traceback: Option<String>,
}

impl From<&BridgeError> for ErrorReport {
    fn from(err: &BridgeError) -> Self {
        let exception = err.exception();
        Self {
            kind: err.kind(),
            message: err.message(),
            exception_type: exception.map(|e| e.type_name.clone()),
            traceback: exception.and_then(|e| e.traceback.clone()),
        }
    }
}

impl fmt::Display for ErrorReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exception_type {
            Some(ty) => writeln!(f, "error[{}]: {}: {}", self.kind, ty, self.message)?,
            None => writeln!(f, "error[{}]: {}", self.kind, self.message)?,
        }

        if let Some(ref traceback) = self.traceback {
            for line in traceback.lines() {
                writeln!(f, "  | {}", line)?;
            }
        }

        Ok(())
    }
}
