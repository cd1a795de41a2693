//! Error types for the bridge.
//!
//! Every failure surfaces as a [`BridgeError`]. Exceptions raised while Python code runs are
//! captured at the call boundary and converted to [`BridgeError::Foreign`], which keeps the
//! Python exception type, message and traceback so host handlers can inspect the Python stack
//! without string matching.
//!
//! ```text
//! BridgeError
//! ├── TypeConversion   # a value has no representation on the other side
//! ├── Attribute        # `Handle::get` on a missing attribute
//! ├── Foreign          # any exception raised by Python code
//! ├── Lifecycle        # the interpreter has been shut down
//! └── Config           # invalid bridge configuration or entry point input
//! ```

use std::{convert::Infallible, fmt};

use pyo3::{
    exceptions::{
        PyAttributeError, PyImportError, PyLookupError, PyRuntimeError, PyTypeError, PyValueError,
    },
    prelude::*,
    types::PyType,
};
use serde::Serialize;

use crate::{handle::Handle, interpreter::Interpreter};

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Error type returned by every bridge operation.
#[derive(Debug, Clone)]
pub enum BridgeError {
    /// A value has no mapping to the requested representation.
    TypeConversion { message: String },
    /// An attribute looked up with `get` does not exist.
    Attribute {
        /// The attribute that was requested.
        name: String,
        /// Qualified Python type name of the object it was requested on.
        type_name: String,
        /// Message of the underlying `AttributeError`.
        message: String,
    },
    /// Python code raised an exception.
    Foreign(Box<ForeignError>),
    /// An operation was attempted after the interpreter was shut down.
    Lifecycle { message: String },
    /// Invalid configuration or entry point input.
    Config { message: String },
}

impl BridgeError {
    pub(crate) fn conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion {
            message: message.into(),
        }
    }

    pub(crate) fn lifecycle(message: impl Into<String>) -> Self {
        Self::Lifecycle {
            message: message.into(),
        }
    }

    pub(crate) fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Builds an `Attribute` error from the `AttributeError` raised by `getattr`.
    pub(crate) fn attribute(py: Python<'_>, name: &str, owner: &Bound<'_, PyAny>, err: &PyErr) -> Self {
        Self::Attribute {
            name: name.to_owned(),
            type_name: qualified_type_name(&owner.get_type()).unwrap_or_else(|_| "object".to_owned()),
            message: exception_message(py, err),
        }
    }

    /// Captures a Python exception with its traceback.
    ///
    /// The exception object itself is kept as a [`Handle`] so it can be re-raised unchanged when
    /// the error travels back into Python through a host callback.
    pub(crate) fn from_py(py: Python<'_>, interpreter: &'static Interpreter, err: &PyErr) -> Self {
        let exc_type = qualified_type_name(&err.get_type(py)).unwrap_or_else(|_| "BaseException".to_owned());
        let message = exception_message(py, err);
        let traceback = Traceback::capture(py, err).unwrap_or_else(|_| Traceback {
            frames: Vec::new(),
            formatted: vec![format!("{exc_type}: {message}\n")],
        });
        let exception = Handle::wrap(interpreter, err.value(py).as_any());

        Self::Foreign(Box::new(ForeignError {
            exc_type,
            kind: ForeignErrorKind::classify(py, err),
            message,
            traceback,
            exception: Some(exception),
        }))
    }

    /// Converts the error into a Python exception, used when a host callback fails.
    pub(crate) fn into_py_err(self, py: Python<'_>) -> PyErr {
        match self {
            Self::Foreign(foreign) => match &foreign.exception {
                Some(exception) => PyErr::from_value(exception.bind(py).clone()),
                None => PyRuntimeError::new_err(foreign.to_string()),
            },
            Self::TypeConversion { message } => PyTypeError::new_err(message),
            Self::Attribute { message, .. } => PyAttributeError::new_err(message),
            Self::Lifecycle { message } | Self::Config { message } => PyRuntimeError::new_err(message),
        }
    }

    /// Returns the foreign error details when this error came from Python code.
    #[must_use]
    pub fn as_foreign(&self) -> Option<&ForeignError> {
        match self {
            Self::Foreign(foreign) => Some(foreign),
            _ => None,
        }
    }
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TypeConversion { message } => write!(f, "type conversion error: {message}"),
            Self::Attribute { name, type_name, .. } => {
                write!(f, "attribute error: '{type_name}' object has no attribute '{name}'")
            }
            Self::Foreign(foreign) => write!(f, "{foreign}"),
            Self::Lifecycle { message } => write!(f, "lifecycle error: {message}"),
            Self::Config { message } => write!(f, "configuration error: {message}"),
        }
    }
}

impl std::error::Error for BridgeError {}

/// Host-side classification of a Python exception, mirroring the error kinds a host would
/// normally distinguish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ForeignErrorKind {
    /// `TypeError` and subclasses.
    Type,
    /// `ValueError` and subclasses.
    Value,
    /// `LookupError` (`KeyError`, `IndexError`) and subclasses.
    Lookup,
    /// `ImportError` and subclasses.
    Import,
    /// Anything else.
    Other,
}

impl ForeignErrorKind {
    fn classify(py: Python<'_>, err: &PyErr) -> Self {
        if err.is_instance_of::<PyTypeError>(py) {
            Self::Type
        } else if err.is_instance_of::<PyValueError>(py) {
            Self::Value
        } else if err.is_instance_of::<PyLookupError>(py) {
            Self::Lookup
        } else if err.is_instance_of::<PyImportError>(py) {
            Self::Import
        } else {
            Self::Other
        }
    }
}

/// A Python exception captured at the call boundary.
#[derive(Debug, Clone)]
pub struct ForeignError {
    /// Qualified name of the exception type, e.g. `ValueError` or `json.decoder.JSONDecodeError`.
    pub exc_type: String,
    /// Host-side error kind.
    pub kind: ForeignErrorKind,
    /// `str()` of the exception.
    pub message: String,
    /// Python traceback at the point the exception left Python code.
    pub traceback: Traceback,
    /// The exception object itself.
    pub exception: Option<Handle>,
}

impl fmt::Display for ForeignError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.exc_type)
        } else {
            write!(f, "{}: {}", self.exc_type, self.message)
        }
    }
}

/// Structured Python traceback.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Traceback {
    /// Stack frames, outermost first.
    pub frames: Vec<TraceFrame>,
    /// Lines produced by `traceback.format_exception`, always ending with the exception line.
    pub formatted: Vec<String>,
}

impl Traceback {
    fn capture(py: Python<'_>, err: &PyErr) -> PyResult<Self> {
        let module = py.import("traceback")?;
        let frames = match err.traceback(py) {
            Some(tb) => module
                .call_method1("extract_tb", (tb,))?
                .try_iter()?
                .map(|summary| TraceFrame::from_summary(&summary?))
                .collect::<PyResult<Vec<_>>>()?,
            None => Vec::new(),
        };
        let formatted: Vec<String> = module.call_method1("format_exception", (err.value(py),))?.extract()?;
        Ok(Self { frames, formatted })
    }

    /// Returns true when there is nothing to show, which only happens for errors that did not
    /// originate in Python.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.formatted.is_empty()
    }
}

impl fmt::Display for Traceback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for line in &self.formatted {
            f.write_str(line)?;
        }
        Ok(())
    }
}

/// A single frame of a Python traceback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TraceFrame {
    /// File the code lives in, `<string>` for evaluated code.
    pub filename: String,
    /// Line number (1-based), when known.
    pub line: Option<u32>,
    /// Name of the function, `<module>` for module level code.
    pub function_name: String,
    /// Source line for preview, when the file can be read.
    pub source_line: Option<String>,
}

impl TraceFrame {
    fn from_summary(summary: &Bound<'_, PyAny>) -> PyResult<Self> {
        Ok(Self {
            filename: summary.getattr("filename")?.extract()?,
            line: summary.getattr("lineno")?.extract()?,
            function_name: summary.getattr("name")?.extract()?,
            source_line: summary
                .getattr("line")?
                .extract::<Option<String>>()?
                .filter(|line| !line.is_empty()),
        })
    }
}

/// Failure inside an execution-lock section, before it is turned into a [`BridgeError`].
///
/// Python errors can only be captured with the interpreter lock held, so sections return this
/// and [`Interpreter::with`] finishes the conversion.
#[derive(Debug)]
pub(crate) enum Failure {
    Python(PyErr),
    Bridge(BridgeError),
}

impl Failure {
    pub(crate) fn into_bridge(self, py: Python<'_>, interpreter: &'static Interpreter) -> BridgeError {
        match self {
            Self::Python(err) => BridgeError::from_py(py, interpreter, &err),
            Self::Bridge(err) => err,
        }
    }

    /// Turns the failure into an exception to raise from a host callback.
    pub(crate) fn into_py_err(self, py: Python<'_>) -> PyErr {
        match self {
            Self::Python(err) => err,
            Self::Bridge(err) => err.into_py_err(py),
        }
    }
}

impl From<PyErr> for Failure {
    fn from(err: PyErr) -> Self {
        Self::Python(err)
    }
}

impl From<BridgeError> for Failure {
    fn from(err: BridgeError) -> Self {
        Self::Bridge(err)
    }
}

impl From<Infallible> for Failure {
    fn from(never: Infallible) -> Self {
        match never {}
    }
}

/// Returns `module.qualname` for a Python type, omitting the module for builtins.
pub(crate) fn qualified_type_name(ty: &Bound<'_, PyType>) -> PyResult<String> {
    let name = ty.qualname()?.to_string();
    let module: String = ty.getattr("__module__")?.extract()?;
    if module == "builtins" {
        Ok(name)
    } else {
        Ok(format!("{module}.{name}"))
    }
}

fn exception_message(py: Python<'_>, err: &PyErr) -> String {
    err.value(py)
        .str()
        .map(|s| s.to_string())
        .unwrap_or_default()
}
