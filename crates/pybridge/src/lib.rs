//! Bridge between a Rust host and an embedded CPython interpreter.
//!
//! Python objects are reached by reference through [`Handle`]s, converted to and from
//! [`HostValue`] by fixed rules, and can be chained through [`Proxy`] without converting the
//! intermediate steps. Host byte blocks can be lent to Python without copying through
//! [`SharedBuffer`].
//!
//! ```no_run
//! use pybridge::HostValue;
//!
//! # fn main() -> pybridge::Result<()> {
//! let json = pybridge::import("json")?;
//! let text = json.get("dumps")?.call(&[HostValue::from(vec![1, 2, 3])])?;
//! assert_eq!(text.to_host()?, HostValue::from("[1, 2, 3]"));
//!
//! let sum = pybridge::eval("a + b", Some(&[("a", 1), ("b", 2)].into_iter().collect()), None)?;
//! assert_eq!(sum.to_host()?, HostValue::from(3));
//! # Ok(())
//! # }
//! ```
#![expect(clippy::cast_possible_truncation, reason = "float to integer casts are range checked")]

mod buffer;
mod cache;
mod config;
mod error;
mod handle;
mod interpreter;
mod marshal;
mod proxy;
mod value;

pub use crate::{
    buffer::{SharedBuffer, unwrap_to_buffer, wrap_as_bytearray, wrap_as_bytes, wrap_as_memoryview},
    config::{BridgeConfig, SEARCH_PATH_ENV},
    error::{BridgeError, ForeignError, ForeignErrorKind, Result, TraceFrame, Traceback},
    handle::{ForeignKind, Handle},
    interpreter::{BridgeVersion, Interpreter, PythonLibrary, PythonRuntime, VersionInfo},
    marshal::{ForeignType, MAX_NESTING_DEPTH},
    proxy::{Proxy, proxify},
    value::{HostCallback, HostFunction, HostMap, HostValue, MAX_SAFE_INTEGER, MIN_SAFE_INTEGER},
};

/// Imports a Python module by its dotted name, starting the interpreter if needed.
pub fn import(name: &str) -> Result<Handle> {
    Interpreter::global()?.import(name)
}

/// Evaluates a Python expression, starting the interpreter if needed.
///
/// See [`Interpreter::eval`] for how `globals` and `locals` are interpreted.
pub fn eval(code: &str, globals: Option<&HostValue>, locals: Option<&HostValue>) -> Result<Handle> {
    Interpreter::global()?.eval(code, globals, locals)
}

/// Reports bridge and Python version information, starting the interpreter if needed.
pub fn version() -> Result<VersionInfo> {
    Interpreter::global()?.version()
}
