//! Conversion between [`HostValue`] and Python objects.
//!
//! All functions here run inside an execution-lock section and return [`Failure`] so Python
//! errors can be captured with their traceback by [`Interpreter::with`].
//!
//! Host → Python, automatic rules:
//! - integral finite `Number` → `int`, other `Number` → `float`, `BigInt` → `int`
//! - `Array` → `list`, `Object` → `dict`, `Bytes` → `bytearray` copy
//! - `Handle`, `Proxy` and `Function` → the referenced object itself
//! - `Callback` → a Python callable running the host closure
//!
//! Python → host: primitives and containers convert recursively, buffer-protocol objects copy
//! to `Bytes`, modules expand to an `Object` of their namespace (one level), callables become
//! `Function`, everything else stays a `Handle`.
//!
//! Both directions recurse once per container level and stop at [`MAX_NESTING_DEPTH`]. Python
//! containers nested deeper stay `Handle`s; host values nested deeper are rejected.

use std::fmt;

use ahash::AHashSet;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};
use pyo3::{
    prelude::*,
    types::{PyBool, PyByteArray, PyBytes, PyCFunction, PyDict, PyFloat, PyList, PySlice, PyString, PyTuple},
};

use crate::{
    buffer,
    error::{BridgeError, Failure},
    handle::{ForeignKind, Handle},
    interpreter::Interpreter,
    value::{HostCallback, HostFunction, HostMap, HostValue, is_integral},
};

/// Deepest container nesting converted in either direction.
///
/// Lower in debug builds, whose call frames are larger.
#[cfg(debug_assertions)]
pub const MAX_NESTING_DEPTH: usize = 100;

/// Deepest container nesting converted in either direction.
#[cfg(not(debug_assertions))]
pub const MAX_NESTING_DEPTH: usize = 500;

/// Target Python type of an explicit constructor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForeignType {
    Int,
    Float,
    Str,
    Dict,
    List,
    Tuple,
    Slice,
    Bytes,
    ByteArray,
}

impl fmt::Display for ForeignType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Int => "int",
            Self::Float => "float",
            Self::Str => "str",
            Self::Dict => "dict",
            Self::List => "list",
            Self::Tuple => "tuple",
            Self::Slice => "slice",
            Self::Bytes => "bytes",
            Self::ByteArray => "bytearray",
        })
    }
}

/// Converts a host value to a Python object.
///
/// With a `hint`, the value must have a mapping to that exact type; references to Python
/// objects pass through unchanged whatever the hint.
pub(crate) fn to_foreign<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    value: &HostValue,
    hint: Option<ForeignType>,
) -> Result<Bound<'py, PyAny>, Failure> {
    nested_to_foreign(py, interpreter, value, hint, 0)
}

fn nested_to_foreign<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    value: &HostValue,
    hint: Option<ForeignType>,
    depth: usize,
) -> Result<Bound<'py, PyAny>, Failure> {
    if let Some(handle) = value.as_handle() {
        return Ok(handle.to_bound(py));
    }
    if depth > MAX_NESTING_DEPTH {
        return Err(BridgeError::conversion(format!("value nested deeper than {MAX_NESTING_DEPTH} levels")).into());
    }
    match hint {
        None => auto(py, interpreter, value, depth),
        Some(ty) => typed(py, interpreter, value, ty, depth),
    }
}

fn auto<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    value: &HostValue,
    depth: usize,
) -> Result<Bound<'py, PyAny>, Failure> {
    Ok(match value {
        HostValue::None => py.None().into_bound(py),
        HostValue::Bool(b) => PyBool::new(py, *b).to_owned().into_any(),
        HostValue::Number(n) => number(py, *n)?,
        HostValue::BigInt(big) => big.into_pyobject(py)?.into_any(),
        HostValue::String(s) => PyString::new(py, s).into_any(),
        HostValue::Array(items) => list(py, interpreter, items, depth)?.into_any(),
        HostValue::Object(map) => dict(py, interpreter, map, depth)?.into_any(),
        HostValue::Bytes(bytes) => PyByteArray::new(py, bytes).into_any(),
        HostValue::Callback(callback) => callback_to_foreign(py, interpreter, callback)?,
        HostValue::Function(function) => function.handle().to_bound(py),
        HostValue::Handle(handle) => handle.to_bound(py),
        HostValue::Proxy(proxy) => proxy.handle().to_bound(py),
    })
}

fn typed<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    value: &HostValue,
    ty: ForeignType,
    depth: usize,
) -> Result<Bound<'py, PyAny>, Failure> {
    Ok(match (ty, value) {
        (ForeignType::Int, HostValue::Number(n)) if n.is_finite() => {
            let truncated = BigInt::from_f64(n.trunc())
                .ok_or_else(|| BridgeError::conversion(format!("cannot build int from {n}")))?;
            truncated.into_pyobject(py)?.into_any()
        }
        (ForeignType::Int, HostValue::BigInt(big)) => big.into_pyobject(py)?.into_any(),
        (ForeignType::Float, HostValue::Number(n)) => PyFloat::new(py, *n).into_any(),
        (ForeignType::Float, HostValue::BigInt(big)) => PyFloat::new(py, big.to_f64().unwrap_or(f64::NAN)).into_any(),
        (ForeignType::Str, HostValue::String(s)) => PyString::new(py, s).into_any(),
        (ForeignType::Dict, HostValue::Object(map)) => dict(py, interpreter, map, depth)?.into_any(),
        (ForeignType::List, HostValue::Array(items)) => list(py, interpreter, items, depth)?.into_any(),
        (ForeignType::Tuple, HostValue::Array(items)) => {
            PyTuple::new(py, elements(py, interpreter, items, depth)?)?.into_any()
        }
        (ForeignType::Slice, HostValue::Array(items)) if items.len() == 3 => {
            let bounds = PyTuple::new(py, elements(py, interpreter, items, depth)?)?;
            py.get_type::<PySlice>().call1(bounds)?
        }
        (ForeignType::Bytes, HostValue::Bytes(bytes)) => PyBytes::new(py, bytes).into_any(),
        (ForeignType::ByteArray, HostValue::Bytes(bytes)) => PyByteArray::new(py, bytes).into_any(),
        (ForeignType::Slice, HostValue::Array(items)) => {
            return Err(BridgeError::conversion(format!(
                "slice needs exactly 3 elements (start, stop, step), got {}",
                items.len()
            ))
            .into());
        }
        (ty, value) => {
            return Err(BridgeError::conversion(format!("cannot build {ty} from {}", value.kind_name())).into());
        }
    })
}

fn number(py: Python<'_>, n: f64) -> Result<Bound<'_, PyAny>, Failure> {
    if is_integral(n)
        && let Some(big) = BigInt::from_f64(n)
    {
        return Ok(match big.to_i64() {
            Some(small) => small.into_pyobject(py)?.into_any(),
            None => big.into_pyobject(py)?.into_any(),
        });
    }
    Ok(PyFloat::new(py, n).into_any())
}

/// Converts the members of a container found at `depth`.
fn elements<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    items: &[HostValue],
    depth: usize,
) -> Result<Vec<Bound<'py, PyAny>>, Failure> {
    items
        .iter()
        .map(|item| nested_to_foreign(py, interpreter, item, None, depth + 1))
        .collect()
}

fn list<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    items: &[HostValue],
    depth: usize,
) -> Result<Bound<'py, PyList>, Failure> {
    Ok(PyList::new(py, elements(py, interpreter, items, depth)?)?)
}

fn dict<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    map: &HostMap,
    depth: usize,
) -> Result<Bound<'py, PyDict>, Failure> {
    let dict = PyDict::new(py);
    for (key, value) in map {
        dict.set_item(key, nested_to_foreign(py, interpreter, value, None, depth + 1)?)?;
    }
    Ok(dict)
}

/// Exposes a host closure as a Python callable.
///
/// The closure runs with the interpreter lock held, so it can call back into Python freely.
fn callback_to_foreign<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    callback: &HostCallback,
) -> Result<Bound<'py, PyAny>, Failure> {
    let callback = callback.clone();
    let function = PyCFunction::new_closure(
        py,
        None,
        None,
        move |args: &Bound<'_, PyTuple>, kwargs: Option<&Bound<'_, PyDict>>| -> PyResult<Py<PyAny>> {
            let py = args.py();
            tracing::trace!(callback = callback.name(), "python called host callback");
            invoke_callback(py, interpreter, &callback, args, kwargs).map_err(|failure| failure.into_py_err(py))
        },
    )?;
    Ok(function.into_any())
}

fn invoke_callback(
    py: Python<'_>,
    interpreter: &'static Interpreter,
    callback: &HostCallback,
    args: &Bound<'_, PyTuple>,
    kwargs: Option<&Bound<'_, PyDict>>,
) -> Result<Py<PyAny>, Failure> {
    let positional = args
        .iter()
        .map(|arg| to_host(py, interpreter, &arg))
        .collect::<Result<Vec<_>, _>>()?;
    let mut keywords = HostMap::new();
    if let Some(kwargs) = kwargs {
        for (key, value) in kwargs {
            keywords.insert(key.str()?.to_string(), to_host(py, interpreter, &value)?);
        }
    }
    let result = callback.call(positional, keywords)?;
    Ok(to_foreign(py, interpreter, &result, None)?.unbind())
}

/// Splits call arguments by the keyword rule: a trailing `Object` is keyword arguments.
pub(crate) fn split_call_args(args: &[HostValue]) -> (&[HostValue], Option<&HostMap>) {
    match args.split_last() {
        Some((HostValue::Object(kwargs), positional)) => (positional, Some(kwargs)),
        _ => (args, None),
    }
}

/// Calls `callable` with marshaled arguments.
pub(crate) fn call_object<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    callable: &Bound<'py, PyAny>,
    args: &[HostValue],
    kwargs: Option<&HostMap>,
) -> Result<Bound<'py, PyAny>, Failure> {
    let positional = PyTuple::new(py, elements(py, interpreter, args, 0)?)?;
    let kwargs = kwargs.map(|map| dict(py, interpreter, map, 0)).transpose()?;
    Ok(callable.call(positional, kwargs.as_ref())?)
}

/// Converts a Python object to a host value.
pub(crate) fn to_host(
    py: Python<'_>,
    interpreter: &'static Interpreter,
    object: &Bound<'_, PyAny>,
) -> Result<HostValue, Failure> {
    HostConverter {
        interpreter,
        visiting: AHashSet::new(),
        depth: 0,
        module_expanded: false,
    }
    .convert(py, object)
}

struct HostConverter {
    interpreter: &'static Interpreter,
    /// Addresses of the containers on the current conversion path.
    visiting: AHashSet<usize>,
    depth: usize,
    module_expanded: bool,
}

impl HostConverter {
    fn convert(&mut self, py: Python<'_>, object: &Bound<'_, PyAny>) -> Result<HostValue, Failure> {
        Ok(match ForeignKind::classify(object) {
            ForeignKind::None => HostValue::None,
            ForeignKind::Bool => HostValue::Bool(object.is_truthy()?),
            ForeignKind::Int => match object.extract::<i64>() {
                Ok(small) => HostValue::from(small),
                Err(_) => HostValue::integer(object.extract::<BigInt>()?),
            },
            ForeignKind::Float => HostValue::Number(object.extract()?),
            ForeignKind::Str => HostValue::String(object.extract()?),
            ForeignKind::List | ForeignKind::Tuple => {
                return self.nested(object, |this| {
                    let items = object
                        .try_iter()?
                        .map(|item| this.convert(py, &item?))
                        .collect::<Result<Vec<_>, _>>()?;
                    Ok(HostValue::Array(items))
                });
            }
            ForeignKind::Dict => return self.nested(object, |this| this.mapping(py, object)),
            ForeignKind::Buffer => HostValue::Bytes(buffer::copy_out(object)?),
            ForeignKind::Module if !self.module_expanded => {
                self.module_expanded = true;
                let namespace = object.getattr("__dict__")?;
                return self.nested(object, |this| this.mapping(py, &namespace));
            }
            ForeignKind::Module | ForeignKind::Opaque => HostValue::Handle(Handle::wrap(self.interpreter, object)),
            ForeignKind::Callable => HostValue::Function(HostFunction::new(Handle::wrap(self.interpreter, object))),
        })
    }

    fn mapping(&mut self, py: Python<'_>, mapping: &Bound<'_, PyAny>) -> Result<HostValue, Failure> {
        let mut map = HostMap::new();
        for key in mapping.try_iter()? {
            let key = key?;
            let value = mapping.get_item(&key)?;
            map.insert(key.str()?.to_string(), self.convert(py, &value)?);
        }
        Ok(HostValue::Object(map))
    }

    /// Converts a container, emitting a handle instead when it is already being converted
    /// higher up (a self-referencing structure) or sits past [`MAX_NESTING_DEPTH`].
    fn nested(
        &mut self,
        object: &Bound<'_, PyAny>,
        convert: impl FnOnce(&mut Self) -> Result<HostValue, Failure>,
    ) -> Result<HostValue, Failure> {
        let address = object.as_ptr().addr();
        if self.depth >= MAX_NESTING_DEPTH {
            tracing::debug!(address, depth = self.depth, "deeply nested container left unconverted");
            return Ok(HostValue::Handle(Handle::wrap(self.interpreter, object)));
        }
        if !self.visiting.insert(address) {
            tracing::debug!(address, "cyclic container left unconverted");
            return Ok(HostValue::Handle(Handle::wrap(self.interpreter, object)));
        }
        self.depth += 1;
        let result = convert(self);
        self.depth -= 1;
        self.visiting.remove(&address);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_object_becomes_keywords() {
        let kwargs: HostValue = [("sep", "-")].into_iter().collect();
        let args = [HostValue::from(1), HostValue::from("a"), kwargs.clone()];
        let (positional, keywords) = split_call_args(&args);
        assert_eq!(positional, &args[..2]);
        assert_eq!(keywords, kwargs.as_object());
    }

    #[test]
    fn object_in_the_middle_stays_positional() {
        let kwargs: HostValue = [("sep", "-")].into_iter().collect();
        let args = [kwargs, HostValue::from(1)];
        let (positional, keywords) = split_call_args(&args);
        assert_eq!(positional.len(), 2);
        assert!(keywords.is_none());
    }

    #[test]
    fn no_arguments() {
        let (positional, keywords) = split_call_args(&[]);
        assert!(positional.is_empty());
        assert!(keywords.is_none());
    }

    #[test]
    fn foreign_type_names() {
        assert_eq!(ForeignType::ByteArray.to_string(), "bytearray");
        assert_eq!(ForeignType::Slice.to_string(), "slice");
    }
}
