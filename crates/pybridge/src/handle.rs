//! Reference-counted wrappers around Python objects.
//!
//! A [`Handle`] owns one strong Python reference. Handles are created through the identity cache,
//! so wrapping the same Python object twice while a handle is alive yields the same `Arc`, and
//! handle equality is Python `is`.

use std::{fmt, hash, mem::ManuallyDrop, sync::Arc};

use pyo3::{
    exceptions::PyAttributeError,
    ffi,
    prelude::*,
    types::{PyBool, PyDict, PyFloat, PyInt, PyList, PyModule, PyString, PyTuple},
};

use crate::{
    buffer::{self, SharedBuffer},
    error::{BridgeError, Result, qualified_type_name},
    interpreter::Interpreter,
    marshal::{self, ForeignType},
    value::{HostMap, HostValue},
};

/// What kind of Python object a handle refers to, decided once when the handle is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ForeignKind {
    None,
    Bool,
    Int,
    Float,
    Str,
    List,
    Tuple,
    Dict,
    Module,
    /// Supports the buffer protocol (`bytes`, `bytearray`, `memoryview`, ...).
    Buffer,
    Callable,
    /// Anything else: instances of user classes, iterators, sets, ...
    Opaque,
}

impl ForeignKind {
    pub(crate) fn classify(object: &Bound<'_, PyAny>) -> Self {
        if object.is_none() {
            Self::None
        } else if object.is_instance_of::<PyBool>() {
            // bool subclasses int
            Self::Bool
        } else if object.is_instance_of::<PyInt>() {
            Self::Int
        } else if object.is_instance_of::<PyFloat>() {
            Self::Float
        } else if object.is_instance_of::<PyString>() {
            Self::Str
        } else if object.is_instance_of::<PyList>() {
            Self::List
        } else if object.is_instance_of::<PyTuple>() {
            Self::Tuple
        } else if object.is_instance_of::<PyDict>() {
            Self::Dict
        } else if object.is_instance_of::<PyModule>() {
            Self::Module
        } else if supports_buffer(object) {
            Self::Buffer
        } else if object.is_callable() {
            Self::Callable
        } else {
            Self::Opaque
        }
    }
}

pub(crate) fn supports_buffer(object: &Bound<'_, PyAny>) -> bool {
    // SAFETY: the pointer comes from a live `Bound`, and the interpreter lock is held.
    unsafe { ffi::PyObject_CheckBuffer(object.as_ptr()) != 0 }
}

/// Shared state behind a [`Handle`].
pub(crate) struct HandleInner {
    interpreter: &'static Interpreter,
    object: ManuallyDrop<Py<PyAny>>,
    address: usize,
    kind: ForeignKind,
    callable: bool,
    type_name: String,
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        self.interpreter.cache().forget(self.address);
        // SAFETY: `object` is not touched again after being taken here.
        let object = unsafe { ManuallyDrop::take(&mut self.object) };
        Python::attach(|py| object.drop_ref(py));
    }
}

impl fmt::Debug for HandleInner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{} object at {:#x}>", self.type_name, self.address)
    }
}

/// A reference to one Python object.
///
/// Cloning is cheap and shares the reference. The Python reference is released, under the
/// interpreter lock, when the last clone is dropped.
#[derive(Clone)]
pub struct Handle(Arc<HandleInner>);

impl Handle {
    /// Wraps a Python object, reusing the live handle for it if there is one.
    pub(crate) fn wrap(interpreter: &'static Interpreter, object: &Bound<'_, PyAny>) -> Self {
        let address = object.as_ptr().addr();
        let inner = interpreter.cache().intern(address, || {
            let kind = ForeignKind::classify(object);
            HandleInner {
                interpreter,
                object: ManuallyDrop::new(object.clone().unbind()),
                address,
                kind,
                callable: kind == ForeignKind::Callable || object.is_callable(),
                type_name: qualified_type_name(&object.get_type()).unwrap_or_else(|_| "object".to_owned()),
            }
        });
        Self(inner)
    }

    pub(crate) fn from_inner(inner: Arc<HandleInner>) -> Self {
        Self(inner)
    }

    /// Borrows the object for the duration of an execution-lock section.
    pub(crate) fn bind<'py>(&'py self, py: Python<'py>) -> &'py Bound<'py, PyAny> {
        self.0.object.bind(py)
    }

    /// Takes a new strong reference to the object, not tied to the handle's lifetime.
    pub(crate) fn to_bound<'py>(&self, py: Python<'py>) -> Bound<'py, PyAny> {
        self.0.object.clone_ref(py).into_bound(py)
    }

    pub(crate) fn interpreter(&self) -> &'static Interpreter {
        self.0.interpreter
    }

    fn wrap_here(&self, object: &Bound<'_, PyAny>) -> Self {
        Self::wrap(self.interpreter(), object)
    }

    /// Reads an attribute. A missing attribute is [`BridgeError::Attribute`]; any other exception
    /// raised by a property getter is [`BridgeError::Foreign`].
    pub fn get(&self, name: &str) -> Result<Self> {
        self.interpreter().with(|py| {
            let object = self.bind(py);
            match object.getattr(name) {
                Ok(attr) => Ok(self.wrap_here(&attr)),
                Err(err) if err.is_instance_of::<PyAttributeError>(py) => {
                    Err(BridgeError::attribute(py, name, object, &err).into())
                }
                Err(err) => Err(err.into()),
            }
        })
    }

    /// Python `hasattr`.
    pub fn has(&self, name: &str) -> Result<bool> {
        self.interpreter().with(|py| Ok(self.bind(py).hasattr(name)?))
    }

    /// Subscripts the object, `object[index]`. The index is marshaled like any argument, so it
    /// may itself be a handle (a slice, a tuple key, ...).
    pub fn item(&self, index: impl Into<HostValue>) -> Result<Self> {
        let index = index.into();
        self.interpreter().with(|py| {
            let key = marshal::to_foreign(py, self.interpreter(), &index, None)?;
            let value = self.bind(py).get_item(key)?;
            Ok(self.wrap_here(&value))
        })
    }

    /// Calls the object.
    ///
    /// A trailing [`HostValue::Object`] is taken as keyword arguments. To pass a dict
    /// positionally in last place, pass a handle to it instead, or use
    /// [`call_with`](Self::call_with).
    pub fn call(&self, args: &[HostValue]) -> Result<Self> {
        let (positional, kwargs) = marshal::split_call_args(args);
        self.call_inner(positional, kwargs)
    }

    /// Calls the object with explicit positional and keyword arguments.
    pub fn call_with(&self, args: &[HostValue], kwargs: &HostMap) -> Result<Self> {
        self.call_inner(args, Some(kwargs))
    }

    fn call_inner(&self, args: &[HostValue], kwargs: Option<&HostMap>) -> Result<Self> {
        self.interpreter().with(|py| {
            let result = marshal::call_object(py, self.interpreter(), self.bind(py), args, kwargs)?;
            Ok(self.wrap_here(&result))
        })
    }

    /// Python `len()`, or `None` when the type does not define `__len__`.
    pub fn length(&self) -> Result<Option<usize>> {
        self.interpreter().with(|py| {
            let object = self.bind(py);
            if !object.get_type().hasattr("__len__")? {
                return Ok(None);
            }
            Ok(Some(object.len()?))
        })
    }

    /// Python `callable()`.
    #[must_use]
    pub fn callable(&self) -> bool {
        self.0.callable
    }

    #[must_use]
    pub fn kind(&self) -> ForeignKind {
        self.0.kind
    }

    /// Qualified name of the object's type, e.g. `int` or `collections.OrderedDict`.
    #[must_use]
    pub fn type_name(&self) -> &str {
        &self.0.type_name
    }

    /// Address of the Python object, stable for the lifetime of the handle.
    #[must_use]
    pub fn address(&self) -> usize {
        self.0.address
    }

    /// Python `str()`.
    pub fn str(&self) -> Result<String> {
        self.interpreter().with(|py| Ok(self.bind(py).str()?.to_string()))
    }

    /// Python `repr()`.
    pub fn repr(&self) -> Result<String> {
        self.interpreter().with(|py| Ok(self.bind(py).repr()?.to_string()))
    }

    /// `repr()`, or a generic description when Python cannot produce one.
    pub(crate) fn display_repr(&self) -> String {
        self.repr().unwrap_or_else(|_| format!("{:?}", self.0))
    }

    /// Converts the object to a host value.
    pub fn to_host(&self) -> Result<HostValue> {
        self.interpreter().with(|py| marshal::to_host(py, self.interpreter(), self.bind(py)))
    }

    /// Alias of [`to_host`](Self::to_host).
    pub fn value_of(&self) -> Result<HostValue> {
        self.to_host()
    }

    /// Keys of a dict, or of the object's `__dict__`, as a list.
    pub fn keys(&self) -> Result<Self> {
        self.mapping_view("keys")
    }

    /// Values of a dict, or of the object's `__dict__`, as a list.
    pub fn values(&self) -> Result<Self> {
        self.mapping_view("values")
    }

    fn mapping_view(&self, method: &str) -> Result<Self> {
        self.interpreter().with(|py| {
            let object = self.bind(py);
            let mapping = if object.is_instance_of::<PyDict>() {
                object.clone()
            } else {
                object.getattr("__dict__")?
            };
            let view = mapping.call_method0(method)?;
            let list = py.get_type::<PyList>().call1((view,))?;
            Ok(self.wrap_here(&list))
        })
    }

    /// Converts a host value with the automatic rules.
    pub fn from_host(value: &HostValue) -> Result<Self> {
        let interpreter = Interpreter::global()?;
        interpreter.with(|py| {
            let object = marshal::to_foreign(py, interpreter, value, None)?;
            Ok(Self::wrap(interpreter, &object))
        })
    }

    /// Converts a host value to exactly the Python type `ty`.
    ///
    /// Fails with [`BridgeError::TypeConversion`] when the value has no mapping to that type.
    /// Values that already reference a Python object are returned as is.
    pub fn from_host_as(value: &HostValue, ty: ForeignType) -> Result<Self> {
        let interpreter = Interpreter::global()?;
        interpreter.with(|py| {
            let object = marshal::to_foreign(py, interpreter, value, Some(ty))?;
            Ok(Self::wrap(interpreter, &object))
        })
    }

    /// Builds an `int`. Non-integral numbers truncate toward zero.
    pub fn int(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::Int)
    }

    /// Builds a `float`.
    pub fn float(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::Float)
    }

    /// Builds a `str`.
    pub fn string(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::Str)
    }

    /// Builds a `dict` from an object.
    pub fn dict(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::Dict)
    }

    /// Builds a `list` from an array.
    pub fn list(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::List)
    }

    /// Builds a `tuple` from an array.
    pub fn tuple(value: impl Into<HostValue>) -> Result<Self> {
        Self::from_host_as(&value.into(), ForeignType::Tuple)
    }

    /// Builds a `slice`. Pass [`HostValue::None`] for an open bound.
    pub fn slice(start: impl Into<HostValue>, stop: impl Into<HostValue>, step: impl Into<HostValue>) -> Result<Self> {
        let bounds = HostValue::Array(vec![start.into(), stop.into(), step.into()]);
        Self::from_host_as(&bounds, ForeignType::Slice)
    }

    /// Builds a `bytes` copy of `data`.
    pub fn bytes(data: &[u8]) -> Result<Self> {
        buffer::wrap_as_bytes(data)
    }

    /// Builds a `bytearray` copy of `data`.
    pub fn bytearray(data: &[u8]) -> Result<Self> {
        buffer::wrap_as_bytearray(data)
    }

    /// Builds a writable `memoryview` over host memory, without copying.
    pub fn memoryview(buffer: &SharedBuffer) -> Result<Self> {
        buffer::wrap_as_memoryview(buffer)
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for Handle {}

impl hash::Hash for Handle {
    fn hash<H: hash::Hasher>(&self, state: &mut H) {
        self.0.address.hash(state);
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Handle({:?})", self.0)
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.str() {
            Ok(text) => f.write_str(&text),
            Err(_) => f.write_str(&self.display_repr()),
        }
    }
}
