//! Host-side value model.
//!
//! [`HostValue`] is the dynamic value the host program exchanges with Python. Primitive variants
//! are owned copies; `Handle`, `Proxy` and `Function` are references to live Python objects and
//! always travel back to Python by reference.
//!
//! Numbers follow a double-precision model: integers inside the safe-integer range
//! (±(2^53 − 1)) are `Number`, larger ones are `BigInt`, so no integer ever loses precision on
//! the way through the bridge.

use std::{fmt, sync::Arc};

use indexmap::IndexMap;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, ToPrimitive};

use crate::{error::Result, handle::Handle, proxy::Proxy};

/// Largest integer a `Number` represents exactly.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;
/// Smallest integer a `Number` represents exactly.
pub const MIN_SAFE_INTEGER: i64 = -MAX_SAFE_INTEGER;

/// String-keyed mapping, insertion ordered.
pub type HostMap = IndexMap<String, HostValue>;

/// A value on the host side of the bridge.
#[derive(Clone)]
pub enum HostValue {
    /// Absent value; maps to `None`.
    None,
    Bool(bool),
    /// Double-precision number; integral values map to Python `int`.
    Number(f64),
    /// Integer outside the safe-integer range.
    BigInt(BigInt),
    String(String),
    /// Ordered sequence; maps to `list`.
    Array(Vec<HostValue>),
    /// Key/value mapping; maps to `dict`. A trailing `Object` argument of a call is taken as
    /// keyword arguments.
    Object(HostMap),
    /// Byte block; maps to a `bytearray` copy.
    Bytes(Vec<u8>),
    /// Invocable wrapper around a Python callable.
    Function(HostFunction),
    /// Host closure exposed to Python as a callable.
    Callback(HostCallback),
    /// Unconverted Python object.
    Handle(Handle),
    /// Proxified Python object.
    Proxy(Proxy),
}

impl HostValue {
    /// Builds an integer value, choosing `Number` or `BigInt` by the safe-integer range.
    #[must_use]
    pub fn integer(value: impl Into<BigInt>) -> Self {
        let value = value.into();
        match value.to_i64() {
            Some(small) if (MIN_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&small) => Self::Number(small as f64),
            _ => Self::BigInt(value),
        }
    }

    /// Short description of the variant, used in conversion errors.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Bool(_) => "bool",
            Self::Number(_) => "number",
            Self::BigInt(_) => "bigint",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
            Self::Bytes(_) => "bytes",
            Self::Function(_) => "function",
            Self::Callback(_) => "callback",
            Self::Handle(_) => "handle",
            Self::Proxy(_) => "proxy",
        }
    }

    #[must_use]
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::BigInt(b) => b.to_f64(),
            _ => None,
        }
    }

    /// Returns the value as an `i64` when it is an integer that fits.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Number(n) if is_integral(*n) => BigInt::from_f64(*n)?.to_i64(),
            Self::BigInt(b) => b.to_i64(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Self]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&HostMap> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Self::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    /// Returns the function wrapper when the value came from a Python callable.
    #[must_use]
    pub fn as_function(&self) -> Option<&HostFunction> {
        match self {
            Self::Function(function) => Some(function),
            _ => None,
        }
    }

    /// Returns the Python object this value references, if any.
    #[must_use]
    pub fn as_handle(&self) -> Option<&Handle> {
        match self {
            Self::Handle(handle) => Some(handle),
            Self::Proxy(proxy) => Some(proxy.handle()),
            Self::Function(function) => Some(function.handle()),
            _ => None,
        }
    }

    /// Looks up a key of an `Object`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Self> {
        self.as_object()?.get(key)
    }

    /// Converts to a natural JSON representation.
    ///
    /// - `None` → `null`, `Bool` → boolean, `String` → string
    /// - `Number` → JSON number (integral values as integers, NaN/Infinity → `null`)
    /// - `BigInt` → `{"$bigint": "12345..."}`
    /// - `Array` → array, `Object` → object
    /// - `Bytes` → `{"$bytes": [...]}`
    /// - `Function` → `{"$function": "<repr>"}`
    /// - `Handle`/`Proxy` → `{"$handle": "<repr>"}`
    /// - `Callback` → `{"$callback": "<name>"}`
    ///
    /// Rendering a handle's `repr()` takes the execution lock.
    #[must_use]
    pub fn to_json_value(&self) -> serde_json::Value {
        use serde_json::{Value as JV, json};
        match self {
            Self::None => JV::Null,
            Self::Bool(b) => JV::Bool(*b),
            Self::Number(n) => {
                if n.is_nan() || n.is_infinite() {
                    JV::Null
                } else if is_integral(*n) && n.abs() <= MAX_SAFE_INTEGER as f64 {
                    json!(*n as i64)
                } else {
                    json!(n)
                }
            }
            Self::BigInt(b) => json!({"$bigint": b.to_string()}),
            Self::String(s) => JV::String(s.clone()),
            Self::Array(items) => JV::Array(items.iter().map(Self::to_json_value).collect()),
            Self::Object(map) => JV::Object(map.iter().map(|(k, v)| (k.clone(), v.to_json_value())).collect()),
            Self::Bytes(bytes) => json!({"$bytes": bytes}),
            Self::Function(function) => json!({"$function": function.handle().display_repr()}),
            Self::Handle(handle) => json!({"$handle": handle.display_repr()}),
            Self::Proxy(proxy) => json!({"$handle": proxy.handle().display_repr()}),
            Self::Callback(callback) => json!({"$callback": callback.name()}),
        }
    }

    /// Builds a value from JSON, accepting the `$bigint` and `$bytes` tags produced by
    /// [`to_json_value`](Self::to_json_value).
    #[must_use]
    pub fn from_json_value(value: serde_json::Value) -> Self {
        use serde_json::Value as JV;
        match value {
            JV::Null => Self::None,
            JV::Bool(b) => Self::Bool(b),
            JV::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::from(i)
                } else if let Some(u) = n.as_u64() {
                    Self::from(u)
                } else {
                    Self::Number(n.as_f64().unwrap_or(f64::NAN))
                }
            }
            JV::String(s) => Self::String(s),
            JV::Array(items) => Self::Array(items.into_iter().map(Self::from_json_value).collect()),
            JV::Object(map) => {
                if map.len() == 1 {
                    if let Some(JV::String(digits)) = map.get("$bigint")
                        && let Ok(big) = digits.parse::<BigInt>()
                    {
                        return Self::integer(big);
                    }
                    if let Some(JV::Array(items)) = map.get("$bytes")
                        && let Some(bytes) = items
                            .iter()
                            .map(|item| item.as_u64().and_then(|b| u8::try_from(b).ok()))
                            .collect::<Option<Vec<u8>>>()
                    {
                        return Self::Bytes(bytes);
                    }
                }
                Self::Object(map.into_iter().map(|(k, v)| (k, Self::from_json_value(v))).collect())
            }
        }
    }
}

pub(crate) fn is_integral(n: f64) -> bool {
    n.is_finite() && n.fract() == 0.0
}

impl PartialEq for HostValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::None, Self::None) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::BigInt(a), Self::BigInt(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Callback(a), Self::Callback(b)) => a == b,
            // references compare by Python object identity, whatever wrapper they come in
            (a, b) => match (a.as_handle(), b.as_handle()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }
}

impl fmt::Debug for HostValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Number(n) => write!(f, "Number({n})"),
            Self::BigInt(b) => write!(f, "BigInt({b})"),
            Self::String(s) => write!(f, "String({s:?})"),
            Self::Array(items) => f.debug_tuple("Array").field(items).finish(),
            Self::Object(map) => f.debug_tuple("Object").field(map).finish(),
            Self::Bytes(bytes) => write!(f, "Bytes({bytes:?})"),
            Self::Function(function) => write!(f, "{function:?}"),
            Self::Callback(callback) => write!(f, "{callback:?}"),
            Self::Handle(handle) => write!(f, "{handle:?}"),
            Self::Proxy(proxy) => write!(f, "{proxy:?}"),
        }
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

impl From<f32> for HostValue {
    fn from(value: f32) -> Self {
        Self::Number(f64::from(value))
    }
}

macro_rules! from_integer {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for HostValue {
                fn from(value: $ty) -> Self {
                    Self::integer(value)
                }
            }
        )*
    };
}

from_integer!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

impl From<BigInt> for HostValue {
    fn from(value: BigInt) -> Self {
        Self::integer(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_owned())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl<T: Into<Self>> From<Vec<T>> for HostValue {
    fn from(values: Vec<T>) -> Self {
        Self::Array(values.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Self>> From<Option<T>> for HostValue {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::None, Into::into)
    }
}

impl From<HostMap> for HostValue {
    fn from(map: HostMap) -> Self {
        Self::Object(map)
    }
}

impl From<Handle> for HostValue {
    fn from(handle: Handle) -> Self {
        Self::Handle(handle)
    }
}

impl From<&Handle> for HostValue {
    fn from(handle: &Handle) -> Self {
        Self::Handle(handle.clone())
    }
}

impl From<Proxy> for HostValue {
    fn from(proxy: Proxy) -> Self {
        Self::Proxy(proxy)
    }
}

impl From<HostFunction> for HostValue {
    fn from(function: HostFunction) -> Self {
        Self::Function(function)
    }
}

impl From<HostCallback> for HostValue {
    fn from(callback: HostCallback) -> Self {
        Self::Callback(callback)
    }
}

impl<K: Into<String>, V: Into<Self>> FromIterator<(K, V)> for HostValue {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect())
    }
}

/// A Python callable converted to the host side.
///
/// Invoking it marshals the arguments like [`Handle::call`] and returns the result unconverted.
/// Two functions over the same Python callable compare equal.
#[derive(Clone, PartialEq)]
pub struct HostFunction {
    handle: Handle,
}

impl HostFunction {
    pub(crate) fn new(handle: Handle) -> Self {
        Self { handle }
    }

    pub fn invoke(&self, args: &[HostValue]) -> Result<Handle> {
        self.handle.call(args)
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Function({:?})", self.handle)
    }
}

type CallbackFn = dyn Fn(Vec<HostValue>, HostMap) -> Result<HostValue> + Send + Sync;

/// A host closure that Python code can call.
///
/// Arguments arrive converted to host values, keyword arguments separately; the returned value
/// is converted back for Python. A returned error is raised in Python: conversion failures as
/// `TypeError`, foreign errors as the original exception.
#[derive(Clone)]
pub struct HostCallback {
    name: Arc<str>,
    function: Arc<CallbackFn>,
}

impl HostCallback {
    pub fn new(
        name: impl Into<String>,
        function: impl Fn(Vec<HostValue>, HostMap) -> Result<HostValue> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: Arc::from(name.into()),
            function: Arc::new(function),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn call(&self, args: Vec<HostValue>, kwargs: HostMap) -> Result<HostValue> {
        (self.function)(args, kwargs)
    }
}

impl PartialEq for HostCallback {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.function, &other.function)
    }
}

impl fmt::Debug for HostCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.name)
    }
}
