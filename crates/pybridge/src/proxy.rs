//! Proxified access to Python objects.
//!
//! A [`Proxy`] keeps every step of a chain on the Python side: attribute access, subscripting and
//! calls return new proxies instead of handles, so `np.get("linalg")?.get("norm")?.call(..)` style
//! chains read like the Python they stand for. Convert explicitly with [`Proxy::to_host`] at the
//! end of the chain.

use std::{fmt, sync::Arc};

use crate::{
    error::Result,
    handle::Handle,
    value::{HostMap, HostValue},
};

/// Wraps a handle for chained access. `name` is only used in diagnostics.
#[must_use]
pub fn proxify(handle: &Handle, name: Option<&str>) -> Proxy {
    Proxy {
        handle: handle.clone(),
        name: name.map(Arc::from),
    }
}

/// A Python object accessed by reference through chained operations.
#[derive(Clone)]
pub struct Proxy {
    handle: Handle,
    name: Option<Arc<str>>,
}

impl Proxy {
    fn derive(&self, handle: Handle, step: impl FnOnce(&str) -> String) -> Self {
        Self {
            handle,
            name: self.name.as_deref().map(|name| Arc::from(step(name))),
        }
    }

    pub fn get(&self, name: &str) -> Result<Self> {
        let handle = self.handle.get(name)?;
        Ok(self.derive(handle, |parent| format!("{parent}.{name}")))
    }

    pub fn item(&self, index: impl Into<HostValue>) -> Result<Self> {
        let index = index.into();
        let handle = self.handle.item(index.clone())?;
        Ok(self.derive(handle, |parent| match &index {
            HostValue::String(key) => format!("{parent}[{key:?}]"),
            HostValue::Number(n) => format!("{parent}[{n}]"),
            _ => format!("{parent}[...]"),
        }))
    }

    /// Calls the object with the same keyword rule as [`Handle::call`].
    pub fn call(&self, args: &[HostValue]) -> Result<Self> {
        let handle = self.handle.call(args)?;
        Ok(self.derive(handle, |parent| format!("{parent}()")))
    }

    pub fn call_with(&self, args: &[HostValue], kwargs: &HostMap) -> Result<Self> {
        let handle = self.handle.call_with(args, kwargs)?;
        Ok(self.derive(handle, |parent| format!("{parent}()")))
    }

    pub fn has(&self, name: &str) -> Result<bool> {
        self.handle.has(name)
    }

    pub fn length(&self) -> Result<Option<usize>> {
        self.handle.length()
    }

    #[must_use]
    pub fn callable(&self) -> bool {
        self.handle.callable()
    }

    #[must_use]
    pub fn type_name(&self) -> &str {
        self.handle.type_name()
    }

    pub fn to_host(&self) -> Result<HostValue> {
        self.handle.to_host()
    }

    pub fn str(&self) -> Result<String> {
        self.handle.str()
    }

    #[must_use]
    pub fn handle(&self) -> &Handle {
        &self.handle
    }

    #[must_use]
    pub fn into_handle(self) -> Handle {
        self.handle
    }

    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl PartialEq for Proxy {
    fn eq(&self, other: &Self) -> bool {
        self.handle == other.handle
    }
}

impl fmt::Debug for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "Proxy({name})"),
            None => write!(f, "Proxy({:?})", self.handle),
        }
    }
}

impl fmt::Display for Proxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "[proxy {name}]"),
            None => write!(f, "{}", self.handle),
        }
    }
}
