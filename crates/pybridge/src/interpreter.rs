//! The embedded interpreter as a process-wide service.
//!
//! [`Interpreter`] is created once, either explicitly with [`Interpreter::initialize`] or lazily
//! by the first bridge operation through [`Interpreter::global`]. It owns the identity cache and
//! the execution lock: every call into Python runs inside [`Interpreter::with`], which holds the
//! interpreter lock for the duration of the section and releases it on every exit path.
//!
//! Shutdown is one-way. After [`Interpreter::shutdown`] every new section fails with
//! [`BridgeError::Lifecycle`]. CPython itself stays loaded, since it cannot be re-initialized
//! in the same process and live handles still need it to release their references.

use std::{
    ffi::CString,
    sync::{
        OnceLock,
        atomic::{AtomicBool, Ordering},
    },
};

use pyo3::{prelude::*, types::PyDict};
use serde::Serialize;

use crate::{
    cache::IdentityCache,
    config::BridgeConfig,
    error::{BridgeError, Failure, Result},
    handle::{Handle, HandleInner},
    marshal,
    value::HostValue,
};

static INTERPRETER: OnceLock<std::result::Result<Interpreter, BridgeError>> = OnceLock::new();

/// Process-wide interpreter service.
#[derive(Debug)]
pub struct Interpreter {
    config: BridgeConfig,
    cache: IdentityCache<HandleInner>,
    closed: AtomicBool,
}

impl Interpreter {
    /// Starts the interpreter with `config`, or returns the running one.
    ///
    /// Only the first call's configuration takes effect; a later call with a different
    /// configuration is logged and ignored.
    pub fn initialize(config: BridgeConfig) -> Result<&'static Self> {
        let mut requested = Some(config);
        let slot = INTERPRETER.get_or_init(|| Self::boot(requested.take().unwrap_or_default()));
        if let Some(ignored) = requested
            && let Ok(running) = slot
            && running.config != ignored
        {
            tracing::warn!(
                ?ignored,
                "interpreter already initialized, ignoring new configuration"
            );
        }
        slot.as_ref().map_err(Clone::clone)
    }

    /// Returns the running interpreter, starting it from the environment configuration if
    /// needed.
    pub fn global() -> Result<&'static Self> {
        match INTERPRETER.get() {
            Some(slot) => slot.as_ref().map_err(Clone::clone),
            None => Self::initialize(BridgeConfig::from_env()),
        }
    }

    /// True once the interpreter has been started successfully and not shut down.
    #[must_use]
    pub fn is_running() -> bool {
        matches!(INTERPRETER.get(), Some(Ok(interpreter)) if !interpreter.is_closed())
    }

    fn boot(config: BridgeConfig) -> Result<Self> {
        Python::initialize();
        let interpreter = Self {
            config,
            cache: IdentityCache::new(),
            closed: AtomicBool::new(false),
        };
        Python::attach(|py| interpreter.apply_search_path(py))?;
        tracing::info!(search_path = ?interpreter.config.search_path, "python interpreter initialized");
        Ok(interpreter)
    }

    fn apply_search_path(&self, py: Python<'_>) -> Result<()> {
        if self.config.search_path.is_empty() {
            return Ok(());
        }
        let sys_path = py
            .import("sys")
            .and_then(|sys| sys.getattr("path"))
            .map_err(|err| BridgeError::config(format!("cannot read sys.path: {err}")))?;
        for (position, dir) in self.config.search_path.iter().enumerate() {
            let dir = dir
                .to_str()
                .ok_or_else(|| BridgeError::config(format!("search path entry {} is not UTF-8", dir.display())))?;
            sys_path
                .call_method1("insert", (position, dir))
                .map_err(|err| BridgeError::config(format!("cannot extend sys.path: {err}")))?;
        }
        Ok(())
    }

    /// The configuration the interpreter was started with.
    #[must_use]
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    pub(crate) fn cache(&self) -> &IdentityCache<HandleInner> {
        &self.cache
    }

    /// The live handle for the object at `address`, if any host code still holds one.
    #[must_use]
    pub fn cached_handle(&self, address: usize) -> Option<Handle> {
        self.cache.lookup(address).map(Handle::from_inner)
    }

    /// Number of Python objects currently referenced by live handles.
    #[must_use]
    pub fn live_handles(&self) -> usize {
        self.cache.live_len()
    }

    /// Drops identity cache entries whose handles are gone, returning how many were removed.
    pub fn evict_dead_handles(&self) -> usize {
        let evicted = self.cache.evict_dead();
        tracing::debug!(evicted, remaining = self.cache.len(), "identity cache swept");
        evicted
    }

    /// Stops accepting new work. Returns false when the interpreter was already shut down.
    pub fn shutdown(&self) -> bool {
        let first = !self.closed.swap(true, Ordering::SeqCst);
        if first {
            tracing::info!(live_handles = self.cache.live_len(), "python interpreter shut down");
        }
        first
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `section` with the execution lock held.
    ///
    /// Python exceptions escaping the section are captured, traceback included, before the
    /// lock is released. Sections may nest, which happens when Python calls back into host
    /// code that calls Python again.
    pub(crate) fn with<R>(&'static self, section: impl FnOnce(Python<'_>) -> std::result::Result<R, Failure>) -> Result<R> {
        if self.is_closed() {
            return Err(BridgeError::lifecycle("the python interpreter has been shut down"));
        }
        Python::attach(|py| section(py).map_err(|failure| failure.into_bridge(py, self)))
    }

    /// Imports a module by its dotted name.
    pub fn import(&'static self, name: &str) -> Result<Handle> {
        self.with(|py| {
            let module = py.import(name)?;
            Ok(Handle::wrap(self, module.as_any()))
        })
    }

    /// Evaluates a Python expression.
    ///
    /// `globals` and `locals` may be host objects, which are copied into fresh dicts, or
    /// handles wrapping a dict, which are used in place. Omitted contexts are fresh empty dicts.
    pub fn eval(&'static self, code: &str, globals: Option<&HostValue>, locals: Option<&HostValue>) -> Result<Handle> {
        let code = CString::new(code).map_err(|_| BridgeError::config("code contains a NUL byte"))?;
        self.with(|py| {
            let globals = context_dict(py, self, globals)?;
            let locals = context_dict(py, self, locals)?;
            let result = py.eval(&code, Some(&globals), Some(&locals))?;
            Ok(Handle::wrap(self, &result))
        })
    }

    /// Reports bridge and Python build/runtime information.
    pub fn version(&'static self) -> Result<VersionInfo> {
        self.with(|py| {
            let sys = py.import("sys")?;
            let info = sys.getattr("version_info")?;
            let runtime = PythonRuntime {
                major: info.getattr("major")?.extract()?,
                minor: info.getattr("minor")?.extract()?,
                micro: info.getattr("micro")?.extract()?,
                release_level: info.getattr("releaselevel")?.extract()?,
                serial: info.getattr("serial")?.extract()?,
                hex_version: format!("{:#x}", sys.getattr("hexversion")?.extract::<u64>()?),
                version: sys.getattr("version")?.extract()?,
            };
            Ok(VersionInfo {
                bridge: BridgeVersion::current(),
                python_library: PythonLibrary::current(),
                python_runtime: runtime,
                search_path: sys.getattr("path")?.extract()?,
                prefix: sys.getattr("prefix")?.extract()?,
            })
        })
    }
}

fn context_dict<'py>(
    py: Python<'py>,
    interpreter: &'static Interpreter,
    context: Option<&HostValue>,
) -> std::result::Result<Bound<'py, PyDict>, Failure> {
    let Some(context) = context else {
        return Ok(PyDict::new(py));
    };
    let object = marshal::to_foreign(py, interpreter, context, None)?;
    object
        .cast_into::<PyDict>()
        .map_err(|_| BridgeError::conversion("eval context must be a mapping").into())
}

/// Version and build information reported by [`crate::version`].
#[derive(Debug, Clone, Serialize)]
pub struct VersionInfo {
    pub bridge: BridgeVersion,
    /// The Python library the bridge was compiled against.
    pub python_library: PythonLibrary,
    /// The interpreter actually loaded.
    pub python_runtime: PythonRuntime,
    /// `sys.path` in effect.
    pub search_path: Vec<String>,
    /// `sys.prefix`.
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BridgeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub suffix: String,
}

impl BridgeVersion {
    fn current() -> Self {
        Self {
            major: env!("CARGO_PKG_VERSION_MAJOR").parse().unwrap_or_default(),
            minor: env!("CARGO_PKG_VERSION_MINOR").parse().unwrap_or_default(),
            patch: env!("CARGO_PKG_VERSION_PATCH").parse().unwrap_or_default(),
            suffix: env!("CARGO_PKG_VERSION_PRE").to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonLibrary {
    pub major: u32,
    pub minor: u32,
    /// `CPython`, `PyPy`, ...
    pub implementation: String,
    /// Linked against a shared libpython rather than a static one.
    pub shared: bool,
    /// Built for the stable ABI.
    pub abi3: bool,
}

impl PythonLibrary {
    fn current() -> Self {
        Self {
            major: env!("PYBRIDGE_PY_MAJOR").parse().unwrap_or_default(),
            minor: env!("PYBRIDGE_PY_MINOR").parse().unwrap_or_default(),
            implementation: env!("PYBRIDGE_PY_IMPLEMENTATION").to_owned(),
            shared: env!("PYBRIDGE_PY_SHARED") == "true",
            abi3: env!("PYBRIDGE_PY_ABI3") == "true",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PythonRuntime {
    pub major: u32,
    pub minor: u32,
    pub micro: u32,
    pub release_level: String,
    pub serial: u32,
    /// `sys.hexversion` in hex.
    pub hex_version: String,
    /// `sys.version`.
    pub version: String,
}
