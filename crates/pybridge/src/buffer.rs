//! Byte buffers shared between host and Python.
//!
//! Copy mode builds `bytes`/`bytearray` objects from host slices and copies Python buffers back
//! out. Pinned mode exposes a [`SharedBuffer`] to Python as a writable `memoryview` over the same
//! memory: both sides see each other's writes, and the block stays allocated while either side
//! still references it.

use std::{
    ffi::c_int,
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU8, Ordering},
    },
};

use pyo3::{
    exceptions::PyBufferError,
    ffi,
    prelude::*,
    types::{PyByteArray, PyBytes, PyMemoryView},
};

use crate::{
    error::{BridgeError, Result},
    handle::{Handle, supports_buffer},
    interpreter::Interpreter,
};

struct Block {
    bytes: Box<[AtomicU8]>,
}

/// A fixed-size block of host memory that can be lent to Python without copying.
///
/// Host reads and writes take the interpreter lock, which orders them against Python code
/// using a pinned view. Python code that fills a view after releasing that lock, such as
/// `readinto` on a file, is not ordered against host writes; the bytes stay memory safe but
/// may mix both writers.
#[derive(Clone)]
pub struct SharedBuffer {
    block: Arc<Block>,
}

impl SharedBuffer {
    /// Allocates a zero-filled block of `len` bytes.
    #[must_use]
    pub fn new(len: usize) -> Self {
        let bytes = std::iter::repeat_with(|| AtomicU8::new(0)).take(len).collect();
        Self {
            block: Arc::new(Block { bytes }),
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.block.bytes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.block.bytes.is_empty()
    }

    /// Copies `data` into the block at `offset`.
    ///
    /// # Panics
    /// Panics if `offset + data.len()` exceeds the block length. See [`try_write`] for a
    /// checked variant.
    ///
    /// [`try_write`]: Self::try_write
    pub fn write(&self, offset: usize, data: &[u8]) {
        store(&self.block.bytes[offset..offset + data.len()], data);
    }

    /// Copies `data` into the block at `offset`, failing if the range falls outside the block.
    pub fn try_write(&self, offset: usize, data: &[u8]) -> Result<()> {
        let target = offset
            .checked_add(data.len())
            .and_then(|end| self.block.bytes.get(offset..end))
            .ok_or_else(|| {
                BridgeError::conversion(format!(
                    "cannot write {} bytes at offset {offset} into a {}-byte buffer",
                    data.len(),
                    self.len()
                ))
            })?;
        store(target, data);
        Ok(())
    }

    /// Copies the whole block out.
    #[must_use]
    pub fn read(&self) -> Vec<u8> {
        locked(|| self.block.bytes.iter().map(|cell| cell.load(Ordering::Relaxed)).collect())
    }

    /// Number of references keeping the block alive: host clones plus one per live pinned export.
    #[must_use]
    pub fn keep_alive_count(&self) -> usize {
        Arc::strong_count(&self.block)
    }
}

impl From<&[u8]> for SharedBuffer {
    fn from(data: &[u8]) -> Self {
        let bytes = data.iter().map(|byte| AtomicU8::new(*byte)).collect();
        Self {
            block: Arc::new(Block { bytes }),
        }
    }
}

impl From<Vec<u8>> for SharedBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::from(data.as_slice())
    }
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("len", &self.len())
            .field("keep_alive", &self.keep_alive_count())
            .finish()
    }
}

fn store(target: &[AtomicU8], data: &[u8]) {
    locked(|| {
        for (cell, byte) in target.iter().zip(data) {
            cell.store(*byte, Ordering::Relaxed);
        }
    });
}

/// Runs `f` under the interpreter lock when the interpreter is up, so host access never
/// overlaps with Python code touching a pinned view.
fn locked<R>(f: impl FnOnce() -> R) -> R {
    if Interpreter::is_running() {
        Python::attach(|_| f())
    } else {
        f()
    }
}

/// Buffer exporter backing a pinned `memoryview`.
///
/// Holds one keep-alive on the block; Python destroys the exporter once the last view over it is
/// released.
#[pyclass(frozen, module = "pybridge", name = "PinnedBuffer")]
struct PinnedExport {
    block: Arc<Block>,
}

#[pymethods]
impl PinnedExport {
    unsafe fn __getbuffer__(slf: PyRef<'_, Self>, view: *mut ffi::Py_buffer, flags: c_int) -> PyResult<()> {
        let bytes = &slf.block.bytes;
        let len = ffi::Py_ssize_t::try_from(bytes.len())
            .map_err(|_| PyBufferError::new_err("buffer too large to export"))?;
        // SAFETY: `view` is provided by Python for this call. The memory stays valid while the
        // exporter lives, and `PyBuffer_FillInfo` takes a reference on the exporter for the view.
        let status = unsafe {
            ffi::PyBuffer_FillInfo(view, slf.as_ptr(), bytes.as_ptr().cast_mut().cast(), len, 0, flags)
        };
        if status == -1 {
            return Err(PyErr::fetch(slf.py()));
        }
        Ok(())
    }
}

impl Drop for PinnedExport {
    fn drop(&mut self) {
        tracing::debug!(len = self.block.bytes.len(), "pinned buffer released by python");
    }
}

/// Builds a `bytes` object holding a copy of `data`.
pub fn wrap_as_bytes(data: &[u8]) -> Result<Handle> {
    let interpreter = Interpreter::global()?;
    interpreter.with(|py| Ok(Handle::wrap(interpreter, PyBytes::new(py, data).as_any())))
}

/// Builds a `bytearray` holding a copy of `data`.
pub fn wrap_as_bytearray(data: &[u8]) -> Result<Handle> {
    let interpreter = Interpreter::global()?;
    interpreter.with(|py| Ok(Handle::wrap(interpreter, PyByteArray::new(py, data).as_any())))
}

/// Lends `buffer` to Python as a writable `memoryview`, without copying.
pub fn wrap_as_memoryview(buffer: &SharedBuffer) -> Result<Handle> {
    let interpreter = Interpreter::global()?;
    interpreter.with(|py| {
        let export = Bound::new(
            py,
            PinnedExport {
                block: Arc::clone(&buffer.block),
            },
        )?;
        let view = PyMemoryView::from(export.as_any())?;
        tracing::debug!(len = buffer.len(), "pinned buffer exported");
        Ok(Handle::wrap(interpreter, view.as_any()))
    })
}

/// Copies the contents of any buffer-protocol object.
pub fn unwrap_to_buffer(handle: &Handle) -> Result<Vec<u8>> {
    handle.interpreter().with(|py| {
        let object = handle.bind(py);
        if !supports_buffer(object) {
            return Err(BridgeError::conversion(format!(
                "'{}' object does not support the buffer protocol",
                handle.type_name()
            ))
            .into());
        }
        Ok(copy_out(object)?)
    })
}

pub(crate) fn copy_out(object: &Bound<'_, PyAny>) -> PyResult<Vec<u8>> {
    let view = PyMemoryView::from(object)?;
    let bytes = view.call_method0("tobytes")?.cast_into::<PyBytes>().map_err(PyErr::from)?;
    Ok(bytes.as_bytes().to_vec())
}
