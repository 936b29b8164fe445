//! Host/device buffers for every I/O tensor of an engine.

use std::collections::HashMap;
use std::ffi::c_void;
use std::fmt::{self, Write as _};
use std::ptr;
use std::sync::Arc;

use crate::alloc::DeviceAllocator;
use crate::buffer::{BufferPair, HostBuffer};
use crate::device::{MemcpyKind, Stream};
use crate::engine::{Engine, ExecutionContext};
use crate::error::{InferError, fatal};
use crate::types::{Element, TensorIoMode, div_up};

/// Returned by [`BufferManager::size`] for an unknown tensor name.
pub const INVALID_SIZE_VALUE: usize = usize::MAX;

/// Owns one [`BufferPair`] per I/O tensor of an engine.
///
/// Pairs are indexed in the engine's declaration order, and
/// [`device_bindings`](Self::device_bindings) mirrors that order so it can be
/// passed straight to [`ExecutionContext::execute`].
pub struct BufferManager {
    engine: Arc<dyn Engine>,
    batch_size: usize,
    buffers: Vec<BufferPair>,
    device_bindings: Vec<*mut c_void>,
    names: HashMap<String, usize>,
}

// Bindings alias buffers owned by this manager; nothing else holds them.
unsafe impl Send for BufferManager {}

impl BufferManager {
    /// Allocates host and device buffers for every tensor of `engine`.
    ///
    /// Shapes come from `context` when given, otherwise from the engine. A
    /// non-zero `batch_size` scales engine shapes for legacy implicit-batch
    /// networks and is ignored when a context is supplied. Packed layouts are
    /// sized for their padded physical extent.
    ///
    /// Aborts if a shape is still dynamic or an allocation fails.
    pub fn new(
        engine: Arc<dyn Engine>,
        batch_size: usize,
        context: Option<&dyn ExecutionContext>,
    ) -> Result<Self, InferError> {
        let alloc = DeviceAllocator::new(engine.device());
        let count = engine.num_io_tensors();
        let mut buffers = Vec::with_capacity(count);
        let mut device_bindings = Vec::with_capacity(count);
        let mut names = HashMap::with_capacity(count);

        for i in 0..count {
            let desc = engine
                .io_tensor(i)
                .ok_or_else(|| InferError::Engine(format!("tensor index {i} out of range")))?;

            let mut dims = match context {
                Some(ctx) => ctx
                    .tensor_shape(&desc.name)
                    .ok_or_else(|| InferError::UnknownTensor(desc.name.clone()))?,
                None => desc.shape.clone(),
            };
            if dims.is_dynamic() {
                fatal(format!("tensor {:?} has unresolved shape {dims}", desc.name));
            }

            let mut vol: usize = if context.is_some() || batch_size == 0 { 1 } else { batch_size };
            if let Some(packed) = desc.vectorization {
                if packed.dim >= dims.nb_dims() || packed.components == 0 {
                    fatal(format!("tensor {:?} has invalid vectorization {packed:?}", desc.name));
                }
                dims.0[packed.dim] = div_up(dims.0[packed.dim], packed.components as i64);
                vol = checked_volume(&desc.name, vol.checked_mul(packed.components));
            }
            let total = dims.checked_volume().and_then(|v| vol.checked_mul(v));
            vol = checked_volume(&desc.name, total);

            let pair = BufferPair::new(vol, desc.data_type, alloc.clone())?;
            device_bindings.push(pair.device.as_ptr());
            buffers.push(pair);
            names.insert(desc.name.clone(), i);
        }

        Ok(Self {
            engine,
            batch_size,
            buffers,
            device_bindings,
            names,
        })
    }

    pub fn engine(&self) -> &Arc<dyn Engine> {
        &self.engine
    }

    /// Legacy batch size given at construction, 0 if none.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn num_tensors(&self) -> usize {
        self.buffers.len()
    }

    /// Tensor names in binding order.
    pub fn tensor_names(&self) -> Vec<&str> {
        let mut names: Vec<(&str, usize)> =
            self.names.iter().map(|(n, &i)| (n.as_str(), i)).collect();
        names.sort_by_key(|&(_, i)| i);
        names.into_iter().map(|(n, _)| n).collect()
    }

    /// Device addresses in declaration order, for [`ExecutionContext::execute`].
    pub fn device_bindings(&self) -> &[*mut c_void] {
        &self.device_bindings
    }

    /// Device address of a tensor, null if the name is unknown.
    pub fn device_buffer(&self, name: &str) -> *mut c_void {
        self.names
            .get(name)
            .map_or(ptr::null_mut(), |&i| self.buffers[i].device.as_ptr())
    }

    /// Host address of a tensor, null if the name is unknown.
    pub fn host_buffer(&self, name: &str) -> *mut c_void {
        self.names
            .get(name)
            .map_or(ptr::null_mut(), |&i| self.buffers[i].host.as_ptr())
    }

    /// Host buffer of a tensor.
    pub fn host(&self, name: &str) -> Option<&HostBuffer> {
        self.names.get(name).map(|&i| &self.buffers[i].host)
    }

    /// Typed mutable view of a tensor's host buffer.
    ///
    /// `None` if the name is unknown or `T` does not match its type. Only
    /// [`resize`](Self::resize) changes the length, so host and device halves
    /// never disagree.
    pub fn host_slice_mut<T: Element>(&mut self, name: &str) -> Option<&mut [T]> {
        let &i = self.names.get(name)?;
        self.buffers[i].host.as_mut_slice::<T>()
    }

    pub fn host_bytes_mut(&mut self, name: &str) -> Option<&mut [u8]> {
        let &i = self.names.get(name)?;
        Some(self.buffers[i].host.as_bytes_mut())
    }

    /// Byte size of a tensor's buffers, or [`INVALID_SIZE_VALUE`] if unknown.
    pub fn size(&self, name: &str) -> usize {
        self.names
            .get(name)
            .map_or(INVALID_SIZE_VALUE, |&i| self.buffers[i].byte_size())
    }

    /// Resizes both buffers of a tensor and refreshes its binding.
    pub fn resize(&mut self, name: &str, len: usize) -> Result<(), InferError> {
        let i = *self
            .names
            .get(name)
            .ok_or_else(|| InferError::UnknownTensor(name.to_string()))?;
        self.buffers[i].resize(len);
        self.device_bindings[i] = self.buffers[i].device.as_ptr();
        Ok(())
    }

    /// Copies every input tensor from host to device, blocking.
    pub fn copy_input_to_device(&self) {
        self.memcpy_buffers(TensorIoMode::Input, MemcpyKind::HostToDevice, None);
    }

    /// Copies every output tensor from device to host, blocking.
    pub fn copy_output_to_host(&self) {
        self.memcpy_buffers(TensorIoMode::Output, MemcpyKind::DeviceToHost, None);
    }

    /// Enqueues host-to-device copies of every input tensor on `stream`.
    ///
    /// The device buffers are not valid until `stream.synchronize()` returns.
    ///
    /// # Safety
    ///
    /// The stream keeps raw pointers into this manager's buffers. The manager
    /// must not be dropped, and no tensor may be resized, before the next
    /// `stream.synchronize()` returns.
    pub unsafe fn copy_input_to_device_async(&self, stream: &dyn Stream) {
        self.memcpy_buffers(TensorIoMode::Input, MemcpyKind::HostToDevice, Some(stream));
    }

    /// Enqueues device-to-host copies of every output tensor on `stream`.
    ///
    /// The host buffers hold stale data until `stream.synchronize()` returns.
    ///
    /// # Safety
    ///
    /// Same contract as [`copy_input_to_device_async`](Self::copy_input_to_device_async).
    pub unsafe fn copy_output_to_host_async(&self, stream: &dyn Stream) {
        self.memcpy_buffers(TensorIoMode::Output, MemcpyKind::DeviceToHost, Some(stream));
    }

    /// Copies one tensor from host to device regardless of its direction.
    pub fn copy_to_device(&self, name: &str) -> Result<(), InferError> {
        let i = self.index(name)?;
        self.memcpy(i, MemcpyKind::HostToDevice, None);
        Ok(())
    }

    /// Copies one tensor from device to host regardless of its direction.
    pub fn copy_to_host(&self, name: &str) -> Result<(), InferError> {
        let i = self.index(name)?;
        self.memcpy(i, MemcpyKind::DeviceToHost, None);
        Ok(())
    }

    /// Renders a tensor's host buffer as rows of `row_count` values.
    ///
    /// Returns `None` if the name is unknown or `T` does not match its type.
    pub fn dump<T: Element + fmt::Display>(&self, name: &str, row_count: usize) -> Option<String> {
        let values = self.host(name)?.as_slice::<T>()?;
        let mut out = String::new();
        print(&mut out, values, row_count).ok()?;
        Some(out)
    }

    fn index(&self, name: &str) -> Result<usize, InferError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| InferError::UnknownTensor(name.to_string()))
    }

    fn memcpy_buffers(&self, mode: TensorIoMode, kind: MemcpyKind, stream: Option<&dyn Stream>) {
        for (name, &i) in &self.names {
            if self.engine.tensor_io_mode(name) == Some(mode) {
                self.memcpy(i, kind, stream);
            }
        }
    }

    fn memcpy(&self, i: usize, kind: MemcpyKind, stream: Option<&dyn Stream>) {
        let pair = &self.buffers[i];
        let bytes = pair.host.byte_size().min(pair.device.byte_size());
        let (dst, src) = match kind {
            MemcpyKind::DeviceToHost => (pair.host.as_ptr(), pair.device.as_ptr()),
            _ => (pair.device.as_ptr(), pair.host.as_ptr()),
        };
        let (dst, src) = (dst.cast::<u8>(), src.cast::<u8>().cast_const());
        let result = match stream {
            Some(s) => unsafe { s.memcpy_async(dst, src, bytes, kind) },
            None => unsafe { self.engine.device().memcpy(dst, src, bytes, kind) },
        };
        if let Err(e) = result {
            fatal(format!("{kind:?} copy of {bytes} bytes failed: {e}"));
        }
    }
}

fn checked_volume(name: &str, vol: Option<usize>) -> usize {
    vol.unwrap_or_else(|| fatal(format!("tensor {name:?} volume overflows")))
}

impl fmt::Debug for BufferManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferManager")
            .field("tensors", &self.tensor_names())
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

/// Writes `values` as rows of `row_count` space-separated items.
///
/// A `row_count` of 1 puts each value on its own line with no trailing newline.
/// A `row_count` of 0 is rejected with [`fmt::Error`].
pub fn print<T: fmt::Display>(
    out: &mut impl fmt::Write,
    values: &[T],
    row_count: usize,
) -> fmt::Result {
    if row_count == 0 {
        return Err(fmt::Error);
    }
    let n = values.len();
    for (i, v) in values.iter().enumerate() {
        if row_count == 1 {
            if i + 1 != n {
                writeln!(out, "{v}")?;
            } else {
                write!(out, "{v}")?;
            }
        } else if i % row_count == 0 {
            write!(out, "{v}")?;
        } else if i % row_count == row_count - 1 {
            writeln!(out, " {v}")?;
        } else {
            write!(out, " {v}")?;
        }
    }
    Ok(())
}
