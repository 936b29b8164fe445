//! Accelerator memory and transfer primitives.
//!
//! A [`Device`] hands out raw allocations and copies bytes between host and
//! device memory. The crate ships [`CpuDevice`], which keeps "device" memory on
//! the host heap so engines can be exercised without accelerator hardware.
//! With the `cuda` feature, `CudaDevice` targets the CUDA runtime instead.

use std::alloc::{self, Layout};
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::error::DeviceError;

/// Direction of a memory copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemcpyKind {
    HostToDevice,
    DeviceToHost,
    DeviceToDevice,
}

/// Memory and transfer primitives of one accelerator.
///
/// Implementations must be safe for concurrent use: many per-call buffer
/// managers allocate from the same device at once.
pub trait Device: Send + Sync {
    /// Short device name for diagnostics.
    fn name(&self) -> &str;

    /// Allocates `bytes` bytes of device memory. `bytes` is never zero.
    fn malloc(&self, bytes: usize) -> Result<NonNull<u8>, DeviceError>;

    /// Releases memory returned by [`Device::malloc`].
    ///
    /// # Safety
    ///
    /// `ptr` must come from `malloc` on this device with the same `bytes`,
    /// and must not be used afterwards.
    unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize);

    /// Copies `bytes` bytes and blocks until the copy has completed.
    ///
    /// # Safety
    ///
    /// `src` must be readable and `dst` writable for `bytes` bytes in the
    /// address spaces implied by `kind`, and the ranges must not overlap.
    unsafe fn memcpy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        kind: MemcpyKind,
    ) -> Result<(), DeviceError>;

    /// Creates an execution stream for asynchronous copies.
    fn create_stream(&self) -> Result<Box<dyn Stream>, DeviceError>;
}

/// An ordered queue of device work.
///
/// Work enqueued on a stream is not guaranteed to have happened until
/// [`Stream::synchronize`] returns. Reading a destination buffer before that
/// observes stale bytes.
pub trait Stream: Send {
    /// Enqueues a copy and returns without waiting for it.
    ///
    /// # Safety
    ///
    /// Same requirements as [`Device::memcpy`], and both ranges must stay
    /// valid until the stream has been synchronized.
    unsafe fn memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        kind: MemcpyKind,
    ) -> Result<(), DeviceError>;

    /// Blocks until all enqueued work has completed.
    fn synchronize(&self) -> Result<(), DeviceError>;
}

// ---------------------------------------------------------------------------
// CpuDevice
// ---------------------------------------------------------------------------

const CPU_DEVICE_ALIGN: usize = 256;

/// Host-backed device used by the reference engine.
///
/// Tracks live allocations so tests can assert that buffers are released.
#[derive(Debug, Default)]
pub struct CpuDevice {
    live_bytes: AtomicUsize,
    live_allocations: AtomicUsize,
}

impl CpuDevice {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes currently allocated and not yet freed.
    pub fn live_bytes(&self) -> usize {
        self.live_bytes.load(Ordering::Acquire)
    }

    /// Number of allocations not yet freed.
    pub fn live_allocations(&self) -> usize {
        self.live_allocations.load(Ordering::Acquire)
    }
}

impl Device for CpuDevice {
    fn name(&self) -> &str {
        "cpu"
    }

    fn malloc(&self, bytes: usize) -> Result<NonNull<u8>, DeviceError> {
        if bytes == 0 {
            return Err(DeviceError::InvalidValue("zero-sized allocation".into()));
        }
        let layout = Layout::from_size_align(bytes, CPU_DEVICE_ALIGN)
            .map_err(|e| DeviceError::InvalidValue(e.to_string()))?;
        let ptr = NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
            .ok_or(DeviceError::OutOfMemory { bytes })?;
        self.live_bytes.fetch_add(bytes, Ordering::AcqRel);
        self.live_allocations.fetch_add(1, Ordering::AcqRel);
        Ok(ptr)
    }

    unsafe fn free(&self, ptr: NonNull<u8>, bytes: usize) {
        // malloc validated this layout.
        let layout = unsafe { Layout::from_size_align_unchecked(bytes, CPU_DEVICE_ALIGN) };
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
        self.live_bytes.fetch_sub(bytes, Ordering::AcqRel);
        self.live_allocations.fetch_sub(1, Ordering::AcqRel);
    }

    unsafe fn memcpy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        _kind: MemcpyKind,
    ) -> Result<(), DeviceError> {
        if bytes == 0 {
            return Ok(());
        }
        if dst.is_null() || src.is_null() {
            return Err(DeviceError::InvalidValue("null pointer in memcpy".into()));
        }
        unsafe { ptr::copy_nonoverlapping(src, dst, bytes) };
        Ok(())
    }

    fn create_stream(&self) -> Result<Box<dyn Stream>, DeviceError> {
        Ok(Box::new(CpuStream::default()))
    }
}

struct PendingCopy {
    dst: *mut u8,
    src: *const u8,
    bytes: usize,
}

// The enqueuing caller guarantees both ranges outlive the stream's next sync.
unsafe impl Send for PendingCopy {}

/// Stream of the [`CpuDevice`]. Copies are deferred until [`Stream::synchronize`].
#[derive(Default)]
pub struct CpuStream {
    pending: Mutex<Vec<PendingCopy>>,
}

impl CpuStream {
    /// Number of copies enqueued but not yet performed.
    pub fn pending(&self) -> usize {
        self.pending.lock().len()
    }
}

impl Stream for CpuStream {
    unsafe fn memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        _kind: MemcpyKind,
    ) -> Result<(), DeviceError> {
        if bytes == 0 {
            return Ok(());
        }
        if dst.is_null() || src.is_null() {
            return Err(DeviceError::InvalidValue("null pointer in memcpy_async".into()));
        }
        self.pending.lock().push(PendingCopy { dst, src, bytes });
        Ok(())
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        let work = std::mem::take(&mut *self.pending.lock());
        for copy in work {
            unsafe { ptr::copy_nonoverlapping(copy.src, copy.dst, copy.bytes) };
        }
        Ok(())
    }
}

impl Drop for CpuStream {
    fn drop(&mut self) {
        let n = self.pending.get_mut().len();
        if n > 0 {
            // The buffers may already be gone, so the copies are discarded.
            tracing::warn!("infer: cpu stream dropped with {n} unsynchronized copies");
        }
    }
}
