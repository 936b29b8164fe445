//! Allocation strategies bound into a [`TypedBuffer`](crate::TypedBuffer).

use std::alloc::{self, Layout};
use std::fmt;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::device::Device;

/// Where an allocator's memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryLocation {
    Host,
    Device,
}

/// Allocate/free pair used by a buffer for its whole lifetime.
pub trait Allocator: Send + Sync {
    fn location(&self) -> MemoryLocation;

    /// Allocates `bytes` (> 0) bytes. `None` means the allocation failed.
    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>>;

    /// # Safety
    ///
    /// `ptr` must come from `allocate` on an equivalent allocator with the
    /// same `bytes`.
    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize);
}

/// Host alignment. Covers every supported element type and SIMD loads.
const HOST_ALIGN: usize = 64;

/// Host heap allocator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HostAllocator;

impl Allocator for HostAllocator {
    fn location(&self) -> MemoryLocation {
        MemoryLocation::Host
    }

    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        let layout = Layout::from_size_align(bytes, HOST_ALIGN).ok()?;
        NonNull::new(unsafe { alloc::alloc_zeroed(layout) })
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        let layout = unsafe { Layout::from_size_align_unchecked(bytes, HOST_ALIGN) };
        unsafe { alloc::dealloc(ptr.as_ptr(), layout) };
    }
}

/// Accelerator memory allocator backed by a [`Device`].
#[derive(Clone)]
pub struct DeviceAllocator {
    device: Arc<dyn Device>,
}

impl DeviceAllocator {
    pub fn new(device: Arc<dyn Device>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<dyn Device> {
        &self.device
    }
}

impl fmt::Debug for DeviceAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocator").field("device", &self.device.name()).finish()
    }
}

impl Allocator for DeviceAllocator {
    fn location(&self) -> MemoryLocation {
        MemoryLocation::Device
    }

    fn allocate(&self, bytes: usize) -> Option<NonNull<u8>> {
        match self.device.malloc(bytes) {
            Ok(ptr) => Some(ptr),
            Err(e) => {
                tracing::error!("infer: {} malloc {bytes} bytes: {e}", self.device.name());
                None
            }
        }
    }

    unsafe fn deallocate(&self, ptr: NonNull<u8>, bytes: usize) {
        unsafe { self.device.free(ptr, bytes) };
    }
}
