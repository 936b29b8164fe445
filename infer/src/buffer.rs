//! Typed, resizable memory blocks on the host or an accelerator.

use std::ffi::c_void;
use std::fmt;
use std::ptr::{self, NonNull};
use std::slice;

use crate::alloc::{Allocator, DeviceAllocator, HostAllocator, MemoryLocation};
use crate::error::{InferError, fatal};
use crate::types::{DataType, Dims, Element};

/// A resizable block of `len` elements of one [`DataType`].
///
/// The buffer owns its allocation exclusively: it cannot be cloned, and the
/// allocation is released through the bound allocator exactly once on drop.
/// Shrinking keeps the allocation; growing past the capacity reallocates to
/// exactly the requested length. Contents are not preserved across a
/// reallocation.
pub struct TypedBuffer<A: Allocator> {
    len: usize,
    capacity: usize,
    data_type: DataType,
    element_size: usize,
    ptr: Option<NonNull<u8>>,
    alloc: A,
}

/// Buffer on the host heap.
pub type HostBuffer = TypedBuffer<HostAllocator>;

/// Buffer in accelerator memory.
pub type DeviceBuffer = TypedBuffer<DeviceAllocator>;

// The buffer is the only owner of `ptr`; access follows Rust borrows.
unsafe impl<A: Allocator> Send for TypedBuffer<A> {}
unsafe impl<A: Allocator> Sync for TypedBuffer<A> {}

impl<A: Allocator> TypedBuffer<A> {
    /// Creates a buffer with no elements and no allocation.
    pub fn empty(data_type: DataType, alloc: A) -> Result<Self, InferError> {
        let element_size = data_type
            .element_size()
            .ok_or(InferError::UnsupportedDataType(data_type))?;
        Ok(Self {
            len: 0,
            capacity: 0,
            data_type,
            element_size,
            ptr: None,
            alloc,
        })
    }

    /// Creates a buffer holding `len` elements.
    ///
    /// Aborts the process if the allocation fails.
    pub fn new(len: usize, data_type: DataType, alloc: A) -> Result<Self, InferError> {
        let mut buf = Self::empty(data_type, alloc)?;
        buf.resize(len);
        Ok(buf)
    }

    /// Number of elements.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of elements the current allocation can hold.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn location(&self) -> MemoryLocation {
        self.alloc.location()
    }

    /// Size of the live elements in bytes.
    pub fn byte_size(&self) -> usize {
        self.len * self.element_size
    }

    /// Size of the allocation in bytes.
    pub fn byte_capacity(&self) -> usize {
        self.capacity * self.element_size
    }

    /// Raw pointer to the allocation, null when nothing is allocated.
    pub fn as_ptr(&self) -> *mut c_void {
        self.ptr.map_or(ptr::null_mut(), |p| p.as_ptr().cast())
    }

    /// Sets the element count, reallocating only when it exceeds the capacity.
    pub fn resize(&mut self, len: usize) {
        self.len = len;
        if self.capacity >= len {
            return;
        }
        let bytes = len
            .checked_mul(self.element_size)
            .unwrap_or_else(|| fatal(format!("buffer of {len} x {} overflows", self.data_type)));
        self.release();
        let ptr = self.alloc.allocate(bytes).unwrap_or_else(|| {
            fatal(format!("failed to allocate {bytes} bytes of {:?} memory", self.location()))
        });
        self.ptr = Some(ptr);
        self.capacity = len;
    }

    /// Resizes to the volume of `dims`.
    ///
    /// Aborts on a dynamic (negative) extent, which has no volume.
    pub fn resize_dims(&mut self, dims: &Dims) {
        let volume = dims.volume();
        if dims.is_dynamic() || volume < 0 {
            fatal(format!("cannot size buffer for dynamic shape {dims}"));
        }
        self.resize(volume as usize);
    }

    /// Moves the allocation out, leaving `self` empty with the same type.
    pub fn take(&mut self) -> Self
    where
        A: Clone,
    {
        let empty = Self {
            len: 0,
            capacity: 0,
            data_type: self.data_type,
            element_size: self.element_size,
            ptr: None,
            alloc: self.alloc.clone(),
        };
        std::mem::replace(self, empty)
    }

    fn release(&mut self) {
        if let Some(ptr) = self.ptr.take() {
            unsafe { self.alloc.deallocate(ptr, self.capacity * self.element_size) };
            self.capacity = 0;
        }
    }
}

impl<A: Allocator> Drop for TypedBuffer<A> {
    fn drop(&mut self) {
        self.release();
    }
}

impl<A: Allocator> fmt::Debug for TypedBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypedBuffer")
            .field("location", &self.location())
            .field("data_type", &self.data_type)
            .field("len", &self.len)
            .field("capacity", &self.capacity)
            .field("ptr", &self.as_ptr())
            .finish()
    }
}

impl HostBuffer {
    /// Creates a host buffer of `len` elements.
    pub fn host(len: usize, data_type: DataType) -> Result<Self, InferError> {
        Self::new(len, data_type, HostAllocator)
    }

    /// The live elements as raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts(p.as_ptr(), self.byte_size()) },
            None => &[],
        }
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts_mut(p.as_ptr(), self.byte_size()) },
            None => &mut [],
        }
    }

    /// Typed view of the live elements, `None` if `T` does not match the data type.
    pub fn as_slice<T: Element>(&self) -> Option<&[T]> {
        if T::DATA_TYPE != self.data_type {
            return None;
        }
        Some(match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts(p.as_ptr().cast::<T>(), self.len) },
            None => &[],
        })
    }

    pub fn as_mut_slice<T: Element>(&mut self) -> Option<&mut [T]> {
        if T::DATA_TYPE != self.data_type {
            return None;
        }
        Some(match self.ptr {
            Some(p) => unsafe { slice::from_raw_parts_mut(p.as_ptr().cast::<T>(), self.len) },
            None => &mut [],
        })
    }
}

impl DeviceBuffer {
    /// Creates a device buffer of `len` elements.
    pub fn device(
        len: usize,
        data_type: DataType,
        alloc: DeviceAllocator,
    ) -> Result<Self, InferError> {
        Self::new(len, data_type, alloc)
    }
}

/// Host and device storage for one logical tensor.
///
/// The two halves always hold the same element count and type. Nothing keeps
/// their contents in sync; copies are explicit.
#[derive(Debug)]
pub struct BufferPair {
    pub host: HostBuffer,
    pub device: DeviceBuffer,
}

impl BufferPair {
    pub fn new(
        len: usize,
        data_type: DataType,
        alloc: DeviceAllocator,
    ) -> Result<Self, InferError> {
        Ok(Self {
            device: DeviceBuffer::device(len, data_type, alloc)?,
            host: HostBuffer::host(len, data_type)?,
        })
    }

    pub fn len(&self) -> usize {
        self.host.len()
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_empty()
    }

    /// Byte size shared by both halves.
    pub fn byte_size(&self) -> usize {
        self.host.byte_size()
    }

    pub fn resize(&mut self, len: usize) {
        self.host.resize(len);
        self.device.resize(len);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use std::sync::Arc;

    fn device_alloc() -> (Arc<CpuDevice>, DeviceAllocator) {
        let dev = Arc::new(CpuDevice::new());
        (dev.clone(), DeviceAllocator::new(dev))
    }

    #[test]
    fn new_allocates_exact_bytes() {
        let buf = HostBuffer::host(10, DataType::Float).unwrap();
        assert_eq!(buf.len(), 10);
        assert_eq!(buf.capacity(), 10);
        assert_eq!(buf.byte_size(), 40);
        assert!(!buf.as_ptr().is_null());
    }

    #[test]
    fn empty_has_null_pointer() {
        let buf = HostBuffer::host(0, DataType::Float).unwrap();
        assert!(buf.as_ptr().is_null());
        assert_eq!(buf.byte_capacity(), 0);
        assert!(buf.as_bytes().is_empty());
    }

    #[test]
    fn shrink_keeps_allocation() {
        let mut buf = HostBuffer::host(16, DataType::Int32).unwrap();
        let before = buf.as_ptr();
        buf.resize(4);
        assert_eq!(buf.as_ptr(), before);
        assert_eq!(buf.len(), 4);
        assert_eq!(buf.capacity(), 16);
        assert_eq!(buf.byte_size(), 16);

        // Growing back within capacity is still free.
        buf.resize(16);
        assert_eq!(buf.as_ptr(), before);
    }

    #[test]
    fn grow_reallocates_to_exact_capacity() {
        let mut buf = HostBuffer::host(4, DataType::Half).unwrap();
        buf.resize(100);
        assert_eq!(buf.capacity(), 100);
        assert_eq!(buf.len(), 100);
        assert_eq!(buf.byte_size(), 200);
        assert!(buf.byte_capacity() >= buf.byte_size());
    }

    #[test]
    fn resize_dims_uses_volume() {
        let mut buf = HostBuffer::host(0, DataType::Float).unwrap();
        buf.resize_dims(&Dims::new(vec![1, 1, 28, 28]));
        assert_eq!(buf.len(), 784);
        assert_eq!(buf.byte_size(), 784 * 4);
    }

    #[test]
    fn byte_size_matches_table() {
        let table = [
            (DataType::Int64, 8),
            (DataType::Int32, 4),
            (DataType::Float, 4),
            (DataType::Bf16, 2),
            (DataType::Half, 2),
            (DataType::Bool, 1),
            (DataType::Uint8, 1),
            (DataType::Int8, 1),
            (DataType::Fp8, 1),
        ];
        for (dtype, size) in table {
            let buf = HostBuffer::host(7, dtype).unwrap();
            assert_eq!(buf.byte_size(), 7 * size, "{dtype}");
        }
    }

    #[test]
    fn sub_byte_type_rejected() {
        let err = HostBuffer::host(8, DataType::Int4).unwrap_err();
        assert!(matches!(err, InferError::UnsupportedDataType(DataType::Int4)));
    }

    #[test]
    fn typed_views_check_type() {
        let mut buf = HostBuffer::host(3, DataType::Float).unwrap();
        buf.as_mut_slice::<f32>().unwrap().copy_from_slice(&[1.0, 2.0, 3.0]);
        assert_eq!(buf.as_slice::<f32>().unwrap(), &[1.0, 2.0, 3.0]);
        assert!(buf.as_slice::<i32>().is_none());
        assert_eq!(buf.as_bytes().len(), 12);
    }

    #[test]
    fn take_leaves_source_empty() {
        let mut buf = HostBuffer::host(5, DataType::Uint8).unwrap();
        let ptr = buf.as_ptr();
        let moved = buf.take();
        assert_eq!(moved.as_ptr(), ptr);
        assert_eq!(moved.len(), 5);
        assert!(buf.as_ptr().is_null());
        assert_eq!(buf.len(), 0);
        assert_eq!(buf.capacity(), 0);
        assert_eq!(buf.data_type(), DataType::Uint8);
    }

    #[test]
    fn device_buffer_released_once() {
        let (dev, alloc) = device_alloc();
        {
            let mut buf = DeviceBuffer::device(8, DataType::Float, alloc.clone()).unwrap();
            assert_eq!(dev.live_bytes(), 32);
            buf.resize(64);
            assert_eq!(dev.live_bytes(), 256);
            assert_eq!(dev.live_allocations(), 1);

            let moved = buf.take();
            drop(buf);
            assert_eq!(dev.live_allocations(), 1);
            drop(moved);
        }
        assert_eq!(dev.live_bytes(), 0);
        assert_eq!(dev.live_allocations(), 0);
    }

    #[test]
    fn pair_halves_match() {
        let (_dev, alloc) = device_alloc();
        let mut pair = BufferPair::new(10, DataType::Int64, alloc).unwrap();
        assert_eq!(pair.host.len(), pair.device.len());
        assert_eq!(pair.byte_size(), 80);
        assert_eq!(pair.device.location(), MemoryLocation::Device);

        pair.resize(20);
        assert_eq!(pair.host.len(), 20);
        assert_eq!(pair.device.len(), 20);
    }
}
