//! CUDA runtime device.

use std::ffi::CStr;
use std::os::raw::c_void;
use std::ptr::{self, NonNull};

use crate::device::{Device, MemcpyKind, Stream};
use crate::error::DeviceError;
use crate::ffi;

fn check(code: ffi::CudaError) -> Result<(), DeviceError> {
    if code == ffi::CUDA_SUCCESS {
        return Ok(());
    }
    let message = unsafe {
        let s = ffi::cudaGetErrorString(code);
        if s.is_null() {
            "unknown error".to_string()
        } else {
            CStr::from_ptr(s).to_string_lossy().into_owned()
        }
    };
    Err(DeviceError::Runtime { code, message })
}

fn kind(k: MemcpyKind) -> i32 {
    match k {
        MemcpyKind::HostToDevice => ffi::CUDA_MEMCPY_HOST_TO_DEVICE,
        MemcpyKind::DeviceToHost => ffi::CUDA_MEMCPY_DEVICE_TO_HOST,
        MemcpyKind::DeviceToDevice => ffi::CUDA_MEMCPY_DEVICE_TO_DEVICE,
    }
}

/// A CUDA device selected by ordinal.
///
/// The CUDA current device is per host thread, so every call re-selects
/// `ordinal` before touching memory or streams.
#[derive(Debug)]
pub struct CudaDevice {
    ordinal: i32,
    name: String,
}

impl CudaDevice {
    pub fn new(ordinal: i32) -> Result<Self, DeviceError> {
        select(ordinal)?;
        Ok(Self {
            ordinal,
            name: format!("cuda:{ordinal}"),
        })
    }

    pub fn ordinal(&self) -> i32 {
        self.ordinal
    }
}

fn select(ordinal: i32) -> Result<(), DeviceError> {
    check(unsafe { ffi::cudaSetDevice(ordinal) })
}

impl Device for CudaDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn malloc(&self, bytes: usize) -> Result<NonNull<u8>, DeviceError> {
        if bytes == 0 {
            return Err(DeviceError::InvalidValue("zero-sized allocation".into()));
        }
        select(self.ordinal)?;
        let mut p: *mut c_void = ptr::null_mut();
        check(unsafe { ffi::cudaMalloc(&mut p, bytes) })?;
        NonNull::new(p.cast()).ok_or(DeviceError::OutOfMemory { bytes })
    }

    unsafe fn free(&self, ptr: NonNull<u8>, _bytes: usize) {
        let freed = select(self.ordinal)
            .and_then(|()| check(unsafe { ffi::cudaFree(ptr.as_ptr().cast()) }));
        if let Err(e) = freed {
            tracing::error!("infer: {}: cudaFree: {e}", self.name);
        }
    }

    unsafe fn memcpy(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        k: MemcpyKind,
    ) -> Result<(), DeviceError> {
        select(self.ordinal)?;
        check(unsafe { ffi::cudaMemcpy(dst.cast(), src.cast(), bytes, kind(k)) })
    }

    fn create_stream(&self) -> Result<Box<dyn Stream>, DeviceError> {
        select(self.ordinal)?;
        let mut raw: ffi::CudaStream = ptr::null_mut();
        check(unsafe { ffi::cudaStreamCreate(&mut raw) })?;
        Ok(Box::new(CudaStream {
            raw,
            ordinal: self.ordinal,
        }))
    }
}

/// A CUDA stream, destroyed on drop.
pub struct CudaStream {
    raw: ffi::CudaStream,
    ordinal: i32,
}

// CUDA streams may be used from any host thread.
unsafe impl Send for CudaStream {}

impl Stream for CudaStream {
    unsafe fn memcpy_async(
        &self,
        dst: *mut u8,
        src: *const u8,
        bytes: usize,
        k: MemcpyKind,
    ) -> Result<(), DeviceError> {
        select(self.ordinal)?;
        check(unsafe { ffi::cudaMemcpyAsync(dst.cast(), src.cast(), bytes, kind(k), self.raw) })
    }

    fn synchronize(&self) -> Result<(), DeviceError> {
        select(self.ordinal)?;
        check(unsafe { ffi::cudaStreamSynchronize(self.raw) })
    }
}

impl Drop for CudaStream {
    fn drop(&mut self) {
        let destroyed = select(self.ordinal)
            .and_then(|()| check(unsafe { ffi::cudaStreamDestroy(self.raw) }));
        if let Err(e) = destroyed {
            tracing::warn!("infer: cudaStreamDestroy: {e}");
        }
    }
}
