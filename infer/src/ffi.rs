//! Raw FFI bindings for the CUDA runtime API.
//!
//! Hand-written declarations matching `cuda_runtime_api.h` for the subset
//! the CUDA device needs.

use std::os::raw::{c_char, c_int, c_void};

pub type CudaError = c_int;
pub type CudaStream = *mut c_void;

pub const CUDA_SUCCESS: CudaError = 0;

// cudaMemcpyKind
pub const CUDA_MEMCPY_HOST_TO_DEVICE: c_int = 1;
pub const CUDA_MEMCPY_DEVICE_TO_HOST: c_int = 2;
pub const CUDA_MEMCPY_DEVICE_TO_DEVICE: c_int = 3;

#[link(name = "cudart")]
unsafe extern "C" {
    pub fn cudaMalloc(ptr: *mut *mut c_void, size: usize) -> CudaError;
    pub fn cudaFree(ptr: *mut c_void) -> CudaError;
    pub fn cudaMemcpy(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: c_int,
    ) -> CudaError;
    pub fn cudaMemcpyAsync(
        dst: *mut c_void,
        src: *const c_void,
        count: usize,
        kind: c_int,
        stream: CudaStream,
    ) -> CudaError;
    pub fn cudaStreamCreate(stream: *mut CudaStream) -> CudaError;
    pub fn cudaStreamSynchronize(stream: CudaStream) -> CudaError;
    pub fn cudaStreamDestroy(stream: CudaStream) -> CudaError;
    pub fn cudaSetDevice(device: c_int) -> CudaError;
    pub fn cudaGetDevice(device: *mut c_int) -> CudaError;
    pub fn cudaGetErrorString(error: CudaError) -> *const c_char;
}
