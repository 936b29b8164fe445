//! Host/device buffer management and an inference pipeline for compiled
//! neural-network engines.
//!
//! The crate is organized leaves first:
//!
//! - [`TypedBuffer`]: a resizable, typed allocation bound to an [`Allocator`]
//!   ([`HostBuffer`] on the heap, [`DeviceBuffer`] on a [`Device`])
//! - [`BufferPair`]: a host and a device buffer for one tensor
//! - [`BufferManager`]: one pair per I/O tensor of an [`Engine`], with the
//!   ordered device bindings and host/device copies
//! - [`InferencePipeline`]: build a model through a [`Backend`], then classify
//!   inputs against the engine
//!
//! Compilation and execution are behind traits. [`reference::CpuBackend`]
//! implements them on the host so everything runs without an accelerator.
//!
//! # Example
//!
//! ```no_run
//! use giztoy_infer::{InferencePipeline, ModelParams, default_logger, reference::CpuBackend};
//!
//! let mut pipeline = InferencePipeline::new(ModelParams::mnist(), default_logger());
//! pipeline.build(&CpuBackend::new()).unwrap();
//! let prediction = pipeline.infer(&[0u8; 28 * 28]).unwrap();
//! println!("digit: {}", prediction.class);
//! ```

mod alloc;
mod buffer;
mod device;
mod engine;
mod error;
mod locate;
pub mod logger;
mod manager;
pub mod model;
mod params;
mod pipeline;
mod pool;
pub mod reference;
mod types;

#[cfg(feature = "cuda")]
mod cuda;
#[cfg(feature = "cuda")]
mod ffi;

pub use alloc::{Allocator, DeviceAllocator, HostAllocator, MemoryLocation};
pub use buffer::{BufferPair, DeviceBuffer, HostBuffer, TypedBuffer};
#[cfg(feature = "cuda")]
pub use cuda::{CudaDevice, CudaStream};
pub use device::{CpuDevice, CpuStream, Device, MemcpyKind, Stream};
pub use engine::{Backend, Builder, BuilderConfig, Engine, ExecutionContext, Network, Runtime};
pub use error::{DeviceError, InferError};
pub use locate::{MAX_DEPTH, locate_file, locate_file_from};
pub use logger::{Logger, NopLogger, Severity, SeverityFilter, default_logger};
pub use manager::{BufferManager, INVALID_SIZE_VALUE, print};
pub use model::{
    ModelId, is_registered, list_models, model_params, register_builtin_models, register_model,
};
pub use params::ModelParams;
pub use pipeline::{InferencePipeline, Prediction, argmax_last, softmax};
pub use pool::{PooledSession, Session, SessionPool};
pub use types::{DataType, Dims, Element, TensorDesc, TensorIoMode, Vectorization, div_up};
