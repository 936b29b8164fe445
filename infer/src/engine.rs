//! Interfaces of the compilation and execution collaborators.
//!
//! A [`Backend`] supplies a [`Builder`] that parses a model file and compiles
//! it into a serialized plan, and a [`Runtime`] that turns the plan into an
//! [`Engine`]. Engines are immutable and shared; every inference call creates
//! its own [`ExecutionContext`].

use std::ffi::c_void;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::device::Device;
use crate::error::InferError;
use crate::logger::Logger;
use crate::types::{Dims, TensorDesc, TensorIoMode};

/// Precision and placement options handed to the builder.
///
/// Each precision flag is an independent opt-in; what it does is up to the
/// backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuilderConfig {
    pub int8: bool,
    pub fp16: bool,
    pub bf16: bool,
    /// Deep-learning accelerator core to place layers on, if any.
    pub dla_core: Option<u32>,
}

/// A parsed network, before compilation.
pub trait Network {
    fn inputs(&self) -> &[TensorDesc];
    fn outputs(&self) -> &[TensorDesc];
}

/// Parses model files and compiles them into serialized plans.
pub trait Builder {
    type Network: Network;

    fn parse_network(&self, path: &Path) -> Result<Self::Network, InferError>;

    fn build_serialized_network(
        &self,
        network: &Self::Network,
        config: &BuilderConfig,
    ) -> Result<Vec<u8>, InferError>;
}

/// Deserializes plans into executable engines.
pub trait Runtime: Send + Sync {
    fn deserialize_engine(&self, plan: &[u8]) -> Result<Arc<dyn Engine>, InferError>;
}

/// Factory for the collaborators of one inference stack.
pub trait Backend {
    type Builder: Builder;

    fn create_builder(&self, logger: Arc<dyn Logger>) -> Result<Self::Builder, InferError>;

    fn create_runtime(&self, logger: Arc<dyn Logger>) -> Result<Arc<dyn Runtime>, InferError>;
}

/// A compiled, executable network.
///
/// Engines are read-only after deserialization and safe to share across
/// threads, each running its own execution context.
pub trait Engine: Send + Sync {
    /// Number of declared input and output tensors.
    fn num_io_tensors(&self) -> usize;

    /// Tensor metadata by declaration index.
    fn io_tensor(&self, index: usize) -> Option<&TensorDesc>;

    /// Tensor metadata by name.
    fn tensor(&self, name: &str) -> Option<&TensorDesc> {
        (0..self.num_io_tensors())
            .filter_map(|i| self.io_tensor(i))
            .find(|t| t.name == name)
    }

    fn tensor_io_mode(&self, name: &str) -> Option<TensorIoMode> {
        self.tensor(name).map(|t| t.io_mode)
    }

    /// Device whose memory the engine executes against.
    fn device(&self) -> Arc<dyn Device>;

    fn create_execution_context(&self) -> Result<Box<dyn ExecutionContext>, InferError>;
}

/// Per-call mutable execution state of an engine.
pub trait ExecutionContext: Send {
    /// Resolved shape of a tensor, `None` if the name is unknown.
    fn tensor_shape(&self, name: &str) -> Option<Dims>;

    /// Records the device address a tensor will be read from or written to.
    fn set_tensor_address(&mut self, name: &str, address: *mut c_void) -> Result<(), InferError>;

    /// Runs the forward pass synchronously.
    ///
    /// `bindings` holds one device address per declared tensor, in
    /// declaration order.
    ///
    /// # Safety
    ///
    /// Each binding must point at live device memory of the engine's device,
    /// at least as large as the tensor's resolved volume times its element
    /// size, and must not be freed or resized while the call runs.
    /// [`BufferManager::device_bindings`](crate::BufferManager::device_bindings)
    /// sized from this context satisfies this.
    unsafe fn execute(&mut self, bindings: &[*mut c_void]) -> Result<(), InferError>;
}
