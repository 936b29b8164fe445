use std::fmt;

use thiserror::Error;

use crate::types::DataType;

/// Errors returned by buffer, engine and pipeline operations.
#[derive(Debug, Error)]
pub enum InferError {
    #[error("infer: unsupported data type {0:?}")]
    UnsupportedDataType(DataType),

    #[error("infer: could not find {file:?} in data directories {dirs:?}")]
    FileNotFound { file: String, dirs: Vec<String> },

    #[error("infer: build: {0}")]
    Build(String),

    #[error("infer: engine not built")]
    NotBuilt,

    #[error("infer: {0}")]
    Engine(String),

    #[error("infer: unknown tensor {0:?}")]
    UnknownTensor(String),

    #[error("infer: input too short: need {need} bytes, got {got}")]
    InputSize { need: usize, got: usize },

    #[error("infer: tensor {name:?} bound to {bound:#x} but executed with {given:#x}")]
    BindingMismatch {
        name: String,
        bound: usize,
        given: usize,
    },

    #[error("infer: config: {0}")]
    Config(String),

    #[error("infer: model {0:?} not registered")]
    ModelNotRegistered(String),

    #[error(transparent)]
    Device(#[from] DeviceError),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Errors reported by a device's memory and transfer primitives.
#[derive(Debug, Error)]
pub enum DeviceError {
    #[error("device: out of memory allocating {bytes} bytes")]
    OutOfMemory { bytes: usize },

    #[error("device: invalid value: {0}")]
    InvalidValue(String),

    #[error("device: runtime error {code}: {message}")]
    Runtime { code: i32, message: String },
}

/// Logs the message and aborts the process.
///
/// Used where continuing would hand corrupt or missing memory to the engine:
/// allocation failure, failed transfers, broken structural assertions.
#[cold]
pub(crate) fn fatal(msg: impl fmt::Display) -> ! {
    tracing::error!("infer: fatal: {msg}");
    eprintln!("infer: fatal: {msg}");
    std::process::abort()
}
