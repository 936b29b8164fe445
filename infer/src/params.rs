//! Model parameters: where to find the model, which tensors to use, and how
//! to compile it.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::BuilderConfig;
use crate::error::InferError;

/// Everything needed to build and run one model.
///
/// ```yaml
/// model_file_name: mnist.json
/// data_dirs: [data/mnist/, data/samples/mnist/]
/// input_tensor_names: [Input3]
/// output_tensor_names: [Plus214_Output_0]
/// fp16: true
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelParams {
    /// Legacy implicit batch size.
    pub batch_size: usize,
    pub dla_core: Option<u32>,
    pub int8: bool,
    pub fp16: bool,
    pub bf16: bool,
    /// Directories searched, in order, for `model_file_name`.
    pub data_dirs: Vec<String>,
    pub input_tensor_names: Vec<String>,
    pub output_tensor_names: Vec<String>,
    pub model_file_name: String,
    /// Reuse buffer managers and contexts across inference calls.
    pub pool_sessions: bool,
}

impl Default for ModelParams {
    fn default() -> Self {
        Self {
            batch_size: 1,
            dla_core: None,
            int8: false,
            fp16: false,
            bf16: false,
            data_dirs: Vec::new(),
            input_tensor_names: Vec::new(),
            output_tensor_names: Vec::new(),
            model_file_name: String::new(),
            pool_sessions: false,
        }
    }
}

impl ModelParams {
    /// The MNIST digit classifier.
    pub fn mnist() -> Self {
        Self {
            data_dirs: vec!["data/mnist/".to_string(), "data/samples/mnist/".to_string()],
            input_tensor_names: vec!["Input3".to_string()],
            output_tensor_names: vec!["Plus214_Output_0".to_string()],
            model_file_name: "mnist.json".to_string(),
            ..Default::default()
        }
    }

    /// Loads parameters from a `.yaml`/`.yml` or `.json` file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, InferError> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)?;
        match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => Self::from_yaml(&data),
            Some("json") => Self::from_json(&data),
            other => Err(InferError::Config(format!(
                "{}: unsupported config extension {other:?}",
                path.display()
            ))),
        }
    }

    pub fn from_yaml(data: &str) -> Result<Self, InferError> {
        serde_yaml::from_str(data).map_err(|e| InferError::Config(e.to_string()))
    }

    pub fn from_json(data: &str) -> Result<Self, InferError> {
        serde_json::from_str(data).map_err(|e| InferError::Config(e.to_string()))
    }

    pub fn builder_config(&self) -> BuilderConfig {
        BuilderConfig {
            int8: self.int8,
            fp16: self.fp16,
            bf16: self.bf16,
            dla_core: self.dla_core,
        }
    }
}
