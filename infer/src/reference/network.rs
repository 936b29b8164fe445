//! JSON network descriptions understood by the reference builder.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::engine::Network;
use crate::error::InferError;
use crate::types::{DataType, Dims, TensorDesc, TensorIoMode};

/// One declared input or output of a network description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<i64>,
    #[serde(default = "default_dtype")]
    pub dtype: DataType,
}

fn default_dtype() -> DataType {
    DataType::Float
}

/// A layer of the feed-forward stack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum Layer {
    /// Fully connected: `y = W x + b`, with `W` stored row-major as
    /// `units` rows of the previous width.
    Dense {
        units: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
    },
    Relu,
}

/// A network description file.
///
/// ```json
/// {
///   "name": "mnist",
///   "inputs":  [{ "name": "Input3", "shape": [1, 1, 28, 28] }],
///   "outputs": [{ "name": "Plus214_Output_0", "shape": [1, 10] }],
///   "layers":  [{ "op": "dense", "units": 10, "weights": [...], "bias": [...] }]
/// }
/// ```
///
/// The first dimension of both tensors is the batch; the stack runs once per
/// batch item over the flattened remaining dimensions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkDescription {
    #[serde(default)]
    pub name: String,
    pub inputs: Vec<TensorSpec>,
    pub outputs: Vec<TensorSpec>,
    pub layers: Vec<Layer>,
}

impl NetworkDescription {
    pub fn from_file(path: &Path) -> Result<Self, InferError> {
        let data = fs::read(path)?;
        Self::from_slice(&data)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self, InferError> {
        serde_json::from_slice(data).map_err(|e| InferError::Build(format!("parse network: {e}")))
    }

    pub fn to_json(&self) -> Result<String, InferError> {
        serde_json::to_string(self).map_err(|e| InferError::Build(e.to_string()))
    }

    /// Checks tensor declarations and layer shapes.
    pub fn validate(&self) -> Result<(), InferError> {
        if self.inputs.len() != 1 || self.outputs.len() != 1 {
            return Err(InferError::Build(format!(
                "network must have exactly one input and one output, got {} and {}",
                self.inputs.len(),
                self.outputs.len()
            )));
        }
        for t in self.inputs.iter().chain(&self.outputs) {
            if t.dtype != DataType::Float {
                return Err(InferError::Build(format!(
                    "tensor {:?}: unsupported dtype {}",
                    t.name, t.dtype
                )));
            }
            if t.shape.is_empty() || t.shape.iter().any(|&d| d <= 0) {
                return Err(InferError::Build(format!(
                    "tensor {:?}: invalid shape {:?}",
                    t.name, t.shape
                )));
            }
        }
        if self.inputs[0].name == self.outputs[0].name {
            return Err(InferError::Build(format!(
                "duplicate tensor name {:?}",
                self.inputs[0].name
            )));
        }

        let input = &self.inputs[0];
        let output = &self.outputs[0];
        if input.shape[0] != output.shape[0] {
            return Err(InferError::Build(format!(
                "batch mismatch: input {:?} vs output {:?}",
                input.shape, output.shape
            )));
        }

        let mut width = self.in_features();
        for (i, layer) in self.layers.iter().enumerate() {
            if let Layer::Dense { units, weights, bias } = layer {
                if weights.len() != units * width {
                    return Err(InferError::Build(format!(
                        "layer {i}: expected {} weights ({units}x{width}), got {}",
                        units * width,
                        weights.len()
                    )));
                }
                if bias.len() != *units {
                    return Err(InferError::Build(format!(
                        "layer {i}: expected {units} biases, got {}",
                        bias.len()
                    )));
                }
                width = *units;
            }
        }
        if width != self.out_features() {
            return Err(InferError::Build(format!(
                "network produces {width} features but output {:?} holds {}",
                output.name,
                self.out_features()
            )));
        }
        Ok(())
    }

    /// Batch size, the leading input dimension.
    pub fn batch(&self) -> usize {
        self.inputs[0].shape[0] as usize
    }

    /// Flattened features per batch item of the input.
    pub fn in_features(&self) -> usize {
        self.inputs[0].shape[1..].iter().product::<i64>() as usize
    }

    /// Flattened features per batch item of the output.
    pub fn out_features(&self) -> usize {
        self.outputs[0].shape[1..].iter().product::<i64>() as usize
    }
}

/// A validated description together with its tensor metadata.
#[derive(Debug, Clone)]
pub struct ParsedNetwork {
    pub(crate) description: NetworkDescription,
    inputs: Vec<TensorDesc>,
    outputs: Vec<TensorDesc>,
}

impl ParsedNetwork {
    pub fn new(description: NetworkDescription) -> Result<Self, InferError> {
        description.validate()?;
        let desc = |t: &TensorSpec, mode| {
            TensorDesc::new(t.name.clone(), Dims::new(t.shape.clone()), t.dtype, mode)
        };
        let inputs = description.inputs.iter().map(|t| desc(t, TensorIoMode::Input)).collect();
        let outputs = description.outputs.iter().map(|t| desc(t, TensorIoMode::Output)).collect();
        Ok(Self {
            description,
            inputs,
            outputs,
        })
    }

    pub fn description(&self) -> &NetworkDescription {
        &self.description
    }
}

impl Network for ParsedNetwork {
    fn inputs(&self) -> &[TensorDesc] {
        &self.inputs
    }

    fn outputs(&self) -> &[TensorDesc] {
        &self.outputs
    }
}
