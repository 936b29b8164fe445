//! Build-then-infer pipeline for single-input image classifiers.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::Serialize;

use crate::engine::{Backend, Builder, Engine, Network, Runtime};
use crate::error::{InferError, fatal};
use crate::locate::locate_file;
use crate::logger::Logger;
use crate::params::ModelParams;
use crate::pool::SessionPool;
use crate::types::{DataType, Dims, TensorDesc};
use crate::{log_debug, log_error, log_info};

/// Result of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub class: usize,
    pub probabilities: Vec<f32>,
}

struct Built {
    pool: SessionPool,
    engine: Arc<dyn Engine>,
    input: TensorDesc,
    output: TensorDesc,
    // Dropped last: engines may depend on their runtime.
    _runtime: Arc<dyn Runtime>,
}

/// Compiles a model once and classifies inputs against it.
///
/// [`build`](Self::build) moves the pipeline from unbuilt to built; a failed
/// build leaves the previous state untouched. [`infer`](Self::infer) takes
/// `&self` and may be called from many threads at once: every call uses its
/// own buffers and execution context.
pub struct InferencePipeline {
    params: ModelParams,
    logger: Arc<dyn Logger>,
    built: Option<Built>,
}

impl InferencePipeline {
    pub fn new(params: ModelParams, logger: Arc<dyn Logger>) -> Self {
        Self {
            params,
            logger,
            built: None,
        }
    }

    /// Locates, parses and compiles the model, then deserializes the engine.
    pub fn build<B: Backend>(&mut self, backend: &B) -> Result<(), InferError> {
        match self.try_build(backend) {
            Ok(built) => {
                log_info!(
                    self.logger,
                    "engine ready: {} {} -> {} {}",
                    built.input.name,
                    built.input.shape,
                    built.output.name,
                    built.output.shape
                );
                self.built = Some(built);
                Ok(())
            }
            Err(e) => {
                log_error!(self.logger, "build failed: {e}");
                Err(e)
            }
        }
    }

    fn try_build<B: Backend>(&self, backend: &B) -> Result<Built, InferError> {
        let builder = backend.create_builder(self.logger.clone())?;
        let path = locate_file(&self.params.model_file_name, &self.params.data_dirs)?;
        let network = builder.parse_network(&path)?;
        if network.inputs().len() != 1 || network.outputs().len() != 1 {
            return Err(InferError::Build(format!(
                "expected one input and one output, got {} and {}",
                network.inputs().len(),
                network.outputs().len()
            )));
        }

        let plan = builder.build_serialized_network(&network, &self.params.builder_config())?;
        let runtime = backend.create_runtime(self.logger.clone())?;
        let engine = runtime.deserialize_engine(&plan)?;

        let input = self.resolve(&engine, &self.params.input_tensor_names, &network.inputs()[0])?;
        let output =
            self.resolve(&engine, &self.params.output_tensor_names, &network.outputs()[0])?;
        if input.shape.nb_dims() != 4 || output.shape.nb_dims() != 2 {
            return Err(InferError::Build(format!(
                "expected NCHW input and [N, C] output, got {} and {}",
                input.shape, output.shape
            )));
        }
        if input.data_type != DataType::Float || output.data_type != DataType::Float {
            return Err(InferError::Build("input and output must be float tensors".into()));
        }

        let pool =
            SessionPool::new(engine.clone(), self.params.batch_size, self.params.pool_sessions);
        Ok(Built {
            pool,
            engine,
            input,
            output,
            _runtime: runtime,
        })
    }

    /// Picks the configured tensor name, or the network's own when none is set.
    fn resolve(
        &self,
        engine: &Arc<dyn Engine>,
        names: &[String],
        declared: &TensorDesc,
    ) -> Result<TensorDesc, InferError> {
        let name = match names {
            [] => declared.name.as_str(),
            [name] => name.as_str(),
            _ => return Err(InferError::Build(format!("expected one tensor name, got {names:?}"))),
        };
        engine
            .tensor(name)
            .cloned()
            .ok_or_else(|| InferError::Build(format!("engine has no tensor {name:?}")))
    }

    /// Classifies one `height x width` grayscale image.
    ///
    /// Extra trailing bytes are ignored.
    pub fn infer(&self, input: &[u8]) -> Result<Prediction, InferError> {
        let built = self.built.as_ref().ok_or(InferError::NotBuilt)?;
        let (height, width) = (dim(&built.input.shape, 2), dim(&built.input.shape, 3));
        let need = height * width;
        if input.len() < need {
            return Err(InferError::InputSize {
                need,
                got: input.len(),
            });
        }
        let input = &input[..need];

        let mut session = built.pool.checkout()?;
        log_debug!(self.logger, "input:\n{}", render_input(input, width));
        let Some(host) = session.buffers.host_slice_mut::<f32>(&built.input.name) else {
            fatal(format!("no float host buffer for input {:?}", built.input.name));
        };
        for (dst, &b) in host.iter_mut().zip(input) {
            *dst = 1.0 - b as f32 / 255.0;
        }

        session.run()?;

        let output_size = dim(&built.output.shape, 1);
        let Some(logits) = session
            .buffers
            .host(&built.output.name)
            .and_then(|b| b.as_slice::<f32>())
        else {
            fatal(format!("no float host buffer for output {:?}", built.output.name));
        };
        let probabilities = softmax(&logits[..output_size]);
        let class = argmax_last(&probabilities);
        log_debug!(self.logger, "output:\n{}", render_probabilities(&probabilities));

        Ok(Prediction { class, probabilities })
    }

    pub fn is_built(&self) -> bool {
        self.built.is_some()
    }

    pub fn engine(&self) -> Option<&Arc<dyn Engine>> {
        self.built.as_ref().map(|b| &b.engine)
    }

    pub fn input_dims(&self) -> Option<&Dims> {
        self.built.as_ref().map(|b| &b.input.shape)
    }

    pub fn output_dims(&self) -> Option<&Dims> {
        self.built.as_ref().map(|b| &b.output.shape)
    }

    pub fn input_name(&self) -> Option<&str> {
        self.built.as_ref().map(|b| b.input.name.as_str())
    }

    pub fn output_name(&self) -> Option<&str> {
        self.built.as_ref().map(|b| b.output.name.as_str())
    }

    pub fn params(&self) -> &ModelParams {
        &self.params
    }

    /// Sessions created since the last build.
    pub fn sessions_created(&self) -> usize {
        self.built.as_ref().map_or(0, |b| b.pool.created())
    }
}

fn dim(dims: &Dims, i: usize) -> usize {
    dims.get(i).unwrap_or(0).max(0) as usize
}

/// Exponentiates and normalizes `logits`.
///
/// No max subtraction: very large logits overflow to infinity.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let exps: Vec<f32> = logits.iter().map(|v| v.exp()).collect();
    let sum: f32 = exps.iter().sum();
    exps.into_iter().map(|v| v / sum).collect()
}

/// Index of the maximum value; the last one wins on ties.
pub fn argmax_last(values: &[f32]) -> usize {
    let mut best = 0.0f32;
    let mut idx = 0;
    for (i, &v) in values.iter().enumerate() {
        best = best.max(v);
        if best == v {
            idx = i;
        }
    }
    idx
}

const GRAYSCALE: &[u8; 10] = b" .:-=+*#%@";

fn render_input(input: &[u8], width: usize) -> String {
    let mut out = String::with_capacity(input.len() + input.len() / width.max(1));
    for (i, &b) in input.iter().enumerate() {
        out.push(GRAYSCALE[(b / 26) as usize] as char);
        if (i + 1) % width.max(1) == 0 {
            out.push('\n');
        }
    }
    out
}

fn render_probabilities(probabilities: &[f32]) -> String {
    let mut out = String::new();
    for (i, p) in probabilities.iter().enumerate() {
        let stars = (p * 10.0 + 0.5).floor().max(0.0) as usize;
        let _ = writeln!(out, " Prob {i}  {p:5.4} Class {i}: {}", "*".repeat(stars));
    }
    out
}
