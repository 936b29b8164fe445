use std::ffi::c_void;
use std::path::Path;
use std::slice;
use std::sync::Arc;

use crate::device::{CpuDevice, Device};
use crate::engine::{Backend, Builder, BuilderConfig, Engine, ExecutionContext, Runtime};
use crate::error::InferError;
use crate::logger::Logger;
use crate::types::{DataType, Dims, TensorDesc, TensorIoMode};
use crate::{log_debug, log_info, log_warn};

use super::network::{Layer, NetworkDescription, ParsedNetwork, TensorSpec};
use super::plan::Plan;

/// Backend that compiles JSON network descriptions and runs them on a
/// [`CpuDevice`].
#[derive(Debug, Clone)]
pub struct CpuBackend {
    device: Arc<CpuDevice>,
}

impl CpuBackend {
    pub fn new() -> Self {
        Self::with_device(Arc::new(CpuDevice::new()))
    }

    /// Uses an existing device, e.g. to observe its allocation counters.
    pub fn with_device(device: Arc<CpuDevice>) -> Self {
        Self { device }
    }

    pub fn device(&self) -> &Arc<CpuDevice> {
        &self.device
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    type Builder = CpuBuilder;

    fn create_builder(&self, logger: Arc<dyn Logger>) -> Result<CpuBuilder, InferError> {
        Ok(CpuBuilder { logger })
    }

    fn create_runtime(&self, logger: Arc<dyn Logger>) -> Result<Arc<dyn Runtime>, InferError> {
        Ok(Arc::new(CpuRuntime {
            device: self.device.clone(),
            logger,
        }))
    }
}

pub struct CpuBuilder {
    logger: Arc<dyn Logger>,
}

impl Builder for CpuBuilder {
    type Network = ParsedNetwork;

    fn parse_network(&self, path: &Path) -> Result<ParsedNetwork, InferError> {
        let description = NetworkDescription::from_file(path)?;
        let network = ParsedNetwork::new(description)?;
        let name = match network.description().name.as_str() {
            "" => "network",
            name => name,
        };
        log_info!(
            self.logger,
            "parsed {} ({} layers) from {}",
            name,
            network.description().layers.len(),
            path.display()
        );
        Ok(network)
    }

    fn build_serialized_network(
        &self,
        network: &ParsedNetwork,
        config: &BuilderConfig,
    ) -> Result<Vec<u8>, InferError> {
        if let Some(core) = config.dla_core {
            log_warn!(self.logger, "cpu backend has no DLA, ignoring dla core {core}");
        }
        let plan = Plan::compile(network.description(), config)?;
        let bytes = plan.to_bytes()?;
        log_debug!(self.logger, "built {:?} plan of {} bytes", plan.precision, bytes.len());
        Ok(bytes)
    }
}

pub struct CpuRuntime {
    device: Arc<CpuDevice>,
    logger: Arc<dyn Logger>,
}

impl Runtime for CpuRuntime {
    fn deserialize_engine(&self, plan: &[u8]) -> Result<Arc<dyn Engine>, InferError> {
        let plan = Plan::from_bytes(plan)?;
        log_debug!(self.logger, "deserialized {:?} plan", plan.precision);
        Ok(Arc::new(CpuEngine::new(plan, self.device.clone())))
    }
}

struct Compiled {
    tensors: Vec<TensorDesc>,
    plan: Plan,
    batch: usize,
    in_features: usize,
    out_features: usize,
}

/// Engine that evaluates a dense/relu stack on the host.
///
/// Tensor 0 is the input and tensor 1 the output.
pub struct CpuEngine {
    compiled: Arc<Compiled>,
    device: Arc<CpuDevice>,
}

impl CpuEngine {
    pub fn new(plan: Plan, device: Arc<CpuDevice>) -> Self {
        let net = &plan.network;
        let desc = |spec: &TensorSpec, mode: TensorIoMode| {
            let shape = Dims::new(spec.shape.clone());
            TensorDesc::new(spec.name.as_str(), shape, DataType::Float, mode)
        };
        let tensors = vec![
            desc(&net.inputs[0], TensorIoMode::Input),
            desc(&net.outputs[0], TensorIoMode::Output),
        ];
        let compiled = Compiled {
            batch: net.batch(),
            in_features: net.in_features(),
            out_features: net.out_features(),
            tensors,
            plan,
        };
        Self {
            compiled: Arc::new(compiled),
            device,
        }
    }

    pub fn plan(&self) -> &Plan {
        &self.compiled.plan
    }
}

impl Engine for CpuEngine {
    fn num_io_tensors(&self) -> usize {
        self.compiled.tensors.len()
    }

    fn io_tensor(&self, index: usize) -> Option<&TensorDesc> {
        self.compiled.tensors.get(index)
    }

    fn device(&self) -> Arc<dyn Device> {
        self.device.clone()
    }

    fn create_execution_context(&self) -> Result<Box<dyn ExecutionContext>, InferError> {
        Ok(Box::new(CpuContext {
            addresses: vec![None; self.compiled.tensors.len()],
            compiled: self.compiled.clone(),
        }))
    }
}

/// Execution state of a [`CpuEngine`].
pub struct CpuContext {
    compiled: Arc<Compiled>,
    addresses: Vec<Option<usize>>,
}

impl CpuContext {
    fn index(&self, name: &str) -> Option<usize> {
        self.compiled.tensors.iter().position(|t| t.name == name)
    }
}

impl ExecutionContext for CpuContext {
    fn tensor_shape(&self, name: &str) -> Option<Dims> {
        self.index(name).map(|i| self.compiled.tensors[i].shape.clone())
    }

    fn set_tensor_address(&mut self, name: &str, address: *mut c_void) -> Result<(), InferError> {
        let i = self.index(name).ok_or_else(|| InferError::UnknownTensor(name.to_string()))?;
        self.addresses[i] = Some(address as usize);
        Ok(())
    }

    unsafe fn execute(&mut self, bindings: &[*mut c_void]) -> Result<(), InferError> {
        let c = &*self.compiled;
        if bindings.len() != c.tensors.len() {
            return Err(InferError::Engine(format!(
                "expected {} bindings, got {}",
                c.tensors.len(),
                bindings.len()
            )));
        }
        for (i, (&given, bound)) in bindings.iter().zip(&self.addresses).enumerate() {
            if given.is_null() {
                return Err(InferError::Engine(format!(
                    "binding for {:?} is null",
                    c.tensors[i].name
                )));
            }
            let Some(bound) = *bound else {
                return Err(InferError::Engine(format!(
                    "no address set for {:?}",
                    c.tensors[i].name
                )));
            };
            if bound != given as usize {
                return Err(InferError::BindingMismatch {
                    name: c.tensors[i].name.clone(),
                    bound,
                    given: given as usize,
                });
            }
        }

        // The caller guarantees each binding covers its tensor's volume.
        let input = unsafe {
            slice::from_raw_parts(bindings[0].cast::<f32>().cast_const(), c.batch * c.in_features)
        };
        let output = unsafe {
            slice::from_raw_parts_mut(bindings[1].cast::<f32>(), c.batch * c.out_features)
        };

        let items = input
            .chunks_exact(c.in_features)
            .zip(output.chunks_exact_mut(c.out_features));
        for (x, y) in items {
            let result = forward(&c.plan.network.layers, x);
            y.copy_from_slice(&result);
        }
        Ok(())
    }
}

fn forward(layers: &[Layer], input: &[f32]) -> Vec<f32> {
    let mut x = input.to_vec();
    for layer in layers {
        match layer {
            Layer::Dense { units, weights, bias } => {
                let width = x.len();
                x = (0..*units)
                    .map(|u| {
                        let row = &weights[u * width..(u + 1) * width];
                        bias[u] + row.iter().zip(&x).map(|(w, v)| w * v).sum::<f32>()
                    })
                    .collect();
            }
            Layer::Relu => x.iter_mut().for_each(|v| *v = v.max(0.0)),
        }
    }
    x
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logger::tests::CapturingLogger;
    use crate::manager::BufferManager;

    fn spec(name: &str, shape: Vec<i64>) -> TensorSpec {
        TensorSpec {
            name: name.into(),
            shape,
            dtype: DataType::Float,
        }
    }

    /// Two inputs per item: out0 = relu(a - b), out1 = a + b + 1.
    fn description(batch: i64) -> NetworkDescription {
        NetworkDescription {
            name: "diff".into(),
            inputs: vec![spec("x", vec![batch, 2])],
            outputs: vec![spec("y", vec![batch, 2])],
            layers: vec![
                Layer::Dense {
                    units: 2,
                    weights: vec![1.0, -1.0, 1.0, 1.0],
                    bias: vec![0.0, 1.0],
                },
                Layer::Relu,
            ],
        }
    }

    fn engine(batch: i64) -> Arc<dyn Engine> {
        let plan = Plan::compile(&description(batch), &BuilderConfig::default()).unwrap();
        Arc::new(CpuEngine::new(plan, Arc::new(CpuDevice::new())))
    }

    fn run(engine: &Arc<dyn Engine>, input: &[f32]) -> Vec<f32> {
        let mut ctx = engine.create_execution_context().unwrap();
        let mut mgr = BufferManager::new(engine.clone(), 0, Some(ctx.as_ref())).unwrap();
        mgr.host_slice_mut::<f32>("x").unwrap().copy_from_slice(input);
        for name in ["x", "y"] {
            ctx.set_tensor_address(name, mgr.device_buffer(name)).unwrap();
        }
        mgr.copy_input_to_device();
        unsafe { ctx.execute(mgr.device_bindings()) }.unwrap();
        mgr.copy_output_to_host();
        mgr.host("y").unwrap().as_slice::<f32>().unwrap().to_vec()
    }

    #[test]
    fn forward_dense_relu() {
        let out = forward(&description(1).layers, &[3.0, 5.0]);
        assert_eq!(out, vec![0.0, 9.0]);
    }

    #[test]
    fn execute_single() {
        let engine = engine(1);
        assert_eq!(run(&engine, &[5.0, 3.0]), vec![2.0, 9.0]);
    }

    #[test]
    fn execute_batch() {
        let engine = engine(2);
        assert_eq!(run(&engine, &[5.0, 3.0, 1.0, 4.0]), vec![2.0, 9.0, 0.0, 6.0]);
    }

    #[test]
    fn tensor_metadata() {
        let engine = engine(1);
        assert_eq!(engine.num_io_tensors(), 2);
        assert_eq!(engine.tensor_io_mode("x"), Some(TensorIoMode::Input));
        assert_eq!(engine.tensor_io_mode("y"), Some(TensorIoMode::Output));
        assert_eq!(engine.tensor_io_mode("z"), None);

        let ctx = engine.create_execution_context().unwrap();
        assert_eq!(ctx.tensor_shape("y"), Some(Dims::new(vec![1, 2])));
        assert_eq!(ctx.tensor_shape("z"), None);
    }

    #[test]
    fn mismatched_binding_rejected() {
        let engine = engine(1);
        let mut ctx = engine.create_execution_context().unwrap();
        let mgr = BufferManager::new(engine.clone(), 0, Some(ctx.as_ref())).unwrap();
        let other = BufferManager::new(engine.clone(), 0, Some(ctx.as_ref())).unwrap();

        ctx.set_tensor_address("x", mgr.device_buffer("x")).unwrap();
        ctx.set_tensor_address("y", mgr.device_buffer("y")).unwrap();
        let err = unsafe { ctx.execute(other.device_bindings()) }.unwrap_err();
        assert!(matches!(err, InferError::BindingMismatch { ref name, .. } if name == "x"));
    }

    #[test]
    fn unbound_tensor_rejected() {
        let engine = engine(1);
        let mut ctx = engine.create_execution_context().unwrap();
        let bogus = [0x10 as *mut c_void, 0x20 as *mut c_void];
        let err = unsafe { ctx.execute(&bogus) }.unwrap_err();
        assert!(matches!(err, InferError::Engine(ref msg) if msg.contains("\"x\"")));

        let mgr = BufferManager::new(engine.clone(), 0, Some(ctx.as_ref())).unwrap();
        ctx.set_tensor_address("x", mgr.device_buffer("x")).unwrap();
        let err = unsafe { ctx.execute(mgr.device_bindings()) }.unwrap_err();
        assert!(matches!(err, InferError::Engine(ref msg) if msg.contains("\"y\"")));
    }

    #[test]
    fn wrong_binding_count_rejected() {
        let engine = engine(1);
        let mut ctx = engine.create_execution_context().unwrap();
        let mgr = BufferManager::new(engine.clone(), 0, Some(ctx.as_ref())).unwrap();
        assert!(unsafe { ctx.execute(&mgr.device_bindings()[..1]) }.is_err());
        assert!(unsafe { ctx.execute(&[std::ptr::null_mut(); 2]) }.is_err());
        assert!(matches!(
            ctx.set_tensor_address("z", mgr.device_buffer("x")),
            Err(InferError::UnknownTensor(_))
        ));
    }

    #[test]
    fn backend_build_and_deserialize() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("diff.json");
        std::fs::write(&path, description(1).to_json().unwrap()).unwrap();

        let backend = CpuBackend::new();
        let logger = Arc::new(CapturingLogger::default());
        let builder = backend.create_builder(logger.clone()).unwrap();
        let network = builder.parse_network(&path).unwrap();
        let config = BuilderConfig {
            dla_core: Some(1),
            ..Default::default()
        };
        let plan = builder.build_serialized_network(&network, &config).unwrap();
        assert!(logger.contains("warn", "dla core 1"));

        let runtime = backend.create_runtime(logger).unwrap();
        let engine = runtime.deserialize_engine(&plan).unwrap();
        assert_eq!(run(&engine, &[5.0, 3.0]), vec![2.0, 9.0]);
        assert!(runtime.deserialize_engine(b"garbage").is_err());
    }

    #[test]
    fn parse_missing_file_is_io_error() {
        let builder = CpuBackend::new().create_builder(Arc::new(crate::NopLogger)).unwrap();
        let err = builder.parse_network(Path::new("/nonexistent/net.json")).unwrap_err();
        assert!(matches!(err, InferError::Io(_)));
    }
}
