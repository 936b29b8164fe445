//! Reusable per-call execution state.

use std::collections::HashMap;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;

use crate::engine::{Engine, ExecutionContext};
use crate::error::InferError;
use crate::manager::BufferManager;
use crate::types::Dims;

/// A buffer manager plus an execution context with every tensor address bound.
pub struct Session {
    pub buffers: BufferManager,
    pub context: Box<dyn ExecutionContext>,
}

impl Session {
    /// Creates a context, sizes buffers from its shapes, and binds them.
    pub fn new(engine: &Arc<dyn Engine>, batch_size: usize) -> Result<Self, InferError> {
        let mut context = engine.create_execution_context()?;
        let buffers = BufferManager::new(engine.clone(), batch_size, Some(context.as_ref()))?;
        for name in buffers.tensor_names() {
            context.set_tensor_address(name, buffers.device_buffer(name))?;
        }
        Ok(Self { buffers, context })
    }

    /// Copies inputs to the device, executes, and copies outputs back.
    pub fn run(&mut self) -> Result<(), InferError> {
        self.buffers.copy_input_to_device();
        // The bindings were sized from this context's shapes and bound in `new`.
        unsafe { self.context.execute(self.buffers.device_bindings())? };
        self.buffers.copy_output_to_host();
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct ShapeKey {
    shapes: Vec<Dims>,
    batch_size: usize,
}

/// Hands out [`Session`]s, optionally keeping them for reuse.
///
/// With pooling disabled every checkout creates a session and every return
/// drops it. With pooling enabled idle sessions are kept per shape key. A
/// session is owned by exactly one [`PooledSession`] while checked out.
pub struct SessionPool {
    engine: Arc<dyn Engine>,
    batch_size: usize,
    enabled: bool,
    key: ShapeKey,
    idle: Mutex<HashMap<ShapeKey, Vec<Session>>>,
    created: AtomicUsize,
}

impl SessionPool {
    pub fn new(engine: Arc<dyn Engine>, batch_size: usize, enabled: bool) -> Self {
        let shapes = (0..engine.num_io_tensors())
            .filter_map(|i| engine.io_tensor(i))
            .map(|t| t.shape.clone())
            .collect();
        Self {
            engine,
            batch_size,
            enabled,
            key: ShapeKey { shapes, batch_size },
            idle: Mutex::new(HashMap::new()),
            created: AtomicUsize::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Takes an idle session or creates one.
    pub fn checkout(&self) -> Result<PooledSession<'_>, InferError> {
        let reused = if self.enabled {
            self.idle.lock().get_mut(&self.key).and_then(Vec::pop)
        } else {
            None
        };
        let session = match reused {
            Some(s) => s,
            None => {
                let s = Session::new(&self.engine, self.batch_size)?;
                self.created.fetch_add(1, Ordering::Relaxed);
                s
            }
        };
        Ok(PooledSession {
            pool: self,
            session: Some(session),
        })
    }

    /// Total sessions created so far.
    pub fn created(&self) -> usize {
        self.created.load(Ordering::Relaxed)
    }

    /// Sessions currently idle in the pool.
    pub fn idle(&self) -> usize {
        self.idle.lock().values().map(Vec::len).sum()
    }

    fn give_back(&self, session: Session) {
        if self.enabled {
            self.idle.lock().entry(self.key.clone()).or_default().push(session);
        }
    }
}

/// A checked-out session, returned to its pool on drop.
pub struct PooledSession<'a> {
    pool: &'a SessionPool,
    session: Option<Session>,
}

impl Deref for PooledSession<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        // Only `drop` takes the session out.
        self.session.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl DerefMut for PooledSession<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        self.session.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl Drop for PooledSession<'_> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.pool.give_back(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::CpuDevice;
    use crate::engine::{Backend, Builder, BuilderConfig, Runtime};
    use crate::logger::NopLogger;
    use crate::reference::{CpuBackend, Layer, NetworkDescription, ParsedNetwork, TensorSpec};
    use crate::types::DataType;

    fn engine(device: Arc<CpuDevice>) -> Arc<dyn Engine> {
        let description = NetworkDescription {
            name: String::new(),
            inputs: vec![TensorSpec {
                name: "x".into(),
                shape: vec![1, 2],
                dtype: DataType::Float,
            }],
            outputs: vec![TensorSpec {
                name: "y".into(),
                shape: vec![1, 1],
                dtype: DataType::Float,
            }],
            layers: vec![Layer::Dense {
                units: 1,
                weights: vec![1.0, 1.0],
                bias: vec![0.0],
            }],
        };
        let backend = CpuBackend::with_device(device);
        let builder = backend.create_builder(Arc::new(NopLogger)).unwrap();
        let network = ParsedNetwork::new(description).unwrap();
        let plan = builder.build_serialized_network(&network, &BuilderConfig::default()).unwrap();
        let runtime = backend.create_runtime(Arc::new(NopLogger)).unwrap();
        runtime.deserialize_engine(&plan).unwrap()
    }

    #[test]
    fn session_runs() {
        let engine = engine(Arc::new(CpuDevice::new()));
        let mut s = Session::new(&engine, 0).unwrap();
        s.buffers.host_slice_mut::<f32>("x").unwrap().copy_from_slice(&[2.0, 3.0]);
        s.run().unwrap();
        assert_eq!(s.buffers.host("y").unwrap().as_slice::<f32>().unwrap(), &[5.0]);
    }

    #[test]
    fn disabled_pool_creates_every_time() {
        let device = Arc::new(CpuDevice::new());
        let pool = SessionPool::new(engine(device.clone()), 0, false);
        for _ in 0..3 {
            let _s = pool.checkout().unwrap();
        }
        assert_eq!(pool.created(), 3);
        assert_eq!(pool.idle(), 0);
        assert_eq!(device.live_bytes(), 0);
    }

    #[test]
    fn enabled_pool_reuses() {
        let pool = SessionPool::new(engine(Arc::new(CpuDevice::new())), 0, true);
        let first = pool.checkout().unwrap().buffers.device_buffer("x");
        for _ in 0..3 {
            let s = pool.checkout().unwrap();
            assert_eq!(s.buffers.device_buffer("x"), first);
        }
        assert_eq!(pool.created(), 1);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn concurrent_checkouts_never_share() {
        let pool = SessionPool::new(engine(Arc::new(CpuDevice::new())), 0, true);
        let a = pool.checkout().unwrap();
        let b = pool.checkout().unwrap();
        assert_ne!(a.buffers.device_buffer("x"), b.buffers.device_buffer("x"));
        assert_eq!(pool.created(), 2);
        drop(a);
        drop(b);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn pool_releases_on_drop() {
        let device = Arc::new(CpuDevice::new());
        {
            let pool = SessionPool::new(engine(device.clone()), 0, true);
            drop(pool.checkout().unwrap());
            assert!(device.live_bytes() > 0);
        }
        assert_eq!(device.live_bytes(), 0);
    }
}
