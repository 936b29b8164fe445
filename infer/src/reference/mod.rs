//! Pure-Rust reference backend.
//!
//! Parses JSON feed-forward network descriptions, compiles them into plans
//! with the requested precision applied to the weights, and executes them on
//! a [`CpuDevice`](crate::CpuDevice). It stands in for an accelerator
//! toolchain in tests, benchmarks and the command line tool.

mod engine;
mod network;
mod plan;

pub use engine::{CpuBackend, CpuBuilder, CpuContext, CpuEngine, CpuRuntime};
pub use network::{Layer, NetworkDescription, ParsedNetwork, TensorSpec};
pub use plan::{PLAN_MAGIC, Plan, Precision};
