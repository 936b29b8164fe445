//! Engine inspection command.

use clap::Args;
use serde::Serialize;

use giztoy_infer::{BufferManager, TensorIoMode};

use super::{build_pipeline, print_json};
use crate::Cli;

/// Build the model and list its tensors.
#[derive(Args)]
pub struct InspectCommand {}

#[derive(Serialize)]
struct TensorInfo {
    name: String,
    direction: &'static str,
    shape: Vec<i64>,
    dtype: String,
    bytes: usize,
}

impl InspectCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let pipeline = build_pipeline(cli)?;
        let engine = pipeline
            .engine()
            .ok_or_else(|| anyhow::anyhow!("pipeline not built"))?
            .clone();
        let buffers = BufferManager::new(engine.clone(), 0, None)?;

        let tensors: Vec<TensorInfo> = (0..engine.num_io_tensors())
            .filter_map(|i| engine.io_tensor(i))
            .map(|t| TensorInfo {
                name: t.name.clone(),
                direction: match t.io_mode {
                    TensorIoMode::Input => "input",
                    TensorIoMode::Output => "output",
                },
                shape: t.shape.0.clone(),
                dtype: t.data_type.to_string(),
                bytes: buffers.size(&t.name),
            })
            .collect();

        if cli.json {
            return print_json(&tensors);
        }
        for t in &tensors {
            println!(
                "{:<6} {:<20} {:<16} {:<6} {} bytes",
                t.direction,
                t.name,
                format!("{:?}", t.shape),
                t.dtype,
                t.bytes
            );
        }
        Ok(())
    }
}
