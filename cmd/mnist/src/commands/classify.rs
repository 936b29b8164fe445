//! Image classification command.

use std::fs;

use clap::Args;
use serde::Serialize;

use super::{build_pipeline, print_json, print_verbose};
use crate::{Cli, pgm};

/// Classify one or more images.
#[derive(Args)]
pub struct ClassifyCommand {
    /// Image files (binary PGM unless --raw)
    #[arg(required = true)]
    files: Vec<String>,

    /// Treat files as raw row-major pixels with no header
    #[arg(long)]
    raw: bool,

    /// Print every class probability
    #[arg(long)]
    probs: bool,
}

#[derive(Serialize)]
struct ClassifyOutput {
    #[serde(rename = "Result")]
    result: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    probabilities: Option<Vec<f32>>,
}

impl ClassifyCommand {
    pub fn run(&self, cli: &Cli) -> anyhow::Result<()> {
        let pipeline = build_pipeline(cli)?;
        let dims = pipeline
            .input_dims()
            .ok_or_else(|| anyhow::anyhow!("pipeline has no input"))?;
        let height = dims.get(2).unwrap_or(0) as usize;
        let width = dims.get(3).unwrap_or(0) as usize;

        for path in &self.files {
            let data = fs::read(path).map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
            let pixels = if self.raw {
                data
            } else {
                let img = pgm::parse(&data).map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
                if (img.height, img.width) != (height, width) {
                    anyhow::bail!(
                        "{path}: image is {}x{}, model expects {width}x{height}",
                        img.width,
                        img.height
                    );
                }
                img.pixels
            };
            print_verbose(cli, &format!("{path}: {} bytes", pixels.len()));

            let prediction = pipeline.infer(&pixels).map_err(|e| anyhow::anyhow!("{path}: {e}"))?;
            if cli.json {
                print_json(&ClassifyOutput {
                    result: prediction.class,
                    probabilities: self.probs.then(|| prediction.probabilities.clone()),
                })?;
            } else {
                println!("{path}: {}", prediction.class);
                if self.probs {
                    for (i, p) in prediction.probabilities.iter().enumerate() {
                        println!("  {i}: {p:.4}");
                    }
                }
            }
        }
        Ok(())
    }
}
