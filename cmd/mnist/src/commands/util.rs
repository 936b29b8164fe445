//! Utility functions for CLI commands.

use giztoy_infer::reference::CpuBackend;
use giztoy_infer::{
    InferencePipeline, ModelId, ModelParams, default_logger, model_params, register_builtin_models,
};

use crate::Cli;

/// Resolves model parameters from the config file or the built-in preset,
/// then applies command line overrides.
pub fn get_params(cli: &Cli) -> anyhow::Result<ModelParams> {
    let mut params = match &cli.config {
        Some(path) => ModelParams::from_file(path)?,
        None => {
            register_builtin_models();
            model_params(ModelId::MNIST)?
        }
    };
    apply_overrides(cli, &mut params);
    Ok(params)
}

fn apply_overrides(cli: &Cli, params: &mut ModelParams) {
    if let Some(model) = &cli.model {
        params.model_file_name = model.clone();
    }
    if !cli.data_dirs.is_empty() {
        params.data_dirs = cli.data_dirs.clone();
    }
    params.fp16 |= cli.fp16;
    params.bf16 |= cli.bf16;
    params.int8 |= cli.int8;
    params.pool_sessions |= cli.pool;
}

/// Builds a pipeline on the CPU reference backend.
pub fn build_pipeline(cli: &Cli) -> anyhow::Result<InferencePipeline> {
    let params = get_params(cli)?;
    print_verbose(cli, &format!("model {} in {:?}", params.model_file_name, params.data_dirs));
    let mut pipeline = InferencePipeline::new(params, default_logger());
    pipeline.build(&CpuBackend::new())?;
    Ok(pipeline)
}

/// Prints a JSON value on one line.
pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Prints verbose message to stderr.
pub fn print_verbose(cli: &Cli, msg: &str) {
    if cli.verbose {
        eprintln!("[verbose] {}", msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn overrides_replace_and_enable() {
        let cli = Cli::parse_from([
            "mnist",
            "--model",
            "net.json",
            "--data-dir",
            "a/",
            "--data-dir",
            "b/",
            "--fp16",
            "--pool",
            "inspect",
        ]);
        let params = get_params(&cli).unwrap();
        assert_eq!(params.model_file_name, "net.json");
        assert_eq!(params.data_dirs, vec!["a/", "b/"]);
        assert!(params.fp16 && params.pool_sessions);
        assert!(!params.int8 && !params.bf16);
        assert_eq!(params.input_tensor_names, vec!["Input3"]);
    }

    #[test]
    fn defaults_to_mnist_preset() {
        let cli = Cli::parse_from(["mnist", "inspect"]);
        assert_eq!(get_params(&cli).unwrap(), ModelParams::mnist());
    }
}
