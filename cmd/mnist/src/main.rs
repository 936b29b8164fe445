//! MNIST CLI - classify handwritten digits with a compiled network.

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod pgm;

use commands::{ClassifyCommand, InspectCommand};

/// MNIST CLI - classify 28x28 grayscale digits.
///
/// The model is located by searching the configured data directories (and up
/// to ten of their ancestors) for the model file, then compiled with the
/// requested precision before classifying.
#[derive(Parser)]
#[command(name = "mnist")]
#[command(about = "MNIST digit classifier")]
#[command(version)]
pub struct Cli {
    /// Model parameters file (YAML or JSON); defaults to the built-in MNIST preset
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Model file name to search for
    #[arg(long, global = true)]
    pub model: Option<String>,

    /// Data directory to search (repeatable, replaces the configured list)
    #[arg(long = "data-dir", global = true)]
    pub data_dirs: Vec<String>,

    /// Build with fp16 precision
    #[arg(long, global = true)]
    pub fp16: bool,

    /// Build with bf16 precision
    #[arg(long, global = true)]
    pub bf16: bool,

    /// Build with int8 precision
    #[arg(long, global = true)]
    pub int8: bool,

    /// Reuse buffers and execution contexts across inputs
    #[arg(long, global = true)]
    pub pool: bool,

    /// Output as JSON (for piping)
    #[arg(long, global = true)]
    pub json: bool,

    /// Verbose output
    #[arg(short = 'v', long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify image files
    Classify(ClassifyCommand),
    /// Print the engine's tensors
    Inspect(InspectCommand),
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    match &cli.command {
        Commands::Classify(cmd) => cmd.run(&cli),
        Commands::Inspect(cmd) => cmd.run(&cli),
    }
}
