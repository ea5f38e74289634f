// src/cli/export_args.rs
use clap::Args;
use std::path::PathBuf;

/// Simulator bundle exporter parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct ExportArgs {
    /// Input directory containing node bundles
    #[arg(long)]
    pub input: PathBuf,

    /// Output directory for the simulator bundle
    #[arg(long)]
    pub output: PathBuf,

    /// Task id assignment: auto, pid, or seq
    #[arg(long, default_value = "auto")]
    pub task_id: String,
}
