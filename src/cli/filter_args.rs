// src/cli/filter_args.rs
use clap::Args;
use std::path::PathBuf;

/// Earliest-N bundle filter parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct FilterArgs {
    /// Input directory with tasks.parquet and fragments.parquet
    #[arg(long)]
    pub input: PathBuf,

    /// Output directory for the filtered bundle
    #[arg(long)]
    pub output: PathBuf,

    /// Number of earliest tasks by submission_time to keep
    #[arg(long, default_value_t = 20)]
    pub topn: usize,
}
