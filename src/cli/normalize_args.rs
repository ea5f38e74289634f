// src/cli/normalize_args.rs
use clap::Args;
use std::path::PathBuf;

/// CTS normalizer parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct NormalizeArgs {
    /// Explicit run directory (overrides run-root + run-id resolution)
    #[arg(long)]
    pub run_dir: Option<PathBuf>,

    /// Run identifier; defaults to RUN_ID, then the latest run
    #[arg(long)]
    pub run_id: Option<String>,
}
