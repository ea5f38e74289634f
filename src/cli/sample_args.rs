// src/cli/sample_args.rs
use clap::Args;
use std::path::PathBuf;

/// Per-PID sampler parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct SampleArgs {
    /// Sampling interval in milliseconds
    #[arg(long)]
    pub interval_ms: Option<u64>,

    /// Whitelist sentinel directory (default: the run's pids directory)
    #[arg(long)]
    pub pid_dir: Option<PathBuf>,

    /// Scan /proc by command name instead of using the whitelist
    #[arg(long)]
    pub scan: bool,

    /// Command-name regex for whitelist validation and scan mode
    #[arg(long = "match")]
    pub comm_match: Option<String>,

    /// Node identity; defaults to NODE_ID or the hostname
    #[arg(long)]
    pub node: Option<String>,

    /// Environment stage label
    #[arg(long)]
    pub stage: Option<String>,

    /// Run identifier override
    #[arg(long)]
    pub run_id: Option<String>,
}
