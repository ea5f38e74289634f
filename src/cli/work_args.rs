// src/cli/work_args.rs
use clap::Args;
use std::path::PathBuf;

/// Worker runtime parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct WorkArgs {
    /// Node identity; defaults to NODE_ID or the hostname
    #[arg(long)]
    pub node: Option<String>,

    /// Concurrency slots to publish; 0 gates by capacity alone
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Explicit CPU capacity units (default: ratio * logical cores)
    #[arg(long)]
    pub capacity_units: Option<u32>,

    /// Overprovision ratio for the capacity default
    #[arg(long)]
    pub allocation_ratio: Option<f64>,

    /// CPU binding mode: exclusive or shared
    #[arg(long)]
    pub cpu_binding: Option<String>,

    /// CPU weight granted per requested vCPU in shared mode
    #[arg(long)]
    pub cpuweight_per_vcpu: Option<u32>,

    /// Force-reset cap:<node> on startup, overriding stale state
    #[arg(long)]
    pub reset_capacity: bool,

    /// Delete q:<node> on startup
    #[arg(long)]
    pub clear_queue: bool,

    /// Directory task outputs are created under
    #[arg(long)]
    pub outputs: Option<PathBuf>,

    /// Run identifier override
    #[arg(long)]
    pub run_id: Option<String>,

    /// Broker URL override
    #[arg(long)]
    pub broker: Option<String>,
}
