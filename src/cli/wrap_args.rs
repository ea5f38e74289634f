// src/cli/wrap_args.rs
use clap::Args;

/// Adapter parameters: everything after `--` belongs to the child.
///
/// Node identity, timestamps, and CPU controls come from the
/// environment (`NODE_ID`, `STAGE`, `TS_ENQUEUE`, `UNIT_NAME`,
/// `CPU_QUOTA`, `CPU_WEIGHT`, `CPUSET`), matching what the worker
/// injects for its own children.
#[derive(Args, Debug, Clone, Default)]
pub struct WrapArgs {
    /// Run identifier override
    #[arg(long)]
    pub run_id: Option<String>,

    /// Target program and its arguments
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    pub command: Vec<String>,
}
