// src/cli/schedule_args.rs
use clap::Args;

/// Central scheduler parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct ScheduleArgs {
    /// Pending queue key
    #[arg(long)]
    pub pending: Option<String>,

    /// Slot token bag key
    #[arg(long)]
    pub slots: Option<String>,

    /// Max rightmost slot tokens scanned per cycle; 0 scans all
    #[arg(long)]
    pub scan_slots: Option<usize>,

    /// Host selection weigher: first-fit, instances, vcpu
    #[arg(long)]
    pub weigher: Option<String>,

    /// Prefer smaller (min) or larger (max) metric values
    #[arg(long)]
    pub weigher_order: Option<String>,

    /// Broker URL override
    #[arg(long)]
    pub broker: Option<String>,
}
