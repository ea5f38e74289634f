// src/cli/dispatch_args.rs
use clap::Args;
use std::path::PathBuf;

/// Task submission parameters.
#[derive(Args, Debug, Clone, Default)]
pub struct DispatchArgs {
    /// Directory of input jobs
    #[arg(long)]
    pub inputs: PathBuf,

    /// Directory task outputs are written under
    #[arg(long)]
    pub outputs: PathBuf,

    /// Comma-separated node list for direct policies
    #[arg(long)]
    pub nodes: Option<String>,

    /// Assignment policy: round-robin, duration-greedy, backlog, pending
    #[arg(long)]
    pub policy: Option<String>,

    /// Profile mix, e.g. "hevc_short=3,h264_long=1"
    #[arg(long)]
    pub mix: Option<String>,

    /// Total task count for the mix (defaults to the input count)
    #[arg(long)]
    pub total: Option<usize>,

    /// Seed for the deterministic mix shuffle
    #[arg(long)]
    pub seed: Option<u64>,

    /// Pending queue key for the pending policy
    #[arg(long)]
    pub pending: Option<String>,

    /// Pending sub-mode: pulse or fifo
    #[arg(long)]
    pub pending_mode: Option<String>,

    /// Tasks pushed per pulse
    #[arg(long)]
    pub pulse_size: Option<usize>,

    /// Sleep between pulses (ms)
    #[arg(long)]
    pub pulse_interval: Option<u64>,

    /// Tasks pushed per fifo/backlog iteration
    #[arg(long)]
    pub batch_size: Option<usize>,

    /// Per-node queue length bound for the backlog policy
    #[arg(long)]
    pub backlog_limit: Option<usize>,

    /// Broker URL override
    #[arg(long)]
    pub broker: Option<String>,

    /// Output scale override, e.g. 1280:720
    #[arg(long)]
    pub scale: Option<String>,

    /// Encoder preset override
    #[arg(long)]
    pub preset: Option<String>,

    /// Quality knob override
    #[arg(long)]
    pub crf: Option<u32>,

    /// Codec family override: h264 or hevc
    #[arg(long)]
    pub vcodec: Option<String>,

    /// vCPU demand attached to tasks without a profile mix
    #[arg(long)]
    pub cpu_units: Option<u32>,
}

impl DispatchArgs {
    /// Parse the comma-separated node list.
    pub fn node_list(&self) -> Vec<String> {
        self.nodes
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }
}
