//! `sample` command: write the node descriptor and run the per-PID
//! sampler loop.

use std::time::Duration;

use regex::Regex;

use crate::Result;
use crate::cli::SampleArgs;
use crate::config::ConfigService;
use crate::core::sampler::{NodeDescriptor, PidSampler, SamplerSettings};
use crate::core::trace::RunPaths;
use crate::error::LoadtraceError;

/// Execute the sample command. Runs until interrupted.
pub async fn execute(args: SampleArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let run = RunPaths::resolve(&config.trace.run_root, args.run_id.clone());
    run.ensure_dirs()?;

    let node = super::node_identity(args.node.clone());
    let stage = args
        .stage
        .clone()
        .or_else(|| std::env::var("STAGE").ok())
        .unwrap_or_else(|| config.trace.stage.clone());
    NodeDescriptor::collect(run.run_id(), &node, &stage).store(&run.node_meta_path())?;

    let pattern = args
        .comm_match
        .as_deref()
        .unwrap_or(&config.sampler.comm_match);
    let comm_regex = Regex::new(pattern)
        .map_err(|e| LoadtraceError::config(format!("invalid --match regex: {e}")))?;
    let pid_dir = if args.scan {
        None
    } else {
        Some(args.pid_dir.clone().unwrap_or_else(|| run.pids_dir()))
    };
    let settings = SamplerSettings {
        interval: Duration::from_millis(args.interval_ms.unwrap_or(config.sampler.interval_ms)),
        pid_dir,
        comm_regex,
        output_path: run.proc_metrics_path(),
    };

    let stop = super::ctrl_c_stop_flag();
    let sampler = PidSampler::new(settings, stop);
    sampler.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfigService;

    #[tokio::test]
    async fn test_bad_regex_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let service = TestConfigService::with_defaults();
        service.update(|c| c.trace.run_root = dir.path().to_string_lossy().to_string());
        let args = SampleArgs {
            comm_match: Some("(".to_string()),
            run_id: Some("sample-test".to_string()),
            ..SampleArgs::default()
        };
        let err = execute(args, &service).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
