//! `normalize` command: emit the CTS bundle for one run directory.

use crate::Result;
use crate::cli::{NormalizeArgs, ui};
use crate::config::ConfigService;
use crate::core::sampler::procfs;
use crate::core::trace::{Normalizer, RunPaths};
use crate::error::LoadtraceError;

fn resolve_run(args: &NormalizeArgs, run_root: &str) -> Result<RunPaths> {
    if let Some(run_dir) = &args.run_dir {
        let run_id = run_dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| LoadtraceError::config("invalid --run-dir"))?;
        let root = run_dir
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| ".".into());
        return Ok(RunPaths::resolve(root, Some(run_id)));
    }
    if args.run_id.is_some() || std::env::var("RUN_ID").is_ok() {
        return Ok(RunPaths::resolve(run_root, args.run_id.clone()));
    }
    RunPaths::latest(run_root)
        .ok_or_else(|| LoadtraceError::trace(format!("no runs found under {run_root}")))
}

/// Execute the normalize command.
pub async fn execute(args: NormalizeArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let run = resolve_run(&args, &config.trace.run_root)?;
    if !run.run_dir().is_dir() {
        return Err(LoadtraceError::PathNotFound(run.run_dir()));
    }
    let normalizer = Normalizer::new(run.clone(), procfs::clock_ticks_per_sec());
    let summary = normalizer.normalize()?;
    ui::print_success(&format!(
        "normalized run {}: {} spans, {} samples -> {}",
        run.run_id(),
        summary.merged_spans,
        summary.samples,
        run.cts_dir().display()
    ));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfigService;

    #[tokio::test]
    async fn test_missing_run_dir_is_path_error() {
        let service = TestConfigService::with_defaults();
        let args = NormalizeArgs {
            run_dir: Some("/definitely/missing/run".into()),
            run_id: None,
        };
        let err = execute(args, &service).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_resolve_explicit_run_dir() {
        let args = NormalizeArgs {
            run_dir: Some("/data/logs/r9".into()),
            run_id: None,
        };
        let run = resolve_run(&args, "logs").unwrap();
        assert_eq!(run.run_id(), "r9");
        assert_eq!(run.run_dir(), std::path::PathBuf::from("/data/logs/r9"));
    }
}
