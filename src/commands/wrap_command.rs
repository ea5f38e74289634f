//! `wrap` command: instrument one child invocation.
//!
//! Identity and CPU controls come from the environment, matching the
//! variables the worker injects for its own children: `NODE_ID`,
//! `STAGE`, `TS_ENQUEUE`, `UNIT_NAME`, `CPU_QUOTA`, `CPU_WEIGHT`,
//! `CPUSET` (and `RUN_ID` through the run-path resolution).

use crate::Result;
use crate::cli::WrapArgs;
use crate::config::ConfigService;
use crate::core::trace::{AdapterSpec, InstrumentationAdapter, RunPaths};
use crate::error::LoadtraceError;

fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env_string(name).and_then(|v| v.parse().ok())
}

/// Execute the wrap command. The child's exit status becomes the
/// process exit code.
pub async fn execute(args: WrapArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let (program, child_args) = args
        .command
        .split_first()
        .ok_or_else(|| LoadtraceError::config("wrap requires a target command"))?;

    let run = RunPaths::resolve(&config.trace.run_root, args.run_id.clone());
    let adapter = InstrumentationAdapter::new(AdapterSpec {
        program: program.clone(),
        args: child_args.to_vec(),
        run,
        node: super::node_identity(None),
        stage: env_string("STAGE").unwrap_or_else(|| config.trace.stage.clone()),
        ts_enqueue: env_parse("TS_ENQUEUE"),
        cpuset: env_string("CPUSET"),
        cpu_quota: env_parse("CPU_QUOTA"),
        cpu_weight: env_parse("CPU_WEIGHT"),
        unit_name: env_string("UNIT_NAME"),
    });
    let result = adapter.run().await?;
    if result.status != 0 {
        return Err(LoadtraceError::ChildExit {
            status: result.status,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TestConfigService;

    #[tokio::test]
    async fn test_empty_command_is_config_error() {
        let service = TestConfigService::with_defaults();
        let args = WrapArgs {
            run_id: None,
            command: Vec::new(),
        };
        let err = execute(args, &service).await.unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failing_child_propagates_status() {
        let dir = tempfile::tempdir().unwrap();
        let service = TestConfigService::with_defaults();
        service.update(|c| c.trace.run_root = dir.path().to_string_lossy().to_string());
        let args = WrapArgs {
            run_id: Some("wrap-test".to_string()),
            command: vec!["false".to_string()],
        };
        let err = execute(args, &service).await.unwrap_err();
        assert_eq!(err.exit_code(), 1);
    }
}
