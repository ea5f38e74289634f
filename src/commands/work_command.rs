//! `work` command: run the per-node worker runtime.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::Result;
use crate::cli::WorkArgs;
use crate::config::ConfigService;
use crate::core::task::TaskEnvelope;
use crate::core::trace::{AdapterSpec, InstrumentationAdapter, RunPaths};
use crate::core::worker::{
    CpuBinding, SystemdQuotaApplier, TaskLauncher, WorkerRuntime, WorkerSettings,
};

/// Production launcher: runs each task's child through the
/// instrumentation adapter, in-process.
struct AdapterLauncher {
    program: String,
    run: RunPaths,
    node: String,
    stage: String,
}

#[async_trait]
impl TaskLauncher for AdapterLauncher {
    async fn launch(&self, task: &TaskEnvelope) -> Result<i32> {
        let adapter = InstrumentationAdapter::new(AdapterSpec {
            program: self.program.clone(),
            args: task.encode_args(),
            run: self.run.clone(),
            node: self.node.clone(),
            stage: self.stage.clone(),
            ts_enqueue: task.ts_enqueue,
            cpuset: task.cpuset.clone(),
            cpu_quota: task.cpu_quota,
            cpu_weight: task.cpu_weight,
            unit_name: task.unit_name.clone(),
        });
        Ok(adapter.run().await?.status)
    }
}

fn resolve_settings(args: &WorkArgs, config: &crate::config::Config) -> Result<WorkerSettings> {
    let worker = &config.worker;
    Ok(WorkerSettings {
        node: super::node_identity(args.node.clone()),
        parallel: args.parallel.unwrap_or(worker.parallel),
        capacity_units: args.capacity_units,
        allocation_ratio: args.allocation_ratio.unwrap_or(worker.allocation_ratio),
        cpu_binding: CpuBinding::from_str(
            args.cpu_binding.as_deref().unwrap_or(&worker.cpu_binding),
        )?,
        cpuweight_per_vcpu: args.cpuweight_per_vcpu.unwrap_or(worker.cpuweight_per_vcpu),
        reset_capacity: args.reset_capacity,
        clear_queue: args.clear_queue,
        slots_key: config.scheduler.slots_key.clone(),
        poll_timeout: Duration::from_millis(worker.poll_timeout_ms),
        outputs_dir: args
            .outputs
            .clone()
            .unwrap_or_else(|| worker.outputs_dir.clone().into()),
    })
}

/// Execute the work command. Runs until interrupted; in-flight
/// children drain before exit.
pub async fn execute(args: WorkArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let settings = resolve_settings(&args, &config)?;
    let broker_url = args.broker.as_deref().unwrap_or(&config.broker.url);
    let broker = super::connect_broker(broker_url).await?;

    let run = RunPaths::resolve(&config.trace.run_root, args.run_id.clone());
    run.ensure_dirs()?;
    let launcher = Arc::new(AdapterLauncher {
        program: config.worker.program.clone(),
        run,
        node: settings.node.clone(),
        stage: config.trace.stage.clone(),
    });

    let stop = super::ctrl_c_stop_flag();
    let worker = WorkerRuntime::new(
        broker,
        settings,
        launcher,
        Arc::new(SystemdQuotaApplier),
        stop,
    );
    worker.register().await?;
    worker.run().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_settings_resolution() {
        let args = WorkArgs {
            node: Some("cloud3".to_string()),
            parallel: Some(2),
            cpu_binding: Some("shared".to_string()),
            reset_capacity: true,
            ..WorkArgs::default()
        };
        let settings = resolve_settings(&args, &Config::default()).unwrap();
        assert_eq!(settings.node, "cloud3");
        assert_eq!(settings.parallel, 2);
        assert_eq!(settings.cpu_binding, CpuBinding::Shared);
        assert!(settings.reset_capacity);
        assert_eq!(settings.poll_timeout, Duration::from_millis(2000));
    }

    #[test]
    fn test_unknown_binding_is_config_error() {
        let args = WorkArgs {
            cpu_binding: Some("pinned".to_string()),
            ..WorkArgs::default()
        };
        let err = resolve_settings(&args, &Config::default()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
