//! `dispatch` command: plan and submit task envelopes.

use std::str::FromStr;
use std::time::Duration;

use crate::Result;
use crate::cli::{DispatchArgs, ui};
use crate::config::ConfigService;
use crate::core::dispatch::{
    DispatchSettings, Dispatcher, PendingMode, Policy, ProfileSpec, parse_mix_spec,
};

/// Resolve settings from configuration plus CLI overrides.
fn resolve_settings(args: &DispatchArgs, config: &crate::config::Config) -> Result<DispatchSettings> {
    let dispatch = &config.dispatch;
    let policy = Policy::from_str(args.policy.as_deref().unwrap_or(&dispatch.policy))?;
    let pending_mode =
        PendingMode::from_str(args.pending_mode.as_deref().unwrap_or(&dispatch.pending_mode))?;
    let mix = args.mix.as_deref().map(parse_mix_spec).transpose()?;

    let mut default_profile = ProfileSpec::default();
    if let Some(scale) = &args.scale {
        default_profile.encode.scale = scale.clone();
    }
    if let Some(preset) = &args.preset {
        default_profile.encode.preset = preset.clone();
    }
    if let Some(crf) = args.crf {
        default_profile.encode.crf = crf;
    }
    if let Some(vcodec) = &args.vcodec {
        default_profile.encode.vcodec = vcodec.clone();
    }
    if let Some(units) = args.cpu_units {
        default_profile.cpu_units = units.max(1);
    }

    Ok(DispatchSettings {
        inputs_dir: args.inputs.clone(),
        outputs_dir: args.outputs.clone(),
        nodes: args.node_list(),
        policy,
        pending_key: args
            .pending
            .clone()
            .unwrap_or_else(|| config.scheduler.pending_key.clone()),
        pending_mode,
        pulse_size: args.pulse_size.unwrap_or(dispatch.pulse_size),
        pulse_interval: Duration::from_millis(
            args.pulse_interval.unwrap_or(dispatch.pulse_interval_ms),
        ),
        pulse_spacing: Duration::from_millis(dispatch.pulse_spacing_ms),
        batch_size: args.batch_size.unwrap_or(dispatch.batch_size),
        backlog_limit: args.backlog_limit.unwrap_or(dispatch.backlog_limit),
        dribble_interval: Duration::from_millis(dispatch.dribble_interval_ms),
        pending_max: dispatch.pending_max,
        probe_program: dispatch.probe_program.clone(),
        default_profile,
        profiles: config.profiles.clone(),
        mix,
        total: args.total,
        seed: args.seed.unwrap_or(dispatch.seed),
    })
}

/// Execute the dispatch command.
pub async fn execute(args: DispatchArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let settings = resolve_settings(&args, &config)?;
    if !settings.inputs_dir.is_dir() {
        return Err(crate::error::LoadtraceError::PathNotFound(
            settings.inputs_dir.clone(),
        ));
    }
    let broker_url = args.broker.as_deref().unwrap_or(&config.broker.url);
    let broker = super::connect_broker(broker_url).await?;

    let mut dispatcher = Dispatcher::new(broker, settings);
    let summary = dispatcher.run().await?;
    ui::print_success(&format!(
        "enqueued {} tasks ({})",
        summary.submitted,
        summary
            .per_node
            .iter()
            .map(|(n, c)| format!("{n}={c}"))
            .collect::<Vec<_>>()
            .join(", ")
    ));
    Ok(())
}
