//! `schedule` command: run the central FIFO scheduler loop.

use std::str::FromStr;
use std::time::Duration;

use crate::Result;
use crate::cli::ScheduleArgs;
use crate::config::ConfigService;
use crate::core::scheduler::{CentralScheduler, SchedulerSettings, Weigher, WeigherOrder};

fn resolve_settings(
    args: &ScheduleArgs,
    config: &crate::config::Config,
) -> Result<SchedulerSettings> {
    let scheduler = &config.scheduler;
    Ok(SchedulerSettings {
        pending_key: args
            .pending
            .clone()
            .unwrap_or_else(|| scheduler.pending_key.clone()),
        slots_key: args
            .slots
            .clone()
            .unwrap_or_else(|| scheduler.slots_key.clone()),
        scan_slots: args.scan_slots.unwrap_or(scheduler.scan_slots),
        weigher: Weigher::from_str(args.weigher.as_deref().unwrap_or(&scheduler.weigher))?,
        weigher_order: WeigherOrder::from_str(
            args.weigher_order
                .as_deref()
                .unwrap_or(&scheduler.weigher_order),
        )?,
        idle_sleep: Duration::from_millis(scheduler.idle_sleep_ms),
        retry_sleep: Duration::from_millis(config.broker.retry_interval_ms),
    })
}

/// Execute the schedule command. Runs until interrupted.
pub async fn execute(args: ScheduleArgs, config_service: &dyn ConfigService) -> Result<()> {
    let config = config_service.get_config()?;
    let settings = resolve_settings(&args, &config)?;
    let broker_url = args.broker.as_deref().unwrap_or(&config.broker.url);
    let broker = super::connect_broker(broker_url).await?;

    let stop = super::ctrl_c_stop_flag();
    let mut scheduler = CentralScheduler::new(broker, settings);
    scheduler.run(stop).await
}
