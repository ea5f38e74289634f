//! Configuration validation.
//!
//! Invalid configuration is fatal at startup; every check here maps to
//! a `Config` error with exit code 2.

use std::str::FromStr;

use crate::Result;
use crate::config::Config;
use crate::core::dispatch::{PendingMode, Policy};
use crate::core::scheduler::{Weigher, WeigherOrder};
use crate::core::worker::CpuBinding;
use crate::error::LoadtraceError;

/// Validate every section of the configuration.
pub fn validate(config: &Config) -> Result<()> {
    Weigher::from_str(&config.scheduler.weigher)?;
    WeigherOrder::from_str(&config.scheduler.weigher_order)?;
    Policy::from_str(&config.dispatch.policy)?;
    PendingMode::from_str(&config.dispatch.pending_mode)?;
    CpuBinding::from_str(&config.worker.cpu_binding)?;

    if config.broker.url.is_empty() {
        return Err(LoadtraceError::config("broker.url must not be empty"));
    }
    if config.worker.allocation_ratio <= 0.0 {
        return Err(LoadtraceError::config(
            "worker.allocation_ratio must be positive",
        ));
    }
    if config.worker.cpuweight_per_vcpu == 0 || config.worker.cpuweight_per_vcpu > 10000 {
        return Err(LoadtraceError::config(
            "worker.cpuweight_per_vcpu must be in 1..=10000",
        ));
    }
    if config.sampler.interval_ms == 0 {
        return Err(LoadtraceError::config("sampler.interval_ms must be positive"));
    }
    regex::Regex::new(&config.sampler.comm_match)
        .map_err(|e| LoadtraceError::config(format!("sampler.comm_match: {e}")))?;
    if config.dispatch.pulse_size == 0 {
        return Err(LoadtraceError::config("dispatch.pulse_size must be positive"));
    }
    if config.dispatch.batch_size == 0 {
        return Err(LoadtraceError::config("dispatch.batch_size must be positive"));
    }
    for (name, profile) in &config.profiles {
        if profile.cpu_units == 0 {
            return Err(LoadtraceError::config(format!(
                "profiles.{name}.cpu_units must be at least 1"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_bad_weigher_rejected() {
        let mut config = Config::default();
        config.scheduler.weigher = "lottery".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_bad_regex_rejected() {
        let mut config = Config::default();
        config.sampler.comm_match = "(".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_ratio_rejected() {
        let mut config = Config::default();
        config.worker.allocation_ratio = 0.0;
        assert!(validate(&config).is_err());
    }

    #[test]
    fn test_zero_profile_units_rejected() {
        let mut config = Config::default();
        config
            .profiles
            .insert("p".to_string(), crate::core::dispatch::ProfileSpec::default());
        assert!(validate(&config).is_ok());
        config.profiles.get_mut("p").unwrap().cpu_units = 0;
        assert!(validate(&config).is_err());
    }
}
