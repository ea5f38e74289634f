// src/config/mod.rs
//! Configuration management module for loadtrace.
//!
//! This module provides the configuration service system with
//! dependency injection support and the full set of typed sections.
//!
//! # Key Components
//!
//! - [`Config`] - Main configuration structure containing all settings
//! - [`ConfigService`] - Service interface for configuration management
//! - [`ProductionConfigService`] - Production implementation with file I/O
//! - [`TestConfigService`] - Test implementation with controlled behavior
//!
//! # Architecture
//!
//! Configuration loads from three sources in priority order:
//! environment variables (`LOADTRACE_*`), the user configuration file,
//! and the optional repository default file. All access goes through
//! the [`ConfigService`] trait so commands can be tested with an
//! injected configuration.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod service;
pub mod test_service;
pub mod validator;

pub use service::{ConfigService, ProductionConfigService};
pub use test_service::TestConfigService;

use crate::core::dispatch::ProfileSpec;

/// Full application configuration.
///
/// # Examples
///
/// ```rust
/// use loadtrace::config::Config;
///
/// let config = Config::default();
/// assert_eq!(config.scheduler.weigher, "first-fit");
/// assert_eq!(config.sampler.interval_ms, 200);
/// ```
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
pub struct Config {
    /// Shared broker connection settings.
    #[serde(default)]
    pub broker: BrokerConfig,
    /// Central scheduler loop settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    /// Submission policy settings.
    #[serde(default)]
    pub dispatch: DispatchConfig,
    /// Worker runtime settings.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Per-PID sampler settings.
    #[serde(default)]
    pub sampler: SamplerConfig,
    /// Trace run layout and identity.
    #[serde(default)]
    pub trace: TraceConfig,
    /// Named profile catalog for the dispatcher mix.
    #[serde(default)]
    pub profiles: BTreeMap<String, ProfileSpec>,
}

/// Broker connection settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BrokerConfig {
    /// Broker URL, e.g. `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// Sleep between retries after a transient broker error.
    pub retry_interval_ms: u64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379/0".to_string(),
            retry_interval_ms: 100,
        }
    }
}

/// Central scheduler settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerConfig {
    pub pending_key: String,
    pub slots_key: String,
    /// Max rightmost slot tokens scanned per cycle; 0 scans all.
    pub scan_slots: usize,
    /// Host-selection weigher: `first-fit`, `instances`, or `vcpu`.
    pub weigher: String,
    /// Metric preference: `min` or `max`.
    pub weigher_order: String,
    pub idle_sleep_ms: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pending_key: "q:pending".to_string(),
            slots_key: "slots:available".to_string(),
            scan_slots: 0,
            weigher: "first-fit".to_string(),
            weigher_order: "min".to_string(),
            idle_sleep_ms: 50,
        }
    }
}

/// Dispatcher settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct DispatchConfig {
    /// `round-robin`, `duration-greedy`, `backlog`, or `pending`.
    pub policy: String,
    /// `pulse` or `fifo` for the pending policy.
    pub pending_mode: String,
    pub pulse_size: usize,
    pub pulse_interval_ms: u64,
    pub pulse_spacing_ms: u64,
    pub batch_size: usize,
    pub backlog_limit: usize,
    pub dribble_interval_ms: u64,
    pub pending_max: usize,
    /// Duration probe program for the greedy policies.
    pub probe_program: String,
    /// Seed for the deterministic profile mix.
    pub seed: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            policy: "round-robin".to_string(),
            pending_mode: "pulse".to_string(),
            pulse_size: 1,
            pulse_interval_ms: 1000,
            pulse_spacing_ms: 0,
            batch_size: 1,
            backlog_limit: 4,
            dribble_interval_ms: 500,
            pending_max: 64,
            probe_program: "ffprobe".to_string(),
            seed: 0,
        }
    }
}

/// Worker runtime settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct WorkerConfig {
    /// Concurrency slots; 0 gates by capacity alone.
    pub parallel: usize,
    /// Overprovision ratio for the capacity default.
    pub allocation_ratio: f64,
    /// `exclusive` or `shared`.
    pub cpu_binding: String,
    pub cpuweight_per_vcpu: u32,
    pub poll_timeout_ms: u64,
    /// Encode program launched for each task.
    pub program: String,
    pub outputs_dir: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            parallel: 0,
            allocation_ratio: 1.0,
            cpu_binding: "exclusive".to_string(),
            cpuweight_per_vcpu: 100,
            poll_timeout_ms: 2000,
            program: "ffmpeg".to_string(),
            outputs_dir: "outputs".to_string(),
        }
    }
}

/// Per-PID sampler settings.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct SamplerConfig {
    pub interval_ms: u64,
    /// Command-name regex for whitelist validation and scan mode.
    pub comm_match: String,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 200,
            comm_match: "ffmpeg|ffprobe|x264|x265".to_string(),
        }
    }
}

/// Trace layout and node identity.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct TraceConfig {
    /// Root directory holding one subdirectory per run.
    pub run_root: String,
    /// Environment stage label, e.g. `cloud` or `edge`.
    pub stage: String,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            run_root: "logs".to_string(),
            stage: "cloud".to_string(),
        }
    }
}
