//! Per-PID CPU/memory sampler.
//!
//! Two tracking modes: a whitelist directory of PID sentinel files
//! (created by the instrumentation adapter, pruned here when stale) or
//! a `/proc` scan matching command names against a regex. Samples are
//! raw counters; the normalizer derives the diffed series offline.

pub mod nodemeta;
pub mod procfs;

pub use nodemeta::NodeDescriptor;

use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{debug, info};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::now_ms;

/// Default sampling cadence.
pub const DEFAULT_INTERVAL_MS: u64 = 200;

/// One raw sample row of `proc_metrics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawSample {
    pub ts_ms: i64,
    pub pid: i32,
    pub rss_kb: u64,
    pub utime: u64,
    pub stime: u64,
}

/// Sampler tunables.
#[derive(Debug, Clone)]
pub struct SamplerSettings {
    /// Sampling interval; the loop subtracts its own elapsed time.
    pub interval: Duration,
    /// Whitelist sentinel directory; `None` selects scan mode.
    pub pid_dir: Option<PathBuf>,
    /// Command-name filter for both modes.
    pub comm_regex: Regex,
    /// Append target for raw samples.
    pub output_path: PathBuf,
}

/// Whitelist- or scan-based `/proc` sampler with a fixed cadence.
pub struct PidSampler {
    settings: SamplerSettings,
    stop: Arc<AtomicBool>,
}

impl PidSampler {
    pub fn new(settings: SamplerSettings, stop: Arc<AtomicBool>) -> Self {
        Self { settings, stop }
    }

    /// PIDs to sample this tick.
    pub fn tracked_pids(&self) -> Vec<i32> {
        match &self.settings.pid_dir {
            Some(dir) => self.whitelist_pids(dir),
            None => self.scan_pids(),
        }
    }

    /// Sentinel files name the PIDs; entries whose command no longer
    /// matches (or whose process is gone) are pruned.
    fn whitelist_pids(&self, dir: &PathBuf) -> Vec<i32> {
        let _ = fs::create_dir_all(dir);
        let Ok(entries) = fs::read_dir(dir) else {
            return Vec::new();
        };
        let mut pids = Vec::new();
        for entry in entries.flatten() {
            if !entry.path().is_file() {
                continue;
            }
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            match procfs::read_comm(pid) {
                Some(comm) if self.settings.comm_regex.is_match(&comm) => pids.push(pid),
                _ => {
                    debug!("pruning stale pid sentinel {pid}");
                    let _ = fs::remove_file(entry.path());
                }
            }
        }
        pids
    }

    fn scan_pids(&self) -> Vec<i32> {
        let Ok(entries) = fs::read_dir("/proc") else {
            return Vec::new();
        };
        let mut pids = Vec::new();
        for entry in entries.flatten() {
            let Some(pid) = entry.file_name().to_str().and_then(|n| n.parse::<i32>().ok()) else {
                continue;
            };
            if let Some(comm) = procfs::read_comm(pid) {
                if self.settings.comm_regex.is_match(&comm) {
                    pids.push(pid);
                }
            }
        }
        pids
    }

    /// Read raw counters for every tracked PID at `ts_ms`.
    pub fn collect(&self, ts_ms: i64) -> Vec<RawSample> {
        let mut samples = Vec::new();
        for pid in self.tracked_pids() {
            let Some((utime, stime)) = procfs::read_cpu_ticks(pid) else {
                continue;
            };
            samples.push(RawSample {
                ts_ms,
                pid,
                rss_kb: procfs::read_rss_kb(pid),
                utime,
                stime,
            });
        }
        samples
    }

    /// Sampling loop with sleep compensation: the per-iteration elapsed
    /// time is subtracted from the interval so the cadence stays fixed.
    pub async fn run(&self) -> Result<()> {
        if let Some(parent) = self.settings.output_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut out = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.settings.output_path)?;
        info!(
            "proc sampler started (mode={}, interval={}ms) -> {}",
            if self.settings.pid_dir.is_some() {
                "whitelist"
            } else {
                "scan"
            },
            self.settings.interval.as_millis(),
            self.settings.output_path.display()
        );
        while !self.stop.load(Ordering::Relaxed) {
            let tick_start = std::time::Instant::now();
            let ts_ms = now_ms();
            for sample in self.collect(ts_ms) {
                let line = serde_json::to_string(&sample)?;
                writeln!(out, "{line}")?;
            }
            out.flush()?;
            let elapsed = tick_start.elapsed();
            let sleep_for = self.settings.interval.saturating_sub(elapsed);
            tokio::time::sleep(sleep_for).await;
        }
        info!("proc sampler stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sampler(pid_dir: Option<PathBuf>, out: PathBuf, pattern: &str) -> PidSampler {
        PidSampler::new(
            SamplerSettings {
                interval: Duration::from_millis(DEFAULT_INTERVAL_MS),
                pid_dir,
                comm_regex: Regex::new(pattern).unwrap(),
                output_path: out,
            },
            Arc::new(AtomicBool::new(false)),
        )
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_whitelist_tracks_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let pid = std::process::id() as i32;
        fs::write(dir.path().join(pid.to_string()), "").unwrap();
        let s = sampler(
            Some(dir.path().to_path_buf()),
            dir.path().join("proc_metrics.jsonl"),
            ".*",
        );
        let pids = s.tracked_pids();
        assert!(pids.contains(&pid));
        let samples = s.collect(1234);
        let own = samples.iter().find(|r| r.pid == pid).unwrap();
        assert_eq!(own.ts_ms, 1234);
        assert!(own.rss_kb > 0);
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn test_whitelist_prunes_dead_and_mismatched_pids() {
        let dir = tempfile::tempdir().unwrap();
        // A PID that cannot exist, and a live one that fails the regex.
        fs::write(dir.path().join("999999999"), "").unwrap();
        let own = std::process::id().to_string();
        fs::write(dir.path().join(&own), "").unwrap();
        let s = sampler(
            Some(dir.path().to_path_buf()),
            dir.path().join("proc_metrics.jsonl"),
            "no-such-command-name",
        );
        assert!(s.tracked_pids().is_empty());
        assert!(!dir.path().join("999999999").exists());
        assert!(!dir.path().join(&own).exists());
    }

    #[test]
    fn test_sample_serialization_field_order() {
        let sample = RawSample {
            ts_ms: 1,
            pid: 2,
            rss_kb: 3,
            utime: 4,
            stime: 5,
        };
        let line = serde_json::to_string(&sample).unwrap();
        assert_eq!(
            line,
            r#"{"ts_ms":1,"pid":2,"rss_kb":3,"utime":4,"stime":5}"#
        );
    }
}
