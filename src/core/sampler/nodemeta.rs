//! Host descriptor collection, written once per run as `node_meta.json`.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// One host's descriptor as recorded at sampling start.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDescriptor {
    pub run_id: String,
    pub node: String,
    pub stage: String,
    pub host: String,
    pub cpu_cores: u32,
    pub mem_mb: u64,
    #[serde(default)]
    pub cpu_model: String,
    #[serde(default)]
    pub cpu_freq_mhz: u32,
}

impl NodeDescriptor {
    /// Collect the local host's descriptor.
    pub fn collect(run_id: &str, node: &str, stage: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            node: node.to_string(),
            stage: stage.to_string(),
            host: hostname(),
            cpu_cores: num_cpus::get() as u32,
            mem_mb: mem_total_mb(),
            cpu_model: cpu_model(),
            cpu_freq_mhz: detect_freq_mhz(),
        }
    }

    /// Read a descriptor back from `node_meta.json`.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write the descriptor as `node_meta.json`.
    pub fn store(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Local host name, with environment and static fallbacks.
pub fn hostname() -> String {
    fs::read_to_string("/proc/sys/kernel/hostname")
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .or_else(|| std::env::var("HOSTNAME").ok())
        .unwrap_or_else(|| "localhost".to_string())
}

fn mem_total_mb() -> u64 {
    let Ok(meminfo) = fs::read_to_string("/proc/meminfo") else {
        return 0;
    };
    for line in meminfo.lines() {
        if let Some(rest) = line.strip_prefix("MemTotal:") {
            let kb: u64 = rest
                .trim()
                .trim_end_matches("kB")
                .trim()
                .parse()
                .unwrap_or(0);
            return kb / 1024;
        }
    }
    0
}

fn cpu_model() -> String {
    let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") else {
        return String::new();
    };
    for line in cpuinfo.lines() {
        if line.starts_with("model name") {
            if let Some((_, value)) = line.split_once(':') {
                return value.trim().to_string();
            }
        }
    }
    String::new()
}

/// Nominal CPU frequency in MHz.
///
/// Resolution order: `CPU_FREQ_MHZ` override, cpufreq max frequency,
/// then the current frequency from `/proc/cpuinfo`. 0 when unknown.
fn detect_freq_mhz() -> u32 {
    if let Ok(value) = std::env::var("CPU_FREQ_MHZ") {
        if let Ok(mhz) = value.trim().parse::<f64>() {
            if mhz > 0.0 {
                return mhz as u32;
            }
        }
    }
    if let Ok(khz) = fs::read_to_string("/sys/devices/system/cpu/cpu0/cpufreq/cpuinfo_max_freq") {
        if let Ok(khz) = khz.trim().parse::<u64>() {
            if khz > 0 {
                return (khz / 1000) as u32;
            }
        }
    }
    if let Ok(cpuinfo) = fs::read_to_string("/proc/cpuinfo") {
        for line in cpuinfo.lines() {
            if line.starts_with("cpu MHz") {
                if let Some((_, value)) = line.split_once(':') {
                    if let Ok(mhz) = value.trim().parse::<f64>() {
                        return mhz as u32;
                    }
                }
            }
        }
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_has_cores_and_identity() {
        let meta = NodeDescriptor::collect("r1", "n1", "cloud");
        assert_eq!(meta.run_id, "r1");
        assert_eq!(meta.node, "n1");
        assert_eq!(meta.stage, "cloud");
        assert!(meta.cpu_cores >= 1);
    }

    #[test]
    fn test_store_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node_meta.json");
        let meta = NodeDescriptor::collect("r1", "n1", "edge");
        meta.store(&path).unwrap();
        let loaded = NodeDescriptor::load(&path).unwrap();
        assert_eq!(loaded.node, "n1");
        assert_eq!(loaded.cpu_cores, meta.cpu_cores);
    }
}
