//! Datacenter topology aggregation for the simulator bundle.
//!
//! Nodes with identical `(cores, frequency, memory)` specs collapse
//! into one host entry with a count; everything sits under a single
//! cluster. Field order is fixed by the consumer: name, count,
//! cpu{coreCount, coreSpeed}, memory{memorySize}.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::sampler::NodeDescriptor;

/// Topology file name inside the simulator bundle.
pub const TOPOLOGY_FILE: &str = "small_datacenter.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CpuSpec {
    #[serde(rename = "coreCount")]
    pub core_count: u32,
    /// MHz per core.
    #[serde(rename = "coreSpeed")]
    pub core_speed: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemorySpec {
    /// Bytes.
    #[serde(rename = "memorySize")]
    pub memory_size: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostSpec {
    pub name: String,
    pub count: u32,
    pub cpu: CpuSpec,
    pub memory: MemorySpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cluster {
    pub name: String,
    pub hosts: Vec<HostSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Topology {
    pub clusters: Vec<Cluster>,
}

/// Aggregate node descriptors into the single-cluster topology.
pub fn build_topology(metas: &[&NodeDescriptor]) -> Topology {
    let mut groups: BTreeMap<(u32, u32, u64), u32> = BTreeMap::new();
    for meta in metas {
        let mem_bytes = meta.mem_mb * 1024 * 1024;
        *groups
            .entry((meta.cpu_cores, meta.cpu_freq_mhz, mem_bytes))
            .or_insert(0) += 1;
    }
    let hosts = groups
        .into_iter()
        .enumerate()
        .map(|(i, ((cores, freq, mem_bytes), count))| HostSpec {
            name: format!("H{:02}", i + 1),
            count,
            cpu: CpuSpec {
                core_count: cores,
                core_speed: freq,
            },
            memory: MemorySpec {
                memory_size: mem_bytes,
            },
        })
        .collect();
    Topology {
        clusters: vec![Cluster {
            name: "C01".to_string(),
            hosts,
        }],
    }
}

/// Write the topology JSON into the bundle directory.
pub fn write_topology(topology: &Topology, out_dir: &Path) -> Result<()> {
    fs::create_dir_all(out_dir)?;
    fs::write(
        out_dir.join(TOPOLOGY_FILE),
        serde_json::to_string_pretty(topology)?,
    )?;
    Ok(())
}
