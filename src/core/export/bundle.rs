//! Node bundle discovery and loading for the exporter.

use std::fs;
use std::path::Path;

use log::warn;
use serde::Deserialize;

use crate::Result;
use crate::core::sampler::NodeDescriptor;
use crate::core::trace::CtsSample;
use crate::error::LoadtraceError;

/// One invocation row as the exporter needs it; bundles produced by
/// foreign tools may carry byte counts the slim CTS schema omits.
#[derive(Debug, Clone, Deserialize)]
pub struct InvocationRow {
    #[serde(default)]
    pub trace_id: Option<String>,
    pub pid: i64,
    pub ts_enqueue: i64,
    pub ts_start: i64,
    pub ts_end: i64,
    #[serde(default)]
    pub bytes_in: Option<u64>,
    #[serde(default)]
    pub bytes_out: Option<u64>,
}

/// One node's normalized trace artifacts.
#[derive(Debug, Clone)]
pub struct NodeBundle {
    pub name: String,
    pub meta: NodeDescriptor,
    pub invocations: Vec<InvocationRow>,
    pub samples: Vec<CtsSample>,
}

fn read_jsonl<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Vec<T>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        match serde_json::from_str(line) {
            Ok(row) => rows.push(row),
            Err(_) => dropped += 1,
        }
    }
    if dropped > 0 {
        warn!("{}: dropped {dropped} malformed rows", path.display());
    }
    Ok(rows)
}

fn load_bundle(dir: &Path, name: &str) -> Result<NodeBundle> {
    let meta = NodeDescriptor::load(&dir.join("node_meta.json"))?;
    let cts = dir.join("CTS");
    Ok(NodeBundle {
        name: name.to_string(),
        meta,
        invocations: read_jsonl(&cts.join("invocations.jsonl"))?,
        samples: read_jsonl(&cts.join("proc_metrics.jsonl"))?,
    })
}

/// Find node bundles under `input`: either a directory containing
/// `node_meta.json` directly, or a parent of per-node subdirectories.
/// Bundles come back sorted by directory name for deterministic output.
pub fn load_bundles(input: &Path) -> Result<Vec<NodeBundle>> {
    if !input.exists() {
        return Err(LoadtraceError::PathNotFound(input.to_path_buf()));
    }
    if input.join("node_meta.json").exists() {
        return Ok(vec![load_bundle(input, "single_node")?]);
    }
    let mut dirs: Vec<_> = fs::read_dir(input)?
        .flatten()
        .filter(|e| e.path().is_dir() && e.path().join("node_meta.json").exists())
        .map(|e| e.path())
        .collect();
    dirs.sort();
    if dirs.is_empty() {
        return Err(LoadtraceError::export(format!(
            "no node bundles found under {}",
            input.display()
        )));
    }
    let mut bundles = Vec::new();
    for dir in dirs {
        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "node".to_string());
        bundles.push(load_bundle(&dir, &name)?);
    }
    Ok(bundles)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(dir: &Path, node: &str, pid: i64) {
        let cts = dir.join("CTS");
        fs::create_dir_all(&cts).unwrap();
        let meta = NodeDescriptor {
            run_id: "r".to_string(),
            node: node.to_string(),
            stage: "cloud".to_string(),
            host: node.to_string(),
            cpu_cores: 4,
            mem_mb: 4096,
            cpu_model: String::new(),
            cpu_freq_mhz: 2400,
        };
        meta.store(&dir.join("node_meta.json")).unwrap();
        let good = format!(
            r#"{{"trace_id":"t","pid":{pid},"ts_enqueue":1,"ts_start":2,"ts_end":3}}"#
        );
        fs::write(
            cts.join("invocations.jsonl"),
            format!("{good}\n{}\n", r#"{"trace_id":"broken""#),
        )
        .unwrap();
        fs::write(
            cts.join("proc_metrics.jsonl"),
            format!(r#"{{"ts_ms":2,"pid":{pid},"dt_ms":0,"cpu_ms":0,"rss_kb":10}}"#) + "\n",
        )
        .unwrap();
    }

    #[test]
    fn test_single_node_layout() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(dir.path(), "n1", 11);
        let bundles = load_bundles(dir.path()).unwrap();
        assert_eq!(bundles.len(), 1);
        assert_eq!(bundles[0].name, "single_node");
        assert_eq!(bundles[0].invocations.len(), 1);
        assert_eq!(bundles[0].samples.len(), 1);
    }

    #[test]
    fn test_multi_node_layout_sorted() {
        let dir = tempfile::tempdir().unwrap();
        write_bundle(&dir.path().join("nodeB"), "n2", 22);
        write_bundle(&dir.path().join("nodeA"), "n1", 11);
        let bundles = load_bundles(dir.path()).unwrap();
        assert_eq!(bundles.len(), 2);
        assert_eq!(bundles[0].name, "nodeA");
        assert_eq!(bundles[1].name, "nodeB");
    }

    #[test]
    fn test_empty_input_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_bundles(dir.path()).is_err());
        assert!(load_bundles(&dir.path().join("missing")).is_err());
    }
}
