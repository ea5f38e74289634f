//! Run-directory layout and RUN_ID resolution.
//!
//! All per-node artifacts of one trace run live under
//! `<run_root>/<run_id>/`: adapter span files (`events.<source>.jsonl`),
//! the raw sampler output (`proc_metrics.jsonl`), PID sentinels
//! (`pids/`), the host descriptor (`node_meta.json`), and the
//! normalized `CTS/` bundle.

use std::fs;
use std::path::{Path, PathBuf};

use crate::Result;
use crate::core::now_ms;

const RUN_ID_FILE: &str = "run_id.env";

/// Resolved paths for one run on one node.
#[derive(Debug, Clone)]
pub struct RunPaths {
    run_root: PathBuf,
    run_id: String,
}

impl RunPaths {
    /// Resolve the run identity: explicit value, `RUN_ID` environment,
    /// a `run_id.env` file in the working directory, then a fresh
    /// timestamp-derived id.
    pub fn resolve(run_root: impl Into<PathBuf>, explicit: Option<String>) -> Self {
        let run_id = explicit
            .filter(|s| !s.is_empty())
            .or_else(|| std::env::var("RUN_ID").ok().filter(|s| !s.is_empty()))
            .or_else(|| read_run_id_file(Path::new(RUN_ID_FILE)))
            .unwrap_or_else(|| format!("run{}", now_ms()));
        Self {
            run_root: run_root.into(),
            run_id,
        }
    }

    /// Open the most recently named run under `run_root`.
    pub fn latest(run_root: impl Into<PathBuf>) -> Option<Self> {
        let run_root = run_root.into();
        let mut names: Vec<String> = fs::read_dir(&run_root)
            .ok()?
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().to_str().map(|s| s.to_string()))
            .collect();
        names.sort();
        let run_id = names.pop()?;
        Some(Self { run_root, run_id })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn run_dir(&self) -> PathBuf {
        self.run_root.join(&self.run_id)
    }

    pub fn pids_dir(&self) -> PathBuf {
        self.run_dir().join("pids")
    }

    /// Span file for one producer, e.g. `events.ffmpeg.jsonl`.
    pub fn events_path(&self, source: &str) -> PathBuf {
        self.run_dir().join(format!("events.{source}.jsonl"))
    }

    /// Merged span file written by the normalizer.
    pub fn merged_events_path(&self) -> PathBuf {
        self.run_dir().join("events.jsonl")
    }

    pub fn proc_metrics_path(&self) -> PathBuf {
        self.run_dir().join("proc_metrics.jsonl")
    }

    pub fn node_meta_path(&self) -> PathBuf {
        self.run_dir().join("node_meta.json")
    }

    pub fn cts_dir(&self) -> PathBuf {
        self.run_dir().join("CTS")
    }

    /// Create the run directory tree.
    pub fn ensure_dirs(&self) -> Result<()> {
        fs::create_dir_all(self.pids_dir())?;
        Ok(())
    }
}

fn read_run_id_file(path: &Path) -> Option<String> {
    let content = fs::read_to_string(path).ok()?;
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            if key.trim() == "RUN_ID" && !value.trim().is_empty() {
                return Some(value.trim().to_string());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_id_wins() {
        let run = RunPaths::resolve("logs", Some("r42".to_string()));
        assert_eq!(run.run_id(), "r42");
        assert_eq!(run.run_dir(), PathBuf::from("logs/r42"));
        assert_eq!(run.events_path("ffmpeg"), PathBuf::from("logs/r42/events.ffmpeg.jsonl"));
        assert_eq!(run.cts_dir(), PathBuf::from("logs/r42/CTS"));
    }

    #[test]
    fn test_generated_id_is_nonempty() {
        let run = RunPaths::resolve("logs", None);
        assert!(!run.run_id().is_empty());
    }

    #[test]
    fn test_latest_picks_lexicographic_max() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("20250101T000000Z")).unwrap();
        fs::create_dir(dir.path().join("20250102T000000Z")).unwrap();
        let run = RunPaths::latest(dir.path()).unwrap();
        assert_eq!(run.run_id(), "20250102T000000Z");
    }

    #[test]
    fn test_run_id_file_parse() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("run_id.env");
        fs::write(&file, "# comment\nRUN_ID=fromfile\n").unwrap();
        assert_eq!(read_run_id_file(&file), Some("fromfile".to_string()));
    }
}
