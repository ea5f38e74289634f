//! CTS normalizer: one node's raw run directory in, the four-file
//! normalized bundle out.
//!
//! Emission is idempotent: inputs (adapter span files, raw sampler
//! output, node descriptor) are never modified, outputs are rewritten
//! from scratch, and every transformation is deterministic, so running
//! twice produces byte-identical artifacts.

use std::collections::HashMap;
use std::fs;
use std::io::Write;

use log::info;
use serde::{Deserialize, Serialize};

use super::audit;
use super::paths::RunPaths;
use super::span::{SpanRecord, read_spans};
use crate::Result;
use crate::core::sampler::NodeDescriptor;
use crate::error::LoadtraceError;

/// The only filenames allowed in an emitted CTS bundle.
pub const ALLOWED_FILES: [&str; 4] = [
    "invocations.jsonl",
    "proc_metrics.jsonl",
    "nodes.json",
    "audit_report.md",
];

/// Diffed per-PID sample row of `CTS/proc_metrics.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtsSample {
    pub ts_ms: i64,
    pub pid: i32,
    pub dt_ms: i64,
    pub cpu_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rss_kb: Option<u64>,
}

/// Slim invocation row of `CTS/invocations.jsonl`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlimInvocation {
    pub trace_id: Option<String>,
    pub pid: Option<i64>,
    pub ts_enqueue: Option<i64>,
    pub ts_start: Option<i64>,
    pub ts_end: Option<i64>,
}

/// Normalized host descriptor row of `CTS/nodes.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CtsNode {
    pub node_id: String,
    pub stage: String,
    pub cpu_cores: u32,
    pub mem_mb: u64,
    pub cpu_model: Option<String>,
    pub cpu_freq_mhz: u32,
}

/// Lenient raw sample row; foreign producers may omit fields.
#[derive(Debug, Deserialize)]
struct RawSampleRow {
    ts_ms: Option<i64>,
    pid: Option<i64>,
    rss_kb: Option<u64>,
    utime: Option<i64>,
    stime: Option<i64>,
}

/// Counts reported after a normalize pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct NormalizeSummary {
    pub merged_spans: usize,
    pub samples: usize,
    pub invocations: usize,
}

/// Offline normalizer for one node's run directory.
pub struct Normalizer {
    run: RunPaths,
    clock_ticks: i64,
}

impl Normalizer {
    pub fn new(run: RunPaths, clock_ticks: i64) -> Self {
        Self {
            run,
            clock_ticks: clock_ticks.max(1),
        }
    }

    /// Produce the CTS bundle: merged spans, diffed samples, normalized
    /// node descriptor, slim invocations, cleanup, and the audit report.
    pub fn normalize(&self) -> Result<NormalizeSummary> {
        let meta_path = self.run.node_meta_path();
        if !meta_path.exists() {
            return Err(LoadtraceError::trace(format!(
                "missing node descriptor: {}",
                meta_path.display()
            )));
        }
        let meta = NodeDescriptor::load(&meta_path)?;
        let cts = self.run.cts_dir();
        fs::create_dir_all(&cts)?;

        let spans = self.merge_spans(&meta)?;
        let samples = self.derive_samples()?;
        self.write_nodes(&meta)?;
        let invocations = self.write_invocations(&spans)?;
        self.cleanup_cts()?;
        let report = audit::audit(&meta, &invocations, &samples).render(&meta.node, &meta.stage);
        fs::write(cts.join("audit_report.md"), report)?;

        info!(
            "normalized run {} -> {}",
            self.run.run_id(),
            cts.display()
        );
        Ok(NormalizeSummary {
            merged_spans: spans.len(),
            samples: samples.len(),
            invocations: invocations.len(),
        })
    }

    /// Merge every producer's span file into `events.jsonl`, sorted by
    /// `(ts_enqueue|ts_start, pid)`, with node/stage defaults filled.
    fn merge_spans(&self, meta: &NodeDescriptor) -> Result<Vec<SpanRecord>> {
        let run_dir = self.run.run_dir();
        let mut sources: Vec<_> = fs::read_dir(&run_dir)?
            .flatten()
            .filter_map(|e| {
                let name = e.file_name().to_str()?.to_string();
                let is_span_file = name.starts_with("events.")
                    && name.ends_with(".jsonl")
                    && name != "events.jsonl";
                is_span_file.then(|| e.path())
            })
            .collect();
        sources.sort();

        let mut spans = Vec::new();
        for path in sources {
            spans.extend(read_spans(&path)?);
        }
        spans.sort_by_key(|s| (s.ts_key(), s.pid.unwrap_or(0)));
        for span in &mut spans {
            span.node.get_or_insert_with(|| meta.node.clone());
            span.stage.get_or_insert_with(|| meta.stage.clone());
        }

        let mut out = fs::File::create(self.run.merged_events_path())?;
        for span in &spans {
            writeln!(out, "{}", serde_json::to_string(span)?)?;
        }
        Ok(spans)
    }

    /// Derive the diffed per-PID series from the raw sampler output.
    ///
    /// The first sample of each PID emits `dt_ms = cpu_ms = 0` as a
    /// placeholder; equal-timestamp rows only refresh the baseline.
    fn derive_samples(&self) -> Result<Vec<CtsSample>> {
        let raw_path = self.run.proc_metrics_path();
        let mut out_rows = Vec::new();
        if raw_path.exists() {
            let content = fs::read_to_string(&raw_path)?;
            // pid -> (utime, stime, ts_ms)
            let mut last: HashMap<i64, (i64, i64, i64)> = HashMap::new();
            for line in content.lines().filter(|l| !l.trim().is_empty()) {
                let Ok(row) = serde_json::from_str::<RawSampleRow>(line) else {
                    continue;
                };
                let (Some(ts), Some(pid)) = (row.ts_ms, row.pid) else {
                    continue;
                };
                let mut dt_ms = 0i64;
                let mut cpu_ms = 0i64;
                match (last.get(&pid).copied(), row.utime, row.stime) {
                    (Some((prev_ut, prev_st, prev_ts)), Some(ut), Some(st)) => {
                        if ts != prev_ts {
                            let dt_ticks = ((ut + st) - (prev_ut + prev_st)).max(0);
                            dt_ms = (ts - prev_ts).max(0);
                            cpu_ms = dt_ticks * 1000 / self.clock_ticks;
                            last.insert(pid, (ut, st, ts));
                        } else if ut + st > prev_ut + prev_st {
                            last.insert(pid, (ut, st, ts));
                        }
                    }
                    (None, Some(ut), Some(st)) => {
                        last.insert(pid, (ut, st, ts));
                    }
                    _ => {}
                }
                out_rows.push(CtsSample {
                    ts_ms: ts,
                    pid: pid as i32,
                    dt_ms,
                    cpu_ms,
                    rss_kb: row.rss_kb,
                });
            }
        }
        let mut out = fs::File::create(self.run.cts_dir().join("proc_metrics.jsonl"))?;
        for row in &out_rows {
            writeln!(out, "{}", serde_json::to_string(row)?)?;
        }
        Ok(out_rows)
    }

    /// Emit `nodes.json`, rounding frequency to the nearest 100 MHz and
    /// memory to the nearest 1024 MB to collapse near-duplicate specs.
    fn write_nodes(&self, meta: &NodeDescriptor) -> Result<()> {
        let norm_freq = if meta.cpu_freq_mhz > 0 {
            (((meta.cpu_freq_mhz as f64) / 100.0).round() * 100.0) as u32
        } else {
            meta.cpu_freq_mhz
        };
        let norm_mem = if meta.mem_mb > 0 {
            (((meta.mem_mb as f64) / 1024.0).round() * 1024.0) as u64
        } else {
            meta.mem_mb
        };
        let nodes = vec![CtsNode {
            node_id: meta.node.clone(),
            stage: meta.stage.clone(),
            cpu_cores: meta.cpu_cores,
            mem_mb: norm_mem,
            cpu_model: (!meta.cpu_model.is_empty()).then(|| meta.cpu_model.clone()),
            cpu_freq_mhz: norm_freq,
        }];
        fs::write(
            self.run.cts_dir().join("nodes.json"),
            serde_json::to_string_pretty(&nodes)?,
        )?;
        Ok(())
    }

    /// Emit the slim `invocations.jsonl` view of the merged spans.
    fn write_invocations(&self, spans: &[SpanRecord]) -> Result<Vec<SlimInvocation>> {
        let rows: Vec<SlimInvocation> = spans
            .iter()
            .map(|s| SlimInvocation {
                trace_id: s.trace_id.clone(),
                pid: s.pid,
                ts_enqueue: s.ts_enqueue,
                ts_start: s.ts_start,
                ts_end: s.ts_end,
            })
            .collect();
        let mut out = fs::File::create(self.run.cts_dir().join("invocations.jsonl"))?;
        for row in &rows {
            writeln!(out, "{}", serde_json::to_string(row)?)?;
        }
        Ok(rows)
    }

    /// Delete anything in the CTS directory beyond the four allowed
    /// filenames.
    fn cleanup_cts(&self) -> Result<()> {
        for entry in fs::read_dir(self.run.cts_dir())?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let keep = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| ALLOWED_FILES.contains(&n))
                .unwrap_or(false);
            if !keep {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::trace::span::append_span;

    fn write_meta(run: &RunPaths) {
        let meta = NodeDescriptor {
            run_id: run.run_id().to_string(),
            node: "n1".to_string(),
            stage: "cloud".to_string(),
            host: "host1".to_string(),
            cpu_cores: 4,
            mem_mb: 15997,
            cpu_model: "TestCPU".to_string(),
            cpu_freq_mhz: 2399,
        };
        std::fs::create_dir_all(run.run_dir()).unwrap();
        meta.store(&run.node_meta_path()).unwrap();
    }

    fn span(trace: &str, pid: i64, enq: i64, start: i64, end: i64) -> SpanRecord {
        SpanRecord {
            trace_id: Some(trace.to_string()),
            pid: Some(pid),
            ts_enqueue: Some(enq),
            ts_start: Some(start),
            ts_end: Some(end),
            ..SpanRecord::default()
        }
    }

    fn raw_line(ts: i64, pid: i64, ut: i64, st: i64) -> String {
        format!(r#"{{"ts_ms":{ts},"pid":{pid},"rss_kb":100,"utime":{ut},"stime":{st}}}"#)
    }

    fn setup_run(dir: &std::path::Path) -> RunPaths {
        let run = RunPaths::resolve(dir, Some("r1".to_string()));
        write_meta(&run);
        append_span(&run.events_path("ffmpeg"), &span("t2", 2, 200, 210, 300)).unwrap();
        append_span(&run.events_path("ffmpeg"), &span("t1", 1, 100, 110, 250)).unwrap();
        let raw = [
            raw_line(1000, 1, 0, 0),
            raw_line(1200, 1, 10, 10),
            raw_line(1400, 1, 30, 10),
        ]
        .join("\n");
        std::fs::write(run.proc_metrics_path(), raw + "\n").unwrap();
        run
    }

    #[test]
    fn test_normalize_emits_four_files_only() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup_run(dir.path());
        std::fs::create_dir_all(run.cts_dir()).unwrap();
        std::fs::write(run.cts_dir().join("leftover.tmp"), "x").unwrap();

        let summary = Normalizer::new(run.clone(), 100).normalize().unwrap();
        assert_eq!(summary.merged_spans, 2);
        assert_eq!(summary.samples, 3);

        let mut names: Vec<String> = std::fs::read_dir(run.cts_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "audit_report.md",
                "invocations.jsonl",
                "nodes.json",
                "proc_metrics.jsonl"
            ]
        );
    }

    #[test]
    fn test_spans_sorted_by_enqueue_time() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup_run(dir.path());
        Normalizer::new(run.clone(), 100).normalize().unwrap();
        let merged = read_spans(&run.merged_events_path()).unwrap();
        assert_eq!(merged[0].trace_id.as_deref(), Some("t1"));
        assert_eq!(merged[1].trace_id.as_deref(), Some("t2"));
    }

    #[test]
    fn test_cpu_diffing_with_placeholder_first_sample() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup_run(dir.path());
        Normalizer::new(run.clone(), 100).normalize().unwrap();
        let content = std::fs::read_to_string(run.cts_dir().join("proc_metrics.jsonl")).unwrap();
        let rows: Vec<CtsSample> = content
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows[0].dt_ms, 0);
        assert_eq!(rows[0].cpu_ms, 0);
        // 20 ticks at 100 Hz over 200 ms -> 200 ms of CPU.
        assert_eq!(rows[1].dt_ms, 200);
        assert_eq!(rows[1].cpu_ms, 200);
        assert_eq!(rows[2].dt_ms, 200);
        assert_eq!(rows[2].cpu_ms, 200);
    }

    #[test]
    fn test_nodes_json_normalizes_freq_and_memory() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup_run(dir.path());
        Normalizer::new(run.clone(), 100).normalize().unwrap();
        let nodes: Vec<CtsNode> = serde_json::from_str(
            &std::fs::read_to_string(run.cts_dir().join("nodes.json")).unwrap(),
        )
        .unwrap();
        assert_eq!(nodes[0].cpu_freq_mhz, 2400);
        assert_eq!(nodes[0].mem_mb, 16384);
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let run = setup_run(dir.path());
        let normalizer = Normalizer::new(run.clone(), 100);
        normalizer.normalize().unwrap();
        let read_all = |run: &RunPaths| {
            ALLOWED_FILES
                .iter()
                .map(|f| std::fs::read(run.cts_dir().join(f)).unwrap())
                .collect::<Vec<_>>()
        };
        let first = read_all(&run);
        normalizer.normalize().unwrap();
        let second = read_all(&run);
        assert_eq!(first, second);
    }
}
