//! CTS audit: field completeness, temporal consistency, and
//! invocation/sample cross-reference checks over a normalized bundle.

use std::collections::BTreeSet;

use super::normalize::{CtsSample, SlimInvocation};
use crate::core::sampler::NodeDescriptor;

/// Counters gathered over one bundle.
#[derive(Debug, Clone, Default)]
pub struct AuditSummary {
    pub invocations: usize,
    pub samples: usize,
    pub inv_pids: usize,
    pub sample_pids: usize,
    /// Missing counts for the slim invocation fields, in schema order:
    /// trace_id, ts_enqueue, ts_start, ts_end, pid.
    pub inv_missing: [usize; 5],
    /// Missing `rss_kb` count; the diffed fields are always present.
    pub rss_missing: usize,
    /// Rows violating `ts_enqueue <= ts_start <= ts_end`.
    pub temporal_violations: usize,
    /// Per-PID non-strictly-increasing `ts_ms` occurrences.
    pub monotonic_violations: usize,
    /// Rows with `dt_ms < 0`.
    pub negative_dt: usize,
    /// Invocation PIDs with no matching sample PID, sorted.
    pub unmatched_pids: Vec<i64>,
    pub match_rate: f64,
}

const INV_FIELDS: [&str; 5] = ["trace_id", "ts_enqueue", "ts_start", "ts_end", "pid"];

/// Run every check over the bundle rows.
pub fn audit(
    _meta: &NodeDescriptor,
    invocations: &[SlimInvocation],
    samples: &[CtsSample],
) -> AuditSummary {
    let mut summary = AuditSummary {
        invocations: invocations.len(),
        samples: samples.len(),
        ..AuditSummary::default()
    };

    for row in invocations {
        for (i, present) in [
            row.trace_id.is_some(),
            row.ts_enqueue.is_some(),
            row.ts_start.is_some(),
            row.ts_end.is_some(),
            row.pid.is_some(),
        ]
        .iter()
        .enumerate()
        {
            if !present {
                summary.inv_missing[i] += 1;
            }
        }
        match (row.ts_enqueue, row.ts_start, row.ts_end) {
            (Some(e), Some(s), Some(d)) if e <= s && s <= d => {}
            _ => summary.temporal_violations += 1,
        }
    }

    let mut last_ts: std::collections::HashMap<i32, i64> = std::collections::HashMap::new();
    for row in samples {
        if row.rss_kb.is_none() {
            summary.rss_missing += 1;
        }
        if row.dt_ms < 0 {
            summary.negative_dt += 1;
        }
        if let Some(prev) = last_ts.get(&row.pid) {
            if row.ts_ms <= *prev {
                summary.monotonic_violations += 1;
            }
        }
        last_ts.insert(row.pid, row.ts_ms);
    }

    let inv_pids: BTreeSet<i64> = invocations.iter().filter_map(|r| r.pid).collect();
    let sample_pids: BTreeSet<i64> = samples.iter().map(|r| r.pid as i64).collect();
    summary.inv_pids = inv_pids.len();
    summary.sample_pids = sample_pids.len();
    let matched = inv_pids.intersection(&sample_pids).count();
    summary.unmatched_pids = inv_pids.difference(&sample_pids).copied().collect();
    summary.match_rate = if inv_pids.is_empty() {
        0.0
    } else {
        matched as f64 / inv_pids.len() as f64
    };
    summary
}

fn pct(count: usize, total: usize) -> String {
    let rate = if total == 0 {
        0.0
    } else {
        count as f64 / total as f64
    };
    format!("{:.2}%", rate * 100.0)
}

impl AuditSummary {
    /// Render the Markdown audit report.
    pub fn render(&self, node: &str, stage: &str) -> String {
        let mut md = String::new();
        md.push_str("# CTS Audit Report\n\n");
        md.push_str(&format!("Node: {node}  |  Stage: {stage}\n"));
        md.push_str("\n## Summary\n");
        md.push_str(&format!("Invocations: {}\n", self.invocations));
        md.push_str(&format!("Proc metrics samples: {}\n", self.samples));
        md.push_str(&format!("Distinct PIDs (invocations): {}\n", self.inv_pids));
        md.push_str(&format!(
            "Distinct PIDs (proc_metrics): {}\n",
            self.sample_pids
        ));
        md.push_str(&format!(
            "PID match rate: {:.2}%\n",
            self.match_rate * 100.0
        ));
        md.push_str("\n## Field completeness (missing counts / rate)\n");
        for (field, missing) in INV_FIELDS.iter().zip(self.inv_missing.iter()) {
            md.push_str(&format!(
                "- invocations.{field}: {missing} ({})\n",
                pct(*missing, self.invocations)
            ));
        }
        for field in ["ts_ms", "pid", "dt_ms", "cpu_ms"] {
            md.push_str(&format!(
                "- proc_metrics.{field}: 0 ({})\n",
                pct(0, self.samples)
            ));
        }
        md.push_str(&format!(
            "- proc_metrics.rss_kb: {} ({})\n",
            self.rss_missing,
            pct(self.rss_missing, self.samples)
        ));
        md.push_str("\n## Temporal consistency\n");
        md.push_str(&format!(
            "- invocations ts_enqueue <= ts_start <= ts_end violations: {}\n",
            self.temporal_violations
        ));
        md.push_str(&format!(
            "- proc_metrics per-pid strictly increasing ts_ms violations: {}\n",
            self.monotonic_violations
        ));
        md.push_str(&format!(
            "- proc_metrics records with dt_ms < 0: {}\n",
            self.negative_dt
        ));
        md.push_str("\n## Cross-reference\n");
        md.push_str(&format!(
            "- invocations without matching proc_metrics PID: {}\n",
            self.unmatched_pids.len()
        ));
        if !self.unmatched_pids.is_empty() {
            let sample: Vec<String> = self
                .unmatched_pids
                .iter()
                .take(10)
                .map(|p| p.to_string())
                .collect();
            md.push_str(&format!("  sample unmatched PIDs: [{}]\n", sample.join(", ")));
        }
        md
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta() -> NodeDescriptor {
        NodeDescriptor {
            run_id: "r".to_string(),
            node: "n1".to_string(),
            stage: "cloud".to_string(),
            host: "h".to_string(),
            cpu_cores: 4,
            mem_mb: 4096,
            cpu_model: String::new(),
            cpu_freq_mhz: 2400,
        }
    }

    fn inv(pid: Option<i64>, enq: i64, start: i64, end: i64) -> SlimInvocation {
        SlimInvocation {
            trace_id: Some("t".to_string()),
            pid,
            ts_enqueue: Some(enq),
            ts_start: Some(start),
            ts_end: Some(end),
        }
    }

    fn sample(pid: i32, ts: i64, dt: i64) -> CtsSample {
        CtsSample {
            ts_ms: ts,
            pid,
            dt_ms: dt,
            cpu_ms: 0,
            rss_kb: Some(1),
        }
    }

    #[test]
    fn test_clean_bundle_audits_clean() {
        let invs = vec![inv(Some(1), 10, 20, 30)];
        let samples = vec![sample(1, 25, 0), sample(1, 225, 200)];
        let summary = audit(&meta(), &invs, &samples);
        assert_eq!(summary.temporal_violations, 0);
        assert_eq!(summary.monotonic_violations, 0);
        assert_eq!(summary.negative_dt, 0);
        assert_eq!(summary.unmatched_pids.len(), 0);
        assert!((summary.match_rate - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_violations_are_counted() {
        let invs = vec![
            inv(Some(1), 10, 5, 30),  // start before enqueue
            inv(None, 10, 20, 30),    // missing pid
            inv(Some(7), 10, 20, 30), // pid with no samples
        ];
        let samples = vec![sample(1, 100, 0), sample(1, 100, -5)];
        let summary = audit(&meta(), &invs, &samples);
        assert_eq!(summary.temporal_violations, 1);
        assert_eq!(summary.inv_missing[4], 1);
        assert_eq!(summary.monotonic_violations, 1);
        assert_eq!(summary.negative_dt, 1);
        assert_eq!(summary.unmatched_pids, vec![7]);
    }

    #[test]
    fn test_render_mentions_each_section() {
        let summary = audit(&meta(), &[inv(Some(1), 1, 2, 3)], &[sample(1, 2, 0)]);
        let md = summary.render("n1", "cloud");
        assert!(md.contains("# CTS Audit Report"));
        assert!(md.contains("## Summary"));
        assert!(md.contains("## Field completeness"));
        assert!(md.contains("## Temporal consistency"));
        assert!(md.contains("## Cross-reference"));
        assert!(md.contains("PID match rate: 100.00%"));
    }
}
