//! Per-invocation span records.
//!
//! One JSON line per invocation, appended by whichever producer ran the
//! work: the instrumentation adapter for worker-launched children, or
//! any collaborating service emitting the same schema. Absent fields
//! serialize as nulls so files from different producers line up.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Span schema shared by all producers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SpanRecord {
    #[serde(default)]
    pub trace_id: Option<String>,
    #[serde(default)]
    pub span_id: Option<String>,
    #[serde(default)]
    pub parent_id: Option<String>,
    #[serde(default)]
    pub module_id: Option<String>,
    #[serde(default)]
    pub instance_id: Option<String>,
    #[serde(default)]
    pub ts_enqueue: Option<i64>,
    #[serde(default)]
    pub ts_start: Option<i64>,
    #[serde(default)]
    pub ts_end: Option<i64>,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub stage: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub input: Option<String>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub pid: Option<i64>,
    #[serde(default)]
    pub cpuset: Option<String>,
    #[serde(default)]
    pub bytes_in: Option<u64>,
    #[serde(default)]
    pub bytes_out: Option<u64>,
    #[serde(default)]
    pub status: Option<i64>,
    /// Producer-specific fields, preserved verbatim.
    #[serde(flatten)]
    pub extras: serde_json::Map<String, serde_json::Value>,
}

impl SpanRecord {
    /// Sort key used when merging span files: submission time when
    /// known, else start time.
    pub fn ts_key(&self) -> i64 {
        self.ts_enqueue.or(self.ts_start).unwrap_or(0)
    }

    /// Whether `ts_enqueue <= ts_start <= ts_end` holds.
    pub fn temporally_consistent(&self) -> bool {
        match (self.ts_enqueue, self.ts_start, self.ts_end) {
            (Some(e), Some(s), Some(d)) => e <= s && s <= d,
            _ => false,
        }
    }
}

/// Append one span as a JSON line, creating parent directories as
/// needed.
pub fn append_span(path: &Path, span: &SpanRecord) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(span)?)?;
    Ok(())
}

/// Read every parseable span line from a JSONL file.
pub fn read_spans(path: &Path) -> Result<Vec<SpanRecord>> {
    let content = fs::read_to_string(path)?;
    Ok(content
        .lines()
        .filter(|l| !l.trim().is_empty())
        .filter_map(|l| serde_json::from_str(l).ok())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_absent_fields_serialize_as_null() {
        let span = SpanRecord {
            trace_id: Some("t1".to_string()),
            ..SpanRecord::default()
        };
        let line = serde_json::to_string(&span).unwrap();
        assert!(line.contains(r#""span_id":null"#));
        assert!(line.contains(r#""trace_id":"t1""#));
    }

    #[test]
    fn test_temporal_consistency() {
        let mut span = SpanRecord {
            ts_enqueue: Some(10),
            ts_start: Some(20),
            ts_end: Some(30),
            ..SpanRecord::default()
        };
        assert!(span.temporally_consistent());
        span.ts_start = Some(5);
        assert!(!span.temporally_consistent());
        span.ts_start = None;
        assert!(!span.temporally_consistent());
    }

    #[test]
    fn test_append_and_read_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.test.jsonl");
        let span = SpanRecord {
            trace_id: Some("t1".to_string()),
            pid: Some(42),
            ts_enqueue: Some(1),
            ts_start: Some(2),
            ts_end: Some(3),
            ..SpanRecord::default()
        };
        append_span(&path, &span).unwrap();
        append_span(&path, &span).unwrap();
        let spans = read_spans(&path).unwrap();
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].pid, Some(42));
    }

    #[test]
    fn test_extras_preserved() {
        let raw = r#"{"trace_id":"t","pid":1,"cpu_time_ms":55}"#;
        let span: SpanRecord = serde_json::from_str(raw).unwrap();
        assert_eq!(
            span.extras.get("cpu_time_ms").and_then(|v| v.as_i64()),
            Some(55)
        );
    }
}
