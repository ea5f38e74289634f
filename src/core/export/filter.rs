//! Keep only the earliest-N tasks of an exported bundle.
//!
//! Tasks are ranked by `submission_time`; fragments follow their
//! tasks. Schemas and the topology file are preserved.

use std::fs;
use std::path::Path;

use super::tables::{ExportTables, read_fragments, read_tasks, write_parquet};
use super::topology::TOPOLOGY_FILE;
use crate::Result;
use crate::error::LoadtraceError;

/// Counts reported after a filter pass.
#[derive(Debug, Clone, Copy)]
pub struct FilterSummary {
    pub kept_tasks: usize,
    pub total_tasks: usize,
    pub kept_fragments: usize,
    pub total_fragments: usize,
}

/// Filter `input` (an exported bundle directory) into `output`.
pub fn filter_topn(input: &Path, output: &Path, topn: usize) -> Result<FilterSummary> {
    let tasks_path = input.join("tasks.parquet");
    let fragments_path = input.join("fragments.parquet");
    if !tasks_path.exists() || !fragments_path.exists() {
        return Err(LoadtraceError::export(format!(
            "missing tasks/fragments parquet under {}",
            input.display()
        )));
    }

    let mut tasks = read_tasks(&tasks_path)?;
    let fragments = read_fragments(&fragments_path)?;
    let total_tasks = tasks.len();
    let total_fragments = fragments.len();

    tasks.sort_by_key(|t| t.submission_time);
    tasks.truncate(topn);
    let keep_ids: std::collections::HashSet<i32> = tasks.iter().map(|t| t.id).collect();
    let kept_fragments: Vec<_> = fragments
        .into_iter()
        .filter(|f| keep_ids.contains(&f.id))
        .collect();

    let filtered = ExportTables {
        tasks,
        fragments: kept_fragments,
    };
    write_parquet(&filtered, output)?;

    let topology = input.join(TOPOLOGY_FILE);
    if topology.exists() {
        fs::copy(&topology, output.join(TOPOLOGY_FILE))?;
    }

    Ok(FilterSummary {
        kept_tasks: filtered.tasks.len(),
        total_tasks,
        kept_fragments: filtered.fragments.len(),
        total_fragments,
    })
}
