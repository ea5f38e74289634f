//! Simulator bundle exporter.
//!
//! Reads one or more normalized node bundles and emits the typed
//! columnar tables plus the aggregated topology the datacenter
//! simulator consumes.

pub mod bundle;
pub mod filter;
pub mod tables;
pub mod topology;

pub use bundle::{InvocationRow, NodeBundle, load_bundles};
pub use filter::{FilterSummary, filter_topn};
pub use tables::{ExportTables, FragmentRow, TaskIdMode, TaskRow, build_tables, write_parquet};
pub use topology::{Topology, build_topology, write_topology};

use std::path::Path;

use log::info;

use crate::Result;

/// Counts reported after an export pass.
#[derive(Debug, Clone, Copy)]
pub struct ExportSummary {
    pub nodes: usize,
    pub tasks: usize,
    pub fragments: usize,
}

/// Full export: discover bundles, build tables, write parquet and
/// topology into `output`.
pub fn export_bundle(input: &Path, output: &Path, mode: TaskIdMode) -> Result<ExportSummary> {
    let bundles = load_bundles(input)?;
    info!("found {} node bundle(s) under {}", bundles.len(), input.display());
    let tables = build_tables(&bundles, mode)?;
    write_parquet(&tables, output)?;
    let metas: Vec<_> = bundles.iter().map(|b| &b.meta).collect();
    write_topology(&build_topology(&metas), output)?;
    info!(
        "exported {} tasks / {} fragments -> {}",
        tables.tasks.len(),
        tables.fragments.len(),
        output.display()
    );
    Ok(ExportSummary {
        nodes: bundles.len(),
        tasks: tables.tasks.len(),
        fragments: tables.fragments.len(),
    })
}
