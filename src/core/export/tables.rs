//! Task and fragment table construction with enforced columnar types.
//!
//! Every field is non-nullable with an exact width: tasks are
//! `(id int32, submission_time int64, duration int64, cpu_count int32,
//! cpu_capacity float64, mem_capacity int64)`, fragments are
//! `(id int32, duration int64, cpu_usage float64)`. Schema violations
//! abort the export before any file is created.

use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use arrow_array::{ArrayRef, Float64Array, Int32Array, Int64Array, RecordBatch};
use arrow_schema::{DataType, Field, Schema};
use parquet::arrow::ArrowWriter;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

use super::bundle::{InvocationRow, NodeBundle};
use crate::Result;
use crate::core::sampler::NodeDescriptor;
use crate::core::trace::CtsSample;
use crate::error::LoadtraceError;

/// Lower bound on fragment usage, to avoid zeros in downstream tools.
pub const MIN_USAGE_MHZ: f64 = 0.1;

/// How task ids are assigned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskIdMode {
    /// `pid` when all invocation PIDs are unique across nodes, else
    /// sequential.
    #[default]
    Auto,
    /// Always `pid`; fails when PIDs collide.
    Pid,
    /// Always sequential 1..N.
    Seq,
}

impl FromStr for TaskIdMode {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(TaskIdMode::Auto),
            "pid" => Ok(TaskIdMode::Pid),
            "seq" => Ok(TaskIdMode::Seq),
            other => Err(LoadtraceError::config(format!(
                "unknown task-id mode: {other} (expected auto, pid, or seq)"
            ))),
        }
    }
}

/// One row of `tasks.parquet`.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskRow {
    pub id: i32,
    pub submission_time: i64,
    pub duration: i64,
    pub cpu_count: i32,
    pub cpu_capacity: f64,
    pub mem_capacity: i64,
}

/// One row of `fragments.parquet`.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentRow {
    pub id: i32,
    pub duration: i64,
    pub cpu_usage: f64,
}

/// The built simulator tables.
#[derive(Debug, Clone, Default)]
pub struct ExportTables {
    pub tasks: Vec<TaskRow>,
    pub fragments: Vec<FragmentRow>,
}

fn safe_freq_mhz(meta: &NodeDescriptor) -> f64 {
    if meta.cpu_freq_mhz > 0 {
        meta.cpu_freq_mhz as f64
    } else {
        2400.0
    }
}

fn cores_cap(meta: &NodeDescriptor) -> Option<f64> {
    (meta.cpu_cores > 0).then_some(meta.cpu_cores as f64)
}

fn window_samples<'a>(
    samples: &'a [CtsSample],
    pid: i64,
    start: i64,
    end: i64,
) -> Vec<&'a CtsSample> {
    let mut rows: Vec<&CtsSample> = samples
        .iter()
        .filter(|s| s.pid as i64 == pid && start <= s.ts_ms && s.ts_ms <= end)
        .collect();
    rows.sort_by_key(|s| s.ts_ms);
    rows
}

fn sample_cores(sample: &CtsSample) -> f64 {
    let dt = sample.dt_ms.max(1) as f64;
    (sample.cpu_ms as f64 / dt).max(0.0)
}

/// `(cpu_count, cpu_capacity_per_core)` from the windowed CPU samples.
fn cpu_requirements(
    inv: &InvocationRow,
    meta: &NodeDescriptor,
    windowed: &[&CtsSample],
) -> (i32, f64) {
    let freq = safe_freq_mhz(meta);
    if windowed.is_empty() {
        // No observations: assume a single core at moderate usage.
        return (1, (freq * 0.5).max(MIN_USAGE_MHZ));
    }
    let peak_cores = windowed
        .iter()
        .map(|s| sample_cores(s))
        .fold(0.0_f64, f64::max);
    let mut cores_used = ((peak_cores + 0.5).floor() as i32).max(1);
    if let Some(cap) = cores_cap(meta) {
        cores_used = cores_used.min(cap as i32);
    }
    let total_cpu_ms: f64 = windowed.iter().map(|s| s.cpu_ms as f64).sum();
    let duration_ms = (inv.ts_end - inv.ts_start).max(0) as f64;
    let per_core = if duration_ms > 0.0 && cores_used > 0 {
        let avg_util = (total_cpu_ms / duration_ms) / cores_used as f64;
        freq * avg_util.clamp(0.0, 1.0)
    } else {
        freq * 0.1
    };
    (cores_used, per_core.max(1.0))
}

/// Peak RSS within the window, with a data-size fallback when no
/// samples carry memory.
fn mem_capacity_kb(inv: &InvocationRow, windowed: &[&CtsSample]) -> i64 {
    let peak_rss = windowed.iter().filter_map(|s| s.rss_kb).max();
    match peak_rss {
        Some(peak) => (peak as i64).max(1024),
        None => {
            let data_kb =
                (inv.bytes_in.unwrap_or(0) + inv.bytes_out.unwrap_or(0)) as i64 / 1024;
            (data_kb * 2).max(65536)
        }
    }
}

/// Fragments for one task: a synthesized head fragment covering the
/// gap before the first sampled interval, then one fragment per
/// interval with the first clipped to the task start.
fn task_fragments(
    id: i32,
    inv: &InvocationRow,
    meta: &NodeDescriptor,
    capacity: f64,
    windowed: &[&CtsSample],
) -> Vec<FragmentRow> {
    let mut fragments = Vec::new();
    if windowed.is_empty() {
        // Sampling gap: one synthetic fragment at 50% of capacity.
        fragments.push(FragmentRow {
            id,
            duration: (inv.ts_end - inv.ts_start).max(0),
            cpu_usage: capacity * 0.5,
        });
        return fragments;
    }
    let freq = safe_freq_mhz(meta);
    let clamp_cores = |cores: f64| match cores_cap(meta) {
        Some(cap) => cores.min(cap),
        None => cores,
    };

    let first = windowed[0];
    if first.dt_ms > 0 {
        let first_win_start = first.ts_ms - first.dt_ms;
        let head_duration = (first_win_start - inv.ts_start).max(0);
        if head_duration > 0 {
            let first_cores = clamp_cores(sample_cores(first));
            fragments.push(FragmentRow {
                id,
                duration: head_duration,
                cpu_usage: (first_cores * freq).max(MIN_USAGE_MHZ),
            });
        }
    }

    for (i, sample) in windowed.iter().enumerate() {
        let mut dt = sample.dt_ms;
        if dt <= 0 {
            if i == 0 {
                continue;
            }
            dt = sample.ts_ms - windowed[i - 1].ts_ms;
            if dt <= 0 {
                continue;
            }
        }
        let win_start = sample.ts_ms - dt;
        let clip_start = win_start.max(inv.ts_start);
        let duration = sample.ts_ms - clip_start;
        if duration <= 0 {
            continue;
        }
        // Clipping shortens the interval; scale the CPU time with it.
        let cpu_ms = if duration != dt {
            sample.cpu_ms as f64 * duration as f64 / dt as f64
        } else {
            sample.cpu_ms as f64
        };
        let cores = clamp_cores((cpu_ms / duration as f64).max(0.0));
        fragments.push(FragmentRow {
            id,
            duration,
            cpu_usage: (cores * freq).max(MIN_USAGE_MHZ),
        });
    }

    if fragments.is_empty() {
        fragments.push(FragmentRow {
            id,
            duration: (inv.ts_end - inv.ts_start).max(0),
            cpu_usage: capacity * 0.5,
        });
    }
    fragments
}

/// Quantile with linear interpolation over `values`.
pub fn quantile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    if n == 0 {
        return 0.0;
    }
    if n == 1 {
        return sorted[0];
    }
    let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let frac = pos - lo as f64;
    if lo + 1 < n {
        sorted[lo] + frac * (sorted[lo + 1] - sorted[lo])
    } else {
        sorted[n - 1]
    }
}

/// Build both tables from the loaded node bundles.
pub fn build_tables(bundles: &[NodeBundle], mode: TaskIdMode) -> Result<ExportTables> {
    let items: Vec<(&NodeBundle, &InvocationRow)> = bundles
        .iter()
        .flat_map(|b| b.invocations.iter().map(move |inv| (b, inv)))
        .collect();

    let pids: Vec<i64> = items.iter().map(|(_, inv)| inv.pid).collect();
    let pids_unique = pids.iter().collect::<HashSet<_>>().len() == pids.len();
    let use_pid = match mode {
        TaskIdMode::Pid => {
            if !pids_unique {
                return Err(LoadtraceError::export(
                    "task-id mode 'pid' requires globally unique invocation pids",
                ));
            }
            true
        }
        TaskIdMode::Seq => false,
        TaskIdMode::Auto => pids_unique && !pids.is_empty(),
    };

    let mut tasks = Vec::with_capacity(items.len());
    let mut fragments = Vec::new();
    let mut freq_by_id: BTreeMap<i32, (u32, u32)> = BTreeMap::new();

    for (index, (bundle, inv)) in items.iter().enumerate() {
        let id = if use_pid {
            inv.pid as i32
        } else {
            index as i32 + 1
        };
        let windowed = window_samples(&bundle.samples, inv.pid, inv.ts_start, inv.ts_end);
        let (cpu_count, per_core) = cpu_requirements(inv, &bundle.meta, &windowed);
        let capacity = cpu_count as f64 * per_core;
        let task = TaskRow {
            id,
            submission_time: inv.ts_enqueue,
            duration: inv.ts_end - inv.ts_start,
            cpu_count,
            cpu_capacity: capacity,
            mem_capacity: mem_capacity_kb(inv, &windowed),
        };
        fragments.extend(task_fragments(id, inv, &bundle.meta, capacity, &windowed));
        freq_by_id.insert(id, (bundle.meta.cpu_freq_mhz, bundle.meta.cpu_cores));
        tasks.push(task);
    }

    // Replace capacity with the per-task P95 of fragment usage, then
    // re-derive cpu_count from it.
    let mut usage_by_id: BTreeMap<i32, Vec<f64>> = BTreeMap::new();
    for fragment in &fragments {
        usage_by_id.entry(fragment.id).or_default().push(fragment.cpu_usage);
    }
    for task in &mut tasks {
        if let Some(usages) = usage_by_id.get(&task.id) {
            task.cpu_capacity = quantile(usages, 0.95);
        }
        if let Some((freq, cores)) = freq_by_id.get(&task.id) {
            if *freq > 0 {
                let mut count = (task.cpu_capacity / *freq as f64).ceil() as i32;
                if *cores > 0 {
                    count = count.min(*cores as i32);
                }
                task.cpu_count = count.max(1);
            }
        }
    }

    validate(&tasks, &fragments)?;
    Ok(ExportTables { tasks, fragments })
}

/// Enforce the invariants the simulator relies on.
fn validate(tasks: &[TaskRow], fragments: &[FragmentRow]) -> Result<()> {
    let mut seen = HashSet::new();
    for task in tasks {
        if !seen.insert(task.id) {
            return Err(LoadtraceError::export(format!(
                "duplicate task id {} in export",
                task.id
            )));
        }
    }
    let covered: HashSet<i32> = fragments.iter().map(|f| f.id).collect();
    for task in tasks {
        if !covered.contains(&task.id) {
            return Err(LoadtraceError::export(format!(
                "task {} has no fragments",
                task.id
            )));
        }
    }
    Ok(())
}

fn tasks_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("submission_time", DataType::Int64, false),
        Field::new("duration", DataType::Int64, false),
        Field::new("cpu_count", DataType::Int32, false),
        Field::new("cpu_capacity", DataType::Float64, false),
        Field::new("mem_capacity", DataType::Int64, false),
    ]))
}

fn fragments_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("id", DataType::Int32, false),
        Field::new("duration", DataType::Int64, false),
        Field::new("cpu_usage", DataType::Float64, false),
    ]))
}

fn write_batch(path: &Path, schema: Arc<Schema>, batch: RecordBatch) -> Result<()> {
    let tmp = path.with_extension("parquet.tmp");
    let file = File::create(&tmp)?;
    let mut writer = ArrowWriter::try_new(file, schema, None)?;
    writer.write(&batch)?;
    writer.close()?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Write both parquet files; each lands atomically via a rename.
pub fn write_parquet(tables: &ExportTables, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;

    let schema = tasks_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from_iter_values(tables.tasks.iter().map(|t| t.id))) as ArrayRef,
            Arc::new(Int64Array::from_iter_values(
                tables.tasks.iter().map(|t| t.submission_time),
            )),
            Arc::new(Int64Array::from_iter_values(
                tables.tasks.iter().map(|t| t.duration),
            )),
            Arc::new(Int32Array::from_iter_values(
                tables.tasks.iter().map(|t| t.cpu_count),
            )),
            Arc::new(Float64Array::from_iter_values(
                tables.tasks.iter().map(|t| t.cpu_capacity),
            )),
            Arc::new(Int64Array::from_iter_values(
                tables.tasks.iter().map(|t| t.mem_capacity),
            )),
        ],
    )?;
    write_batch(&out_dir.join("tasks.parquet"), schema, batch)?;

    let schema = fragments_schema();
    let batch = RecordBatch::try_new(
        schema.clone(),
        vec![
            Arc::new(Int32Array::from_iter_values(
                tables.fragments.iter().map(|f| f.id),
            )) as ArrayRef,
            Arc::new(Int64Array::from_iter_values(
                tables.fragments.iter().map(|f| f.duration),
            )),
            Arc::new(Float64Array::from_iter_values(
                tables.fragments.iter().map(|f| f.cpu_usage),
            )),
        ],
    )?;
    write_batch(&out_dir.join("fragments.parquet"), schema, batch)?;
    Ok(())
}

fn column<'a, T: 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| LoadtraceError::export(format!("missing or mistyped column: {name}")))
}

/// Read a tasks table back (used by the top-N filter).
pub fn read_tasks(path: &Path) -> Result<Vec<TaskRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let id: &Int32Array = column(&batch, "id")?;
        let submission: &Int64Array = column(&batch, "submission_time")?;
        let duration: &Int64Array = column(&batch, "duration")?;
        let cpu_count: &Int32Array = column(&batch, "cpu_count")?;
        let cpu_capacity: &Float64Array = column(&batch, "cpu_capacity")?;
        let mem_capacity: &Int64Array = column(&batch, "mem_capacity")?;
        for i in 0..batch.num_rows() {
            rows.push(TaskRow {
                id: id.value(i),
                submission_time: submission.value(i),
                duration: duration.value(i),
                cpu_count: cpu_count.value(i),
                cpu_capacity: cpu_capacity.value(i),
                mem_capacity: mem_capacity.value(i),
            });
        }
    }
    Ok(rows)
}

/// Read a fragments table back (used by the top-N filter).
pub fn read_fragments(path: &Path) -> Result<Vec<FragmentRow>> {
    let reader = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?)?.build()?;
    let mut rows = Vec::new();
    for batch in reader {
        let batch = batch?;
        let id: &Int32Array = column(&batch, "id")?;
        let duration: &Int64Array = column(&batch, "duration")?;
        let cpu_usage: &Float64Array = column(&batch, "cpu_usage")?;
        for i in 0..batch.num_rows() {
            rows.push(FragmentRow {
                id: id.value(i),
                duration: duration.value(i),
                cpu_usage: cpu_usage.value(i),
            });
        }
    }
    Ok(rows)
}
