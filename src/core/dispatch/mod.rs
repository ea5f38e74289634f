//! Task submission: input enumeration, assignment policies, and the
//! central-pending submission modes.

pub mod mix;

pub use mix::{build_mix, parse_mix_spec};

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::Result;
use crate::core::broker::{Broker, keys};
use crate::core::now_ms;
use crate::core::task::{EncodeProfile, TaskEnvelope};
use crate::error::LoadtraceError;

/// A named profile: encode parameters plus the vCPU demand attached to
/// tasks carrying it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProfileSpec {
    #[serde(flatten)]
    pub encode: EncodeProfile,
    #[serde(default = "default_profile_units")]
    pub cpu_units: u32,
}

fn default_profile_units() -> u32 {
    1
}

impl Default for ProfileSpec {
    fn default() -> Self {
        Self {
            encode: EncodeProfile::default(),
            cpu_units: 1,
        }
    }
}

/// Assignment policy for submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Policy {
    /// The i-th job goes to `nodes[i mod |nodes|]`.
    #[default]
    RoundRobin,
    /// Offline LPT: probe durations, sort descending, least-loaded node.
    DurationGreedy,
    /// Online dribble bounded by per-node backlog.
    Backlog,
    /// Flatten into the central pending FIFO.
    Pending,
}

impl FromStr for Policy {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "round-robin" | "rr" => Ok(Policy::RoundRobin),
            "duration-greedy" | "lpt-duration" => Ok(Policy::DurationGreedy),
            "backlog" => Ok(Policy::Backlog),
            "pending" => Ok(Policy::Pending),
            other => Err(LoadtraceError::config(format!("unknown policy: {other}"))),
        }
    }
}

/// Sub-mode for central-pending submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PendingMode {
    /// Push `pulse_size` tasks, then sleep `pulse_interval`.
    #[default]
    Pulse,
    /// Keep the pending backlog bounded; dribble `batch_size` at a time.
    Fifo,
}

impl FromStr for PendingMode {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pulse" => Ok(PendingMode::Pulse),
            "fifo" => Ok(PendingMode::Fifo),
            other => Err(LoadtraceError::config(format!(
                "unknown pending mode: {other} (expected pulse or fifo)"
            ))),
        }
    }
}

/// Dispatcher tunables, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub inputs_dir: PathBuf,
    pub outputs_dir: PathBuf,
    pub nodes: Vec<String>,
    pub policy: Policy,
    pub pending_key: String,
    pub pending_mode: PendingMode,
    pub pulse_size: usize,
    pub pulse_interval: Duration,
    /// Optional spacing between tasks inside one pulse.
    pub pulse_spacing: Duration,
    pub batch_size: usize,
    pub backlog_limit: usize,
    pub dribble_interval: Duration,
    pub pending_max: usize,
    /// Duration probe program (ffprobe-compatible output).
    pub probe_program: String,
    /// Default profile when no mix is configured.
    pub default_profile: ProfileSpec,
    /// Named profile catalog for the mix.
    pub profiles: BTreeMap<String, ProfileSpec>,
    /// Mix weights by profile name.
    pub mix: Option<BTreeMap<String, f64>>,
    /// Total task count for the mix; defaults to the input count.
    pub total: Option<usize>,
    pub seed: u64,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self {
            inputs_dir: PathBuf::from("inputs"),
            outputs_dir: PathBuf::from("outputs"),
            nodes: Vec::new(),
            policy: Policy::RoundRobin,
            pending_key: keys::PENDING.to_string(),
            pending_mode: PendingMode::Pulse,
            pulse_size: 1,
            pulse_interval: Duration::from_secs(1),
            pulse_spacing: Duration::ZERO,
            batch_size: 1,
            backlog_limit: 4,
            dribble_interval: Duration::from_millis(500),
            pending_max: 64,
            probe_program: "ffprobe".to_string(),
            default_profile: ProfileSpec::default(),
            profiles: BTreeMap::new(),
            mix: None,
            total: None,
            seed: 0,
        }
    }
}

/// Totals reported after a submission run.
#[derive(Debug, Clone, Default)]
pub struct SubmitSummary {
    pub submitted: usize,
    pub per_node: BTreeMap<String, usize>,
    /// Milliseconds of forced enqueue-timestamp skew (strictly
    /// increasing stamps under a fast submission rate).
    pub skew_ms: i64,
}

/// Plans and submits task envelopes through the broker.
pub struct Dispatcher {
    broker: Arc<dyn Broker>,
    settings: DispatchSettings,
    last_enqueue_ms: i64,
    skew_ms: i64,
}

impl Dispatcher {
    pub fn new(broker: Arc<dyn Broker>, settings: DispatchSettings) -> Self {
        Self {
            broker,
            settings,
            last_enqueue_ms: 0,
            skew_ms: 0,
        }
    }

    /// Enumerate input jobs, sorted by file name.
    pub fn list_inputs(&self) -> Result<Vec<PathBuf>> {
        let dir = &self.settings.inputs_dir;
        if !dir.is_dir() {
            return Err(LoadtraceError::PathNotFound(dir.clone()));
        }
        let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_file())
            .map(|e| e.into_path())
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .map(|e| e.eq_ignore_ascii_case("mp4"))
                    .unwrap_or(false)
            })
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(LoadtraceError::dispatch(format!(
                "no mp4 files under {}",
                dir.display()
            )));
        }
        Ok(files)
    }

    fn output_for(&self, input: &Path, profile: &ProfileSpec, index: usize, cycled: bool) -> String {
        let stem = input
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| format!("job{index}"));
        let stem = if cycled { format!("{stem}_s{index}") } else { stem };
        let scale = profile.encode.scale.replace(':', "x");
        self.settings
            .outputs_dir
            .join(format!("{stem}_{scale}_crf{}.mp4", profile.encode.crf))
            .to_string_lossy()
            .to_string()
    }

    fn task_for(&self, input: &Path, profile: &ProfileSpec, index: usize, cycled: bool) -> TaskEnvelope {
        let mut task = TaskEnvelope::new(
            input.to_string_lossy().to_string(),
            self.output_for(input, profile, index, cycled),
            profile.encode.clone(),
        );
        task.cpu_units = profile.cpu_units.max(1);
        task
    }

    /// Build the full task list: one task per input, or the seeded
    /// profile mix paired with inputs cyclically. `seq` is attached in
    /// plan order for strict FIFO downstream.
    pub fn plan(&self, files: &[PathBuf]) -> Result<Vec<TaskEnvelope>> {
        let mut tasks = Vec::new();
        match &self.settings.mix {
            Some(weights) => {
                let total = self.settings.total.unwrap_or(files.len());
                let names = build_mix(weights, total, self.settings.seed)?;
                let cycled = total > files.len();
                for (index, name) in names.iter().enumerate() {
                    let profile = self.settings.profiles.get(name).ok_or_else(|| {
                        LoadtraceError::config(format!("unknown profile in mix: {name}"))
                    })?;
                    let input = &files[index % files.len()];
                    tasks.push(self.task_for(input, profile, index, cycled));
                }
            }
            None => {
                for (index, input) in files.iter().enumerate() {
                    tasks.push(self.task_for(input, &self.settings.default_profile, index, false));
                }
            }
        }
        for (index, task) in tasks.iter_mut().enumerate() {
            task.seq = Some(index as u64);
        }
        Ok(tasks)
    }

    /// Stamp `ts_enqueue`. Non-strict stamps are monotone
    /// non-decreasing; strict stamps (inside a pulse) force at least
    /// +1 ms over the previous stamp and account the skew.
    fn stamp(&mut self, task: &mut TaskEnvelope, strict: bool) {
        let now = now_ms();
        let ts = if strict && now <= self.last_enqueue_ms {
            let forced = self.last_enqueue_ms + 1;
            self.skew_ms += forced - now;
            forced
        } else {
            now.max(self.last_enqueue_ms)
        };
        self.last_enqueue_ms = ts;
        task.ts_enqueue = Some(ts);
    }

    async fn push(&self, queue: &str, task: &TaskEnvelope) -> Result<()> {
        self.broker.append_tail(queue, &task.to_json()?).await
    }

    /// Probe the input duration in seconds; 0.0 when unavailable.
    pub async fn probe_duration_seconds(&self, path: &Path) -> f64 {
        let output = tokio::process::Command::new(&self.settings.probe_program)
            .args([
                "-v",
                "error",
                "-show_entries",
                "format=duration",
                "-of",
                "default=nokey=1:noprint_wrappers=1",
            ])
            .arg(path)
            .output()
            .await;
        match output {
            Ok(out) if out.status.success() => String::from_utf8_lossy(&out.stdout)
                .trim()
                .parse()
                .unwrap_or(0.0),
            _ => {
                debug!("duration probe failed for {}", path.display());
                0.0
            }
        }
    }

    /// Round-robin assignment: index modulo the node list.
    pub fn assign_round_robin<'a>(
        tasks: &'a [TaskEnvelope],
        nodes: &[String],
    ) -> BTreeMap<String, Vec<&'a TaskEnvelope>> {
        let mut assignment: BTreeMap<String, Vec<&TaskEnvelope>> =
            nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        for (index, task) in tasks.iter().enumerate() {
            let node = &nodes[index % nodes.len()];
            assignment.get_mut(node).unwrap().push(task);
        }
        assignment
    }

    /// LPT assignment: heaviest job first onto the least-loaded node.
    pub fn assign_duration_greedy<'a>(
        weighted: &mut Vec<(f64, &'a TaskEnvelope)>,
        nodes: &[String],
    ) -> BTreeMap<String, Vec<&'a TaskEnvelope>> {
        weighted.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let mut load: BTreeMap<&String, f64> = nodes.iter().map(|n| (n, 0.0)).collect();
        let mut assignment: BTreeMap<String, Vec<&TaskEnvelope>> =
            nodes.iter().map(|n| (n.clone(), Vec::new())).collect();
        for (duration, task) in weighted.iter() {
            let node = nodes
                .iter()
                .min_by(|a, b| {
                    load[a]
                        .partial_cmp(&load[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap();
            assignment.get_mut(node).unwrap().push(task);
            *load.get_mut(node).unwrap() += duration;
        }
        assignment
    }

    /// Plan and submit everything according to the configured policy.
    pub async fn run(&mut self) -> Result<SubmitSummary> {
        if self.settings.policy != Policy::Pending && self.settings.nodes.is_empty() {
            return Err(LoadtraceError::config("no nodes provided"));
        }
        let files = self.list_inputs()?;
        let tasks = self.plan(&files)?;
        let summary = match self.settings.policy {
            Policy::RoundRobin => {
                let assignment = Self::assign_round_robin(&tasks, &self.settings.nodes);
                self.submit_assignment(assignment).await?
            }
            Policy::DurationGreedy => {
                let durations = futures::future::join_all(
                    tasks
                        .iter()
                        .map(|task| self.probe_duration_seconds(Path::new(&task.input))),
                )
                .await;
                let mut weighted: Vec<(f64, &TaskEnvelope)> =
                    durations.into_iter().zip(tasks.iter()).collect();
                let assignment =
                    Self::assign_duration_greedy(&mut weighted, &self.settings.nodes.clone());
                self.submit_assignment(assignment).await?
            }
            Policy::Backlog => self.submit_backlog(&tasks).await?,
            Policy::Pending => self.submit_pending(&tasks).await?,
        };
        info!(
            "enqueued {} tasks: {}",
            summary.submitted,
            summary
                .per_node
                .iter()
                .map(|(n, c)| format!("{n}={c}"))
                .collect::<Vec<_>>()
                .join(", ")
        );
        if summary.skew_ms > 0 {
            info!("enqueue timestamp skew forced by pulse stamping: {}ms", summary.skew_ms);
        }
        Ok(summary)
    }

    async fn submit_assignment(
        &mut self,
        assignment: BTreeMap<String, Vec<&TaskEnvelope>>,
    ) -> Result<SubmitSummary> {
        let mut summary = SubmitSummary::default();
        for (node, tasks) in assignment {
            let queue = keys::node_queue(&node);
            for task in tasks {
                let mut task = task.clone();
                self.stamp(&mut task, false);
                self.push(&queue, &task).await?;
                summary.submitted += 1;
                *summary.per_node.entry(node.clone()).or_insert(0) += 1;
            }
        }
        summary.skew_ms = self.skew_ms;
        Ok(summary)
    }

    /// Online dribble: within each batch, a task waits until some node's
    /// backlog drops below the limit, then goes to the node with the
    /// smallest estimated load.
    async fn submit_backlog(&mut self, tasks: &[TaskEnvelope]) -> Result<SubmitSummary> {
        let mut summary = SubmitSummary::default();
        let nodes = self.settings.nodes.clone();
        let mut load: BTreeMap<String, f64> = nodes.iter().map(|n| (n.clone(), 0.0)).collect();
        for batch in tasks.chunks(self.settings.batch_size.max(1)) {
            for task in batch {
                let duration = self.probe_duration_seconds(Path::new(&task.input)).await;
                let node = loop {
                    let mut candidates = Vec::new();
                    for node in &nodes {
                        let backlog = self.broker.length(&keys::node_queue(node)).await?;
                        if backlog < self.settings.backlog_limit {
                            candidates.push(node.clone());
                        }
                    }
                    if let Some(node) = candidates.into_iter().min_by(|a, b| {
                        load[a].partial_cmp(&load[b]).unwrap_or(std::cmp::Ordering::Equal)
                    }) {
                        break node;
                    }
                    tokio::time::sleep(self.settings.dribble_interval).await;
                };
                let mut task = task.clone();
                self.stamp(&mut task, false);
                self.push(&keys::node_queue(&node), &task).await?;
                *load.get_mut(&node).unwrap() += if duration > 0.0 { duration } else { 1.0 };
                summary.submitted += 1;
                *summary.per_node.entry(node).or_insert(0) += 1;
            }
            tokio::time::sleep(self.settings.dribble_interval).await;
        }
        summary.skew_ms = self.skew_ms;
        Ok(summary)
    }

    /// Central-pending submission in pulse or fifo sub-mode.
    async fn submit_pending(&mut self, tasks: &[TaskEnvelope]) -> Result<SubmitSummary> {
        let mut summary = SubmitSummary::default();
        let pending = self.settings.pending_key.clone();
        match self.settings.pending_mode {
            PendingMode::Pulse => {
                for pulse in tasks.chunks(self.settings.pulse_size.max(1)) {
                    for task in pulse {
                        let mut task = task.clone();
                        self.stamp(&mut task, true);
                        self.push(&pending, &task).await?;
                        summary.submitted += 1;
                        if !self.settings.pulse_spacing.is_zero() {
                            tokio::time::sleep(self.settings.pulse_spacing).await;
                        }
                    }
                    tokio::time::sleep(self.settings.pulse_interval).await;
                }
            }
            PendingMode::Fifo => {
                let mut remaining = tasks.iter();
                let mut next = remaining.next();
                while next.is_some() {
                    if self.broker.length(&pending).await? <= self.settings.pending_max {
                        for _ in 0..self.settings.batch_size.max(1) {
                            let Some(task) = next else { break };
                            let mut task = task.clone();
                            self.stamp(&mut task, false);
                            self.push(&pending, &task).await?;
                            summary.submitted += 1;
                            next = remaining.next();
                        }
                        if next.is_none() {
                            break;
                        }
                    }
                    tokio::time::sleep(self.settings.dribble_interval).await;
                }
            }
        }
        *summary.per_node.entry("pending".to_string()).or_insert(0) += summary.submitted;
        summary.skew_ms = self.skew_ms;
        if summary.skew_ms > 0 {
            warn!("pulse stamping diverged from wall time by {}ms", summary.skew_ms);
        }
        Ok(summary)
    }
}
