//! Worker runtime: per-node task supervision.
//!
//! A worker registers its capacity with the broker, pulls dispatched
//! tasks from its node queue, enforces CPU isolation (exclusive cpuset
//! pinning or shared weighted fair-share), launches instrumented child
//! processes, and reconciles capacity and slot tokens on completion.

pub mod cpuset;
pub mod fairshare;

pub use cpuset::{CorePools, parse_cpuset};
pub use fairshare::{FairShareController, QuotaApplier, SystemdQuotaApplier};

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{error, info, warn};
use tokio::sync::Semaphore;

use crate::Result;
use crate::core::broker::{Broker, keys};
use crate::core::now_ms;
use crate::core::task::TaskEnvelope;
use crate::error::LoadtraceError;

/// CPU isolation mode for child processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CpuBinding {
    /// Pin each child to a dedicated contiguous cpuset block.
    #[default]
    Exclusive,
    /// No pinning; max-min fair quotas over the active children.
    Shared,
}

impl FromStr for CpuBinding {
    type Err = LoadtraceError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "exclusive" => Ok(CpuBinding::Exclusive),
            "shared" => Ok(CpuBinding::Shared),
            other => Err(LoadtraceError::config(format!(
                "unknown cpu binding: {other} (expected exclusive or shared)"
            ))),
        }
    }
}

/// Launches one task's child process and returns its exit status.
///
/// The production implementation wraps the instrumentation adapter;
/// tests substitute a fake to observe reconciliation without spawning
/// processes.
#[async_trait]
pub trait TaskLauncher: Send + Sync {
    async fn launch(&self, task: &TaskEnvelope) -> Result<i32>;
}

/// Worker tunables, resolved from config and CLI flags.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Logical node identity; also the per-node queue suffix.
    pub node: String,
    /// Concurrency slots to publish; 0 disables the slot pool and gates
    /// dispatch by capacity alone.
    pub parallel: usize,
    /// Explicit capacity override; defaults to
    /// `floor(allocation_ratio * logical_cores)`.
    pub capacity_units: Option<u32>,
    /// Overprovision ratio for the capacity default.
    pub allocation_ratio: f64,
    pub cpu_binding: CpuBinding,
    /// CPU weight granted per requested vCPU in shared mode.
    pub cpuweight_per_vcpu: u32,
    /// Force-reset `cap:<node>` on startup, overriding stale state.
    pub reset_capacity: bool,
    /// Delete `q:<node>` on startup.
    pub clear_queue: bool,
    /// Key of the slot token bag.
    pub slots_key: String,
    /// Blocking-pop timeout for the fetch loop.
    pub poll_timeout: Duration,
    /// Directory task outputs are created under.
    pub outputs_dir: PathBuf,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            node: "node0".to_string(),
            parallel: 0,
            capacity_units: None,
            allocation_ratio: 1.0,
            cpu_binding: CpuBinding::Exclusive,
            cpuweight_per_vcpu: 100,
            reset_capacity: false,
            clear_queue: false,
            slots_key: keys::SLOTS.to_string(),
            poll_timeout: Duration::from_secs(2),
            outputs_dir: PathBuf::from("outputs"),
        }
    }
}

fn sanitize_unit_component(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .collect()
}

struct ExecContext {
    broker: Arc<dyn Broker>,
    settings: WorkerSettings,
    pools: CorePools,
    fair: Arc<FairShareController>,
    launcher: Arc<dyn TaskLauncher>,
}

impl ExecContext {
    fn unit_name(&self, slot_idx: usize) -> String {
        format!(
            "lt-{}-{}-{}.scope",
            sanitize_unit_component(&self.settings.node),
            now_ms(),
            slot_idx
        )
    }

    async fn execute(&self, slot_idx: usize, mut task: TaskEnvelope) {
        let units = task.cpu_units();
        let mut unit_name = None;
        match self.settings.cpu_binding {
            CpuBinding::Exclusive => {
                if task.cpuset.is_none() {
                    task.cpuset = Some(self.pools.cpuset_for(units, slot_idx));
                }
            }
            CpuBinding::Shared => {
                task.cpuset = None;
                task.cpu_weight = Some((self.settings.cpuweight_per_vcpu * units).max(1));
                let unit = self.unit_name(slot_idx);
                match self.fair.admit(&unit, units).await {
                    Ok(quota) => task.cpu_quota = Some(quota),
                    Err(e) => warn!("fair-share admission failed for {unit}: {e}"),
                }
                task.unit_name = Some(unit.clone());
                unit_name = Some(unit);
            }
        }

        if let Some(parent) = std::path::Path::new(&task.output).parent() {
            if !parent.as_os_str().is_empty() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    warn!("failed to create output directory {}: {e}", parent.display());
                }
            }
        }

        match self.launcher.launch(&task).await {
            Ok(0) => info!("task ok: {} -> {}", task.input, task.output),
            Ok(status) => error!("task failed rc={status}: {} -> {}", task.input, task.output),
            Err(e) => error!("task launch error: {e}"),
        }

        self.reconcile(units, unit_name.as_deref()).await;
    }

    /// Return capacity and one slot token, drop the unit from the
    /// fair-share set, and decrement the in-flight counter.
    async fn reconcile(&self, units: u32, unit_name: Option<&str>) {
        if let Some(unit) = unit_name {
            if let Err(e) = self.fair.release(unit).await {
                warn!("fair-share release failed for {unit}: {e}");
            }
        }
        let node = &self.settings.node;
        if let Err(e) = self
            .broker
            .incr_by(&keys::capacity(node), units.max(1) as i64)
            .await
        {
            error!("failed to return capacity: {e}");
        }
        if self.settings.parallel > 0 {
            if let Err(e) = self.broker.append_tail(&self.settings.slots_key, node).await {
                error!("failed to return slot: {e}");
            }
        }
        match self.broker.incr_by(&keys::run_count(node), -1).await {
            Ok(v) if v < 0 => {
                let _ = self.broker.set(&keys::run_count(node), "0").await;
            }
            Ok(_) => {}
            Err(e) => warn!("failed to decrement run_count: {e}"),
        }
    }
}

/// In-process supervisor for one node.
pub struct WorkerRuntime {
    context: Arc<ExecContext>,
    cap_units: u32,
    stop: Arc<AtomicBool>,
}

impl WorkerRuntime {
    pub fn new(
        broker: Arc<dyn Broker>,
        settings: WorkerSettings,
        launcher: Arc<dyn TaskLauncher>,
        quota_applier: Arc<dyn QuotaApplier>,
        stop: Arc<AtomicBool>,
    ) -> Self {
        let total_cores = num_cpus::get();
        let pools = CorePools::new(total_cores);
        let fair = Arc::new(FairShareController::new(total_cores as f64, quota_applier));
        let cap_units = Self::capacity_units(&settings, total_cores);
        Self {
            context: Arc::new(ExecContext {
                broker,
                settings,
                pools,
                fair,
                launcher,
            }),
            cap_units,
            stop,
        }
    }

    fn capacity_units(settings: &WorkerSettings, total_cores: usize) -> u32 {
        match settings.capacity_units {
            Some(explicit) if explicit > 0 => explicit,
            _ => {
                let ratio = if settings.allocation_ratio > 0.0 {
                    settings.allocation_ratio
                } else {
                    1.0
                };
                ((ratio * total_cores as f64).floor() as u32).max(1)
            }
        }
    }

    /// Registered capacity units for this worker.
    pub fn registered_capacity(&self) -> u32 {
        self.cap_units
    }

    /// Publish capacity, reference metadata, and slot tokens.
    ///
    /// Stale slot tokens for this node are purged first so the central
    /// scheduler never blocks on leftovers from a previous run.
    pub async fn register(&self) -> Result<()> {
        let ctx = &self.context;
        let settings = &ctx.settings;
        let node = &settings.node;

        ctx.broker
            .remove_occurrence(&settings.slots_key, node, 0)
            .await?;
        if settings.clear_queue {
            ctx.broker.delete(&keys::node_queue(node)).await?;
        }
        if settings.parallel > 0 {
            for _ in 0..settings.parallel {
                ctx.broker.append_tail(&settings.slots_key, node).await?;
            }
        }

        let cap_key = keys::capacity(node);
        if settings.reset_capacity {
            ctx.broker.set(&cap_key, &self.cap_units.to_string()).await?;
        } else {
            ctx.broker
                .set_if_absent(&cap_key, &self.cap_units.to_string())
                .await?;
        }
        let total_cores = ctx.pools.total_cores();
        ctx.broker
            .set(&keys::physical_cores(node), &total_cores.to_string())
            .await?;
        ctx.broker
            .set(
                &keys::allocation_ratio(node),
                &settings.allocation_ratio.to_string(),
            )
            .await?;
        ctx.broker
            .set(&keys::capacity_total(node), &self.cap_units.to_string())
            .await?;

        info!(
            "registered slots={} capacity_units={} phys_cores={} ratio={} for node={}",
            settings.parallel, self.cap_units, total_cores, settings.allocation_ratio, node
        );
        Ok(())
    }

    /// Fetch loop: block-pop the node queue and hand tasks to a bounded
    /// executor pool. Returns when the stop flag is set and in-flight
    /// tasks have drained.
    pub async fn run(&self) -> Result<()> {
        let ctx = &self.context;
        let settings = &ctx.settings;
        let queue = keys::node_queue(&settings.node);
        let pool_size = if settings.parallel > 0 {
            settings.parallel
        } else {
            self.cap_units.max(1) as usize
        };
        let semaphore = Arc::new(Semaphore::new(pool_size));
        let slot_cursor = AtomicUsize::new(0);

        info!(
            "worker node={} queue={} parallel={} pool_size={pool_size}",
            settings.node, queue, settings.parallel
        );

        while !self.stop.load(Ordering::Relaxed) {
            let raw = match ctx
                .broker
                .blocking_pop_head(&queue, settings.poll_timeout)
                .await
            {
                Ok(Some(raw)) => raw,
                Ok(None) => continue,
                Err(e) => {
                    warn!("broker error: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };
            let task = match TaskEnvelope::from_json(&raw) {
                Ok(task) => task,
                Err(e) => {
                    warn!("discarding malformed task: {e}");
                    continue;
                }
            };
            let permit = semaphore
                .clone()
                .acquire_owned()
                .await
                .map_err(|e| LoadtraceError::worker(e.to_string()))?;
            let slot_idx = slot_cursor.fetch_add(1, Ordering::Relaxed) % pool_size;
            let context = Arc::clone(&self.context);
            tokio::spawn(async move {
                context.execute(slot_idx, task).await;
                drop(permit);
            });
        }

        // Drain: wait for every executor slot to come home.
        let _all = semaphore
            .acquire_many(pool_size as u32)
            .await
            .map_err(|e| LoadtraceError::worker(e.to_string()))?;
        info!("worker node={} stopped", settings.node);
        Ok(())
    }
}
