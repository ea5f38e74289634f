//! Central scheduler: strict-FIFO dispatch of the pending queue head.
//!
//! Only the head of `q:pending` is ever considered, which preserves
//! submission order at the cost of head-of-line blocking when no node
//! has capacity for the head task. Feasibility is gated by the slot
//! token bag when it is populated, and by capacity counters alone
//! otherwise; a capacity-only fallback guarantees progress when slot
//! tokens go stale.

pub mod weigher;

pub use weigher::{Weigher, WeigherOrder, choose_host};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use log::{info, warn};

use crate::Result;
use crate::core::broker::{Broker, keys};
use crate::core::task::TaskEnvelope;

/// Tunables for the dispatch loop.
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Key of the global pending FIFO.
    pub pending_key: String,
    /// Key of the slot token bag.
    pub slots_key: String,
    /// Max rightmost tokens to snapshot per cycle; 0 scans all.
    pub scan_slots: usize,
    /// Host-selection weigher.
    pub weigher: Weigher,
    /// Preference order for the weigher metric.
    pub weigher_order: WeigherOrder,
    /// Sleep when pending is empty or no node is feasible.
    pub idle_sleep: Duration,
    /// Sleep after a transient broker error.
    pub retry_sleep: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            pending_key: keys::PENDING.to_string(),
            slots_key: keys::SLOTS.to_string(),
            scan_slots: 0,
            weigher: Weigher::FirstFit,
            weigher_order: WeigherOrder::Min,
            idle_sleep: Duration::from_millis(50),
            retry_sleep: Duration::from_millis(100),
        }
    }
}

/// Result of one dispatch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The head task was committed to a node's queue.
    Dispatched {
        node: String,
        /// True when no slot token was consumed (slot-less or fallback
        /// path); operators watch this to detect token leakage.
        capacity_only: bool,
    },
    /// Nothing to do this cycle: empty pending or no feasible node.
    Idle,
}

/// Running totals for the dispatch loop.
#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchStats {
    pub dispatched: u64,
    pub capacity_only: u64,
}

/// Single-threaded cooperative dispatcher over a shared broker.
pub struct CentralScheduler {
    broker: Arc<dyn Broker>,
    settings: SchedulerSettings,
    stats: DispatchStats,
}

impl CentralScheduler {
    pub fn new(broker: Arc<dyn Broker>, settings: SchedulerSettings) -> Self {
        Self {
            broker,
            settings,
            stats: DispatchStats::default(),
        }
    }

    /// Totals since construction.
    pub fn stats(&self) -> DispatchStats {
        self.stats
    }

    /// Run the dispatch loop until `stop` is set.
    ///
    /// Broker errors are transient here: they are logged and the loop
    /// retries after a short sleep. No task is lost because the pending
    /// pop only happens after a successful reservation.
    pub async fn run(&mut self, stop: Arc<AtomicBool>) -> Result<()> {
        info!(
            "central-scheduler: pending={} slots={} scan_slots={}",
            self.settings.pending_key, self.settings.slots_key, self.settings.scan_slots
        );
        while !stop.load(Ordering::Relaxed) {
            match self.dispatch_once().await {
                Ok(DispatchOutcome::Dispatched { .. }) => {}
                Ok(DispatchOutcome::Idle) => tokio::time::sleep(self.settings.idle_sleep).await,
                Err(e) => {
                    warn!("scheduler error: {e}");
                    tokio::time::sleep(self.settings.retry_sleep).await;
                }
            }
        }
        info!(
            "central-scheduler stopped: dispatched={} capacity_only={}",
            self.stats.dispatched, self.stats.capacity_only
        );
        Ok(())
    }

    /// One dispatch attempt against the current head of pending.
    pub async fn dispatch_once(&mut self) -> Result<DispatchOutcome> {
        let Some(raw) = self.broker.peek_head(&self.settings.pending_key).await? else {
            return Ok(DispatchOutcome::Idle);
        };
        // Malformed envelopes still dispatch with the default demand.
        let need = TaskEnvelope::from_json(&raw)
            .map(|t| t.cpu_units() as i64)
            .unwrap_or(1);

        let slot_count = self.broker.length(&self.settings.slots_key).await?;
        if slot_count == 0 {
            return match self.capacity_only_target(need).await? {
                Some(node) => self.commit_capacity_only(&raw, need, &node, "no-slots").await,
                None => Ok(DispatchOutcome::Idle),
            };
        }

        let max_scan = if self.settings.scan_slots == 0 {
            slot_count
        } else {
            slot_count.min(self.settings.scan_slots)
        };

        // Snapshot the rightmost max_scan tokens and tally per node.
        let start = slot_count.saturating_sub(max_scan) as isize;
        let tokens = self
            .broker
            .range(&self.settings.slots_key, start, slot_count as isize - 1)
            .await?;
        let mut hosts: Vec<String> = tokens.clone();
        hosts.sort();
        hosts.dedup();

        let mut feasible = Vec::new();
        for node in &hosts {
            let token_count = tokens.iter().filter(|t| *t == node).count();
            if token_count > 0 && self.broker.get_i64(&keys::capacity(node)).await? >= need {
                feasible.push(node.clone());
            }
        }
        let chosen = choose_host(
            self.broker.as_ref(),
            self.settings.weigher,
            self.settings.weigher_order,
            &feasible,
        )
        .await?;

        let Some(node) = chosen else {
            // Stale-token fallback: ignore the slot bag and dispatch by
            // capacity alone so leaked tokens cannot deadlock the head.
            return match self.capacity_only_target(need).await? {
                Some(node) => {
                    self.commit_capacity_only(&raw, need, &node, "fallback-no-slots")
                        .await
                }
                None => Ok(DispatchOutcome::Idle),
            };
        };

        // Reserve capacity, then consume one slot token. If the token
        // vanished under us, restore the reservation and retry next tick.
        let cap_key = keys::capacity(&node);
        let cap_free = self.broker.get_i64(&cap_key).await?;
        if cap_free < need {
            return Ok(DispatchOutcome::Idle);
        }
        let new_free = cap_free - need;
        self.broker.set(&cap_key, &new_free.to_string()).await?;
        if !self
            .broker
            .consume_token(&self.settings.slots_key, &node, max_scan)
            .await?
        {
            self.broker.incr_by(&cap_key, need).await?;
            return Ok(DispatchOutcome::Idle);
        }

        self.commit(&raw, &node).await?;
        self.stats.dispatched += 1;
        self.log_dispatch("dispatch", &raw, need, &node, new_free);
        Ok(DispatchOutcome::Dispatched {
            node,
            capacity_only: false,
        })
    }

    /// Scan `cap:*` and pick a node with enough free capacity.
    async fn capacity_only_target(&self, need: i64) -> Result<Option<String>> {
        let mut hosts = Vec::new();
        for key in self.broker.keys_matching("cap:*").await? {
            if let Some(node) = keys::node_of_capacity_key(&key) {
                hosts.push(node.to_string());
            }
        }
        hosts.sort();
        hosts.dedup();
        let mut feasible = Vec::new();
        for node in hosts {
            if self.broker.get_i64(&keys::capacity(&node)).await? >= need {
                feasible.push(node);
            }
        }
        choose_host(
            self.broker.as_ref(),
            self.settings.weigher,
            self.settings.weigher_order,
            &feasible,
        )
        .await
    }

    /// Dispatch without consuming a slot token.
    async fn commit_capacity_only(
        &mut self,
        raw: &str,
        need: i64,
        node: &str,
        label: &str,
    ) -> Result<DispatchOutcome> {
        let cap_key = keys::capacity(node);
        let cap_free = self.broker.get_i64(&cap_key).await?;
        if cap_free < need {
            return Ok(DispatchOutcome::Idle);
        }
        let new_free = cap_free - need;
        self.broker.set(&cap_key, &new_free.to_string()).await?;
        self.commit(raw, node).await?;
        self.stats.dispatched += 1;
        self.stats.capacity_only += 1;
        self.log_dispatch(&format!("dispatch({label})"), raw, need, node, new_free);
        Ok(DispatchOutcome::Dispatched {
            node: node.to_string(),
            capacity_only: true,
        })
    }

    /// Pop the head and hand it to the node's queue.
    async fn commit(&self, raw: &str, node: &str) -> Result<()> {
        self.broker.pop_head(&self.settings.pending_key).await?;
        self.broker.incr_by(&keys::run_count(node), 1).await?;
        self.broker.append_tail(&keys::node_queue(node), raw).await?;
        Ok(())
    }

    fn log_dispatch(&self, label: &str, raw: &str, need: i64, node: &str, cap_left: i64) {
        match TaskEnvelope::from_json(raw) {
            Ok(task) => info!(
                "{label} -> node={node} input={} output={} cpu_units={need} cap_left={cap_left}",
                task.input, task.output
            ),
            Err(_) => info!(
                "{label} -> node={node} raw_task={:.80}",
                raw.replace('\n', " ")
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::broker::MemoryBroker;
    use crate::core::task::EncodeProfile;

    async fn push_task(broker: &MemoryBroker, cpu_units: u32) {
        let mut task = TaskEnvelope::new("in.mp4", "out.mp4", EncodeProfile::default());
        task.cpu_units = cpu_units;
        broker
            .append_tail(keys::PENDING, &task.to_json().unwrap())
            .await
            .unwrap();
    }

    async fn register_node(broker: &MemoryBroker, node: &str, cap: i64) {
        broker
            .set(&keys::capacity(node), &cap.to_string())
            .await
            .unwrap();
        broker
            .set(&keys::capacity_total(node), &cap.to_string())
            .await
            .unwrap();
    }

    fn scheduler(broker: &MemoryBroker) -> CentralScheduler {
        CentralScheduler::new(Arc::new(broker.clone()), SchedulerSettings::default())
    }

    #[tokio::test]
    async fn test_empty_pending_is_idle_and_touches_nothing() {
        let broker = MemoryBroker::new();
        register_node(&broker, "n1", 2).await;
        broker.append_tail(keys::SLOTS, "n1").await.unwrap();
        let mut sched = scheduler(&broker);
        assert_eq!(sched.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
        assert_eq!(broker.get_i64(&keys::capacity("n1")).await.unwrap(), 2);
        assert_eq!(broker.length(keys::SLOTS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_slot_dispatch_consumes_token_and_capacity() {
        let broker = MemoryBroker::new();
        register_node(&broker, "n1", 4).await;
        broker.append_tail(keys::SLOTS, "n1").await.unwrap();
        push_task(&broker, 2).await;
        let mut sched = scheduler(&broker);
        let outcome = sched.dispatch_once().await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                node: "n1".to_string(),
                capacity_only: false
            }
        );
        assert_eq!(broker.get_i64(&keys::capacity("n1")).await.unwrap(), 2);
        assert_eq!(broker.length(keys::SLOTS).await.unwrap(), 0);
        assert_eq!(broker.length(&keys::node_queue("n1")).await.unwrap(), 1);
        assert_eq!(broker.get_i64(&keys::run_count("n1")).await.unwrap(), 1);
        assert_eq!(broker.length(keys::PENDING).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_head_of_line_blocks_on_capacity() {
        let broker = MemoryBroker::new();
        register_node(&broker, "n1", 1).await;
        push_task(&broker, 3).await;
        push_task(&broker, 1).await;
        let mut sched = scheduler(&broker);
        // The 3-unit head blocks even though the next task would fit.
        assert_eq!(sched.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
        assert_eq!(broker.length(keys::PENDING).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_stale_token_falls_back_to_capacity_only() {
        let broker = MemoryBroker::new();
        register_node(&broker, "stale", 0).await;
        register_node(&broker, "live", 2).await;
        broker.append_tail(keys::SLOTS, "stale").await.unwrap();
        push_task(&broker, 1).await;
        let mut sched = scheduler(&broker);
        let outcome = sched.dispatch_once().await.unwrap();
        assert_eq!(
            outcome,
            DispatchOutcome::Dispatched {
                node: "live".to_string(),
                capacity_only: true
            }
        );
        // The stale token is left in place; only capacity moved.
        assert_eq!(broker.length(keys::SLOTS).await.unwrap(), 1);
        assert_eq!(broker.get_i64(&keys::capacity("live")).await.unwrap(), 1);
        assert_eq!(sched.stats().capacity_only, 1);
    }

    #[tokio::test]
    async fn test_oversized_task_never_dispatches() {
        let broker = MemoryBroker::new();
        register_node(&broker, "n1", 2).await;
        push_task(&broker, 3).await;
        let mut sched = scheduler(&broker);
        for _ in 0..3 {
            assert_eq!(sched.dispatch_once().await.unwrap(), DispatchOutcome::Idle);
        }
        assert_eq!(broker.length(&keys::node_queue("n1")).await.unwrap(), 0);
        assert_eq!(broker.get_i64(&keys::capacity("n1")).await.unwrap(), 2);
    }
}
