//! Shared helpers for the integration suites.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use loadtrace::Result;
use loadtrace::core::broker::{Broker, MemoryBroker, keys};
use loadtrace::core::task::{EncodeProfile, TaskEnvelope};
use loadtrace::core::worker::{QuotaApplier, TaskLauncher};

/// Build a task envelope with a demand and a FIFO sequence number.
pub fn task(input: &str, cpu_units: u32, seq: u64) -> TaskEnvelope {
    let mut task = TaskEnvelope::new(
        input.to_string(),
        format!("outputs/{input}.out.mp4"),
        EncodeProfile::default(),
    );
    task.cpu_units = cpu_units;
    task.seq = Some(seq);
    task.ts_enqueue = Some(1_000 + seq as i64);
    task
}

/// Push a task to the pending queue.
pub async fn push_pending(broker: &MemoryBroker, task: &TaskEnvelope) {
    broker
        .append_tail(keys::PENDING, &task.to_json().unwrap())
        .await
        .unwrap();
}

/// Register a node's capacity counters directly on the broker.
pub async fn register_node(broker: &MemoryBroker, node: &str, cap: i64) {
    broker
        .set(&keys::capacity(node), &cap.to_string())
        .await
        .unwrap();
    broker
        .set(&keys::capacity_total(node), &cap.to_string())
        .await
        .unwrap();
}

/// Quota applier that accepts everything silently.
pub struct NullApplier;

#[async_trait]
impl QuotaApplier for NullApplier {
    async fn apply(&self, _unit: &str, _quota_percent: u32) -> Result<()> {
        Ok(())
    }
}

/// Launcher that records inputs in completion order instead of
/// spawning processes.
pub struct RecordingLauncher {
    pub completed: Arc<Mutex<Vec<String>>>,
    pub delay: std::time::Duration,
    pub status: i32,
}

impl RecordingLauncher {
    pub fn new(delay_ms: u64) -> Self {
        Self {
            completed: Arc::new(Mutex::new(Vec::new())),
            delay: std::time::Duration::from_millis(delay_ms),
            status: 0,
        }
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }
}

#[async_trait]
impl TaskLauncher for RecordingLauncher {
    async fn launch(&self, task: &TaskEnvelope) -> Result<i32> {
        tokio::time::sleep(self.delay).await;
        self.completed.lock().unwrap().push(task.input.clone());
        Ok(self.status)
    }
}

/// Poll until `check` returns true or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(timeout_ms: u64, check: F) -> bool {
    let deadline =
        tokio::time::Instant::now() + std::time::Duration::from_millis(timeout_ms);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    check()
}
