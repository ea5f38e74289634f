//! Core domain logic for the loadtrace harness.
//!
//! Subsystems, leaves first: the shared [`broker`] abstraction, the
//! [`task`] envelope, submission planning in [`dispatch`], the central
//! [`scheduler`], the [`worker`] runtime with its fair-share controller,
//! the per-PID [`sampler`], the [`trace`] capture/normalization pipeline,
//! and the simulator-bundle [`export`] layer.

pub mod broker;
pub mod dispatch;
pub mod export;
pub mod sampler;
pub mod scheduler;
pub mod task;
pub mod trace;
pub mod worker;

/// Current wall-clock time as integer milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
