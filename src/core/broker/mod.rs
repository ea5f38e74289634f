//! Shared broker abstraction.
//!
//! The dispatcher, central scheduler, and workers cooperate through a
//! key-value + ordered-list store. Every operation is atomic with
//! respect to other operations on the same key; multi-key sequences are
//! made safe by compensating actions in the callers, so no transaction
//! support is required here.
//!
//! [`RedisBroker`] is the production implementation; [`MemoryBroker`]
//! implements the same trait in-process for tests. Store handles are
//! passed explicitly to each component; there are no singletons.

pub mod keys;
pub mod memory;
pub mod redis;

pub use memory::MemoryBroker;
pub use redis::RedisBroker;

use async_trait::async_trait;
use std::time::Duration;

use crate::Result;

/// Durable ordered lists, string counters, and key scans with atomic
/// per-key semantics.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Append `value` at the tail of the list at `key`.
    async fn append_tail(&self, key: &str, value: &str) -> Result<()>;

    /// Pop the head of the list at `key`.
    async fn pop_head(&self, key: &str) -> Result<Option<String>>;

    /// Read the head of the list at `key` without removing it.
    async fn peek_head(&self, key: &str) -> Result<Option<String>>;

    /// Pop the head of the list at `key`, waiting up to `timeout`.
    async fn blocking_pop_head(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Pop the tail of the list at `key`, waiting up to `timeout`.
    async fn blocking_pop_tail(&self, key: &str, timeout: Duration) -> Result<Option<String>>;

    /// Length of the list at `key`; 0 when absent.
    async fn length(&self, key: &str) -> Result<usize>;

    /// Inclusive `[start, end]` slice of the list at `key`; negative
    /// indices count from the tail.
    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>>;

    /// Remove up to `count` head-side occurrences of `value` from the
    /// list at `key`; `count == 0` removes all. Returns the number
    /// removed.
    async fn remove_occurrence(&self, key: &str, value: &str, count: usize) -> Result<usize>;

    /// Move the tail element of the list at `key` to its head and
    /// return it.
    async fn rotate_tail_to_head(&self, key: &str) -> Result<Option<String>>;

    /// Read the string value at `key`.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Set the string value at `key`.
    async fn set(&self, key: &str, value: &str) -> Result<()>;

    /// Set the string value at `key` only when absent. Returns whether
    /// the value was written.
    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool>;

    /// Atomically add `delta` to the integer at `key` (0 when absent)
    /// and return the new value.
    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64>;

    /// All keys matching a `prefix*` pattern.
    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>>;

    /// Delete `key` entirely.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Read a counter as `i64`, treating a missing or malformed value
    /// as 0.
    async fn get_i64(&self, key: &str) -> Result<i64> {
        Ok(self
            .get(key)
            .await?
            .and_then(|v| v.parse().ok())
            .unwrap_or(0))
    }

    /// Consume one `value` token from the bag at `key`.
    ///
    /// Rotates at most `max_scan` elements from tail to head; when the
    /// target surfaces it is popped from the head. This is O(k) and
    /// keeps the rest of the list intact. Falls back to removing one
    /// occurrence anywhere.
    async fn consume_token(&self, key: &str, value: &str, max_scan: usize) -> Result<bool> {
        for _ in 0..max_scan {
            match self.rotate_tail_to_head(key).await? {
                None => break,
                Some(tail) if tail == value => {
                    self.pop_head(key).await?;
                    return Ok(true);
                }
                Some(_) => {}
            }
        }
        Ok(self.remove_occurrence(key, value, 1).await? > 0)
    }
}
