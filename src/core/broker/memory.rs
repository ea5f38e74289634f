//! In-process broker implementation for tests and single-node runs.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::Broker;
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(5);

#[derive(Default)]
struct State {
    lists: HashMap<String, VecDeque<String>>,
    strings: HashMap<String, String>,
}

/// Mutex-guarded maps implementing the [`Broker`] trait.
///
/// Blocking pops poll at a short interval; all other operations take
/// the lock once, which makes each of them atomic with respect to the
/// rest.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<Mutex<State>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_state<T>(&self, f: impl FnOnce(&mut State) -> T) -> T {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        f(&mut state)
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn append_tail(&self, key: &str, value: &str) -> Result<()> {
        self.with_state(|s| {
            s.lists
                .entry(key.to_string())
                .or_default()
                .push_back(value.to_string());
        });
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_state(|s| s.lists.get_mut(key).and_then(|l| l.pop_front())))
    }

    async fn peek_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_state(|s| s.lists.get(key).and_then(|l| l.front().cloned())))
    }

    async fn blocking_pop_head(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(v) = self.pop_head(key).await? {
                return Ok(Some(v));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn blocking_pop_tail(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let popped = self.with_state(|s| s.lists.get_mut(key).and_then(|l| l.pop_back()));
            if popped.is_some() {
                return Ok(popped);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn length(&self, key: &str) -> Result<usize> {
        Ok(self.with_state(|s| s.lists.get(key).map(|l| l.len()).unwrap_or(0)))
    }

    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        Ok(self.with_state(|s| {
            let Some(list) = s.lists.get(key) else {
                return Vec::new();
            };
            let len = list.len() as isize;
            let resolve = |idx: isize| -> isize {
                if idx < 0 { len + idx } else { idx }
            };
            let lo = resolve(start).max(0);
            let hi = resolve(end).min(len - 1);
            if lo > hi || len == 0 {
                return Vec::new();
            }
            list.iter()
                .skip(lo as usize)
                .take((hi - lo + 1) as usize)
                .cloned()
                .collect()
        }))
    }

    async fn remove_occurrence(&self, key: &str, value: &str, count: usize) -> Result<usize> {
        Ok(self.with_state(|s| {
            let Some(list) = s.lists.get_mut(key) else {
                return 0;
            };
            let limit = if count == 0 { usize::MAX } else { count };
            let mut removed = 0;
            while removed < limit {
                match list.iter().position(|v| v == value) {
                    Some(idx) => {
                        list.remove(idx);
                        removed += 1;
                    }
                    None => break,
                }
            }
            removed
        }))
    }

    async fn rotate_tail_to_head(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_state(|s| {
            let list = s.lists.get_mut(key)?;
            let tail = list.pop_back()?;
            list.push_front(tail.clone());
            Some(tail)
        }))
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.with_state(|s| s.strings.get(key).cloned()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.with_state(|s| {
            s.strings.insert(key.to_string(), value.to_string());
        });
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        Ok(self.with_state(|s| {
            if s.strings.contains_key(key) {
                false
            } else {
                s.strings.insert(key.to_string(), value.to_string());
                true
            }
        }))
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        Ok(self.with_state(|s| {
            let current = s
                .strings
                .get(key)
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + delta;
            s.strings.insert(key.to_string(), next.to_string());
            next
        }))
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        Ok(self.with_state(|s| {
            let mut keys: Vec<String> = s
                .strings
                .keys()
                .chain(s.lists.keys())
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect();
            keys.sort();
            keys.dedup();
            keys
        }))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.with_state(|s| {
            s.lists.remove(key);
            s.strings.remove(key);
        });
        Ok(())
    }
}
