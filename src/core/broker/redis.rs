//! Redis-backed broker implementation.
//!
//! Ordered lists map to Redis lists, counters to plain string keys.
//! The connection manager transparently reconnects; callers treat any
//! returned error as transient and retry on their next tick.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;

use super::Broker;
use crate::Result;

/// Broker backed by a shared Redis instance.
pub struct RedisBroker {
    conn: ConnectionManager,
}

impl RedisBroker {
    /// Connect to the broker at `url` (e.g. `redis://127.0.0.1:6379/0`).
    pub async fn connect(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self { conn })
    }

    fn conn(&self) -> ConnectionManager {
        self.conn.clone()
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn append_tail(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("RPUSH")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn pop_head(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("LPOP").arg(key).query_async(&mut conn).await?)
    }

    async fn peek_head(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("LINDEX")
            .arg(key)
            .arg(0)
            .query_async(&mut conn)
            .await?)
    }

    async fn blocking_pop_head(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn();
        let reply: Option<(String, String)> = redis::cmd("BLPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn blocking_pop_tail(&self, key: &str, timeout: Duration) -> Result<Option<String>> {
        let mut conn = self.conn();
        let reply: Option<(String, String)> = redis::cmd("BRPOP")
            .arg(key)
            .arg(timeout.as_secs_f64())
            .query_async(&mut conn)
            .await?;
        Ok(reply.map(|(_, value)| value))
    }

    async fn length(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn();
        let len: i64 = redis::cmd("LLEN").arg(key).query_async(&mut conn).await?;
        Ok(len.max(0) as usize)
    }

    async fn range(&self, key: &str, start: isize, end: isize) -> Result<Vec<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("LRANGE")
            .arg(key)
            .arg(start as i64)
            .arg(end as i64)
            .query_async(&mut conn)
            .await?)
    }

    async fn remove_occurrence(&self, key: &str, value: &str, count: usize) -> Result<usize> {
        let mut conn = self.conn();
        let removed: i64 = redis::cmd("LREM")
            .arg(key)
            .arg(count as i64)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(removed.max(0) as usize)
    }

    async fn rotate_tail_to_head(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("RPOPLPUSH")
            .arg(key)
            .arg(key)
            .query_async(&mut conn)
            .await?)
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn();
        Ok(redis::cmd("GET").arg(key).query_async(&mut conn).await?)
    }

    async fn set(&self, key: &str, value: &str) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn set_if_absent(&self, key: &str, value: &str) -> Result<bool> {
        let mut conn = self.conn();
        let written: i64 = redis::cmd("SETNX")
            .arg(key)
            .arg(value)
            .query_async(&mut conn)
            .await?;
        Ok(written != 0)
    }

    async fn incr_by(&self, key: &str, delta: i64) -> Result<i64> {
        let mut conn = self.conn();
        Ok(redis::cmd("INCRBY")
            .arg(key)
            .arg(delta)
            .query_async(&mut conn)
            .await?)
    }

    async fn keys_matching(&self, pattern: &str) -> Result<Vec<String>> {
        let mut conn = self.conn();
        let mut keys: Vec<String> =
            redis::cmd("KEYS").arg(pattern).query_async(&mut conn).await?;
        keys.sort();
        Ok(keys)
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.conn();
        redis::cmd("DEL").arg(key).query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
