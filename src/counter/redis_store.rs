//! Redis-backed counter store
//!
//! The fixed-window increment runs as a Lua script so INCR and the expiry
//! are applied together; a crash can never leave a counter without a TTL.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::Script;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use super::{CounterStore, WindowCount};
use crate::types::{GrievanceError, Result};

/// INCR, set PEXPIRE on the first hit, heal keys that lost their TTL,
/// return {count, pttl}.
const INCR_WINDOW_SCRIPT: &str = r#"
local current = redis.call('INCR', KEYS[1])
if current == 1 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
end
local ttl = redis.call('PTTL', KEYS[1])
if ttl < 0 then
  redis.call('PEXPIRE', KEYS[1], ARGV[1])
  ttl = tonumber(ARGV[1])
end
return {current, ttl}
"#;

const RELEASE_LEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
  return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Counter store over a shared Redis (or wire-compatible) server
pub struct RedisCounterStore {
    connection_manager: ConnectionManager,
    op_timeout: Duration,
    incr_script: Script,
    release_script: Script,
}

impl RedisCounterStore {
    /// Connect and verify with PING
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| GrievanceError::Config(format!("Invalid REDIS_URL: {}", e)))?;

        let connection_manager = tokio::time::timeout(op_timeout * 10, ConnectionManager::new(client))
            .await
            .map_err(|_| GrievanceError::UpstreamUnavailable("Redis connect timed out".into()))??;

        let store = Self {
            connection_manager,
            op_timeout,
            incr_script: Script::new(INCR_WINDOW_SCRIPT),
            release_script: Script::new(RELEASE_LEASE_SCRIPT),
        };
        store.ping().await?;

        debug!("Connected to Redis counter store");
        Ok(store)
    }

    /// Bound a single store call by the configured timeout
    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T>
    where
        F: Future<Output = redis::RedisResult<T>>,
    {
        match tokio::time::timeout(self.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => {
                warn!(op, timeout_ms = self.op_timeout.as_millis() as u64, "Redis operation timed out");
                Err(GrievanceError::UpstreamUnavailable(format!("Redis {} timed out", op)))
            }
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    fn backend(&self) -> &'static str {
        "redis"
    }

    async fn incr_window(&self, key: &str, window: Duration) -> Result<WindowCount> {
        let mut conn = self.connection_manager.clone();
        let window_ms = window.as_millis().max(1) as u64;

        let mut invocation = self.incr_script.key(key);
        invocation.arg(window_ms);
        let (count, ttl_ms): (i64, i64) = self
            .bounded("incr_window", invocation.invoke_async(&mut conn))
            .await?;

        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_in: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.connection_manager.clone();
        let value: Option<Vec<u8>> = self
            .bounded("get", redis::cmd("GET").arg(key).query_async(&mut conn))
            .await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let _: () = self
            .bounded(
                "set",
                redis::cmd("SET")
                    .arg(key)
                    .arg(value)
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(())
    }

    async fn delete_matching(&self, pattern: &str) -> Result<usize> {
        let mut conn = self.connection_manager.clone();
        let mut cursor: u64 = 0;
        let mut removed = 0usize;

        loop {
            let (next, keys): (u64, Vec<String>) = self
                .bounded(
                    "scan",
                    redis::cmd("SCAN")
                        .arg(cursor)
                        .arg("MATCH")
                        .arg(pattern)
                        .arg("COUNT")
                        .arg(100)
                        .query_async(&mut conn),
                )
                .await?;

            if !keys.is_empty() {
                let deleted: usize = self
                    .bounded("del", redis::cmd("DEL").arg(&keys).query_async(&mut conn))
                    .await?;
                removed += deleted;
            }

            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(removed)
    }

    async fn try_lease(&self, key: &str, owner: &str, ttl: Duration) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let ttl_ms = ttl.as_millis().max(1) as u64;
        let reply: Option<String> = self
            .bounded(
                "lease",
                redis::cmd("SET")
                    .arg(key)
                    .arg(owner)
                    .arg("NX")
                    .arg("PX")
                    .arg(ttl_ms)
                    .query_async(&mut conn),
            )
            .await?;
        Ok(reply.is_some())
    }

    async fn release_lease(&self, key: &str, owner: &str) -> Result<bool> {
        let mut conn = self.connection_manager.clone();
        let mut invocation = self.release_script.key(key);
        invocation.arg(owner);
        let deleted: i64 = self
            .bounded("release", invocation.invoke_async(&mut conn))
            .await?;
        Ok(deleted > 0)
    }

    async fn ping(&self) -> Result<()> {
        let mut conn = self.connection_manager.clone();
        let _: String = self
            .bounded("ping", redis::cmd("PING").query_async(&mut conn))
            .await?;
        Ok(())
    }
}
