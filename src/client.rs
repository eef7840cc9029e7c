//! Pool Facade
//!
//! Main handle callers hold: a pool of connections to one endpoint plus the
//! data operations that run on it.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::info;

use crate::errors::Result;
use crate::operations::Operations;
use crate::pool::ConnectionPool;
use crate::types::{PoolConfig, PoolEvent, PoolStats, Value};

/// Pooled client for one key-value server
///
/// Each data operation borrows one connection for its duration and gives it
/// back afterwards. Reads degrade to an empty result on failure; writes and
/// [`Pool::send_command`] return errors.
///
/// # Example
///
/// ```no_run
/// use kvpool::{Pool, PoolConfig};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let config = PoolConfig::redis("redis://127.0.0.1:6379")?.with_max_connections(4);
///     let pool = Pool::connect(config).await?;
///
///     pool.set("greeting", "hello", Some(60)).await?;
///     let value = pool.get("greeting").await?;
///     assert_eq!(value.as_deref(), Some(&b"hello"[..]));
///
///     pool.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Pool {
    core: Arc<ConnectionPool>,
    ops: Operations,
}

impl Pool {
    /// Creates a pool and its first connection
    ///
    /// Fails if the first connection cannot be created, which usually means
    /// the endpoint or its options are wrong.
    pub async fn connect(config: PoolConfig) -> Result<Self> {
        let endpoint = config.connection_options.endpoint();
        let max_connections = config.max_connections;

        let core = ConnectionPool::new(config)?;
        core.initialize().await?;
        info!(%endpoint, max_connections, "connection pool ready");

        let ops = Operations::new(core.clone());
        Ok(Self { core, ops })
    }

    /// Returns the underlying pool core
    pub fn core(&self) -> &Arc<ConnectionPool> {
        &self.core
    }

    /// Returns the pool configuration
    pub fn config(&self) -> &PoolConfig {
        self.core.config()
    }

    /// Returns a snapshot of the pool bookkeeping
    pub fn stats(&self) -> PoolStats {
        self.core.stats()
    }

    /// Subscribes to out-of-band pool notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.core.subscribe()
    }

    /// Gets the value of a key
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.ops.get(key).await
    }

    /// Sets the value of a key, optionally expiring after `ttl_seconds`
    pub async fn set(
        &self,
        key: &str,
        value: impl Into<Bytes>,
        ttl_seconds: Option<u64>,
    ) -> Result<()> {
        self.ops.set(key, value.into(), ttl_seconds).await
    }

    /// Deletes a key
    pub async fn del(&self, key: &str) -> Result<i64> {
        self.ops.del(key).await
    }

    /// Sets the expiry of a key in seconds
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.ops.expire(key, ttl_seconds).await
    }

    /// Remaining time to live of a key in seconds
    pub async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.ops.ttl(key).await
    }

    /// Increments an integer key
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.ops.incr(key).await
    }

    /// Lists keys starting with `prefix`
    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.ops.keys(prefix).await
    }

    /// Gets a hash field
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.ops.hget(key, field).await
    }

    /// Sets a hash field
    pub async fn hset(&self, key: &str, field: &str, value: impl Into<Bytes>) -> Result<i64> {
        self.ops.hset(key, field, value.into()).await
    }

    /// Gets all fields of a hash
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        self.ops.hgetall(key).await
    }

    /// Deletes hash fields
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64> {
        self.ops.hdel(key, fields).await
    }

    /// Prepends to a list
    pub async fn lpush(&self, key: &str, value: impl Into<Bytes>) -> Result<i64> {
        self.ops.lpush(key, value.into()).await
    }

    /// Appends to a list
    pub async fn rpush(&self, key: &str, value: impl Into<Bytes>) -> Result<i64> {
        self.ops.rpush(key, value.into()).await
    }

    /// Blocking pop from the head of a list
    pub async fn blpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.ops.blpop(key).await
    }

    /// Blocking pop from the tail of a list
    pub async fn brpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.ops.brpop(key).await
    }

    /// Runs any command by name and returns its raw reply
    pub async fn send_command(&self, name: &str, args: &[Bytes]) -> Result<Value> {
        self.ops.execute(name, args).await
    }

    /// Drains and clears the pool
    ///
    /// Waits for borrowed connections to come back, then disconnects
    /// everything. After calling shutdown, all operations return PoolClosed.
    /// It's safe to call shutdown multiple times.
    pub async fn shutdown(&self) {
        self.core.shutdown().await;
        info!(endpoint = %self.core.factory().endpoint(), "connection pool shut down");
    }
}
