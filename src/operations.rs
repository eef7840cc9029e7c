//! Command Execution
//!
//! This module runs commands on borrowed connections. Every operation uses
//! one of two shapes:
//!
//!   - Writes borrow a connection, run the command and always give the
//!     connection back, surfacing any error to the caller.
//!   - Guarded reads do the same on success, but on any failure destroy the
//!     connection and degrade to an empty result.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use tracing::{debug, warn};

use crate::errors::{PoolError, Result};
use crate::pool::{ConnectionPool, PooledConnection};
use crate::protocol::*;
use crate::types::Value;

/// Handles all data operations
///
/// This struct is used internally by the Pool.
pub struct Operations {
    pool: Arc<ConnectionPool>,
}

impl Operations {
    /// Creates a new Operations handler
    pub fn new(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// Runs a command and returns the connection on every exit path
    pub async fn execute(&self, name: &str, args: &[Bytes]) -> Result<Value> {
        if name.trim().is_empty() {
            return Err(PoolError::InvalidArgument(
                "command name cannot be empty".to_string(),
            ));
        }
        let mut conn = PooledConnection::acquire(&self.pool).await?;
        conn.command(name, args).await
    }

    /// Runs a write command and decodes its reply
    async fn write<T, F>(&self, name: &str, args: &[Bytes], decode: F) -> Result<T>
    where
        F: FnOnce(Value) -> Result<T>,
    {
        self.execute(name, args).await.and_then(decode)
    }

    /// Runs a read command, failing soft
    ///
    /// Lifecycle errors are surfaced. Any other failure yields the empty
    /// value, and a connection that saw the failure is destroyed.
    async fn read<T, F>(&self, name: &str, args: &[Bytes], decode: F) -> Result<T>
    where
        T: Default,
        F: FnOnce(Value) -> Result<T>,
    {
        let mut conn = match PooledConnection::acquire(&self.pool).await {
            Ok(conn) => conn,
            Err(e) if e.is_lifecycle() => return Err(e),
            Err(e) => {
                warn!(command = name, error = %e, "read could not acquire a connection");
                return Ok(T::default());
            }
        };

        match conn.command(name, args).await.and_then(decode) {
            Ok(value) => Ok(value),
            Err(e) => {
                warn!(command = name, connection = %conn.id(), error = %e, "read failed, discarding connection");
                conn.discard().await;
                Ok(T::default())
            }
        }
    }

    /// Gets the value of a key
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        self.read("GET", &[arg(key)], decode_optional_bytes).await
    }

    /// Sets the value of a key with an optional expiry in seconds
    pub async fn set(&self, key: &str, value: Bytes, ttl_seconds: Option<u64>) -> Result<()> {
        if ttl_seconds == Some(0) {
            return Err(PoolError::InvalidArgument(
                "ttl must be at least one second".to_string(),
            ));
        }
        let mut args = vec![arg(key), value];
        if let Some(ttl) = ttl_seconds {
            args.push(arg("EX"));
            args.push(Bytes::from(ttl.to_string()));
        }
        self.write("SET", &args, decode_ok).await
    }

    /// Deletes a key, returning the number of keys removed
    pub async fn del(&self, key: &str) -> Result<i64> {
        self.write("DEL", &[arg(key)], decode_int).await
    }

    /// Sets a key's expiry in seconds; false if the key does not exist
    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        let args = [arg(key), Bytes::from(ttl_seconds.to_string())];
        self.write("EXPIRE", &args, decode_bool).await
    }

    /// Remaining time to live of a key in seconds
    pub async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.read("TTL", &[arg(key)], decode_ttl).await
    }

    /// Increments an integer key, returning the new value
    pub async fn incr(&self, key: &str) -> Result<i64> {
        self.write("INCR", &[arg(key)], decode_int).await
    }

    /// Lists the keys starting with `prefix`
    pub async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        self.read("KEYS", &[prefix_pattern(prefix)], decode_string_list)
            .await
    }

    /// Gets one field of a hash
    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<Bytes>> {
        self.read("HGET", &[arg(key), arg(field)], decode_optional_bytes)
            .await
    }

    /// Sets one field of a hash, returning the number of fields added
    pub async fn hset(&self, key: &str, field: &str, value: Bytes) -> Result<i64> {
        self.write("HSET", &[arg(key), arg(field), value], decode_int)
            .await
    }

    /// Gets all fields of a hash
    pub async fn hgetall(&self, key: &str) -> Result<HashMap<String, Bytes>> {
        self.read("HGETALL", &[arg(key)], decode_hash).await
    }

    /// Deletes fields of a hash, returning the number of fields removed
    pub async fn hdel(&self, key: &str, fields: &[&str]) -> Result<i64> {
        if fields.is_empty() {
            debug!(key, "hdel called without fields");
            return Ok(0);
        }
        let mut args = Vec::with_capacity(fields.len() + 1);
        args.push(arg(key));
        args.extend(fields.iter().map(|f| arg(f)));
        self.write("HDEL", &args, decode_int).await
    }

    /// Prepends a value to a list, returning the new length
    pub async fn lpush(&self, key: &str, value: Bytes) -> Result<i64> {
        self.write("LPUSH", &[arg(key), value], decode_int).await
    }

    /// Appends a value to a list, returning the new length
    pub async fn rpush(&self, key: &str, value: Bytes) -> Result<i64> {
        self.write("RPUSH", &[arg(key), value], decode_int).await
    }

    /// Pops the head of a list, waiting server-side until one is available
    ///
    /// There is no client-side timeout; the borrowed connection is held for
    /// the whole wait.
    pub async fn blpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.read("BLPOP", &[arg(key), int_arg(0)], decode_pop).await
    }

    /// Pops the tail of a list, waiting server-side until one is available
    pub async fn brpop(&self, key: &str) -> Result<Option<Bytes>> {
        self.read("BRPOP", &[arg(key), int_arg(0)], decode_pop).await
    }
}
