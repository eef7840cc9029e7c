//! kvpool
//!
//! Pooled connection lifecycle manager for Redis-compatible key-value servers.
//! Provides a high-level, async API whose data operations borrow connections
//! from a bounded pool and always give them back.
//!
//! # Features
//!
//! - Lazy connection creation bounded by `max_connections`
//! - FIFO queuing of callers when the pool is full, with an acquire timeout
//! - Liveness validation of idle connections before reuse
//! - Out-of-band destruction of connections that report a fatal fault
//! - Fail-soft reads, error-surfacing writes
//! - Drain, clear and shutdown as first-class operations
//! - Process-wide registry of named pools
//! - Pluggable transports: Redis via the `redis` crate, or in-memory
//!
//! # Example
//!
//! ```no_run
//! use kvpool::PoolConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = PoolConfig::redis("redis://127.0.0.1:6379")?;
//!     let pool = kvpool::get_or_create("cache", config).await?;
//!
//!     pool.hset("user:1", "name", "Ada").await?;
//!     let user = pool.hgetall("user:1").await?;
//!     println!("{:?}", user);
//!
//!     pool.shutdown().await;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod client;
mod connection;
mod errors;
pub mod memory;
mod operations;
mod pool;
pub mod protocol;
mod redis_transport;
mod registry;
mod transport;
mod types;

// Re-export public API
pub use client::Pool;
pub use connection::{Connection, ConnectionFactory};
pub use errors::{PoolError, Result};
pub use memory::{MemoryServer, MemoryTransport};
pub use pool::{ConnectionPool, PooledConnection};
pub use redis_transport::{RedisTransport, RedisTransportFactory};
pub use registry::{get_or_create, PoolRegistry};
pub use transport::{FaultReporter, Transport, TransportFactory};
pub use types::{
    ConnectionId, PoolConfig, PoolEvent, PoolStats, Value, DEFAULT_ACQUIRE_TIMEOUT_MS,
    DEFAULT_DESTROY_TIMEOUT_MS, DEFAULT_IDLE_TIMEOUT_MS, DEFAULT_MAX_CONNECTIONS,
};
