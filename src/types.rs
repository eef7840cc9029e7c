//! Pool Types and Constants
//!
//! This module defines the configuration, reply values, statistics and
//! notification types shared by the pool, its connections and its callers.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::errors::Result;
use crate::redis_transport::RedisTransportFactory;
use crate::transport::TransportFactory;

/// Default upper bound on connections per pool
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;
/// Default acquire timeout in milliseconds
pub const DEFAULT_ACQUIRE_TIMEOUT_MS: u64 = 30_000;
/// Default destroy timeout in milliseconds
pub const DEFAULT_DESTROY_TIMEOUT_MS: u64 = 5_000;
/// Default idle timeout in milliseconds
pub const DEFAULT_IDLE_TIMEOUT_MS: u64 = 600_000;

/// Capacity of the pool event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// Process-unique identifier of a pooled connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A raw reply from the remote server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Missing key or empty reply
    Nil,
    /// Integer reply
    Int(i64),
    /// Binary-safe bulk reply
    Data(Bytes),
    /// Simple status reply other than OK
    Status(String),
    /// The OK status reply
    Okay,
    /// Multi-bulk reply
    Array(Vec<Value>),
}

impl Value {
    /// Returns true for the nil reply
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }
}

/// Pool configuration options
#[derive(Clone)]
pub struct PoolConfig {
    /// Maximum number of connections (idle + active + being created)
    pub max_connections: usize,
    /// Timeout for acquiring a connection in milliseconds
    pub acquire_timeout: u64,
    /// Timeout for disconnecting a connection in milliseconds
    pub destroy_timeout: u64,
    /// Idle connections older than this are destroyed instead of reused, in milliseconds
    pub idle_timeout: u64,
    /// Ping previously idle connections before handing them out
    pub validate_on_acquire: bool,
    /// Transport used to open connections to the remote endpoint
    pub connection_options: Arc<dyn TransportFactory>,
}

impl fmt::Debug for PoolConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolConfig")
            .field("max_connections", &self.max_connections)
            .field("acquire_timeout", &self.acquire_timeout)
            .field("destroy_timeout", &self.destroy_timeout)
            .field("idle_timeout", &self.idle_timeout)
            .field("validate_on_acquire", &self.validate_on_acquire)
            .field("endpoint", &self.connection_options.endpoint())
            .finish()
    }
}

impl PoolConfig {
    /// Creates a pool configuration around a transport factory
    pub fn new<F: TransportFactory>(connection_options: F) -> Self {
        Self::from_factory(Arc::new(connection_options))
    }

    /// Creates a pool configuration around a shared transport factory
    pub fn from_factory(connection_options: Arc<dyn TransportFactory>) -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT_MS,
            destroy_timeout: DEFAULT_DESTROY_TIMEOUT_MS,
            idle_timeout: DEFAULT_IDLE_TIMEOUT_MS,
            validate_on_acquire: true,
            connection_options,
        }
    }

    /// Creates a pool configuration for a Redis server URL such as `redis://127.0.0.1:6379`
    pub fn redis(url: &str) -> Result<Self> {
        Ok(Self::new(RedisTransportFactory::new(url)?))
    }

    /// Sets the maximum number of connections
    pub fn with_max_connections(mut self, max_connections: usize) -> Self {
        self.max_connections = max_connections;
        self
    }

    /// Sets the acquire timeout in milliseconds
    pub fn with_acquire_timeout(mut self, timeout: u64) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Sets the destroy timeout in milliseconds
    pub fn with_destroy_timeout(mut self, timeout: u64) -> Self {
        self.destroy_timeout = timeout;
        self
    }

    /// Sets the idle timeout in milliseconds
    pub fn with_idle_timeout(mut self, timeout: u64) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Enables or disables validation of idle connections on acquire
    pub fn with_validate_on_acquire(mut self, validate: bool) -> Self {
        self.validate_on_acquire = validate;
        self
    }

    /// Returns the acquire timeout as a Duration
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_millis(self.acquire_timeout)
    }

    /// Returns the destroy timeout as a Duration
    pub fn destroy_timeout(&self) -> Duration {
        Duration::from_millis(self.destroy_timeout)
    }

    /// Returns the idle timeout as a Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout)
    }
}

/// Snapshot of pool bookkeeping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections parked in the idle set
    pub idle: usize,
    /// Connections currently borrowed
    pub active: usize,
    /// Connections being created, including slots granted to waiters
    pub creating: usize,
    /// Connections being disconnected
    pub destroying: usize,
    /// Acquire requests queued for capacity
    pub waiting: usize,
}

impl PoolStats {
    /// Connections counted against `max_connections`
    pub fn total(&self) -> usize {
        self.idle + self.active + self.creating
    }
}

/// Notifications emitted by the pool for out-of-band factory activity
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PoolEvent {
    /// A connection was created
    Created(ConnectionId),
    /// A connection was disconnected
    Destroyed(ConnectionId),
    /// Creating a connection failed
    CreateFailed {
        /// Error text
        reason: String,
    },
    /// Disconnecting a connection failed
    DestroyFailed {
        /// Connection being destroyed
        id: ConnectionId,
        /// Error text
        reason: String,
    },
    /// A connection reported a fatal fault after creation
    Faulted {
        /// Faulted connection
        id: ConnectionId,
        /// Fault description
        reason: String,
    },
}
