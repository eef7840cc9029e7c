//! Connection Management
//!
//! This module wraps transports into pooled connections and implements the
//! connection factory: creating sessions, probing their liveness and tearing
//! them down.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::errors::{PoolError, Result};
use crate::transport::{Fault, FaultReporter, Health, Transport, TransportFactory};
use crate::types::{ConnectionId, Value};

/// A live session to the remote endpoint
///
/// It wraps a transport with its identity, health state and timestamps.
/// A connection is owned by exactly one party at a time: the pool while idle,
/// or a single borrower while active.
pub struct Connection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
    health: Arc<Health>,
    created_at: Instant,
    last_used: Instant,
    in_flight: bool,
}

impl Connection {
    fn new(id: ConnectionId, transport: Box<dyn Transport>, health: Arc<Health>) -> Self {
        let now = Instant::now();
        Self {
            id,
            transport,
            health,
            created_at: now,
            last_used: now,
            in_flight: false,
        }
    }

    /// Runs one command on this connection
    ///
    /// This method updates the last_used timestamp. A connection-level
    /// failure marks the connection as broken so the pool will not reuse it.
    pub async fn command(&mut self, name: &str, args: &[Bytes]) -> Result<Value> {
        self.in_flight = true;
        let result = self.transport.command(name, args).await;
        self.in_flight = false;
        self.last_used = Instant::now();

        if let Err(e) = &result {
            if e.is_connection_fault() {
                self.health.record(&e.to_string());
            }
        }
        result
    }

    pub(crate) async fn ping(&mut self) -> Result<()> {
        self.in_flight = true;
        let result = self.transport.ping().await;
        self.in_flight = false;
        if let Err(e) = &result {
            self.health.record(&e.to_string());
        } else {
            self.last_used = Instant::now();
        }
        result
    }

    /// Returns the pool-assigned identifier
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Returns the creation timestamp
    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    /// Returns the timestamp of the last command or check-in
    pub fn last_used(&self) -> Instant {
        self.last_used
    }

    pub(crate) fn touch(&mut self) {
        self.last_used = Instant::now();
    }

    /// Whether the connection has recorded a fatal fault
    pub fn is_broken(&self) -> bool {
        self.health.is_broken()
    }

    /// The first fault recorded for this connection, if any
    pub fn fault(&self) -> Option<String> {
        self.health.fault()
    }

    /// A connection can go back to the idle set only if it is healthy and
    /// no command was interrupted halfway through.
    pub(crate) fn is_reusable(&self) -> bool {
        !self.in_flight && !self.is_broken()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("broken", &self.is_broken())
            .field("in_flight", &self.in_flight)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Creates, validates and destroys connections for one pool
pub struct ConnectionFactory {
    transports: Arc<dyn TransportFactory>,
    faults: mpsc::UnboundedSender<Fault>,
    initializing: AtomicBool,
    initialized: AtomicBool,
    destroy_timeout: Duration,
}

/// Clears the initializing flag on every exit from the first creation
struct InitGuard<'a> {
    factory: &'a ConnectionFactory,
}

impl InitGuard<'_> {
    fn complete(self) {
        self.factory.initialized.store(true, Ordering::SeqCst);
    }
}

impl Drop for InitGuard<'_> {
    fn drop(&mut self) {
        self.factory.initializing.store(false, Ordering::SeqCst);
    }
}

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionFactory {
    pub(crate) fn new(
        transports: Arc<dyn TransportFactory>,
        faults: mpsc::UnboundedSender<Fault>,
        destroy_timeout: Duration,
    ) -> Self {
        Self {
            transports,
            faults,
            initializing: AtomicBool::new(false),
            initialized: AtomicBool::new(false),
            destroy_timeout,
        }
    }

    /// Endpoint of the underlying transport
    pub fn endpoint(&self) -> String {
        self.transports.endpoint()
    }

    /// Whether the first connection has been created successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn enter_initialization(&self) -> Result<Option<InitGuard<'_>>> {
        if self.is_initialized() {
            return Ok(None);
        }
        if self.initializing.swap(true, Ordering::SeqCst) {
            return Err(PoolError::Configuration(
                "connection requested while the pool is still initializing".to_string(),
            ));
        }
        Ok(Some(InitGuard { factory: self }))
    }

    fn allocate_id() -> ConnectionId {
        ConnectionId(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Opens a new connection
    ///
    /// A fault reported while connecting fails the creation and the half-open
    /// transport is torn down.
    pub async fn create(&self) -> Result<Connection> {
        let init = self.enter_initialization()?;

        let id = Self::allocate_id();
        let health = Arc::new(Health::default());
        let reporter = FaultReporter::new(id, health.clone(), self.faults.clone());
        let mut transport = self.transports.transport();

        if let Err(e) = transport.connect(reporter).await {
            let _ = transport.disconnect().await;
            return Err(e);
        }

        if let Some(reason) = health.fault() {
            if let Err(e) = transport.disconnect().await {
                debug!(connection = %id, error = %e, "failed to close half-open connection");
            }
            return Err(PoolError::Connection(format!(
                "connection {} faulted while connecting: {}",
                id, reason
            )));
        }

        if let Some(init) = init {
            init.complete();
        }

        debug!(connection = %id, endpoint = %self.endpoint(), "connection created");
        Ok(Connection::new(id, transport, health))
    }

    /// Closes a connection, bounded by the destroy timeout
    ///
    /// Works on broken connections; the caller decides whether to report errors.
    pub async fn destroy(&self, mut conn: Connection) -> Result<()> {
        let id = conn.id;
        match timeout(self.destroy_timeout, conn.transport.disconnect()).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(PoolError::Destroy {
                id,
                message: e.to_string(),
            }),
            Err(_) => Err(PoolError::DestroyTimeout(self.destroy_timeout)),
        }
    }

    /// Probes whether a connection is still usable
    pub async fn validate(&self, conn: &mut Connection) -> bool {
        if conn.is_broken() {
            return false;
        }
        match conn.ping().await {
            Ok(()) => true,
            Err(e) => {
                warn!(connection = %conn.id, error = %e, "connection failed validation");
                false
            }
        }
    }
}
