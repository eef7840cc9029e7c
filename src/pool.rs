//! Pool Core
//!
//! This module owns the bounded set of connections and all of its bookkeeping:
//! which connections are idle, which are borrowed, how many are being created
//! or destroyed, and which acquire requests are queued for capacity.
//!
//! All bookkeeping lives behind one mutex that is never held across an await
//! point. Work that suspends (connecting, pinging, disconnecting, waiting for
//! capacity) happens outside the lock, and RAII guards put the bookkeeping
//! back in order when such work is cancelled.

use std::collections::{HashSet, VecDeque};
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Instant;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, oneshot, Notify};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::connection::{Connection, ConnectionFactory};
use crate::errors::{PoolError, Result};
use crate::transport::Fault;
use crate::types::{ConnectionId, PoolConfig, PoolEvent, PoolStats, EVENT_CHANNEL_CAPACITY};

/// What a queued acquire request receives when it reaches the front of the queue
enum Handoff {
    /// A released connection, already tracked as active for the waiter
    Connection(Connection),
    /// A creation slot reserved for the waiter
    Capacity,
    /// The request failed
    Failed(PoolError),
}

struct Waiter {
    tx: oneshot::Sender<Handoff>,
}

/// Pool bookkeeping protected by the mutex
#[derive(Default)]
struct Inner {
    /// Idle connections, most recently returned at the back
    idle: VecDeque<Connection>,
    /// Connections currently borrowed
    active: HashSet<ConnectionId>,
    /// Borrowed connections that must be destroyed when returned
    doomed: HashSet<ConnectionId>,
    /// Connections being disconnected
    destroying: HashSet<ConnectionId>,
    /// Connections being created, including slots granted to waiters
    creating: usize,
    /// Acquire requests waiting for capacity, oldest first
    waiters: VecDeque<Waiter>,
    draining: bool,
    closed: bool,
}

impl Inner {
    fn total(&self) -> usize {
        self.idle.len() + self.active.len() + self.creating
    }

    fn live_waiters(&self) -> usize {
        self.waiters.iter().filter(|w| !w.tx.is_closed()).count()
    }

    fn is_quiescent(&self) -> bool {
        self.active.is_empty() && self.creating == 0
    }

    /// Grants a freed slot to the oldest waiter still listening.
    fn grant_capacity(&mut self) -> bool {
        while let Some(waiter) = self.waiters.pop_front() {
            self.creating += 1;
            if waiter.tx.send(Handoff::Capacity).is_ok() {
                return true;
            }
            self.creating -= 1;
        }
        false
    }

    /// Hands a healthy connection to the oldest live waiter, or parks it idle.
    fn check_in(&mut self, mut conn: Connection) {
        // Its idle time starts now, whether it waits in the idle set or not.
        conn.touch();
        while let Some(waiter) = self.waiters.pop_front() {
            let id = conn.id();
            self.active.insert(id);
            match waiter.tx.send(Handoff::Connection(conn)) {
                Ok(()) => return,
                Err(Handoff::Connection(returned)) => {
                    self.active.remove(&id);
                    conn = returned;
                }
                Err(_) => {
                    // Only connections are sent above.
                    self.active.remove(&id);
                    return;
                }
            }
        }
        self.idle.push_back(conn);
    }
}

enum Step {
    Reuse(Connection),
    Create,
    Wait(oneshot::Receiver<Handoff>),
}

/// Bounded pool of connections to one remote endpoint
///
/// It maintains the idle set and handles:
///   - Lazy creation up to `max_connections`
///   - FIFO queuing of acquire requests when the pool is full
///   - Validation of idle connections before reuse
///   - Out-of-band destruction of connections that report a fatal fault
///   - Draining and clearing for shutdown and recovery
pub struct ConnectionPool {
    config: PoolConfig,
    factory: ConnectionFactory,
    inner: Mutex<Inner>,
    /// Signalled whenever a connection leaves the active, creating or destroying state
    settled: Notify,
    events: broadcast::Sender<PoolEvent>,
    me: Weak<ConnectionPool>,
}

impl ConnectionPool {
    /// Creates a new pool for the configured endpoint
    ///
    /// The pool starts empty. It spawns a health monitor task, so it must be
    /// created inside a Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Arc<Self>> {
        Self::validate_config(&config)?;

        let (fault_tx, fault_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let factory = ConnectionFactory::new(
            config.connection_options.clone(),
            fault_tx,
            config.destroy_timeout(),
        );

        let pool = Arc::new_cyclic(|me| Self {
            config,
            factory,
            inner: Mutex::new(Inner::default()),
            settled: Notify::new(),
            events,
            me: me.clone(),
        });

        tokio::spawn(watch_faults(Arc::downgrade(&pool), fault_rx));
        Ok(pool)
    }

    /// Validates the pool configuration
    fn validate_config(config: &PoolConfig) -> Result<()> {
        if config.max_connections == 0 {
            return Err(PoolError::Configuration(
                "max_connections must be greater than 0".to_string(),
            ));
        }
        if config.acquire_timeout == 0 {
            return Err(PoolError::Configuration(
                "acquire_timeout must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Creates the first connection and parks it in the idle set
    ///
    /// A failure here usually means the endpoint or its options are wrong.
    /// Calling `acquire` while this is still running fails with a
    /// configuration error.
    pub async fn initialize(&self) -> Result<()> {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PoolError::PoolClosed);
            }
            inner.creating += 1;
        }
        let conn = self.create_reserved().await?;
        self.release(conn)
    }

    /// Returns the pool configuration
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Returns the connection factory
    pub fn factory(&self) -> &ConnectionFactory {
        &self.factory
    }

    /// Subscribes to out-of-band pool notifications
    pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: PoolEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Returns a snapshot of the pool bookkeeping
    pub fn stats(&self) -> PoolStats {
        let inner = self.inner.lock();
        PoolStats {
            idle: inner.idle.len(),
            active: inner.active.len(),
            creating: inner.creating,
            destroying: inner.destroying.len(),
            waiting: inner.live_waiters(),
        }
    }

    /// Whether the pool has been closed
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Borrows a connection
    ///
    /// Reuses an idle connection when one is valid, creates one while the
    /// pool is below `max_connections`, and otherwise queues behind earlier
    /// requests until a connection is released or capacity frees up.
    /// Fails with `AcquireTimeout` if that takes longer than the acquire timeout.
    pub async fn acquire(&self) -> Result<Connection> {
        let limit = self.config.acquire_timeout();
        match timeout(limit, self.acquire_inner()).await {
            Ok(result) => result,
            Err(_) => {
                warn!(timeout = ?limit, "timed out waiting for a connection");
                Err(PoolError::AcquireTimeout(limit))
            }
        }
    }

    async fn acquire_inner(&self) -> Result<Connection> {
        let mut step = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return Err(PoolError::PoolClosed);
            }
            if inner.draining {
                return Err(PoolError::PoolDraining);
            }

            if let Some(conn) = inner.idle.pop_back() {
                inner.active.insert(conn.id());
                Step::Reuse(conn)
            } else if inner.total() < self.config.max_connections {
                inner.creating += 1;
                Step::Create
            } else {
                // Requests that timed out leave their senders behind.
                inner.waiters.retain(|w| !w.tx.is_closed());
                let (tx, rx) = oneshot::channel();
                inner.waiters.push_back(Waiter { tx });
                Step::Wait(rx)
            }
        };

        loop {
            match step {
                Step::Reuse(conn) => match self.check_out(conn).await {
                    Ok(conn) => return Ok(conn),
                    Err(rejected) => step = self.replace(rejected)?,
                },
                Step::Create => return self.create_reserved().await,
                Step::Wait(rx) => {
                    let mut ticket = WaitTicket {
                        pool: self,
                        rx,
                        settled: false,
                    };
                    step = match ticket.wait().await {
                        Handoff::Connection(conn) => Step::Reuse(conn),
                        Handoff::Capacity => return self.create_reserved().await,
                        Handoff::Failed(e) => return Err(e),
                    };
                }
            }
        }
    }

    /// Vets a connection already tracked as active before handing it out.
    ///
    /// A connection that is stale, broken or fails validation comes back as
    /// the error, still tracked as active.
    async fn check_out(&self, conn: Connection) -> std::result::Result<Connection, Connection> {
        let stale = conn.last_used().elapsed() > self.config.idle_timeout();
        if stale || !conn.is_reusable() {
            debug!(connection = %conn.id(), stale, "discarding connection on checkout");
            return Err(conn);
        }
        if !self.config.validate_on_acquire {
            return Ok(conn);
        }

        let mut guard = CheckoutGuard {
            pool: self,
            conn: Some(conn),
        };
        let valid = match guard.conn.as_mut() {
            Some(conn) => self.factory.validate(conn).await,
            None => false,
        };
        let conn = guard.conn.take().expect("checkout guard holds the connection");
        if valid {
            Ok(conn)
        } else {
            debug!(connection = %conn.id(), "connection failed validation on checkout");
            Err(conn)
        }
    }

    /// Disposes a connection that failed checkout and gives its slot back to
    /// the same caller.
    ///
    /// The caller keeps its place: it takes another idle connection or
    /// creates one, and the slot is never offered to the queue in between.
    fn replace(&self, rejected: Connection) -> Result<Step> {
        let id = rejected.id();
        let step = {
            let mut inner = self.inner.lock();
            inner.active.remove(&id);
            inner.doomed.remove(&id);
            inner.destroying.insert(id);
            if inner.closed {
                None
            } else if let Some(conn) = inner.idle.pop_back() {
                inner.active.insert(conn.id());
                Some(Step::Reuse(conn))
            } else {
                inner.creating += 1;
                Some(Step::Create)
            }
        };
        self.settled.notify_waiters();
        self.spawn_marked(rejected);
        step.ok_or(PoolError::PoolClosed)
    }

    /// Creates a connection into a slot already counted in `creating`.
    async fn create_reserved(&self) -> Result<Connection> {
        let mut slot = CreateSlot {
            pool: self,
            armed: true,
        };

        match self.factory.create().await {
            Ok(conn) => {
                slot.armed = false;
                let id = conn.id();
                let mut inner = self.inner.lock();
                inner.creating -= 1;
                if inner.closed {
                    drop(inner);
                    self.settled.notify_waiters();
                    self.spawn_dispose(conn);
                    return Err(PoolError::PoolClosed);
                }
                inner.active.insert(id);
                drop(inner);
                self.emit(PoolEvent::Created(id));
                Ok(conn)
            }
            Err(e) => {
                warn!(endpoint = %self.factory.endpoint(), error = %e, "failed to create connection");
                self.emit(PoolEvent::CreateFailed {
                    reason: e.to_string(),
                });
                // Dropping the slot offers the capacity to the next waiter.
                drop(slot);
                Err(e)
            }
        }
    }

    fn abandon_slot(&self) {
        let mut inner = self.inner.lock();
        inner.creating -= 1;
        if !inner.closed {
            inner.grant_capacity();
        }
        drop(inner);
        self.settled.notify_waiters();
    }

    /// Returns a borrowed connection
    ///
    /// The connection goes to the oldest queued request or back to the idle
    /// set. A connection that is broken, was interrupted mid-command, was
    /// doomed by `clear` or a fault, or comes back after close is destroyed
    /// instead and its capacity is offered to the queue.
    ///
    /// Releasing a connection the pool does not track as active is reported
    /// as `NotTracked`; that connection is disposed, never made idle.
    pub fn release(&self, conn: Connection) -> Result<()> {
        let id = conn.id();
        let mut inner = self.inner.lock();

        if !inner.active.remove(&id) {
            drop(inner);
            error!(connection = %id, "released a connection that is not tracked as active");
            self.spawn_dispose(conn);
            return Err(PoolError::NotTracked(id));
        }

        let doomed = inner.doomed.remove(&id);
        if doomed || inner.closed || !conn.is_reusable() {
            if !inner.closed {
                inner.grant_capacity();
            }
            drop(inner);
            debug!(connection = %id, doomed, "destroying returned connection");
            self.settled.notify_waiters();
            self.spawn_dispose(conn);
            return Ok(());
        }

        inner.check_in(conn);
        drop(inner);
        self.settled.notify_waiters();
        Ok(())
    }

    /// Removes a connection from all tracking and disconnects it
    ///
    /// Safe for a connection in any state. The freed capacity is offered to
    /// the oldest queued request.
    pub async fn destroy(&self, conn: Connection) {
        let id = conn.id();
        {
            let mut inner = self.inner.lock();
            let was_active = inner.active.remove(&id);
            inner.doomed.remove(&id);
            if was_active && !inner.closed {
                inner.grant_capacity();
            }
        }
        self.settled.notify_waiters();
        self.dispose(conn).await;
    }

    /// Destroys a connection by id after it reported a fatal fault
    ///
    /// Idle connections are disconnected at once; borrowed ones are doomed
    /// and destroyed when their borrower returns them. Unknown ids are ignored,
    /// so evicting twice is a no-op.
    pub async fn evict(&self, id: ConnectionId) {
        let conn = {
            let mut inner = self.inner.lock();
            match inner.idle.iter().position(|c| c.id() == id) {
                Some(pos) => {
                    let conn = inner.idle.remove(pos);
                    if !inner.closed {
                        inner.grant_capacity();
                    }
                    conn
                }
                None => {
                    if inner.active.contains(&id) {
                        inner.doomed.insert(id);
                    }
                    None
                }
            }
        };
        if let Some(conn) = conn {
            self.dispose(conn).await;
        }
    }

    /// Disconnects an untracked connection and reports failures out-of-band.
    async fn dispose(&self, conn: Connection) {
        if !self.inner.lock().destroying.insert(conn.id()) {
            return;
        }
        self.dispose_marked(conn).await;
    }

    /// Disconnects a connection already recorded in `destroying`.
    async fn dispose_marked(&self, conn: Connection) {
        let id = conn.id();
        let _mark = DisposalMark { pool: self, id };

        match self.factory.destroy(conn).await {
            Ok(()) => {
                debug!(connection = %id, "connection destroyed");
                self.emit(PoolEvent::Destroyed(id));
            }
            Err(e) => {
                warn!(connection = %id, error = %e, "failed to destroy connection");
                self.emit(PoolEvent::DestroyFailed {
                    id,
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Disposes a connection from a synchronous context.
    fn spawn_dispose(&self, conn: Connection) {
        if !self.inner.lock().destroying.insert(conn.id()) {
            return;
        }
        self.spawn_marked(conn);
    }

    /// Disposes a connection already recorded in `destroying` on a new task.
    fn spawn_marked(&self, conn: Connection) {
        let pool = self.me.upgrade();
        match (pool, tokio::runtime::Handle::try_current()) {
            (Some(pool), Ok(handle)) => {
                handle.spawn(async move { pool.dispose_marked(conn).await });
            }
            _ => {
                self.inner.lock().destroying.remove(&conn.id());
                // No runtime to disconnect on; dropping the transport closes it.
                debug!(connection = %conn.id(), "dropping connection without disconnect");
                drop(conn);
            }
        }
    }

    /// Stops accepting acquire requests and waits for borrowed connections
    ///
    /// Queued requests keep receiving connections released during the drain.
    /// Once nothing is borrowed or being created, the remaining queued
    /// requests fail with `PoolClosed`.
    pub async fn drain(&self) {
        self.inner.lock().draining = true;
        debug!("draining pool");

        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.inner.lock().is_quiescent() {
                break;
            }
            settled.await;
        }

        let waiters: Vec<Waiter> = self.inner.lock().waiters.drain(..).collect();
        for waiter in waiters {
            let _ = waiter.tx.send(Handoff::Failed(PoolError::PoolClosed));
        }
    }

    /// Destroys every connection the pool knows about
    ///
    /// Idle connections are disconnected now, borrowed ones are doomed and
    /// destroyed on return. Waits for all in-flight disconnects to finish.
    pub async fn clear(&self) {
        let idle: Vec<Connection> = {
            let mut inner = self.inner.lock();
            let active: Vec<ConnectionId> = inner.active.iter().copied().collect();
            inner.doomed.extend(active);
            inner.idle.drain(..).collect()
        };
        debug!(count = idle.len(), "clearing idle connections");
        join_all(idle.into_iter().map(|conn| self.dispose(conn))).await;

        loop {
            let settled = self.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.inner.lock().destroying.is_empty() {
                break;
            }
            settled.await;
        }
    }

    /// Drains, closes and clears the pool
    ///
    /// After this call every acquire fails with `PoolClosed`.
    /// It's safe to call multiple times.
    pub async fn shutdown(&self) {
        self.drain().await;
        self.inner.lock().closed = true;
        self.clear().await;
        debug!("pool shut down");
    }
}

/// Reclaims whatever a queued request was handed if it stops waiting.
struct WaitTicket<'a> {
    pool: &'a ConnectionPool,
    rx: oneshot::Receiver<Handoff>,
    settled: bool,
}

impl WaitTicket<'_> {
    async fn wait(&mut self) -> Handoff {
        let handoff = (&mut self.rx)
            .await
            .unwrap_or(Handoff::Failed(PoolError::PoolClosed));
        self.settled = true;
        handoff
    }
}

impl Drop for WaitTicket<'_> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.rx.close();
        match self.rx.try_recv() {
            Ok(Handoff::Connection(conn)) => {
                if let Err(e) = self.pool.release(conn) {
                    error!(error = %e, "failed to reclaim handed-off connection");
                }
            }
            Ok(Handoff::Capacity) => self.pool.abandon_slot(),
            _ => {}
        }
    }
}

/// Gives back a reserved creation slot if creation does not complete.
struct CreateSlot<'a> {
    pool: &'a ConnectionPool,
    armed: bool,
}

impl Drop for CreateSlot<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.pool.abandon_slot();
        }
    }
}

/// Destroys a connection whose validation was interrupted.
struct CheckoutGuard<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl Drop for CheckoutGuard<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            let id = conn.id();
            {
                let mut inner = self.pool.inner.lock();
                inner.active.remove(&id);
                inner.doomed.remove(&id);
                if !inner.closed {
                    inner.grant_capacity();
                }
            }
            self.pool.settled.notify_waiters();
            self.pool.spawn_dispose(conn);
        }
    }
}

struct DisposalMark<'a> {
    pool: &'a ConnectionPool,
    id: ConnectionId,
}

impl Drop for DisposalMark<'_> {
    fn drop(&mut self) {
        self.pool.inner.lock().destroying.remove(&self.id);
        self.pool.settled.notify_waiters();
    }
}

/// Consumes fault reports and evicts the faulted connections.
async fn watch_faults(pool: Weak<ConnectionPool>, mut faults: mpsc::UnboundedReceiver<Fault>) {
    while let Some(fault) = faults.recv().await {
        let Some(pool) = pool.upgrade() else {
            break;
        };
        warn!(connection = %fault.id, reason = %fault.reason, "connection reported a fatal error");
        pool.emit(PoolEvent::Faulted {
            id: fault.id,
            reason: fault.reason,
        });
        pool.evict(fault.id).await;
    }
}

/// A connection borrowed from the pool
///
/// When dropped, the connection is returned to the pool. Use
/// [`PooledConnection::discard`] to destroy it instead.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
    acquired_at: Instant,
}

impl<'a> PooledConnection<'a> {
    /// Acquires a connection scoped to the returned guard
    pub async fn acquire(pool: &'a ConnectionPool) -> Result<Self> {
        let conn = pool.acquire().await?;
        Ok(Self {
            pool,
            conn: Some(conn),
            acquired_at: Instant::now(),
        })
    }

    /// Time since the connection was borrowed
    pub fn held_for(&self) -> std::time::Duration {
        self.acquired_at.elapsed()
    }

    /// Returns the connection to the pool now
    pub fn release(mut self) -> Result<()> {
        match self.conn.take() {
            Some(conn) => self.pool.release(conn),
            None => Ok(()),
        }
    }

    /// Destroys the connection instead of returning it
    pub async fn discard(mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.destroy(conn).await;
        }
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref().expect("connection taken")
    }
}

impl DerefMut for PooledConnection<'_> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut().expect("connection taken")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = self.pool.release(conn) {
                error!(error = %e, "failed to release connection");
            }
        }
    }
}
