//! Transport Abstraction
//!
//! The pool does not speak the wire protocol itself. It drives an opaque
//! transport that can connect, disconnect, answer a liveness probe and run a
//! command by name with positional arguments.
//!
//! Every transport receives a [`FaultReporter`] when it connects. Reporting a
//! fault marks the connection as broken and notifies the owning pool, which
//! removes the connection from circulation regardless of who is using it.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::errors::Result;
use crate::types::{ConnectionId, Value};

/// A single session to the remote endpoint
#[async_trait]
pub trait Transport: Send + 'static {
    /// Opens the session
    ///
    /// The reporter stays valid for the life of the session and may be cloned
    /// into background tasks that watch the underlying socket.
    async fn connect(&mut self, faults: FaultReporter) -> Result<()>;

    /// Closes the session; must succeed on a session that is already broken
    async fn disconnect(&mut self) -> Result<()>;

    /// Lightweight liveness probe
    async fn ping(&mut self) -> Result<()>;

    /// Runs one command and returns its raw reply
    async fn command(&mut self, name: &str, args: &[Bytes]) -> Result<Value>;
}

/// Produces unconnected transports for one remote endpoint
pub trait TransportFactory: Send + Sync + 'static {
    /// Returns a new, not yet connected transport
    fn transport(&self) -> Box<dyn Transport>;

    /// Human readable endpoint, used in logs
    fn endpoint(&self) -> String;
}

/// A fatal fault reported by a connection after it was handed to the pool
#[derive(Debug, Clone)]
pub(crate) struct Fault {
    pub(crate) id: ConnectionId,
    pub(crate) reason: String,
}

/// Health state shared between a connection and its reporter
#[derive(Debug, Default)]
pub(crate) struct Health {
    fault: Mutex<Option<String>>,
}

impl Health {
    /// Records the first fault; returns false if one was already recorded
    pub(crate) fn record(&self, reason: &str) -> bool {
        let mut fault = self.fault.lock();
        if fault.is_some() {
            return false;
        }
        *fault = Some(reason.to_string());
        true
    }

    pub(crate) fn fault(&self) -> Option<String> {
        self.fault.lock().clone()
    }

    pub(crate) fn is_broken(&self) -> bool {
        self.fault.lock().is_some()
    }
}

/// Handle a transport uses to report that its session is no longer usable
#[derive(Debug, Clone)]
pub struct FaultReporter {
    id: ConnectionId,
    health: Arc<Health>,
    tx: mpsc::UnboundedSender<Fault>,
}

impl FaultReporter {
    pub(crate) fn new(
        id: ConnectionId,
        health: Arc<Health>,
        tx: mpsc::UnboundedSender<Fault>,
    ) -> Self {
        Self { id, health, tx }
    }

    /// Connection this reporter belongs to
    pub fn connection_id(&self) -> ConnectionId {
        self.id
    }

    /// Reports a fatal fault
    ///
    /// Only the first report per connection is delivered to the pool.
    pub fn report(&self, reason: impl Into<String>) {
        let reason = reason.into();
        if self.health.record(&reason) {
            // The pool may already be gone; the health flag still sticks.
            let _ = self.tx.send(Fault {
                id: self.id,
                reason,
            });
        }
    }

    /// Whether a fault has already been reported
    pub fn is_faulted(&self) -> bool {
        self.health.is_broken()
    }
}
