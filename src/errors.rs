//! Pool Error Definitions
//!
//! This module defines all error types for the connection pool.
//! Errors are split into lifecycle errors (misuse of a pool that is closing),
//! factory errors (creating or destroying connections), and command errors.

use std::time::Duration;

use thiserror::Error;

use crate::types::ConnectionId;

/// Result type alias for pool operations
pub type Result<T> = std::result::Result<T, PoolError>;

/// Base error type for all pool errors
#[derive(Error, Debug)]
pub enum PoolError {
    /// Pool has been shut down
    #[error("Pool is closed")]
    PoolClosed,

    /// Pool is draining and no longer accepts acquire requests
    #[error("Pool is draining")]
    PoolDraining,

    /// A connection was created while the pool was still initializing,
    /// or the pool configuration is invalid
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The transport failed to connect or reported a fatal fault
    #[error("Connection error: {0}")]
    Connection(String),

    /// No capacity became available within the acquire timeout
    #[error("Timed out acquiring a connection after {0:?}")]
    AcquireTimeout(Duration),

    /// Disconnecting a connection exceeded the destroy timeout
    #[error("Timed out destroying a connection after {0:?}")]
    DestroyTimeout(Duration),

    /// Disconnecting a connection failed
    #[error("Failed to destroy connection {id}: {message}")]
    Destroy {
        /// Connection that failed to disconnect
        id: ConnectionId,
        /// Transport error text
        message: String,
    },

    /// The remote command failed on an otherwise healthy connection
    #[error("Command {command} failed: {message}")]
    Command {
        /// Command name as sent to the server
        command: String,
        /// Server or transport error text
        message: String,
    },

    /// Reply shape does not match what the operation expects
    #[error("Unexpected reply: {0}")]
    UnexpectedReply(String),

    /// A connection was released that the pool does not track as active
    #[error("Connection {0} is not tracked as active")]
    NotTracked(ConnectionId),

    /// Invalid argument was provided
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// UTF-8 conversion error
    #[error("UTF-8 error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

impl PoolError {
    /// Whether this error reports misuse of a pool that is shutting down
    ///
    /// Guarded reads degrade to empty results on every other failure,
    /// but lifecycle errors are always surfaced.
    pub fn is_lifecycle(&self) -> bool {
        matches!(self, PoolError::PoolClosed | PoolError::PoolDraining)
    }

    /// Whether this error means the connection itself can no longer be trusted
    pub fn is_connection_fault(&self) -> bool {
        matches!(self, PoolError::Connection(_) | PoolError::Io(_))
    }

    /// Builds a command error from any displayable cause
    pub fn command(command: &str, message: impl std::fmt::Display) -> Self {
        PoolError::Command {
            command: command.to_string(),
            message: message.to_string(),
        }
    }
}
