//! Redis Transport
//!
//! Transport backed by the `redis` crate. Each transport owns its own socket;
//! the pool, not the driver, decides how many of them exist.

use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

use crate::errors::{PoolError, Result};
use crate::transport::{FaultReporter, Transport, TransportFactory};
use crate::types::Value;

/// Produces Redis transports for one server URL
#[derive(Debug, Clone)]
pub struct RedisTransportFactory {
    client: redis::Client,
    endpoint: String,
}

impl RedisTransportFactory {
    /// Parses a server URL such as `redis://127.0.0.1:6379/0`
    pub fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| PoolError::Configuration(format!("invalid Redis URL {}: {}", url, e)))?;
        Ok(Self {
            client,
            endpoint: url.to_string(),
        })
    }
}

impl TransportFactory for RedisTransportFactory {
    fn transport(&self) -> Box<dyn Transport> {
        Box::new(RedisTransport {
            client: self.client.clone(),
            conn: None,
            faults: None,
        })
    }

    fn endpoint(&self) -> String {
        self.endpoint.clone()
    }
}

/// One Redis session
pub struct RedisTransport {
    client: redis::Client,
    conn: Option<redis::aio::MultiplexedConnection>,
    faults: Option<FaultReporter>,
}

impl RedisTransport {
    fn session(&mut self) -> Result<&mut redis::aio::MultiplexedConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| PoolError::Connection("transport is not connected".to_string()))
    }

    /// Maps a driver error, reporting socket-level failures as faults
    fn fail(&self, command: &str, e: redis::RedisError) -> PoolError {
        if is_fatal(&e) {
            if let Some(faults) = &self.faults {
                faults.report(e.to_string());
            }
            PoolError::Connection(format!("{} failed: {}", command, e))
        } else {
            PoolError::command(command, e)
        }
    }
}

/// Errors after which the socket cannot be trusted
fn is_fatal(e: &redis::RedisError) -> bool {
    e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() || e.is_timeout()
}

#[async_trait]
impl Transport for RedisTransport {
    async fn connect(&mut self, faults: FaultReporter) -> Result<()> {
        let conn = self
            .client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| PoolError::Connection(format!("failed to connect to Redis: {}", e)))?;
        debug!(connection = %faults.connection_id(), "redis session opened");
        self.conn = Some(conn);
        self.faults = Some(faults);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        // The socket closes once the last handle to the session is dropped.
        self.conn.take();
        self.faults.take();
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        let result: redis::RedisResult<String> = {
            let conn = self.session()?;
            redis::cmd("PING").query_async(conn).await
        };
        match result {
            Ok(reply) if reply == "PONG" => Ok(()),
            Ok(reply) => {
                warn!(reply = %reply, "unexpected PING reply");
                Ok(())
            }
            Err(e) => Err(self.fail("PING", e)),
        }
    }

    async fn command(&mut self, name: &str, args: &[Bytes]) -> Result<Value> {
        let mut cmd = redis::cmd(name);
        for a in args {
            cmd.arg(a.as_ref());
        }

        let result: redis::RedisResult<redis::Value> = {
            let conn = self.session()?;
            cmd.query_async(conn).await
        };
        match result {
            Ok(value) => from_redis_value(value, name),
            Err(e) => Err(self.fail(name, e)),
        }
    }
}

/// Converts a driver reply into the pool's reply type
fn from_redis_value(value: redis::Value, command: &str) -> Result<Value> {
    Ok(match value {
        redis::Value::Nil => Value::Nil,
        redis::Value::Int(n) => Value::Int(n),
        redis::Value::BulkString(data) => Value::Data(Bytes::from(data)),
        redis::Value::SimpleString(s) => Value::Status(s),
        redis::Value::Okay => Value::Okay,
        redis::Value::Array(items) | redis::Value::Set(items) => Value::Array(
            items
                .into_iter()
                .map(|v| from_redis_value(v, command))
                .collect::<Result<_>>()?,
        ),
        redis::Value::Map(pairs) => {
            let mut items = Vec::with_capacity(pairs.len() * 2);
            for (k, v) in pairs {
                items.push(from_redis_value(k, command)?);
                items.push(from_redis_value(v, command)?);
            }
            Value::Array(items)
        }
        redis::Value::Double(d) => Value::Data(Bytes::from(d.to_string())),
        redis::Value::Boolean(b) => Value::Int(i64::from(b)),
        redis::Value::VerbatimString { text, .. } => Value::Data(Bytes::from(text)),
        redis::Value::ServerError(err) => {
            return Err(PoolError::command(command, format!("{:?}", err)));
        }
        other => Value::Status(format!("{:?}", other)),
    })
}
