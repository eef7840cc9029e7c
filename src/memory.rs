//! In-Memory Transport
//!
//! An in-process server implementing the command subset the pool exposes,
//! with knobs to refuse, delay, break or fault its sessions. It lets the pool
//! be exercised deterministically without a live server.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::errors::{PoolError, Result};
use crate::transport::{FaultReporter, Transport, TransportFactory};
use crate::types::{ConnectionId, Value};

enum Stored {
    Str(Bytes),
    Hash(HashMap<String, Bytes>),
    List(VecDeque<Bytes>),
}

struct Entry {
    value: Stored,
    expires_at: Option<Instant>,
}

struct Session {
    id: ConnectionId,
    broken: Arc<AtomicBool>,
    faults: FaultReporter,
}

#[derive(Default)]
struct Shared {
    store: Mutex<HashMap<String, Entry>>,
    sessions: Mutex<Vec<Session>>,
    pushed: Notify,
    refuse: AtomicBool,
    fault_on_connect: AtomicBool,
    connect_delay: Mutex<Option<Duration>>,
    disconnect_delay: Mutex<Option<Duration>>,
    connects: AtomicUsize,
    disconnects: AtomicUsize,
}

/// In-process key-value server
///
/// Cloning yields another handle to the same server.
#[derive(Clone, Default)]
pub struct MemoryServer {
    shared: Arc<Shared>,
}

impl MemoryServer {
    /// Creates an empty server
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes new connection attempts fail
    pub fn refuse_connections(&self, refuse: bool) {
        self.shared.refuse.store(refuse, Ordering::SeqCst);
    }

    /// Makes new sessions report a fault while connecting
    pub fn fault_on_connect(&self, fault: bool) {
        self.shared.fault_on_connect.store(fault, Ordering::SeqCst);
    }

    /// Delays every connection attempt
    pub fn set_connect_delay(&self, delay: Option<Duration>) {
        *self.shared.connect_delay.lock() = delay;
    }

    /// Delays every disconnect
    pub fn set_disconnect_delay(&self, delay: Option<Duration>) {
        *self.shared.disconnect_delay.lock() = delay;
    }

    /// Silently breaks every open session; their next command fails
    pub fn break_connections(&self) {
        for session in self.shared.sessions.lock().iter() {
            session.broken.store(true, Ordering::SeqCst);
        }
    }

    /// Breaks one session and reports the fault to its pool
    pub fn kill_connection(&self, id: ConnectionId) -> bool {
        let sessions = self.shared.sessions.lock();
        match sessions.iter().find(|s| s.id == id) {
            Some(session) => {
                session.broken.store(true, Ordering::SeqCst);
                session.faults.report("connection killed by server");
                true
            }
            None => false,
        }
    }

    /// Number of successful connects so far
    pub fn connects(&self) -> usize {
        self.shared.connects.load(Ordering::SeqCst)
    }

    /// Number of disconnects so far
    pub fn disconnects(&self) -> usize {
        self.shared.disconnects.load(Ordering::SeqCst)
    }

    /// Number of sessions currently open
    pub fn open_sessions(&self) -> usize {
        self.shared.sessions.lock().len()
    }

    /// Ids of the sessions currently open
    pub fn session_ids(&self) -> Vec<ConnectionId> {
        self.shared.sessions.lock().iter().map(|s| s.id).collect()
    }
}

impl TransportFactory for MemoryServer {
    fn transport(&self) -> Box<dyn Transport> {
        Box::new(MemoryTransport {
            server: self.clone(),
            session: None,
        })
    }

    fn endpoint(&self) -> String {
        "memory".to_string()
    }
}

/// One session to a [`MemoryServer`]
pub struct MemoryTransport {
    server: MemoryServer,
    session: Option<(ConnectionId, Arc<AtomicBool>)>,
}

impl MemoryTransport {
    fn check_open(&self) -> Result<()> {
        match &self.session {
            Some((_, broken)) if broken.load(Ordering::SeqCst) => {
                Err(PoolError::Connection("connection reset by peer".to_string()))
            }
            Some(_) => Ok(()),
            None => Err(PoolError::Connection("transport is not connected".to_string())),
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self, faults: FaultReporter) -> Result<()> {
        let shared = &self.server.shared;
        let delay = *shared.connect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if shared.refuse.load(Ordering::SeqCst) {
            return Err(PoolError::Connection("connection refused".to_string()));
        }

        let id = faults.connection_id();
        let broken = Arc::new(AtomicBool::new(false));
        shared.sessions.lock().push(Session {
            id,
            broken: broken.clone(),
            faults: faults.clone(),
        });
        shared.connects.fetch_add(1, Ordering::SeqCst);
        self.session = Some((id, broken.clone()));

        if shared.fault_on_connect.load(Ordering::SeqCst) {
            broken.store(true, Ordering::SeqCst);
            faults.report("session faulted during handshake");
        }
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        let Some((id, _)) = self.session.take() else {
            return Ok(());
        };
        let delay = *self.server.shared.disconnect_delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.server.shared.sessions.lock().retain(|s| s.id != id);
        self.server.shared.disconnects.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn ping(&mut self) -> Result<()> {
        self.check_open()
    }

    async fn command(&mut self, name: &str, args: &[Bytes]) -> Result<Value> {
        self.check_open()?;
        let name = name.to_ascii_uppercase();
        match name.as_str() {
            "BLPOP" | "BRPOP" => self.blocking_pop(&name, args).await,
            _ => execute(&self.server.shared, &name, args),
        }
    }
}

impl MemoryTransport {
    async fn blocking_pop(&self, name: &str, args: &[Bytes]) -> Result<Value> {
        if args.len() < 2 {
            return Err(wrong_arity(name));
        }
        let keys: Vec<String> = args[..args.len() - 1]
            .iter()
            .map(text)
            .collect::<Result<_>>()?;
        let seconds: f64 = parse_number(name, &args[args.len() - 1])?;
        let deadline = (seconds > 0.0).then(|| Instant::now() + Duration::from_secs_f64(seconds));
        let front = name == "BLPOP";
        let shared = &self.server.shared;

        loop {
            let pushed = shared.pushed.notified();
            tokio::pin!(pushed);
            pushed.as_mut().enable();

            for key in &keys {
                if let Some(value) = pop(shared, key, front)? {
                    return Ok(Value::Array(vec![
                        Value::Data(Bytes::from(key.clone())),
                        Value::Data(value),
                    ]));
                }
            }
            self.check_open()?;

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, pushed).await.is_err() {
                        return Ok(Value::Nil);
                    }
                }
                None => pushed.await,
            }
        }
    }
}

fn execute(shared: &Shared, name: &str, args: &[Bytes]) -> Result<Value> {
    let mut store = shared.store.lock();
    purge_expired(&mut store);

    match name {
        "PING" => Ok(Value::Status("PONG".to_string())),
        "GET" => {
            let key = key_arg(name, args, 1)?;
            match store.get(&key) {
                None => Ok(Value::Nil),
                Some(Entry { value: Stored::Str(v), .. }) => Ok(Value::Data(v.clone())),
                Some(_) => Err(wrong_type(name)),
            }
        }
        "SET" => {
            let key = key_arg(name, args, 2)?;
            let mut expires_at = None;
            let mut rest = args[2..].iter();
            while let Some(option) = rest.next() {
                let option = text(option)?.to_ascii_uppercase();
                let amount = rest.next().ok_or_else(|| PoolError::command(name, "syntax error"))?;
                let amount: u64 = parse_number(name, amount)?;
                expires_at = Some(match option.as_str() {
                    "EX" => expiry(name, Duration::from_secs(amount))?,
                    "PX" => expiry(name, Duration::from_millis(amount))?,
                    _ => return Err(PoolError::command(name, "syntax error")),
                });
            }
            store.insert(
                key,
                Entry {
                    value: Stored::Str(args[1].clone()),
                    expires_at,
                },
            );
            Ok(Value::Okay)
        }
        "DEL" => {
            if args.is_empty() {
                return Err(wrong_arity(name));
            }
            let mut removed = 0;
            for key in args {
                if store.remove(&text(key)?).is_some() {
                    removed += 1;
                }
            }
            Ok(Value::Int(removed))
        }
        "EXISTS" => {
            if args.is_empty() {
                return Err(wrong_arity(name));
            }
            let mut found = 0;
            for key in args {
                if store.contains_key(&text(key)?) {
                    found += 1;
                }
            }
            Ok(Value::Int(found))
        }
        "EXPIRE" => {
            let key = key_arg(name, args, 2)?;
            let seconds: u64 = parse_number(name, &args[1])?;
            match store.get_mut(&key) {
                Some(entry) => {
                    entry.expires_at = Some(expiry(name, Duration::from_secs(seconds))?);
                    Ok(Value::Int(1))
                }
                None => Ok(Value::Int(0)),
            }
        }
        "TTL" => {
            let key = key_arg(name, args, 1)?;
            Ok(Value::Int(match store.get(&key) {
                None => -2,
                Some(Entry { expires_at: None, .. }) => -1,
                Some(Entry {
                    expires_at: Some(at), ..
                }) => {
                    let remaining = at.saturating_duration_since(Instant::now());
                    // Round up like the server does for partially elapsed seconds.
                    remaining.as_millis().div_ceil(1000) as i64
                }
            }))
        }
        "INCR" => {
            let key = key_arg(name, args, 1)?;
            let entry = store.entry(key).or_insert_with(|| Entry {
                value: Stored::Str(Bytes::from_static(b"0")),
                expires_at: None,
            });
            let Stored::Str(current) = &entry.value else {
                return Err(wrong_type(name));
            };
            let n: i64 = parse_number(name, current)?;
            let next = n
                .checked_add(1)
                .ok_or_else(|| PoolError::command(name, "increment or decrement would overflow"))?;
            entry.value = Stored::Str(Bytes::from(next.to_string()));
            Ok(Value::Int(next))
        }
        "KEYS" => {
            let pattern = key_arg(name, args, 1)?;
            let mut keys: Vec<&String> = store.keys().filter(|k| glob_match(&pattern, k)).collect();
            keys.sort();
            Ok(Value::Array(
                keys.into_iter()
                    .map(|k| Value::Data(Bytes::from(k.clone())))
                    .collect(),
            ))
        }
        "HGET" => {
            let key = key_arg(name, args, 2)?;
            let field = text(&args[1])?;
            match store.get(&key) {
                None => Ok(Value::Nil),
                Some(Entry { value: Stored::Hash(h), .. }) => {
                    Ok(h.get(&field).cloned().map(Value::Data).unwrap_or(Value::Nil))
                }
                Some(_) => Err(wrong_type(name)),
            }
        }
        "HSET" => {
            let key = key_arg(name, args, 3)?;
            if args.len() % 2 == 0 {
                return Err(wrong_arity(name));
            }
            let entry = store.entry(key).or_insert_with(|| Entry {
                value: Stored::Hash(HashMap::new()),
                expires_at: None,
            });
            let Stored::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(name));
            };
            let mut added = 0;
            for pair in args[1..].chunks(2) {
                if hash.insert(text(&pair[0])?, pair[1].clone()).is_none() {
                    added += 1;
                }
            }
            Ok(Value::Int(added))
        }
        "HGETALL" => {
            let key = key_arg(name, args, 1)?;
            match store.get(&key) {
                None => Ok(Value::Array(Vec::new())),
                Some(Entry { value: Stored::Hash(h), .. }) => {
                    let mut fields: Vec<(&String, &Bytes)> = h.iter().collect();
                    fields.sort_by(|a, b| a.0.cmp(b.0));
                    let mut items = Vec::with_capacity(fields.len() * 2);
                    for (f, v) in fields {
                        items.push(Value::Data(Bytes::from(f.clone())));
                        items.push(Value::Data(v.clone()));
                    }
                    Ok(Value::Array(items))
                }
                Some(_) => Err(wrong_type(name)),
            }
        }
        "HDEL" => {
            let key = key_arg(name, args, 2)?;
            let Some(entry) = store.get_mut(&key) else {
                return Ok(Value::Int(0));
            };
            let Stored::Hash(hash) = &mut entry.value else {
                return Err(wrong_type(name));
            };
            let mut removed = 0;
            for field in &args[1..] {
                if hash.remove(&text(field)?).is_some() {
                    removed += 1;
                }
            }
            if hash.is_empty() {
                store.remove(&key);
            }
            Ok(Value::Int(removed))
        }
        "LPUSH" | "RPUSH" => {
            let key = key_arg(name, args, 2)?;
            let entry = store.entry(key).or_insert_with(|| Entry {
                value: Stored::List(VecDeque::new()),
                expires_at: None,
            });
            let Stored::List(list) = &mut entry.value else {
                return Err(wrong_type(name));
            };
            for value in &args[1..] {
                if name == "LPUSH" {
                    list.push_front(value.clone());
                } else {
                    list.push_back(value.clone());
                }
            }
            let len = list.len() as i64;
            drop(store);
            shared.pushed.notify_waiters();
            Ok(Value::Int(len))
        }
        "LPOP" | "RPOP" => {
            let key = key_arg(name, args, 1)?;
            drop(store);
            Ok(pop(shared, &key, name == "LPOP")?
                .map(Value::Data)
                .unwrap_or(Value::Nil))
        }
        _ => Err(PoolError::command(name, "unknown command")),
    }
}

fn pop(shared: &Shared, key: &str, front: bool) -> Result<Option<Bytes>> {
    let mut store = shared.store.lock();
    let Some(entry) = store.get_mut(key) else {
        return Ok(None);
    };
    let Stored::List(list) = &mut entry.value else {
        return Err(wrong_type("POP"));
    };
    let value = if front { list.pop_front() } else { list.pop_back() };
    if list.is_empty() {
        store.remove(key);
    }
    Ok(value)
}

/// Drops every expired key
fn purge_expired(store: &mut HashMap<String, Entry>) {
    let now = Instant::now();
    store.retain(|_, e| e.expires_at.map_or(true, |at| at > now));
}

fn key_arg(name: &str, args: &[Bytes], min_args: usize) -> Result<String> {
    if args.len() < min_args {
        return Err(wrong_arity(name));
    }
    text(&args[0])
}

fn text(arg: &Bytes) -> Result<String> {
    Ok(String::from_utf8(arg.to_vec())?)
}

fn parse_number<T: std::str::FromStr>(name: &str, arg: &Bytes) -> Result<T> {
    std::str::from_utf8(arg)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| PoolError::command(name, "value is not an integer or out of range"))
}

fn expiry(name: &str, after: Duration) -> Result<Instant> {
    Instant::now()
        .checked_add(after)
        .ok_or_else(|| PoolError::command(name, "invalid expire time"))
}

fn wrong_arity(name: &str) -> PoolError {
    PoolError::command(name, "wrong number of arguments")
}

fn wrong_type(name: &str) -> PoolError {
    PoolError::command(
        name,
        "WRONGTYPE Operation against a key holding the wrong kind of value",
    )
}

/// Glob matching with `*`, `?` and backslash escapes
fn glob_match(pattern: &str, text: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let t: Vec<char> = text.chars().collect();
    let (mut pi, mut ti) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ti < t.len() {
        if pi < p.len() {
            match p[pi] {
                '*' => {
                    star = Some((pi, ti));
                    pi += 1;
                    continue;
                }
                '?' => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                '\\' if pi + 1 < p.len() && p[pi + 1] == t[ti] => {
                    pi += 2;
                    ti += 1;
                    continue;
                }
                c if c != '\\' && c == t[ti] => {
                    pi += 1;
                    ti += 1;
                    continue;
                }
                _ => {}
            }
        }
        match star {
            Some((sp, st)) => {
                pi = sp + 1;
                ti = st + 1;
                star = Some((sp, st + 1));
            }
            None => return false,
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glob_match() {
        assert!(glob_match("user:*", "user:1"));
        assert!(glob_match("*", ""));
        assert!(glob_match("a?c", "abc"));
        assert!(!glob_match("user:*", "account:1"));
        assert!(glob_match("a\\*b*", "a*bc"));
        assert!(!glob_match("a\\*b*", "axbc"));
    }
}
