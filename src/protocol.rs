//! Command Arguments and Reply Decoding
//!
//! This module builds positional command arguments and converts raw replies
//! into the Rust types returned by the data operations. It does not know how
//! replies travel over the wire; that is the transport's job.

use std::collections::HashMap;

use bytes::{BufMut, Bytes, BytesMut};

use crate::errors::{PoolError, Result};
use crate::types::Value;

/// Characters with special meaning in a key glob pattern
const GLOB_SPECIAL: &[u8] = b"*?[]\\";

/// Wraps a string as a command argument
pub fn arg(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

/// Wraps an integer as a decimal command argument
pub fn int_arg(n: i64) -> Bytes {
    Bytes::from(n.to_string())
}

/// Builds a `KEYS` pattern matching every key that starts with `prefix`
///
/// Glob characters inside the prefix are escaped so they match literally.
///
/// Examples:
///   - "user:" -> "user:*"
///   - "a*b" -> "a\*b*"
pub fn prefix_pattern(prefix: &str) -> Bytes {
    let mut buf = BytesMut::with_capacity(prefix.len() + 1);
    for &b in prefix.as_bytes() {
        if GLOB_SPECIAL.contains(&b) {
            buf.put_u8(b'\\');
        }
        buf.put_u8(b);
    }
    buf.put_u8(b'*');
    buf.freeze()
}

/// Accepts the OK status reply
pub fn decode_ok(value: Value) -> Result<()> {
    match value {
        Value::Okay => Ok(()),
        Value::Status(s) if s.eq_ignore_ascii_case("OK") => Ok(()),
        other => Err(unexpected("OK", &other)),
    }
}

/// Decodes an integer reply
///
/// Bulk replies holding a decimal integer are accepted as well.
pub fn decode_int(value: Value) -> Result<i64> {
    match value {
        Value::Int(n) => Ok(n),
        Value::Data(data) => std::str::from_utf8(&data)
            .ok()
            .and_then(|s| s.trim().parse().ok())
            .ok_or_else(|| PoolError::UnexpectedReply("bulk reply is not an integer".to_string())),
        other => Err(unexpected("integer", &other)),
    }
}

/// Decodes an integer reply used as a boolean
pub fn decode_bool(value: Value) -> Result<bool> {
    Ok(decode_int(value)? != 0)
}

/// Decodes a bulk reply that may be nil
pub fn decode_optional_bytes(value: Value) -> Result<Option<Bytes>> {
    match value {
        Value::Nil => Ok(None),
        Value::Data(data) => Ok(Some(data)),
        Value::Status(s) => Ok(Some(Bytes::from(s))),
        other => Err(unexpected("bulk", &other)),
    }
}

/// Decodes a bulk reply as a UTF-8 string
pub fn decode_string(value: Value) -> Result<String> {
    match value {
        Value::Data(data) => Ok(String::from_utf8(data.to_vec())?),
        Value::Status(s) => Ok(s),
        other => Err(unexpected("bulk", &other)),
    }
}

/// Decodes a multi-bulk reply of strings
pub fn decode_string_list(value: Value) -> Result<Vec<String>> {
    match value {
        Value::Nil => Ok(Vec::new()),
        Value::Array(items) => items.into_iter().map(decode_string).collect(),
        other => Err(unexpected("array", &other)),
    }
}

/// Decodes a flat field/value multi-bulk reply into a map
pub fn decode_hash(value: Value) -> Result<HashMap<String, Bytes>> {
    let items = match value {
        Value::Nil => return Ok(HashMap::new()),
        Value::Array(items) => items,
        other => return Err(unexpected("array", &other)),
    };
    if items.len() % 2 != 0 {
        return Err(PoolError::UnexpectedReply(format!(
            "hash reply has an odd number of elements: {}",
            items.len()
        )));
    }

    let mut hash = HashMap::with_capacity(items.len() / 2);
    let mut iter = items.into_iter();
    while let (Some(field), Some(value)) = (iter.next(), iter.next()) {
        let field = decode_string(field)?;
        if let Some(value) = decode_optional_bytes(value)? {
            hash.insert(field, value);
        }
    }
    Ok(hash)
}

/// Decodes a blocking pop reply `[key, value]` into the popped value
pub fn decode_pop(value: Value) -> Result<Option<Bytes>> {
    match value {
        Value::Nil => Ok(None),
        Value::Array(items) if items.len() == 2 => {
            let mut iter = items.into_iter();
            let _key = iter.next();
            match iter.next() {
                Some(value) => decode_optional_bytes(value),
                None => Ok(None),
            }
        }
        other => Err(unexpected("two element array", &other)),
    }
}

/// Decodes a TTL reply
///
/// Returns the remaining seconds for a key with an expiry, and None for a
/// missing key (-2) or a key without expiry (-1).
pub fn decode_ttl(value: Value) -> Result<Option<i64>> {
    let ttl = decode_int(value)?;
    Ok(if ttl >= 0 { Some(ttl) } else { None })
}

fn unexpected(expected: &str, got: &Value) -> PoolError {
    PoolError::UnexpectedReply(format!("expected {} reply, got {:?}", expected, got))
}
