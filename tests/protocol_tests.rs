//! Unit tests for reply decoding and command semantics
//!
//! This test module verifies the argument helpers and reply decoders in
//! `kvpool::protocol`, and the command semantics of the in-memory server
//! that the rest of the test suite relies on.

use bytes::Bytes;
use kvpool::protocol::*;
use kvpool::{PoolError, Value};

fn data(s: &'static str) -> Value {
    Value::Data(Bytes::from_static(s.as_bytes()))
}

/// Test suite for argument encoding
#[cfg(test)]
mod argument_tests {
    use super::*;

    /// Test string and integer arguments
    #[test]
    fn test_args() {
        assert_eq!(arg("key"), Bytes::from_static(b"key"));
        assert_eq!(int_arg(-42), Bytes::from_static(b"-42"));
        assert_eq!(int_arg(0), Bytes::from_static(b"0"));
    }

    /// Test the prefix pattern used for key listing
    ///
    /// This test verifies that glob metacharacters in a prefix are escaped
    /// so they match literally.
    #[test]
    fn test_prefix_pattern_escapes_glob() {
        // Arrange: Prefixes with and without metacharacters
        let cases = [
            ("user:", &b"user:*"[..]),
            ("", &b"*"[..]),
            ("a[1]", &b"a\\[1\\]*"[..]),
            ("back\\slash", &b"back\\\\slash*"[..]),
        ];

        // Act & Assert: Verify each encoding
        for (prefix, expected) in cases {
            assert_eq!(
                prefix_pattern(prefix).as_ref(),
                expected,
                "prefix {:?} encoded incorrectly",
                prefix
            );
        }
    }
}

/// Test suite for reply decoders
///
/// These tests verify that each decoder accepts the reply shapes a server
/// sends and rejects everything else as an unexpected reply.
#[cfg(test)]
mod decode_tests {
    use super::*;

    /// Test decoding OK replies
    #[test]
    fn test_decode_ok() {
        assert!(decode_ok(Value::Okay).is_ok());
        assert!(decode_ok(Value::Status("ok".to_string())).is_ok());
        assert!(matches!(
            decode_ok(Value::Nil),
            Err(PoolError::UnexpectedReply(_))
        ));
    }

    /// Test decoding integer replies
    #[test]
    fn test_decode_int() {
        assert_eq!(decode_int(Value::Int(7)).unwrap(), 7);
        assert_eq!(decode_int(data("-3")).unwrap(), -3);
        assert!(decode_int(data("seven")).is_err());
        assert!(decode_int(Value::Nil).is_err());
    }

    /// Test decoding boolean replies
    #[test]
    fn test_decode_bool() {
        assert!(decode_bool(Value::Int(1)).unwrap());
        assert!(!decode_bool(Value::Int(0)).unwrap());
    }

    /// Test decoding optional bulk replies
    #[test]
    fn test_decode_optional_bytes() {
        assert_eq!(decode_optional_bytes(Value::Nil).unwrap(), None);
        assert_eq!(
            decode_optional_bytes(data("v")).unwrap(),
            Some(Bytes::from_static(b"v"))
        );
        assert!(decode_optional_bytes(Value::Int(1)).is_err());
    }

    /// Test decoding string lists
    ///
    /// This test verifies that key listings decode in reply order and that
    /// non-UTF-8 entries are rejected.
    #[test]
    fn test_decode_string_list() {
        // Arrange: A listing reply and a binary entry
        let reply = Value::Array(vec![data("a"), data("b")]);
        let binary = Value::Array(vec![Value::Data(Bytes::from_static(&[0xff, 0xfe]))]);

        // Act & Assert: Verify decoding
        assert_eq!(decode_string_list(reply).unwrap(), vec!["a", "b"]);
        assert!(decode_string_list(Value::Nil).unwrap().is_empty());
        assert!(matches!(decode_string_list(binary), Err(PoolError::Utf8(_))));
    }

    /// Test decoding hash replies
    #[test]
    fn test_decode_hash() {
        let reply = Value::Array(vec![data("name"), data("Ada"), data("lang"), data("en")]);

        let hash = decode_hash(reply).unwrap();

        assert_eq!(hash.len(), 2);
        assert_eq!(hash.get("name"), Some(&Bytes::from_static(b"Ada")));
        assert!(decode_hash(Value::Array(vec![])).unwrap().is_empty());
        assert!(decode_hash(Value::Int(0)).is_err());
    }

    /// Test decoding blocking pop replies
    ///
    /// This test verifies that the key half of the reply is dropped and a
    /// timed-out pop decodes to None.
    #[test]
    fn test_decode_pop() {
        assert_eq!(
            decode_pop(Value::Array(vec![data("queue"), data("job")])).unwrap(),
            Some(Bytes::from_static(b"job"))
        );
        assert_eq!(decode_pop(Value::Nil).unwrap(), None);
        assert!(decode_pop(Value::Array(vec![data("queue")])).is_err());
    }

    /// Test decoding TTL replies
    #[test]
    fn test_decode_ttl() {
        assert_eq!(decode_ttl(Value::Int(42)).unwrap(), Some(42));
        assert_eq!(decode_ttl(Value::Int(0)).unwrap(), Some(0));
        assert_eq!(decode_ttl(Value::Int(-1)).unwrap(), None);
        assert_eq!(decode_ttl(Value::Int(-2)).unwrap(), None);
    }
}

/// Test suite for the in-memory server's command semantics
///
/// These tests go through the raw command path so that every reply shape
/// is checked before it reaches a decoder.
#[cfg(test)]
mod memory_command_tests {
    use super::*;
    use kvpool::{MemoryServer, Pool, PoolConfig};
    use std::time::Duration;

    async fn pool() -> Pool {
        Pool::connect(PoolConfig::new(MemoryServer::new()))
            .await
            .unwrap()
    }

    /// Test SET options and the replies of string commands
    #[tokio::test]
    async fn test_string_commands() {
        let pool = pool().await;

        let reply = pool
            .send_command("SET", &[arg("k"), arg("v"), arg("PX"), int_arg(60_000)])
            .await
            .unwrap();
        assert_eq!(reply, Value::Okay);
        assert_eq!(pool.send_command("GET", &[arg("k")]).await.unwrap(), data("v"));
        assert_eq!(
            pool.send_command("GET", &[arg("missing")]).await.unwrap(),
            Value::Nil
        );
        assert_eq!(
            pool.send_command("EXISTS", &[arg("k"), arg("missing")]).await.unwrap(),
            Value::Int(1)
        );
        assert_eq!(pool.send_command("TTL", &[arg("k")]).await.unwrap(), Value::Int(60));
        assert_eq!(
            pool.send_command("TTL", &[arg("missing")]).await.unwrap(),
            Value::Int(-2)
        );
    }

    /// Test that expired keys disappear
    #[tokio::test(start_paused = true)]
    async fn test_key_expiry() {
        let pool = pool().await;
        pool.set("short", "v", Some(1)).await.unwrap();

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert_eq!(pool.get("short").await.unwrap(), None);
        assert!(pool.keys("").await.unwrap().is_empty());
    }

    /// Test argument validation
    #[tokio::test]
    async fn test_command_errors() {
        let pool = pool().await;

        let arity = pool.send_command("GET", &[]).await;
        let syntax = pool
            .send_command("SET", &[arg("k"), arg("v"), arg("NX?"), int_arg(1)])
            .await;
        let hset = pool.send_command("HSET", &[arg("h"), arg("f")]).await;

        assert!(matches!(arity, Err(PoolError::Command { .. })));
        assert!(matches!(syntax, Err(PoolError::Command { .. })));
        assert!(matches!(hset, Err(PoolError::Command { .. })));
    }

    /// Test expiry times too far in the future
    ///
    /// This test verifies that an expiry beyond what the clock can represent
    /// is rejected as a command error and leaves the key untouched.
    #[tokio::test]
    async fn test_expiry_out_of_range() {
        // Arrange: One key without expiry
        let pool = pool().await;
        pool.set("k", "v", None).await.unwrap();

        // Act: Set and extend expiries that overflow the clock
        let set = pool.set("k", "w", Some(u64::MAX)).await;
        let px = pool
            .send_command("SET", &[arg("k"), arg("w"), arg("PX"), arg(&u64::MAX.to_string())])
            .await;
        let expire = pool.expire("k", u64::MAX).await;

        // Assert: Verify each is a command error and the key is unchanged
        assert!(matches!(set, Err(PoolError::Command { .. })));
        assert!(matches!(px, Err(PoolError::Command { .. })));
        assert!(matches!(expire, Err(PoolError::Command { .. })));
        assert_eq!(pool.get("k").await.unwrap(), Some(Bytes::from("v")));
        assert_eq!(pool.ttl("k").await.unwrap(), None);
    }

    /// Test that commands are case-insensitive
    #[tokio::test]
    async fn test_lowercase_commands() {
        let pool = pool().await;

        assert_eq!(
            pool.send_command("rpush", &[arg("l"), arg("a"), arg("b")]).await.unwrap(),
            Value::Int(2)
        );
        assert_eq!(pool.send_command("lpop", &[arg("l")]).await.unwrap(), data("a"));
        assert_eq!(pool.send_command("rpop", &[arg("l")]).await.unwrap(), data("b"));
        assert_eq!(pool.send_command("rpop", &[arg("l")]).await.unwrap(), Value::Nil);
    }

    /// Test a blocking pop with a finite timeout
    #[tokio::test(start_paused = true)]
    async fn test_blocking_pop_times_out() {
        let pool = pool().await;

        let reply = pool
            .send_command("BLPOP", &[arg("empty"), arg("1")])
            .await
            .unwrap();

        assert_eq!(reply, Value::Nil);
        assert_eq!(pool.stats().idle, 1);
    }
}
