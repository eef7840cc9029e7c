//! Integration tests against a live Redis server
//!
//! These tests require a running Redis-compatible server.
//! Set the environment variable REDIS_URL to run these tests.
//!
//! Example: REDIS_URL=redis://127.0.0.1:6379/15 cargo test --test integration_tests
//!
//! Every test works under its own key prefix and cleans up after itself,
//! but a dedicated database index is still recommended.

use std::env;
use std::sync::Arc;

use bytes::Bytes;
use futures::future::join_all;
use kvpool::{Pool, PoolConfig, PoolError, Value};

/// Helper function to get the server URL from environment
///
/// This function reads the REDIS_URL environment variable
/// and returns it, or a default value for local testing.
fn get_redis_url() -> String {
    env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".to_string())
}

/// Helper function to check if integration tests should run
///
/// Integration tests are only run when the REDIS_URL
/// environment variable is set, indicating a server is available.
fn should_run_integration_tests() -> bool {
    env::var("REDIS_URL").is_ok()
}

/// Helper function to connect a pool to the configured server
async fn connect(max_connections: usize) -> Pool {
    let config = PoolConfig::redis(&get_redis_url())
        .expect("REDIS_URL should be a valid URL")
        .with_max_connections(max_connections);
    Pool::connect(config)
        .await
        .expect("Pool should connect to the server")
}

/// Helper function to delete every key under a prefix
async fn cleanup(pool: &Pool, prefix: &str) {
    for key in pool.keys(prefix).await.unwrap_or_default() {
        pool.del(&key).await.ok();
    }
}

/// Test the basic string command cycle
///
/// This integration test verifies the entire lifecycle of a key:
/// 1. Set a value with an expiry
/// 2. Read the value and its time to live
/// 3. Delete the key
/// 4. Verify the key no longer exists
#[tokio::test]
async fn test_set_get_del_cycle() {
    // Skip if no server is configured
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    // Arrange: Create pool
    let pool = connect(4).await;
    let key = "kvpool-it:cycle:greeting";

    // Act: Set the key with a TTL
    pool.set(key, "hello", Some(60))
        .await
        .expect("Set should succeed");

    // Assert: Verify value and TTL
    assert_eq!(
        pool.get(key).await.unwrap(),
        Some(Bytes::from_static(b"hello"))
    );
    let ttl = pool.ttl(key).await.unwrap();
    assert!(
        matches!(ttl, Some(t) if t > 0 && t <= 60),
        "TTL should be within (0, 60], got {:?}",
        ttl
    );

    // Act: Delete the key
    assert_eq!(pool.del(key).await.unwrap(), 1);

    // Assert: Verify the key is gone
    assert_eq!(pool.get(key).await.unwrap(), None);
    assert_eq!(pool.ttl(key).await.unwrap(), None);

    pool.shutdown().await;
}

/// Test hash commands
#[tokio::test]
async fn test_hash_commands() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    let pool = connect(2).await;
    let key = "kvpool-it:hash:user";
    pool.del(key).await.unwrap();

    pool.hset(key, "name", "Ada").await.unwrap();
    pool.hset(key, "lang", "en").await.unwrap();
    let all = pool.hgetall(key).await.unwrap();
    let removed = pool.hdel(key, &["lang", "missing"]).await.unwrap();

    assert_eq!(all.len(), 2);
    assert_eq!(all.get("name"), Some(&Bytes::from_static(b"Ada")));
    assert_eq!(removed, 1);
    assert_eq!(pool.hget(key, "lang").await.unwrap(), None);

    pool.del(key).await.unwrap();
    pool.shutdown().await;
}

/// Test counters and key listing
#[tokio::test]
async fn test_incr_and_keys() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    let pool = connect(2).await;
    let prefix = "kvpool-it:keys:";
    cleanup(&pool, prefix).await;

    for i in 0..3 {
        pool.incr(&format!("{}{}", prefix, i)).await.unwrap();
    }
    pool.incr(&format!("{}0", prefix)).await.unwrap();
    let mut keys = pool.keys(prefix).await.unwrap();
    keys.sort();

    assert_eq!(
        keys,
        vec![
            format!("{}0", prefix),
            format!("{}1", prefix),
            format!("{}2", prefix)
        ]
    );
    assert_eq!(
        pool.get(&format!("{}0", prefix)).await.unwrap(),
        Some(Bytes::from_static(b"2"))
    );

    cleanup(&pool, prefix).await;
    pool.shutdown().await;
}

/// Test a blocking pop released by a push from another connection
#[tokio::test]
async fn test_blocking_pop() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    let pool = Arc::new(connect(2).await);
    let key = "kvpool-it:list:jobs";
    pool.del(key).await.unwrap();

    let popper = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.blpop(key).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    pool.rpush(key, "job-1").await.unwrap();

    let popped = popper.await.unwrap().unwrap();
    assert_eq!(popped, Some(Bytes::from_static(b"job-1")));

    pool.shutdown().await;
}

/// Test concurrent operations sharing a small pool
///
/// This integration test verifies that many more callers than
/// connections all complete and the pool never grows past its limit.
#[tokio::test]
async fn test_concurrent_operations() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    // Arrange: Pool of three
    let pool = connect(3).await;
    let key = "kvpool-it:concurrent:counter";
    pool.del(key).await.unwrap();

    // Act: Fifty increments at once
    let results = join_all((0..50).map(|_| pool.incr(key))).await;

    // Assert: Verify all succeeded within the limit
    assert!(results.iter().all(|r| r.is_ok()));
    assert_eq!(
        pool.get(key).await.unwrap(),
        Some(Bytes::from_static(b"50"))
    );
    assert!(pool.stats().total() <= 3);

    pool.del(key).await.unwrap();
    pool.shutdown().await;
}

/// Test raw commands and server errors
#[tokio::test]
async fn test_send_command() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    let pool = connect(2).await;

    let pong = pool.send_command("PING", &[]).await.unwrap();
    let unknown = pool.send_command("KVPOOL-NOT-A-COMMAND", &[]).await;

    assert_eq!(pong, Value::Status("PONG".to_string()));
    assert!(matches!(unknown, Err(PoolError::Command { .. })));
    assert_eq!(pool.stats().active, 0);

    pool.shutdown().await;
}

/// Test connecting to a port nobody listens on
#[tokio::test]
async fn test_connect_unreachable_server() {
    if !should_run_integration_tests() {
        println!("Skipping integration test - set REDIS_URL to run");
        return;
    }

    let config = PoolConfig::redis("redis://127.0.0.1:1").unwrap();

    let result = Pool::connect(config).await;

    assert!(matches!(result, Err(PoolError::Connection(_))));
}
