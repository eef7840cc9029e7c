//! Unit tests for the pool registry
//!
//! This test module verifies that identifiers map to exactly one pool,
//! even when many callers ask for the same identifier at once.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use kvpool::{MemoryServer, PoolConfig, PoolError, PoolRegistry};

/// Test concurrent first requests for one identifier
///
/// This test verifies that callers racing on an unseen identifier share
/// a single construction and get the same pool.
#[tokio::test]
async fn test_concurrent_get_or_create_shares_pool() {
    // Arrange: Slow server so the requests overlap
    let server = MemoryServer::new();
    server.set_connect_delay(Some(Duration::from_millis(20)));
    let registry = PoolRegistry::new();

    // Act: Ten concurrent requests
    let pools = join_all(
        (0..10).map(|_| registry.get_or_create("cache", PoolConfig::new(server.clone()))),
    )
    .await;

    // Assert: Verify one pool and one connection
    let pools: Vec<_> = pools.into_iter().map(|p| p.unwrap()).collect();
    assert!(pools.iter().all(|p| Arc::ptr_eq(p, &pools[0])));
    assert_eq!(server.connects(), 1);
    assert_eq!(registry.len(), 1);
}

/// Test that later configs are ignored
#[tokio::test]
async fn test_existing_identifier_ignores_config() {
    let server = MemoryServer::new();
    let registry = PoolRegistry::new();

    let first = registry
        .get_or_create("cache", PoolConfig::new(server.clone()).with_max_connections(2))
        .await
        .unwrap();
    let second = registry
        .get_or_create("cache", PoolConfig::new(server.clone()).with_max_connections(99))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(second.config().max_connections, 2);
}

/// Test distinct identifiers
#[tokio::test]
async fn test_distinct_identifiers() {
    let server = MemoryServer::new();
    let registry = PoolRegistry::new();

    let a = registry
        .get_or_create("a", PoolConfig::new(server.clone()))
        .await
        .unwrap();
    let b = registry
        .get_or_create("b", PoolConfig::new(server.clone()))
        .await
        .unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(registry.len(), 2);
    assert!(registry.get("a").is_some());
    assert!(registry.get("missing").is_none());
}

/// Test that a failed construction can be retried
///
/// This test verifies that an identifier whose pool failed to initialize
/// is not poisoned.
#[tokio::test]
async fn test_failed_creation_is_retried() {
    // Arrange: Server refusing connections
    let server = MemoryServer::new();
    server.refuse_connections(true);
    let registry = PoolRegistry::new();

    // Act: First attempt fails
    let failed = registry
        .get_or_create("cache", PoolConfig::new(server.clone()))
        .await;

    // Assert: Verify nothing was registered
    assert!(matches!(failed, Err(PoolError::Connection(_))));
    assert!(registry.is_empty());
    assert!(registry.get("cache").is_none());

    // Act: Retry once the server accepts
    server.refuse_connections(false);
    let pool = registry
        .get_or_create("cache", PoolConfig::new(server.clone()))
        .await
        .unwrap();

    // Assert: Verify the pool works
    pool.set("k", "v", None).await.unwrap();
    assert_eq!(registry.len(), 1);
}

/// Test the process-wide registry
#[tokio::test]
async fn test_global_registry() {
    let server = MemoryServer::new();

    let first = kvpool::get_or_create("registry-tests-global", PoolConfig::new(server.clone()))
        .await
        .unwrap();
    let second = kvpool::get_or_create("registry-tests-global", PoolConfig::new(server))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(&first, &second));
    assert!(PoolRegistry::global().get("registry-tests-global").is_some());
}
