//! kvpool Connection Pool Example
//!
//! This example demonstrates how the pool behaves under pressure and failure,
//! using the in-memory server so every scenario is reproducible.
//!
//! Key Topics Covered:
//! - Callers queuing when the pool is full
//! - Acquire timeouts
//! - Out-of-band eviction of faulted connections
//! - Pool notifications
//! - Named pools through the registry
//!
//! Run this example with:
//! ```bash
//! cargo run --example connection_pool_example
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use kvpool::{MemoryServer, PoolConfig, PoolError};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("kvpool=info"))
        .with_target(false)
        .init();

    println!("kvpool - Connection Pool Example");
    println!("{}", "=".repeat(50));

    let server = MemoryServer::new();
    server.set_connect_delay(Some(Duration::from_millis(5)));

    // Example 1: More callers than connections
    println!("\n1. Twenty callers sharing two connections");
    let config = PoolConfig::new(server.clone()).with_max_connections(2);
    let pool = kvpool::get_or_create("example", config).await?;
    let start = Instant::now();
    let results = join_all((0..20).map(|_| pool.incr("example:counter"))).await;
    println!(
        "   {} increments in {:?}, {} connections opened",
        results.iter().filter(|r| r.is_ok()).count(),
        start.elapsed(),
        server.connects()
    );
    println!("   Stats: {:?}", pool.stats());

    // Example 2: Acquire timeout
    println!("\n2. Waiting for a connection that never comes back");
    let strict = kvpool::ConnectionPool::new(
        PoolConfig::new(server.clone())
            .with_max_connections(1)
            .with_acquire_timeout(100),
    )?;
    strict.initialize().await?;
    let held = strict.acquire().await?;
    match strict.acquire().await {
        Err(PoolError::AcquireTimeout(after)) => println!("   Timed out after {:?}", after),
        other => println!("   Unexpected: {:?}", other.map(|c| c.id())),
    }
    strict.release(held)?;
    strict.shutdown().await;

    // Example 3: A connection killed by the server
    println!("\n3. Server kills an idle connection");
    let mut events = pool.subscribe();
    if let Some(id) = server.session_ids().first().copied() {
        server.kill_connection(id);
        for _ in 0..2 {
            match tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
                Ok(Ok(event)) => println!("   Event: {:?}", event),
                _ => break,
            }
        }
    }
    println!("   Stats after eviction: {:?}", pool.stats());

    // Example 4: The registry hands out the same pool
    println!("\n4. Looking the pool up by name");
    let again = kvpool::get_or_create("example", PoolConfig::new(server.clone())).await?;
    println!("   Same pool: {}", Arc::ptr_eq(&pool, &again));

    pool.shutdown().await;
    println!("\n   Open sessions after shutdown: {}", server.open_sessions());

    println!("\n{}", "=".repeat(50));
    println!("Example completed successfully!");
    Ok(())
}
