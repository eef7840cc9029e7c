//! Basic kvpool Usage Example
//!
//! This example demonstrates the fundamental operations of the pool:
//! - Connecting a pool to a server
//! - Writing and reading strings with an expiry
//! - Working with hashes and lists
//! - Shutting the pool down
//!
//! It talks to a Redis server when REDIS_URL is set and falls back to the
//! in-memory server otherwise.
//!
//! Run this example with:
//! ```bash
//! cargo run --example basic_usage
//! ```

use kvpool::{MemoryServer, Pool, PoolConfig};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new("kvpool=debug"))
        .with_target(false)
        .init();

    println!("kvpool - Basic Usage Example");
    println!("{}", "=".repeat(50));

    // Step 1: Configure the pool
    let config = match std::env::var("REDIS_URL") {
        Ok(url) => PoolConfig::redis(&url)?,
        Err(_) => PoolConfig::new(MemoryServer::new()),
    }
    .with_max_connections(4)
    .with_acquire_timeout(5_000);
    println!("Endpoint: {}", config.connection_options.endpoint());

    // Step 2: Create the pool; this opens the first connection
    let pool = Pool::connect(config).await?;

    // Example 1: Strings with an expiry
    println!("\n1. Writing a session token...");
    pool.set("demo:session", "token-123", Some(60)).await?;
    let token = pool.get("demo:session").await?;
    let ttl = pool.ttl("demo:session").await?;
    println!("   Token: {:?}", token.map(|t| String::from_utf8_lossy(&t).into_owned()));
    println!("   Expires in: {:?} seconds", ttl);

    // Example 2: Hashes
    println!("\n2. Writing a user record...");
    pool.hset("demo:user:1", "name", "Ada").await?;
    pool.hset("demo:user:1", "lang", "en").await?;
    for (field, value) in pool.hgetall("demo:user:1").await? {
        println!("   {} = {}", field, String::from_utf8_lossy(&value));
    }

    // Example 3: Lists as a work queue
    println!("\n3. Using a list as a queue...");
    pool.rpush("demo:jobs", "job-1").await?;
    pool.rpush("demo:jobs", "job-2").await?;
    while let Some(job) = pool.blpop("demo:jobs").await? {
        println!("   Popped {}", String::from_utf8_lossy(&job));
        if pool.keys("demo:jobs").await?.is_empty() {
            break;
        }
    }

    // Example 4: Pool statistics
    println!("\n4. Pool statistics: {:?}", pool.stats());

    // Clean up
    for key in pool.keys("demo:").await? {
        pool.del(&key).await?;
    }

    // Step 3: Shut the pool down
    pool.shutdown().await;

    println!("\n{}", "=".repeat(50));
    println!("Example completed successfully!");
    Ok(())
}
