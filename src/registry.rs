//! Pool Registry
//!
//! Maps caller-chosen identifiers to a single initialized pool each.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::Pool;
use crate::errors::Result;
use crate::types::PoolConfig;

type Slot = Arc<OnceCell<Arc<Pool>>>;

/// Identifier to pool table
///
/// Concurrent first requests for the same identifier share one
/// construction; later requests get the same pool and their config is
/// ignored. A construction that fails leaves the identifier free for a retry.
#[derive(Default)]
pub struct PoolRegistry {
    pools: Mutex<HashMap<String, Slot>>,
}

static GLOBAL: OnceLock<PoolRegistry> = OnceLock::new();

impl PoolRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Process-wide registry
    pub fn global() -> &'static PoolRegistry {
        GLOBAL.get_or_init(PoolRegistry::new)
    }

    /// Returns the pool registered under `identifier`, creating it on first use
    pub async fn get_or_create(&self, identifier: &str, config: PoolConfig) -> Result<Arc<Pool>> {
        let slot = {
            let mut pools = self.pools.lock();
            pools.entry(identifier.to_string()).or_default().clone()
        };

        let pool = slot
            .get_or_try_init(|| async {
                debug!(identifier, "creating pool");
                Pool::connect(config).await.map(Arc::new)
            })
            .await?;
        Ok(pool.clone())
    }

    /// Returns the pool registered under `identifier` if it finished initializing
    pub fn get(&self, identifier: &str) -> Option<Arc<Pool>> {
        self.pools
            .lock()
            .get(identifier)
            .and_then(|slot| slot.get().cloned())
    }

    /// Number of identifiers with an initialized pool
    pub fn len(&self) -> usize {
        self.pools
            .lock()
            .values()
            .filter(|slot| slot.initialized())
            .count()
    }

    /// Whether no pool has been initialized
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Returns the pool registered under `identifier` in the process-wide registry
pub async fn get_or_create(identifier: &str, config: PoolConfig) -> Result<Arc<Pool>> {
    PoolRegistry::global().get_or_create(identifier, config).await
}
