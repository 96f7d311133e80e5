//! Connection pool manager
//!
//! Pools are keyed by database URI and shared by every adapter built with
//! the same manager. Each adapter checks a pool out on connect and returns
//! it on disconnect; the pool closes when its last user leaves.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::info;

use crate::errors::{DbError, DbResult};

/// Pool sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum open connections
    pub max_connections: u32,
    /// How long an operation waits for a free connection
    pub acquire_timeout: Duration,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 1,
            acquire_timeout: Duration::from_millis(500),
        }
    }
}

struct PoolEntry {
    pool: SqlitePool,
    users: usize,
}

/// Owns the pools of every relational adapter built from it
#[derive(Default)]
pub struct PoolManager {
    pools: Mutex<HashMap<String, PoolEntry>>,
}

impl PoolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or reuse) the pool for `uri`
    pub async fn checkout(&self, uri: &str, settings: PoolSettings) -> DbResult<SqlitePool> {
        let mut pools = self.pools.lock().await;
        if let Some(entry) = pools.get_mut(uri) {
            entry.users += 1;
            return Ok(entry.pool.clone());
        }

        let options = SqliteConnectOptions::from_str(uri)
            .map_err(|e| DbError::unavailable(format!("invalid database uri {}: {}", uri, e)))?
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(settings.max_connections.max(1))
            .acquire_timeout(settings.acquire_timeout)
            .connect_with(options)
            .await
            .map_err(|e| DbError::unavailable(format!("cannot open {}: {}", uri, e)))?;

        info!(
            uri = %uri,
            max_connections = settings.max_connections,
            "relational pool opened"
        );
        pools.insert(
            uri.to_string(),
            PoolEntry {
                pool: pool.clone(),
                users: 1,
            },
        );
        Ok(pool)
    }

    /// Give a pool back; the last user closes it
    pub async fn release(&self, uri: &str) {
        let mut pools = self.pools.lock().await;
        let Some(entry) = pools.get_mut(uri) else {
            return;
        };
        entry.users = entry.users.saturating_sub(1);
        if entry.users > 0 {
            return;
        }
        if let Some(entry) = pools.remove(uri) {
            drop(pools);
            entry.pool.close().await;
            info!(uri = %uri, "relational pool closed");
        }
    }

    /// Close every pool regardless of users
    pub async fn close_all(&self) {
        let drained: Vec<(String, PoolEntry)> = self.pools.lock().await.drain().collect();
        for (uri, entry) in drained {
            entry.pool.close().await;
            info!(uri = %uri, "relational pool closed");
        }
    }

    /// Number of open pools
    pub async fn open_pools(&self) -> usize {
        self.pools.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shared_pool_closes_with_last_user() {
        let dir = tempfile::tempdir().unwrap();
        let uri = format!("sqlite://{}", dir.path().join("shared.db").display());
        let manager = PoolManager::new();

        let first = manager.checkout(&uri, PoolSettings::default()).await.unwrap();
        let _second = manager.checkout(&uri, PoolSettings::default()).await.unwrap();
        assert_eq!(manager.open_pools().await, 1);

        manager.release(&uri).await;
        assert!(!first.is_closed());
        assert_eq!(manager.open_pools().await, 1);

        manager.release(&uri).await;
        assert!(first.is_closed());
        assert_eq!(manager.open_pools().await, 0);
    }

    #[tokio::test]
    async fn test_invalid_uri_is_unavailable() {
        let manager = PoolManager::new();
        let err = manager
            .checkout("sqlite:///nonexistent-dir/missing/db.sqlite", PoolSettings::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ConnectionUnavailable(_)));
    }
}
