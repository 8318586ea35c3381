//! Shared cache tier backed by Redis
//!
//! Every round-trip is bounded by a short timeout. Transport failures are
//! absorbed: reads become misses, writes and deletes become no-ops. The
//! degradation transition is logged once, not per request, and is reported
//! through `health()`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tokio::time::timeout;
use tracing::{info, warn};

use super::backend::{CacheBackend, CacheHealth};

/// Connection setup failure; absorbed at startup by falling back to local-only
#[derive(Debug, thiserror::Error)]
#[error("shared cache tier unavailable: {0}")]
pub struct SharedTierError(#[from] redis::RedisError);

/// Redis-backed shared cache tier
pub struct RedisBackend {
    conn: ConnectionManager,
    op_timeout: Duration,
    degraded: AtomicBool,
}

impl RedisBackend {
    /// Connect to Redis at `url`. The connection manager reconnects on its
    /// own after transient outages.
    pub async fn connect(url: &str, op_timeout: Duration) -> Result<Self, SharedTierError> {
        let client = redis::Client::open(url)?;
        let conn = client.get_connection_manager().await?;
        Ok(Self {
            conn,
            op_timeout,
            degraded: AtomicBool::new(false),
        })
    }

    /// Record the outcome of a round-trip, logging only on state transitions
    fn observe<T>(&self, result: Result<redis::RedisResult<T>, tokio::time::error::Elapsed>) -> Option<T> {
        match result {
            Ok(Ok(value)) => {
                if self.degraded.swap(false, Ordering::Relaxed) {
                    info!("Shared cache tier reachable again");
                }
                Some(value)
            }
            Ok(Err(e)) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!("Shared cache tier degraded, serving from local tier: {}", e);
                }
                None
            }
            Err(_) => {
                if !self.degraded.swap(true, Ordering::Relaxed) {
                    warn!(
                        "Shared cache tier timed out after {:?}, serving from local tier",
                        self.op_timeout
                    );
                }
                None
            }
        }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn get(&self, key: &str) -> Option<Bytes> {
        let mut conn = self.conn.clone();
        let result = timeout(self.op_timeout, conn.get::<_, Option<Vec<u8>>>(key)).await;
        self.observe(result).flatten().map(Bytes::from)
    }

    async fn set(&self, key: &str, value: Bytes, ttl: Option<Duration>) {
        let mut conn = self.conn.clone();
        let result = match ttl {
            Some(ttl) => {
                let secs = ttl.as_secs().max(1);
                timeout(self.op_timeout, conn.set_ex::<_, _, ()>(key, value.as_ref(), secs)).await
            }
            None => timeout(self.op_timeout, conn.set::<_, _, ()>(key, value.as_ref())).await,
        };
        self.observe(result);
    }

    async fn delete(&self, key: &str) {
        let mut conn = self.conn.clone();
        let result = timeout(self.op_timeout, conn.del::<_, ()>(key)).await;
        self.observe(result);
    }

    async fn exists(&self, key: &str) -> bool {
        let mut conn = self.conn.clone();
        let result = timeout(self.op_timeout, conn.exists::<_, bool>(key)).await;
        self.observe(result).unwrap_or(false)
    }

    async fn health(&self) -> CacheHealth {
        let mut conn = self.conn.clone();
        let result = timeout(
            self.op_timeout,
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await;
        CacheHealth {
            available: self.observe(result).is_some(),
            backend: "redis",
        }
    }
}
