// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use std::time::Duration;
use tracing::{debug, info, instrument};

use crate::session_store::{SessionStore, StoreError};

/// Session store backed by Redis, shared by every gate instance.
///
/// Sessions are written as `SET key 1 PX <ttl>`; only the key's presence is
/// ever read back.
#[derive(Clone)]
pub struct RedisSessionStore {
    conn: ConnectionManager,
}

impl RedisSessionStore {
    /// Connect and verify the server answers `PING`.
    #[instrument(skip(url), err)]
    pub async fn connect(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url)?;
        let mut conn = ConnectionManager::new(client).await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        info!("Connected to redis session store");
        Ok(Self { conn })
    }
}

fn ttl_millis(ttl: Duration) -> u64 {
    u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1)
}

#[async_trait]
impl SessionStore for RedisSessionStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let found: bool = conn.exists(key).await?;
        debug!(key = %key, found, "redis EXISTS");
        Ok(found)
    }

    async fn set_with_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let _: () = conn.pset_ex(key, 1, ttl_millis(ttl)).await?;
        debug!(key = %key, ttl = ?ttl, "redis SET PX");
        Ok(())
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut conn = self.conn.clone();
        let ms = i64::try_from(ttl_millis(ttl)).unwrap_or(i64::MAX);
        let updated: bool = conn.pexpire(key, ms).await?;
        debug!(key = %key, ttl = ?ttl, updated, "redis PEXPIRE");
        Ok(())
    }
}
