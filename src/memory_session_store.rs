// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::session_store::{SessionStore, StoreError};

/// Process-local session store for single-instance deployments and tests.
///
/// Entries carry their expiry instant; expired entries are treated as absent
/// and purged on the next write.
#[derive(Debug, Clone)]
pub struct MemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Instant>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Remaining lifetime of a live session.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let sessions = self.sessions.read().ok()?;
        let expires_at = sessions.get(key)?;
        expires_at.checked_duration_since(Instant::now())
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        let now = Instant::now();
        self.sessions
            .read()
            .map(|sessions| sessions.values().filter(|expires_at| **expires_at > now).count())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        match self.sessions.read() {
            Ok(sessions) => {
                let live = sessions
                    .get(key)
                    .is_some_and(|expires_at| *expires_at > Instant::now());
                debug!(key = %key, live, "[MEMORY_STORE - EXISTS]");
                Ok(live)
            }
            Err(e) => {
                error!("Failed to acquire read lock: {}", e);
                Err(StoreError::Backend(format!("Failed to acquire read lock: {}", e)))
            }
        }
    }

    async fn set_with_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self.sessions.write() {
            Ok(mut sessions) => {
                let now = Instant::now();
                sessions.retain(|_, expires_at| *expires_at > now);
                sessions.insert(key.to_string(), now + ttl);
                debug!(key = %key, ttl = ?ttl, "[MEMORY_STORE - SET]");
                Ok(())
            }
            Err(e) => {
                error!("Failed to acquire write lock: {}", e);
                Err(StoreError::Backend(format!("Failed to acquire write lock: {}", e)))
            }
        }
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        match self.sessions.write() {
            Ok(mut sessions) => {
                let now = Instant::now();
                match sessions.get_mut(key) {
                    Some(expires_at) if *expires_at > now => {
                        *expires_at = now + ttl;
                        debug!(key = %key, ttl = ?ttl, "[MEMORY_STORE - REFRESH]");
                    }
                    _ => debug!(key = %key, "[MEMORY_STORE - REFRESH] no live session"),
                }
                Ok(())
            }
            Err(e) => {
                error!("Failed to acquire write lock for refresh: {}", e);
                Err(StoreError::Backend(format!("Failed to acquire write lock: {}", e)))
            }
        }
    }
}
