// SPDX-License-Identifier: Apache-2.0
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store call timed out after {0:?}")]
    Timeout(Duration),
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
    #[error("session store error: {0}")]
    Backend(String),
}

/// Presence-only key/value store holding unlock sessions.
///
/// Implementations must be safe to share between workers; the gate issues
/// at most three sequential calls per request and never caches results.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Create or overwrite `key` so that it expires after `ttl`.
    async fn set_with_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;

    /// Reset the expiry of an existing key. Missing keys are not an error.
    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError>;
}

/// Shape of session keys in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyScope {
    /// `app:{hostname}:ip:{ip}`
    #[default]
    PerApplication,
    /// `ip:{ip}`, as written by single-application deployments.
    IpOnly,
}

impl KeyScope {
    pub fn session_key(self, hostname: &str, ip: &str) -> String {
        match self {
            KeyScope::PerApplication => format!("app:{}:ip:{}", hostname, ip),
            KeyScope::IpOnly => format!("ip:{}", ip),
        }
    }
}

/// Store handle used by the engine: bounds every call with a timeout and
/// retries `exists`/`set_with_expiry` a fixed number of times.
#[derive(Clone)]
pub struct StoreClient {
    inner: Arc<dyn SessionStore>,
    timeout: Duration,
    retries: u32,
}

impl StoreClient {
    pub fn new(inner: Arc<dyn SessionStore>, timeout: Duration, retries: u32) -> Self {
        Self { inner, timeout, retries }
    }

    pub async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let mut attempt = 0;
        loop {
            match self.bounded(self.inner.exists(key)).await {
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, key = %key, attempt, "Retrying session lookup");
                }
                result => return result,
            }
        }
    }

    pub async fn set_with_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        let mut attempt = 0;
        loop {
            match self.bounded(self.inner.set_with_expiry(key, ttl)).await {
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(error = %e, key = %key, attempt, "Retrying session write");
                }
                result => return result,
            }
        }
    }

    pub async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.bounded(self.inner.refresh_expiry(key, ttl)).await
    }

    async fn bounded<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, StoreError>>,
    ) -> Result<T, StoreError> {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(StoreError::Timeout(self.timeout)))
    }
}
