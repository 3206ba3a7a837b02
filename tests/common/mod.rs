// SPDX-License-Identifier: Apache-2.0
#![allow(dead_code)]

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

use secretgate::allow_list::AllowList;
use secretgate::engine::AccessEngine;
use secretgate::memory_session_store::MemorySessionStore;
use secretgate::registry::{ApplicationPolicy, Registry};
use secretgate::session_store::{KeyScope, SessionStore, StoreClient, StoreError};

pub const APP_HOST: &str = "app.example.com";
pub const OTHER_HOST: &str = "wiki.example.com";
pub const CLIENT_IP: &str = "203.0.113.10";

pub const BROWSER_UA: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:128.0) Gecko/20100101 Firefox/128.0";
pub const ANDROID_UA: &str =
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 Chrome/126.0 Mobile Safari/537.36";
pub const APP_UA: &str = "okhttp/4.12.0";

/// In-memory store that counts calls and can be told to fail.
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemorySessionStore,
    pub exists_calls: AtomicUsize,
    pub set_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub fail_exists: AtomicBool,
    pub fail_set: AtomicBool,
    pub fail_refresh: AtomicBool,
    pub last_set_ttl: Mutex<Option<Duration>>,
}

impl RecordingStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn total_calls(&self) -> usize {
        self.exists_calls.load(Ordering::SeqCst)
            + self.set_calls.load(Ordering::SeqCst)
            + self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sets(&self) -> usize {
        self.set_calls.load(Ordering::SeqCst)
    }

    pub fn refreshes(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub async fn seed(&self, key: &str, ttl: Duration) {
        self.inner.set_with_expiry(key, ttl).await.unwrap();
    }
}

#[async_trait]
impl SessionStore for RecordingStore {
    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        self.exists_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_exists.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("exists unavailable".into()));
        }
        self.inner.exists(key).await
    }

    async fn set_with_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.set_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_set.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("set unavailable".into()));
        }
        *self.last_set_ttl.lock().unwrap() = Some(ttl);
        self.inner.set_with_expiry(key, ttl).await
    }

    async fn refresh_expiry(&self, key: &str, ttl: Duration) -> Result<(), StoreError> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(StoreError::Backend("expire unavailable".into()));
        }
        self.inner.refresh_expiry(key, ttl).await
    }
}

pub fn policy(hostname: &str, upstream: &str) -> ApplicationPolicy {
    ApplicationPolicy::new(hostname, Url::parse(upstream).unwrap())
}

pub fn app_policy() -> ApplicationPolicy {
    let mut policy = policy(APP_HOST, "http://127.0.0.1:9");
    policy.session_ttl = Duration::from_secs(300);
    policy.allow_list = AllowList::parse("10.1.2.").unwrap();
    policy
}

pub fn engine_with(store: Arc<RecordingStore>, policies: Vec<ApplicationPolicy>) -> AccessEngine {
    engine_scoped(store, policies, KeyScope::PerApplication)
}

pub fn engine_scoped(store: Arc<RecordingStore>, policies: Vec<ApplicationPolicy>, scope: KeyScope) -> AccessEngine {
    AccessEngine::new(
        Arc::new(Registry::new(policies)),
        StoreClient::new(store, Duration::from_secs(1), 0),
        scope,
    )
}

pub fn session_key(host: &str, ip: &str) -> String {
    KeyScope::PerApplication.session_key(host, ip)
}
