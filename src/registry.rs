// SPDX-License-Identifier: Apache-2.0
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::allow_list::AllowList;

pub const DEFAULT_SECRET_PATH: &str = "/secret_path";
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(600);

/// Routing and session policy for one protected backend.
#[derive(Debug, Clone)]
pub struct ApplicationPolicy {
    /// Exact, case-sensitive `Host` value (port removed) this policy serves.
    pub hostname: String,
    /// Visiting a path with this prefix unlocks the backend for the client IP.
    pub secret_path_prefix: String,
    /// Base URL requests are forwarded to.
    pub upstream: Url,
    pub allow_list: AllowList,
    pub session_ttl: Duration,
    /// Reset the session TTL on every forwarded request.
    pub auto_renew: bool,
    /// Forward a non-browser client's unlocking request instead of denying it.
    ///
    /// Off by default: historically the first secret-path visit from an app
    /// client creates the session but still answers 403, and only the next
    /// request gets through. Integrations built around that keep working.
    pub forward_on_unlock: bool,
}

impl ApplicationPolicy {
    pub fn new(hostname: impl Into<String>, upstream: Url) -> Self {
        Self {
            hostname: hostname.into(),
            secret_path_prefix: DEFAULT_SECRET_PATH.to_string(),
            upstream,
            allow_list: AllowList::default(),
            session_ttl: DEFAULT_SESSION_TTL,
            auto_renew: true,
            forward_on_unlock: false,
        }
    }
}

/// Immutable hostname → policy map, built once before serving.
#[derive(Debug, Clone, Default)]
pub struct Registry {
    apps: HashMap<String, Arc<ApplicationPolicy>>,
}

impl Registry {
    pub fn new(policies: impl IntoIterator<Item = ApplicationPolicy>) -> Self {
        let apps = policies
            .into_iter()
            .map(|policy| (policy.hostname.clone(), Arc::new(policy)))
            .collect();
        Self { apps }
    }

    /// Look up by hostname; the caller removes any port first (see [`strip_port`]).
    pub fn lookup(&self, hostname: &str) -> Option<Arc<ApplicationPolicy>> {
        self.apps.get(hostname).cloned()
    }

    pub fn len(&self) -> usize {
        self.apps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ApplicationPolicy> {
        self.apps.values().map(|policy| policy.as_ref())
    }
}

/// Drop everything from the first `:` of a `Host` value.
pub fn strip_port(host: &str) -> &str {
    host.split_once(':').map_or(host, |(name, _)| name)
}
