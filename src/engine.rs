// SPDX-License-Identifier: Apache-2.0
//! Per-request access decision.
//!
//! A request is checked in a fixed order: host lookup, allow-list, session
//! lookup, secret-path unlock, deny, renew, path rewrite. Only the session
//! store is consulted across requests; nothing is cached in process.
use regex::Regex;
use std::sync::{Arc, LazyLock};
use tracing::{error, info, instrument, warn};

use crate::registry::{ApplicationPolicy, Registry, strip_port};
use crate::rewrite::{redirect_location, strip_raw_prefix, strip_secret_prefix};
use crate::session_store::{KeyScope, StoreClient};

static BROWSER_AGENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Mozilla|Chrome|Safari|Edge|Opera|Firefox").expect("static regex"));

/// Facts about an inbound request the engine decides on.
#[derive(Debug, Clone, Copy)]
pub struct AccessRequest<'a> {
    /// `Host` header value, possibly with a port.
    pub host: &'a str,
    pub client_ip: &'a str,
    /// Percent-decoded path.
    pub path: &'a str,
    /// Path as received on the wire.
    pub raw_path: &'a str,
    pub user_agent: Option<&'a str>,
}

/// Why a request is let through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantReason {
    AllowList,
    Session,
    /// Non-browser unlock forwarded because `forward_on_unlock` is set.
    Unlock,
}

#[derive(Debug, Clone)]
pub enum AccessDecision {
    /// No application for the host.
    NotFound,
    /// Forward to `policy.upstream` using the given paths.
    Forward {
        policy: Arc<ApplicationPolicy>,
        path: String,
        raw_path: String,
        reason: GrantReason,
    },
    /// Browser unlock: send the client to the stripped path.
    Redirect { location: String },
    Denied,
    /// The session could not be created.
    StoreFailure,
}

/// True for user agents that get the post-unlock redirect. Android agents
/// are excluded since they are usually app web views.
pub fn is_browser(user_agent: Option<&str>) -> bool {
    user_agent.is_some_and(|ua| BROWSER_AGENT.is_match(ua) && !ua.to_lowercase().contains("android"))
}

#[derive(Clone)]
pub struct AccessEngine {
    registry: Arc<Registry>,
    store: StoreClient,
    key_scope: KeyScope,
}

impl AccessEngine {
    pub fn new(registry: Arc<Registry>, store: StoreClient, key_scope: KeyScope) -> Self {
        Self {
            registry,
            store,
            key_scope,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    #[instrument(name = "access_decision", skip(self, req), fields(host = %req.host, client_ip = %req.client_ip, path = %req.path))]
    pub async fn decide(&self, req: &AccessRequest<'_>) -> AccessDecision {
        let hostname = strip_port(req.host);
        let Some(policy) = self.registry.lookup(hostname) else {
            info!("No app configured for hostname: {}", hostname);
            return AccessDecision::NotFound;
        };

        if policy.allow_list.matches(req.client_ip) {
            info!("IP {} matches allow list, forwarding directly to upstream", req.client_ip);
            return AccessDecision::Forward {
                policy,
                path: req.path.to_string(),
                raw_path: req.raw_path.to_string(),
                reason: GrantReason::AllowList,
            };
        }

        let key = self.key_scope.session_key(&policy.hostname, req.client_ip);
        let lookup = self.store.exists(&key).await;
        if let Err(e) = &lookup {
            warn!(error = %e, key = %key, "Session lookup failed");
        }
        // A failed lookup counts as "no session" for the unlock check.
        let existed = matches!(lookup, Ok(true));

        let mut unlocked = false;
        if !existed && req.path.starts_with(&policy.secret_path_prefix) {
            if let Err(e) = self.store.set_with_expiry(&key, policy.session_ttl).await {
                error!(error = %e, key = %key, "Failed to create session");
                return AccessDecision::StoreFailure;
            }
            info!(ttl = ?policy.session_ttl, "Access granted to {} via secret path", req.client_ip);

            if is_browser(req.user_agent) {
                let location = redirect_location(req.path, &policy.secret_path_prefix);
                info!(user_agent = ?req.user_agent, "Redirecting {} to {}", req.client_ip, location);
                return AccessDecision::Redirect { location };
            }
            // The pre-unlock lookup result still decides below unless the
            // application opted into forwarding.
            unlocked = policy.forward_on_unlock;
        }

        if !unlocked && (lookup.is_err() || !existed) {
            info!("Access denied to {}", req.client_ip);
            return AccessDecision::Denied;
        }

        if existed && policy.auto_renew {
            if let Err(e) = self.store.refresh_expiry(&key, policy.session_ttl).await {
                warn!(error = %e, key = %key, "Failed to renew session");
            }
        }

        let path = strip_secret_prefix(req.path, &policy.secret_path_prefix);
        let raw_path = strip_raw_prefix(&path, req.raw_path, &policy.secret_path_prefix);
        AccessDecision::Forward {
            policy,
            path,
            raw_path,
            reason: if unlocked { GrantReason::Unlock } else { GrantReason::Session },
        }
    }
}
