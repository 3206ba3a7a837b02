// SPDX-License-Identifier: Apache-2.0
//! Startup configuration read from the process environment.
//!
//! Applications come either from `APPS_CONFIG` (a JSON array of records) or,
//! when that is unset, from numbered variables `APP_1_HOSTNAME`,
//! `APP_1_UPSTREAM_URL`, ... read until the first missing hostname.
use percent_encoding::{NON_ALPHANUMERIC, utf8_percent_encode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use tracing::warn;
use url::Url;

use crate::allow_list::AllowList;
use crate::duration::{DurationError, parse_duration};
use crate::registry::{ApplicationPolicy, DEFAULT_SECRET_PATH};
use crate::session_store::KeyScope;

/// Environment variable names
pub const LISTEN_ADDRESS_ENV: &str = "LISTEN_ADDRESS";
pub const REDIS_ADDRESS_ENV: &str = "REDIS_ADDRESS";
pub const REDIS_PASSWORD_ENV: &str = "REDIS_PASSWORD";
pub const REDIS_DB_ENV: &str = "REDIS_DB";
pub const SESSION_STORE_ENV: &str = "SESSION_STORE";
pub const SESSION_STORE_TIMEOUT_ENV: &str = "SESSION_STORE_TIMEOUT";
pub const SESSION_STORE_RETRIES_ENV: &str = "SESSION_STORE_RETRIES";
pub const SESSION_KEY_SCOPE_ENV: &str = "SESSION_KEY_SCOPE";
pub const UPSTREAM_TIMEOUT_ENV: &str = "UPSTREAM_TIMEOUT";
pub const WORKERS_ENV: &str = "WORKERS";
pub const APPS_CONFIG_ENV: &str = "APPS_CONFIG";

/// Default values
pub const DEFAULT_LISTEN_ADDRESS: &str = ":8080";
pub const DEFAULT_REDIS_ADDRESS: &str = "redis:6379";
pub const DEFAULT_SESSION_TTL: &str = "10m";
pub const DEFAULT_STORE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no app configurations found; set APPS_CONFIG (JSON) or numbered variables (APP_1_HOSTNAME, etc.)"
    )]
    NoApplications,
    #[error("failed to parse APPS_CONFIG JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid app config {origin}: {source}")]
    App {
        origin: String,
        #[source]
        source: AppConfigError,
    },
    #[error("invalid {name}: {reason}")]
    Setting { name: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("hostname is required")]
    MissingHostname,
    #[error("upstream_url is required")]
    MissingUpstream,
    #[error("invalid upstream_url: {0}")]
    InvalidUpstream(#[from] url::ParseError),
    #[error("upstream_url {0:?} has no host")]
    UpstreamWithoutHost(String),
    #[error("invalid session_ttl: {0}")]
    InvalidTtl(#[from] DurationError),
    #[error("session_ttl must be positive")]
    NonPositiveTtl,
    #[error("invalid IP regex pattern list {patterns:?}: {source}")]
    InvalidPattern {
        patterns: String,
        #[source]
        source: regex::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Redis { url: String },
    Memory,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub timeout: Duration,
    pub retries: u32,
    pub key_scope: KeyScope,
}

#[derive(Debug, Clone)]
pub struct GateConfig {
    pub listen_address: String,
    pub store: StoreConfig,
    pub upstream_timeout: Duration,
    pub workers: Option<usize>,
    pub applications: Vec<ApplicationPolicy>,
}

impl GateConfig {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; empty values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.is_empty());

        let listen_address = normalize_listen_address(
            &get(LISTEN_ADDRESS_ENV).unwrap_or_else(|| DEFAULT_LISTEN_ADDRESS.to_string()),
        );

        let backend = match get(SESSION_STORE_ENV).as_deref().map(str::to_ascii_lowercase).as_deref() {
            None | Some("redis") => StoreBackend::Redis {
                url: redis_url(
                    &get(REDIS_ADDRESS_ENV).unwrap_or_else(|| DEFAULT_REDIS_ADDRESS.to_string()),
                    get(REDIS_PASSWORD_ENV).as_deref(),
                    &get(REDIS_DB_ENV).unwrap_or_else(|| "0".to_string()),
                ),
            },
            Some("memory") => StoreBackend::Memory,
            Some(other) => {
                return Err(ConfigError::Setting {
                    name: SESSION_STORE_ENV,
                    reason: format!("unknown backend {:?} (expected redis or memory)", other),
                });
            }
        };

        let key_scope = match get(SESSION_KEY_SCOPE_ENV).as_deref() {
            None | Some("app") => KeyScope::PerApplication,
            Some("ip") => KeyScope::IpOnly,
            Some(other) => {
                return Err(ConfigError::Setting {
                    name: SESSION_KEY_SCOPE_ENV,
                    reason: format!("unknown key scope {:?} (expected app or ip)", other),
                });
            }
        };

        let store = StoreConfig {
            backend,
            timeout: positive_duration(get(SESSION_STORE_TIMEOUT_ENV), SESSION_STORE_TIMEOUT_ENV, DEFAULT_STORE_TIMEOUT)?,
            retries: parse_number(get(SESSION_STORE_RETRIES_ENV), SESSION_STORE_RETRIES_ENV)?.unwrap_or(0),
            key_scope,
        };

        let upstream_timeout =
            positive_duration(get(UPSTREAM_TIMEOUT_ENV), UPSTREAM_TIMEOUT_ENV, DEFAULT_UPSTREAM_TIMEOUT)?;
        let workers = parse_number(get(WORKERS_ENV), WORKERS_ENV)?;

        let applications = match get(APPS_CONFIG_ENV) {
            Some(json) => applications_from_json(&json)?,
            None => applications_from_numbered(&get)?,
        };
        if applications.is_empty() {
            return Err(ConfigError::NoApplications);
        }

        Ok(Self {
            listen_address,
            store,
            upstream_timeout,
            workers,
            applications,
        })
    }
}

/// One application record as written by operators.
#[derive(Debug, Default, Deserialize)]
pub struct RawAppConfig {
    #[serde(default)]
    pub hostname: Option<String>,
    #[serde(default)]
    pub secret_path: Option<String>,
    #[serde(default)]
    pub upstream_url: Option<String>,
    #[serde(default)]
    pub allow_ips: Option<Patterns>,
    #[serde(default)]
    pub session_ttl: Option<String>,
    #[serde(default)]
    pub auto_renew: Option<Flag>,
    #[serde(default)]
    pub forward_on_unlock: Option<Flag>,
}

/// `allow_ips` as a comma-separated string or a JSON array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Patterns {
    Joined(String),
    List(Vec<String>),
}

impl Patterns {
    fn joined(&self) -> String {
        match self {
            Patterns::Joined(raw) => raw.clone(),
            Patterns::List(list) => list.join(","),
        }
    }
}

/// Boolean written either as a JSON bool or as a string.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum Flag {
    Bool(bool),
    Text(String),
}

impl Flag {
    fn value(&self) -> bool {
        match self {
            Flag::Bool(value) => *value,
            Flag::Text(text) => parse_bool(text),
        }
    }
}

impl RawAppConfig {
    /// Validate into a policy. `auto_renew_default` applies when the record
    /// does not mention auto-renew at all.
    pub fn into_policy(self, auto_renew_default: bool) -> Result<ApplicationPolicy, AppConfigError> {
        let hostname = self
            .hostname
            .filter(|h| !h.is_empty())
            .ok_or(AppConfigError::MissingHostname)?;

        let upstream_raw = self
            .upstream_url
            .filter(|u| !u.is_empty())
            .ok_or(AppConfigError::MissingUpstream)?;
        let upstream = Url::parse(&upstream_raw)?;
        if upstream.host_str().is_none() {
            return Err(AppConfigError::UpstreamWithoutHost(upstream_raw));
        }

        let session_ttl = parse_duration(
            self.session_ttl
                .as_deref()
                .filter(|t| !t.is_empty())
                .unwrap_or(DEFAULT_SESSION_TTL),
        )?;
        if session_ttl.is_zero() {
            return Err(AppConfigError::NonPositiveTtl);
        }

        let allow_list = match self.allow_ips {
            Some(patterns) => {
                let joined = patterns.joined();
                AllowList::parse(&joined)
                    .map_err(|source| AppConfigError::InvalidPattern { patterns: joined, source })?
            }
            None => AllowList::default(),
        };

        let mut policy = ApplicationPolicy::new(hostname, upstream);
        policy.secret_path_prefix = self
            .secret_path
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| DEFAULT_SECRET_PATH.to_string());
        policy.allow_list = allow_list;
        policy.session_ttl = session_ttl;
        policy.auto_renew = self.auto_renew.map_or(auto_renew_default, |flag| flag.value());
        policy.forward_on_unlock = self.forward_on_unlock.is_some_and(|flag| flag.value());
        Ok(policy)
    }
}

/// JSON records that omit `auto_renew` get `false`.
fn applications_from_json(json: &str) -> Result<Vec<ApplicationPolicy>, ConfigError> {
    let records: Vec<RawAppConfig> = serde_json::from_str(json)?;
    records
        .into_iter()
        .enumerate()
        .map(|(i, record)| {
            record.into_policy(false).map_err(|source| ConfigError::App {
                origin: format!("JSON[{}]", i),
                source,
            })
        })
        .collect()
}

/// Numbered records that omit `APP_n_AUTO_RENEW` get `true`.
fn applications_from_numbered<G>(get: &G) -> Result<Vec<ApplicationPolicy>, ConfigError>
where
    G: Fn(&str) -> Option<String>,
{
    let mut applications = Vec::new();
    for i in 1.. {
        let prefix = format!("APP_{}_", i);
        let var = |field: &str| get(&format!("{}{}", prefix, field));
        let Some(hostname) = var("HOSTNAME") else {
            break;
        };

        let record = RawAppConfig {
            hostname: Some(hostname),
            secret_path: var("SECRET_PATH"),
            upstream_url: var("UPSTREAM_URL"),
            allow_ips: var("ALLOW_IPS").map(Patterns::Joined),
            session_ttl: var("SESSION_TTL"),
            auto_renew: var("AUTO_RENEW").map(Flag::Text),
            forward_on_unlock: var("FORWARD_ON_UNLOCK").map(Flag::Text),
        };
        let policy = record
            .into_policy(true)
            .map_err(|source| ConfigError::App { origin: prefix, source })?;
        applications.push(policy);
    }
    Ok(applications)
}

/// Go `strconv.ParseBool` spellings; anything else is `false`.
pub fn parse_bool(text: &str) -> bool {
    match text {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => true,
        "0" | "f" | "F" | "false" | "FALSE" | "False" => false,
        other => {
            warn!(value = %other, "Unrecognised boolean, treating as false");
            false
        }
    }
}

/// `:8080` listens on every interface.
fn normalize_listen_address(address: &str) -> String {
    if address.starts_with(':') {
        format!("0.0.0.0{}", address)
    } else {
        address.to_string()
    }
}

fn redis_url(address: &str, password: Option<&str>, db: &str) -> String {
    if address.contains("://") {
        return address.to_string();
    }
    let auth = password
        .map(|pw| format!(":{}@", utf8_percent_encode(pw, NON_ALPHANUMERIC)))
        .unwrap_or_default();
    format!("redis://{}{}/{}", auth, address, db)
}

fn positive_duration(raw: Option<String>, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    match parse_duration(&raw) {
        Ok(d) if !d.is_zero() => Ok(d),
        Ok(_) => Err(ConfigError::Setting {
            name,
            reason: "must be positive".to_string(),
        }),
        Err(e) => Err(ConfigError::Setting {
            name,
            reason: e.to_string(),
        }),
    }
}

fn parse_number<T>(raw: Option<String>, name: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    raw.map(|value| {
        value.trim().parse::<T>().map_err(|e| ConfigError::Setting {
            name,
            reason: format!("{:?}: {}", value, e),
        })
    })
    .transpose()
}
