//! Process configuration, assembled once at startup.
//!
//! Every knob the fabric recognizes is read here, in one place, via
//! [`Config::from_env`]. Components receive the resulting value (or a
//! sub-struct of it) explicitly and never re-read the environment.
//!
//! The canonical-JSON hash of the redacted config is exposed for status
//! surfaces so operators can tell at a glance whether two workers are
//! running the same effective configuration.

use std::collections::BTreeSet;
use std::str::FromStr;

use anyhow::{bail, Result};
use serde::Serialize;

use weft_envelope::hash_value;

// ---------------------------------------------------------------------------
// Environment variable names
// ---------------------------------------------------------------------------

pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";
pub const ENV_REDIS_DB: &str = "REDIS_DB";
pub const ENV_REDIS_PASSWORD: &str = "REDIS_PASSWORD";
pub const ENV_REDIS_NAMESPACE: &str = "REDIS_NAMESPACE";
pub const ENV_REDIS_MAX_RETRIES: &str = "REDIS_MAX_RETRIES";
pub const ENV_REDIS_RETRY_BACKOFF_MS: &str = "REDIS_RETRY_BACKOFF_MS";
pub const ENV_REDIS_STREAM_MAXLEN: &str = "REDIS_STREAM_MAXLEN";
pub const ENV_ENABLE_DLQ: &str = "ENABLE_DLQ";

pub const ENV_OPS_HB_ENABLED: &str = "OPS_HB_ENABLED";
pub const ENV_OPS_HB_TTL: &str = "OPS_HB_TTL";
pub const ENV_OPS_HB_INTERVAL: &str = "OPS_HB_INTERVAL";
pub const ENV_OPS_IDEMP_TTL: &str = "OPS_IDEMP_TTL";

pub const ENV_PERSIST_READ_TABLES: &str = "PERSIST_READ_TABLES";
pub const ENV_PERSIST_WRITE_TABLES: &str = "PERSIST_WRITE_TABLES";
pub const ENV_PERSIST_WRITE_DENY: &str = "PERSIST_WRITE_DENY";
pub const ENV_PERSIST_BACKEND: &str = "PERSIST_BACKEND";
pub const ENV_PERSIST_REST_URL: &str = "PERSIST_REST_URL";
pub const ENV_PERSIST_REST_API_KEY: &str = "PERSIST_REST_API_KEY";

pub const ENV_RAG_DEFAULT_LIMIT: &str = "RAG_DEFAULT_LIMIT";
pub const ENV_RAG_MAX_LIMIT: &str = "RAG_MAX_LIMIT";
pub const ENV_RAG_SUMMARY_THRESHOLD: &str = "RAG_SUMMARY_THRESHOLD";
pub const ENV_RAG_MAX_FALLBACKS_PER_MIN: &str = "RAG_MAX_FALLBACKS_PER_MIN";
pub const ENV_RAG_REFORMULATION_MAX_ATTEMPTS: &str = "RAG_REFORMULATION_MAX_ATTEMPTS";
pub const ENV_RAG_CACHE_DISABLED: &str = "RAG_CACHE_DISABLED";
pub const ENV_RAG_DEFAULT_LIST_ON_EMPTY: &str = "RAG_DEFAULT_LIST_ON_EMPTY";
pub const ENV_RAG_DEFAULT_TABLE: &str = "RAG_DEFAULT_TABLE";

pub const ENV_DAEMON_ADDR: &str = "WEFT_DAEMON_ADDR";

/// Default key namespace for every stream and ops key.
pub const DEFAULT_NAMESPACE: &str = "agentic";

// ---------------------------------------------------------------------------
// Sub-configs
// ---------------------------------------------------------------------------

/// Stream store connection and delivery policy.
#[derive(Debug, Clone, Serialize)]
pub struct StreamConfig {
    pub url: String,
    /// Key prefix for every stream and ops key.
    pub namespace: String,
    /// Per-task retry ceiling (attempts beyond the first delivery).
    pub max_retries: u32,
    /// Fixed backoff before a retry re-publish.
    pub retry_backoff_ms: u64,
    /// Approximate MAXLEN trim target; `None` disables trimming.
    pub stream_maxlen: Option<usize>,
    pub enable_dlq: bool,
}

/// Heartbeat and idempotency-lock cadence.
#[derive(Debug, Clone, Serialize)]
pub struct OpsConfig {
    pub hb_enabled: bool,
    pub hb_ttl_secs: u64,
    pub hb_interval_secs: u64,
    pub idemp_ttl_secs: u64,
}

/// Persistence backend selection and table allowlists.
#[derive(Debug, Clone, Serialize)]
pub struct PersistConfig {
    pub read_tables: BTreeSet<String>,
    pub write_tables: BTreeSet<String>,
    /// Governance tables that must never be writable, whatever the
    /// write allowlist says.
    pub write_deny: BTreeSet<String>,
    /// `"memory"` | `"rest"`.
    pub backend: String,
    pub rest_url: Option<String>,
    #[serde(skip_serializing)]
    pub rest_api_key: Option<String>,
}

/// Retrieval agent knobs.
#[derive(Debug, Clone, Serialize)]
pub struct RagConfig {
    pub default_limit: usize,
    pub max_limit: usize,
    pub summary_threshold: usize,
    pub max_fallbacks_per_min: usize,
    pub reformulation_max_attempts: usize,
    pub cache_disabled: bool,
    pub default_list_on_empty: bool,
    /// Table served by the default-list-on-empty policy.
    pub default_table: String,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// The one configuration value for the whole process.
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    pub stream: StreamConfig,
    pub ops: OpsConfig,
    pub persist: PersistConfig,
    pub rag: RagConfig,
    pub daemon_addr: Option<String>,
}

impl Config {
    /// Read every recognized option from the environment, apply defaults,
    /// and enforce the allowlist invariants.
    pub fn from_env() -> Result<Self> {
        let cfg = Self {
            stream: StreamConfig {
                url: redis_url_from_env(),
                namespace: env_str(ENV_REDIS_NAMESPACE, DEFAULT_NAMESPACE),
                max_retries: env_parse(ENV_REDIS_MAX_RETRIES, 3),
                retry_backoff_ms: env_parse(ENV_REDIS_RETRY_BACKOFF_MS, 250),
                stream_maxlen: env_opt_parse(ENV_REDIS_STREAM_MAXLEN),
                enable_dlq: env_flag(ENV_ENABLE_DLQ, true),
            },
            ops: OpsConfig {
                hb_enabled: env_flag(ENV_OPS_HB_ENABLED, true),
                hb_ttl_secs: env_parse(ENV_OPS_HB_TTL, 30),
                hb_interval_secs: env_parse(ENV_OPS_HB_INTERVAL, 10),
                idemp_ttl_secs: env_parse(ENV_OPS_IDEMP_TTL, 3600),
            },
            persist: PersistConfig {
                read_tables: env_csv(ENV_PERSIST_READ_TABLES)
                    .unwrap_or_else(|| set(&["leads", "clients"])),
                write_tables: env_csv(ENV_PERSIST_WRITE_TABLES)
                    .unwrap_or_else(|| set(&["leads"])),
                write_deny: env_csv(ENV_PERSIST_WRITE_DENY)
                    .unwrap_or_else(|| set(&["governance"])),
                backend: env_str(ENV_PERSIST_BACKEND, "memory"),
                rest_url: std::env::var(ENV_PERSIST_REST_URL).ok(),
                rest_api_key: std::env::var(ENV_PERSIST_REST_API_KEY).ok(),
            },
            rag: RagConfig {
                default_limit: env_parse(ENV_RAG_DEFAULT_LIMIT, 25),
                max_limit: env_parse(ENV_RAG_MAX_LIMIT, 100),
                summary_threshold: env_parse(ENV_RAG_SUMMARY_THRESHOLD, 50),
                max_fallbacks_per_min: env_parse(ENV_RAG_MAX_FALLBACKS_PER_MIN, 5),
                reformulation_max_attempts: env_parse(ENV_RAG_REFORMULATION_MAX_ATTEMPTS, 3),
                cache_disabled: env_flag(ENV_RAG_CACHE_DISABLED, false),
                default_list_on_empty: env_flag(ENV_RAG_DEFAULT_LIST_ON_EMPTY, false),
                default_table: env_str(ENV_RAG_DEFAULT_TABLE, "leads"),
            },
            daemon_addr: std::env::var(ENV_DAEMON_ADDR).ok(),
        };
        cfg.validate()?;
        Ok(cfg)
    }

    /// Enforce the allowlist invariants:
    /// `write_tables ⊆ read_tables` and `write_tables ∩ write_deny = ∅`.
    pub fn validate(&self) -> Result<()> {
        for t in &self.persist.write_tables {
            if !self.persist.read_tables.contains(t) {
                bail!("write allowlist table '{t}' is not in the read allowlist");
            }
            if self.persist.write_deny.contains(t) {
                bail!("write allowlist table '{t}' is deny-listed (governance table)");
            }
        }
        if self.persist.backend == "rest" && self.persist.rest_url.is_none() {
            bail!("{ENV_PERSIST_BACKEND}=rest requires {ENV_PERSIST_REST_URL}");
        }
        if !matches!(self.persist.backend.as_str(), "memory" | "rest") {
            bail!("unknown persistence backend '{}'", self.persist.backend);
        }
        Ok(())
    }

    /// Canonical hash of the redacted effective config (secrets never enter
    /// the hash input).
    pub fn config_hash(&self) -> String {
        let v = serde_json::to_value(self).expect("config serialization must not fail");
        hash_value(&v)
    }
}

impl Default for Config {
    /// In-process defaults used by tests and single-node runs; identical to
    /// `from_env` with an empty environment.
    fn default() -> Self {
        Self {
            stream: StreamConfig {
                url: "redis://127.0.0.1:6379/0".to_string(),
                namespace: DEFAULT_NAMESPACE.to_string(),
                max_retries: 3,
                retry_backoff_ms: 250,
                stream_maxlen: None,
                enable_dlq: true,
            },
            ops: OpsConfig {
                hb_enabled: true,
                hb_ttl_secs: 30,
                hb_interval_secs: 10,
                idemp_ttl_secs: 3600,
            },
            persist: PersistConfig {
                read_tables: set(&["leads", "clients"]),
                write_tables: set(&["leads"]),
                write_deny: set(&["governance"]),
                backend: "memory".to_string(),
                rest_url: None,
                rest_api_key: None,
            },
            rag: RagConfig {
                default_limit: 25,
                max_limit: 100,
                summary_threshold: 50,
                max_fallbacks_per_min: 5,
                reformulation_max_attempts: 3,
                cache_disabled: false,
                default_list_on_empty: false,
                default_table: "leads".to_string(),
            },
            daemon_addr: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Env helpers
// ---------------------------------------------------------------------------

fn env_str(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

fn env_opt_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}

/// `1`, `true`, `yes`, `on` (any case) are truthy; everything else falsy.
fn env_flag(key: &str, default: bool) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

fn env_csv(key: &str) -> Option<BTreeSet<String>> {
    std::env::var(key).ok().map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

fn set(items: &[&str]) -> BTreeSet<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// `REDIS_URL` wins; otherwise compose from host/port/db/password parts.
fn redis_url_from_env() -> String {
    if let Ok(url) = std::env::var(ENV_REDIS_URL) {
        return url;
    }
    let host = env_str(ENV_REDIS_HOST, "127.0.0.1");
    let port = env_str(ENV_REDIS_PORT, "6379");
    let db = env_str(ENV_REDIS_DB, "0");
    match std::env::var(ENV_REDIS_PASSWORD) {
        Ok(pw) => format!("redis://:{pw}@{host}:{port}/{db}"),
        Err(_) => format!("redis://{host}:{port}/{db}"),
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_satisfy_allowlist_invariants() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn write_table_outside_read_allowlist_is_rejected() {
        let mut cfg = Config::default();
        cfg.persist.write_tables.insert("orphans".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn deny_listed_write_table_is_rejected() {
        let mut cfg = Config::default();
        cfg.persist.read_tables.insert("governance".to_string());
        cfg.persist.write_tables.insert("governance".to_string());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rest_backend_requires_url() {
        let mut cfg = Config::default();
        cfg.persist.backend = "rest".to_string();
        assert!(cfg.validate().is_err());
        cfg.persist.rest_url = Some("https://tables.example".to_string());
        cfg.validate().unwrap();
    }

    #[test]
    fn config_hash_is_stable_and_content_sensitive() {
        let a = Config::default();
        let b = Config::default();
        assert_eq!(a.config_hash(), b.config_hash());

        let mut c = Config::default();
        c.stream.namespace = "other".to_string();
        assert_ne!(a.config_hash(), c.config_hash());
    }

    #[test]
    fn api_key_never_enters_the_hash_input() {
        let mut a = Config::default();
        a.persist.rest_api_key = Some("sk-secret".to_string());
        let b = Config::default();
        assert_eq!(a.config_hash(), b.config_hash());
    }
}
