//! Engine configuration.
//!
//! All tunables live in one explicit [`EngineConfig`] struct constructed at
//! startup and passed by reference into every component constructor. There
//! is no module-level mutable option state anywhere in the workspace.
//!
//! Loading flow mirrors a layered-settings loader:
//! 1. Start with compiled [`EngineConfig::default()`]
//! 2. If a config file exists, deep-merge its JSON over the defaults
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::errors::{ParseError, Result};

/// How a client proves its identity at check-in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuthMode {
    /// Certificate common name alone is sufficient.
    Cert,
    /// Certificate plus password (the default).
    CertPlusPassword,
    /// Password only.
    Password,
}

impl Default for AuthMode {
    fn default() -> Self {
        Self::CertPlusPassword
    }
}

/// Engine configuration.
///
/// Field names are camelCase in JSON. Missing fields get their default
/// value during deserialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Root directory of the configuration repository.
    pub repository: PathBuf,
    /// Groups rule file, relative to the repository root.
    pub groups_file: String,
    /// Clients rule file, relative to the repository root.
    pub clients_file: String,
    /// Global shared secret checked when a client has no per-client secret.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,
    /// Default authentication mode for clients that declare none.
    pub auth_mode: AuthMode,
    /// TTL for the address-resolution cache, in seconds.
    pub address_cache_ttl_secs: u64,
    /// Attempts before a contended document write gives up.
    pub write_retries: u32,
    /// Delay between contended write attempts, in milliseconds.
    pub write_retry_delay_ms: u64,
    /// Database-backed client storage: duplicate adds are hard errors.
    /// File-backed storage (the default) treats re-adds as idempotent.
    pub database_backed: bool,
    /// Minimum log level for the tracing subscriber.
    pub log_level: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            repository: PathBuf::from("/var/lib/confab"),
            groups_file: "groups.xml".to_string(),
            clients_file: "clients.xml".to_string(),
            password: None,
            auth_mode: AuthMode::default(),
            address_cache_ttl_secs: 90,
            write_retries: 3,
            write_retry_delay_ms: 100,
            database_backed: false,
            log_level: "warn".to_string(),
        }
    }
}

impl EngineConfig {
    /// Absolute path of the groups rule file.
    pub fn groups_path(&self) -> PathBuf {
        self.repository.join(&self.groups_file)
    }

    /// Absolute path of the clients rule file.
    pub fn clients_path(&self) -> PathBuf {
        self.repository.join(&self.clients_file)
    }
}

/// Load configuration from a JSON file, deep-merged over defaults.
///
/// A missing file yields the defaults. Invalid JSON is a [`ParseError`].
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig> {
    let defaults = serde_json::to_value(EngineConfig::default())
        .map_err(|e| malformed_json(path, &e))?;

    let mut merged = defaults;
    if path.exists() {
        debug!(?path, "loading engine config");
        let content = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value =
            serde_json::from_str(&content).map_err(|e| malformed_json(path, &e))?;
        deep_merge(&mut merged, user);
    } else {
        debug!(?path, "config file not found, using defaults");
    }

    let config: EngineConfig =
        serde_json::from_value(merged).map_err(|e| malformed_json(path, &e))?;
    Ok(config)
}

fn malformed_json(path: &Path, err: &serde_json::Error) -> ParseError {
    ParseError::malformed(path, err.line(), err.column(), err.to_string())
}

/// Recursively merge a JSON value into `target` in place.
///
/// Objects merge per key; arrays and primitives in `source` replace the
/// target wholesale; nulls in `source` leave the target untouched.
pub fn deep_merge(target: &mut Value, source: Value) {
    match (target, source) {
        (Value::Object(target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                match target_map.get_mut(&key) {
                    Some(slot) => deep_merge(slot, source_val),
                    None => {
                        let _ = target_map.insert(key, source_val);
                    }
                }
            }
        }
        (slot, source) => *slot = source,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
