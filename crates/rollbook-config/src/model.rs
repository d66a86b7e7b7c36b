use std::path::PathBuf;

use rollbook_common::{Error, Result};
use serde::{Deserialize, Serialize};

/// Longest accepted session lifetime: ten years.
pub const MAX_SESSION_TTL_HOURS: u32 = 24 * 365 * 10;

/// Top-level configuration, as read from `config.yml` or `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub sessions: SessionConfig,
    /// `tracing` filter directive, e.g. `info` or `rollbook_db=debug`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file. Relative paths resolve against the config directory.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub busy_timeout_ms: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_ms: 5_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Lifetime of a new session, from creation to expiry.
    pub ttl_hours: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { ttl_hours: 24 }
    }
}

impl AppConfig {
    /// Reject values the store cannot honour.
    pub fn validate(&self) -> Result<()> {
        let ttl = self.sessions.ttl_hours;
        if ttl == 0 || ttl > MAX_SESSION_TTL_HOURS {
            return Err(Error::Config(format!(
                "sessions.ttl_hours must be between 1 and {MAX_SESSION_TTL_HOURS}, got {ttl}"
            )));
        }
        Ok(())
    }

    /// Database file for this config, falling back to `rollbook.db` in
    /// `config_dir`.
    pub fn database_path(&self, config_dir: &std::path::Path) -> PathBuf {
        match &self.database.path {
            Some(p) if p.is_absolute() => p.clone(),
            Some(p) => config_dir.join(p),
            None => config_dir.join("rollbook.db"),
        }
    }
}
