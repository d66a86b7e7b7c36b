use std::path::{Path, PathBuf};

use rollbook_common::{Error, Result};
use tracing::{debug, info, warn};

use crate::model::{AppConfig, MAX_SESSION_TTL_HOURS};

const DB_PATH_ENV: &str = "ROLLBOOK_DB_PATH";
const SESSION_TTL_ENV: &str = "ROLLBOOK_SESSION_TTL_HOURS";
const LOG_ENV: &str = "ROLLBOOK_LOG";

/// Locates and reads the Rollbook config file.
///
/// Lookup order inside the config directory is `config.yml`, `config.yaml`,
/// then `config.toml`. A missing file is not an error; defaults are used.
pub struct ConfigLoader {
    config_dir: PathBuf,
}

impl ConfigLoader {
    /// Loader rooted at `~/.rollbook`.
    pub fn new() -> Result<Self> {
        let home = dirs::home_dir()
            .ok_or_else(|| Error::Config("could not determine home directory".into()))?;
        Ok(Self {
            config_dir: home.join(".rollbook"),
        })
    }

    pub fn with_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    /// The config file that `load` would read, if one exists.
    pub fn config_file(&self) -> Option<PathBuf> {
        ["config.yml", "config.yaml", "config.toml"]
            .iter()
            .map(|name| self.config_dir.join(name))
            .find(|p| p.is_file())
    }

    /// Read the config file and apply environment overrides.
    pub fn load(&self) -> Result<AppConfig> {
        let config = match self.config_file() {
            Some(path) => {
                info!("loading config from {}", path.display());
                Self::load_file(&path)?
            }
            None => {
                debug!(
                    "no config file in {}, using defaults",
                    self.config_dir.display()
                );
                AppConfig::default()
            }
        };
        Ok(apply_overrides(config, |key| std::env::var(key).ok()))
    }

    pub fn load_file(path: &Path) -> Result<AppConfig> {
        let contents = std::fs::read_to_string(path)?;
        let is_toml = path.extension().is_some_and(|ext| ext == "toml");
        let config: AppConfig = if is_toml {
            toml::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        } else {
            serde_yaml::from_str(&contents)
                .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?
        };
        config
            .validate()
            .map_err(|e| Error::Config(format!("{}: {e}", path.display())))?;
        Ok(config)
    }

    /// Write `config` as `config.yml`, creating the directory if needed.
    pub fn save(&self, config: &AppConfig) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.config_dir)?;
        let path = self.config_dir.join("config.yml");
        let yaml = serde_yaml::to_string(config)
            .map_err(|e| Error::Config(format!("failed to serialize config: {e}")))?;
        std::fs::write(&path, yaml)?;
        info!("config written to {}", path.display());
        Ok(path)
    }
}

/// Apply `ROLLBOOK_*` overrides looked up through `lookup`.
pub fn apply_overrides<F>(mut config: AppConfig, lookup: F) -> AppConfig
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = lookup(DB_PATH_ENV).filter(|v| !v.is_empty()) {
        config.database.path = Some(PathBuf::from(path));
    }
    if let Some(raw) = lookup(SESSION_TTL_ENV) {
        match raw.trim().parse::<u32>() {
            Ok(hours) if (1..=MAX_SESSION_TTL_HOURS).contains(&hours) => {
                config.sessions.ttl_hours = hours
            }
            _ => warn!("ignoring invalid {SESSION_TTL_ENV}={raw}"),
        }
    }
    if let Some(level) = lookup(LOG_ENV).filter(|v| !v.is_empty()) {
        config.log_level = Some(level);
    }
    config
}
