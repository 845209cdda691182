//! Engine configuration, stored as JSON next to the database file

use crate::store::DEFAULT_COMPRESSION_LEVEL;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable that overrides [`Config::log_filter`]
pub const LOG_ENV: &str = "DATALAYER_LOG";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// zstd level for node records
    pub compression_level: i32,
    /// How many stores keep their current tree materialized in memory
    pub tree_cache_capacity: usize,
    /// `tracing` filter directive used by the CLI
    pub log_filter: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            tree_cache_capacity: 64,
            log_filter: "warn".to_string(),
        }
    }
}

impl Config {
    /// Load the config for a database, falling back to defaults
    pub fn load(db_path: &Path) -> Result<Self> {
        let config_path = Self::config_path(db_path);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(&config_path)?;
        let config: Config = serde_json::from_str(&content).map_err(|e| {
            Error::Config(format!("cannot parse {}: {}", config_path.display(), e))
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save(&self, db_path: &Path) -> Result<()> {
        self.validate()?;
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(Self::config_path(db_path), content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=22).contains(&self.compression_level) {
            return Err(Error::Config(format!(
                "compression_level must be 1..=22, got {}",
                self.compression_level
            )));
        }
        if self.tree_cache_capacity == 0 {
            return Err(Error::Config("tree_cache_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// `<database>.config` beside the database file
    pub fn config_path(db_path: &Path) -> PathBuf {
        let mut config_path = db_path.to_path_buf();
        let file_name = db_path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "datalayer.db".to_string());
        config_path.set_file_name(format!("{}.config", file_name));
        config_path
    }

    /// Filter directive for the log subscriber, preferring the environment
    pub fn effective_log_filter(&self) -> String {
        std::env::var(LOG_ENV).unwrap_or_else(|_| self.log_filter.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempdir().unwrap();
        let config = Config::load(&dir.path().join("db")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        let config = Config {
            compression_level: 9,
            tree_cache_capacity: 4,
            log_filter: "datalayer=debug".into(),
        };
        config.save(&db).unwrap();
        assert!(dir.path().join("db.config").exists());
        assert_eq!(Config::load(&db).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let db = dir.path().join("db");
        std::fs::write(Config::config_path(&db), r#"{"compression_level": 5}"#).unwrap();
        let config = Config::load(&db).unwrap();
        assert_eq!(config.compression_level, 5);
        assert_eq!(config.tree_cache_capacity, 64);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let config = Config {
            tree_cache_capacity: 0,
            ..Config::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
