use serde::{Deserialize, Serialize};
use config::{Config, ConfigError, File};
use std::path::Path;
use std::time::Duration;

use crate::models::LeaderboardError;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub app: AppSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
    pub leaderboard: LeaderboardSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppSettings {
    pub name: String,
    pub version: String,
    pub log_level: String,
    pub environment: Environment,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Environment {
    Development,
    Staging,
    Production,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub connect_timeout_seconds: u64,
    pub busy_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    pub enabled: bool,
    /// 0 disables expiry. Eviction on write is what keeps reads fresh.
    pub ttl_seconds: u64,
    pub max_entries: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaderboardSettings {
    pub default_top_limit: usize,
    pub max_top_limit: usize,
    pub default_game_mode: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            app: AppSettings {
                name: "Leaderboard".to_string(),
                version: env!("CARGO_PKG_VERSION").to_string(),
                log_level: "info".to_string(),
                environment: Environment::Development,
            },
            database: DatabaseSettings {
                url: "sqlite://leaderboard.db".to_string(),
                max_connections: 10,
                min_connections: 1,
                connect_timeout_seconds: 30,
                busy_timeout_seconds: 5,
            },
            cache: CacheSettings {
                enabled: true,
                ttl_seconds: 0,
                max_entries: 10000,
            },
            leaderboard: LeaderboardSettings {
                default_top_limit: 10,
                max_top_limit: 1000,
                default_game_mode: "default".to_string(),
            },
        }
    }
}

impl CacheSettings {
    pub fn ttl(&self) -> Option<Duration> {
        (self.ttl_seconds > 0).then(|| Duration::from_secs(self.ttl_seconds))
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(config::Environment::with_prefix("LEADERBOARD").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let s = Config::builder()
            .add_source(Config::try_from(&Settings::default())?)
            .add_source(File::from(path.as_ref()))
            .add_source(config::Environment::with_prefix("LEADERBOARD").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    /// Load from `path`, or from the standard layers when no path is given,
    /// and reject settings that fail validation.
    pub fn load(path: Option<&Path>) -> crate::models::Result<Self> {
        let settings = match path {
            Some(path) => Self::from_file(path),
            None => Self::new(),
        }
        .map_err(|e| LeaderboardError::ConfigError(e.to_string()))?;

        settings.validate().map_err(LeaderboardError::ConfigError)?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), String> {
        let lb = &self.leaderboard;
        if lb.default_top_limit == 0 || lb.max_top_limit == 0 {
            return Err("Top limits must be greater than zero".to_string());
        }

        if lb.default_top_limit > lb.max_top_limit {
            return Err(format!(
                "default_top_limit {} exceeds max_top_limit {}",
                lb.default_top_limit, lb.max_top_limit
            ));
        }

        if lb.default_game_mode.trim().is_empty() {
            return Err("default_game_mode must not be empty".to_string());
        }

        let db = &self.database;
        if db.max_connections == 0 {
            return Err("database.max_connections must be greater than zero".to_string());
        }

        if db.min_connections > db.max_connections {
            return Err(format!(
                "database.min_connections {} exceeds max_connections {}",
                db.min_connections, db.max_connections
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        let settings = Settings::default();
        assert!(settings.validate().is_ok());
        assert_eq!(settings.leaderboard.default_top_limit, 10);
        assert!(settings.cache.ttl().is_none());
    }

    #[test]
    fn test_default_limit_above_max_rejected() {
        let mut settings = Settings::default();
        settings.leaderboard.default_top_limit = 50;
        settings.leaderboard.max_top_limit = 20;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_connection_bounds_rejected() {
        let mut settings = Settings::default();
        settings.database.min_connections = 5;
        settings.database.max_connections = 2;

        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_ttl_enabled_when_positive() {
        let mut settings = Settings::default();
        settings.cache.ttl_seconds = 60;

        assert_eq!(settings.cache.ttl(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_load_rejects_invalid_file_as_config_error() {
        let path = std::env::temp_dir().join(format!(
            "leaderboard-settings-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "[leaderboard]\ndefault_top_limit = 0\n").unwrap();

        let err = Settings::load(Some(&path)).unwrap_err();
        let _ = std::fs::remove_file(&path);

        assert!(matches!(err, LeaderboardError::ConfigError(msg) if msg.contains("greater than zero")));
    }

    #[test]
    fn test_load_reports_missing_file_as_config_error() {
        let path = std::env::temp_dir().join("leaderboard-settings-does-not-exist.toml");

        let err = Settings::load(Some(&path)).unwrap_err();
        assert!(matches!(err, LeaderboardError::ConfigError(_)));
    }
}
