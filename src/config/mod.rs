//! # Configuration Management Module
//!
//! All tunables of the player database live in one TOML file. Every section
//! has defaults, so a missing section or key falls back to stock behavior.
//!
//! ## Configuration Structure
//!
//! - [`StorageConfig`] - Where player, account and empire files live
//! - [`LoggingConfig`] - Log level and optional log file
//! - [`MemberTimeout`] - When an inactive member stops counting for their empire
//! - [`LoginPolicy`] - Restore-on-login threshold, war delay, fallback room
//! - [`NewPlayerPolicy`] - Character creation defaults
//!
//! ## Usage
//!
//! ```rust,no_run
//! use empiredb::config::Config;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.toml").await?;
//!     println!("Data directory: {}", config.storage.data_dir);
//!
//!     Config::create_default("config.toml").await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration File Format
//!
//! ```toml
//! [storage]
//! data_dir = "./data"
//!
//! [logging]
//! level = "info"
//! file = "empiredb.log"
//!
//! [membership]
//! member_timeout_full_days = 14
//! member_timeout_newbie_days = 3
//! minutes_per_day_full = 30.0
//! minutes_per_day_newbie = 5.0
//! member_timeout_max_threshold_hours = 48.0
//!
//! [login]
//! restore_after_secs = 3600
//! war_login_delay_secs = 90
//! affect_tick_secs = 10
//! fallback_room = 0
//!
//! [new_players]
//! siteok_everyone = false
//! require_auth = false
//! default_slash_channels = ["newbie", "ooc"]
//! ```

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::playerdb::login::LoginPolicy;
use crate::playerdb::newplayer::NewPlayerPolicy;
use crate::playerdb::repository::RepositoryOptions;
use crate::playerdb::timeout::MemberTimeout;
use crate::storage::DataLayout;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub membership: MemberTimeout,
    #[serde(default)]
    pub login: LoginPolicy,
    #[serde(default)]
    pub new_players: NewPlayerPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    #[serde(default)]
    pub file: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file: None,
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub async fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| anyhow!("Failed to read config file {}: {}", path, e))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| anyhow!("Failed to parse config file {}: {}", path, e))?;

        config.validate()?;
        Ok(config)
    }

    /// Create a default configuration file
    pub async fn create_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)
            .map_err(|e| anyhow!("Failed to serialize default config: {}", e))?;

        fs::write(path, content)
            .await
            .map_err(|e| anyhow!("Failed to write config file {}: {}", path, e))?;

        Ok(())
    }

    /// Reject values the player database cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.storage.data_dir.trim().is_empty() {
            return Err(anyhow!("storage.data_dir must not be empty"));
        }
        let m = &self.membership;
        if m.minutes_per_day_full <= m.minutes_per_day_newbie {
            return Err(anyhow!(
                "membership.minutes_per_day_full ({}) must exceed minutes_per_day_newbie ({})",
                m.minutes_per_day_full,
                m.minutes_per_day_newbie
            ));
        }
        if m.member_timeout_full_days < m.member_timeout_newbie_days {
            return Err(anyhow!("membership.member_timeout_full_days must be >= member_timeout_newbie_days"));
        }
        if self.login.affect_tick_secs <= 0 {
            return Err(anyhow!("login.affect_tick_secs must be positive"));
        }
        Ok(())
    }

    pub fn layout(&self) -> DataLayout {
        DataLayout::new(&self.storage.data_dir)
    }

    pub fn repository_options(&self) -> RepositoryOptions {
        RepositoryOptions {
            restore_after_secs: self.login.restore_after_secs,
            timeout: self.membership.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_round_trips_through_toml() {
        let config = Config::default();
        let text = toml::to_string_pretty(&config).unwrap();
        let back: Config = toml::from_str(&text).unwrap();
        assert_eq!(back.storage.data_dir, "./data");
        assert_eq!(back.login, LoginPolicy::default());
        assert_eq!(back.membership, MemberTimeout::default());
        assert_eq!(back.new_players, NewPlayerPolicy::default());
    }

    #[test]
    fn test_missing_sections_use_defaults() {
        let config: Config = toml::from_str("[login]\nfallback_room = 3001\n").unwrap();
        assert_eq!(config.login.fallback_room, 3001);
        assert_eq!(config.login.restore_after_secs, 3600);
        assert_eq!(config.logging.level, "info");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_inverted_activity_thresholds_rejected() {
        let mut config = Config::default();
        config.membership.minutes_per_day_full = 1.0;
        assert!(config.validate().is_err());
    }

    #[tokio::test]
    async fn test_create_default_then_load() {
        let tmp = tempfile::TempDir::new().unwrap();
        let path = tmp.path().join("config.toml");
        let path = path.to_str().unwrap();
        Config::create_default(path).await.unwrap();
        let config = Config::load(path).await.unwrap();
        assert_eq!(config.repository_options().restore_after_secs, 3600);
    }
}
