//! Configuration loading for the matchday runtime
//!
//! Reads an optional TOML file, applies `MATCHDAY_*` environment overrides and
//! validates the result.

use crate::config::{LogLevel, MatchdayConfig};
use crate::errors::{ConfigurationError, MatchdayResult};
use std::env;
use std::path::Path;
use std::str::FromStr;

/// Configuration loader with environment variable support
#[derive(Debug, Default)]
pub struct ConfigLoader {
    config_path: Option<String>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self { config_path: None }
    }

    /// Set the configuration file path
    pub fn with_path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.config_path = Some(path.as_ref().to_string_lossy().to_string());
        self
    }

    /// Load configuration from file and environment variables
    pub fn load(&self) -> MatchdayResult<MatchdayConfig> {
        let mut config = match self.config_path {
            Some(ref path) => self.load_from_file(path)?,
            None => MatchdayConfig::default(),
        };

        self.apply_env_overrides(&mut config)?;
        config.validate()?;

        Ok(config)
    }

    fn load_from_file(&self, path: &str) -> MatchdayResult<MatchdayConfig> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to read {}: {}", path, e)))?;

        toml::from_str(&content)
            .map_err(|e| ConfigurationError::LoadFailed(format!("Failed to parse TOML: {}", e)).into())
    }

    fn apply_env_overrides(&self, config: &mut MatchdayConfig) -> MatchdayResult<()> {
        if let Some(v) = env_parse::<u64>("MATCHDAY_POLL_INTERVAL_MS")? {
            config.watcher.poll_interval_ms = v;
        }
        if let Some(v) = env_parse::<u64>("MATCHDAY_FETCH_TIMEOUT_MS")? {
            config.watcher.fetch_timeout_ms = v;
        }
        if let Some(v) = env_parse::<u64>("MATCHDAY_UPDATE_WAIT_TIMEOUT_MS")? {
            config.runtime.update_wait_timeout_ms = v;
        }
        if let Some(v) = env_parse::<i64>("MATCHDAY_BET_DEADLINE_SECS")? {
            config.runtime.bet_deadline_secs = v;
        }
        if let Some(v) = env_parse::<usize>("MATCHDAY_MAX_GAMES_PER_PLAYER")? {
            config.membership.max_games_per_player = v;
        }
        if let Some(v) = env_parse::<i64>("MATCHDAY_CODE_TTL_SECS")? {
            config.membership.code_ttl_secs = v;
        }
        if let Some(v) = env_parse::<LogLevel>("MATCHDAY_LOG_LEVEL")? {
            config.logging.level = v;
        }

        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, config: &MatchdayConfig, path: &str) -> MatchdayResult<()> {
        let toml_string = toml::to_string_pretty(config)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to serialize config: {}", e)))?;

        std::fs::write(path, toml_string)
            .map_err(|e| ConfigurationError::SaveFailed(format!("Failed to write to {}: {}", path, e)).into())
    }
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>, ConfigurationError> {
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigurationError::InvalidValue {
                field: key.to_string(),
                value: raw,
                reason: "Cannot parse value".to_string(),
            }),
        Err(_) => Ok(None),
    }
}

/// Generate a sample configuration file
pub fn generate_sample_config(path: &str) -> MatchdayResult<()> {
    ConfigLoader::new().save(&MatchdayConfig::default(), path)
}
