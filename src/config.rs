//! Configuration with validation and defaults
//!
//! Every tunable of the watcher, the runtimes, the scoring rules and the
//! membership rules lives here. Loading from TOML and the environment is
//! handled by [`crate::common::config::ConfigLoader`].

use crate::errors::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Root configuration
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct MatchdayConfig {
    #[serde(default)]
    pub watcher: WatcherConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub membership: MembershipConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Match feed polling
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    /// Upper bound for one call to the match data source
    pub fetch_timeout_ms: u64,
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 30_000,
            fetch_timeout_ms: 10_000,
        }
    }
}

/// Per-game runtime behavior
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RuntimeConfig {
    /// How long the game loop waits for a status change before re-checking
    pub update_wait_timeout_ms: u64,
    /// Betting closes this many seconds before kickoff
    pub bet_deadline_secs: i64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            update_wait_timeout_ms: 5_000,
            bet_deadline_secs: 0,
        }
    }
}

/// Point table and multipliers
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    pub exact_points: u32,
    pub close_points: u32,
    pub outcome_points: u32,
    /// Largest total-goals difference still counted as close
    pub close_total_goals_delta: u8,
    /// Home/away odds gap above which draw and underdog multipliers apply
    pub odds_gap_threshold: f64,
    pub draw_multiplier: f64,
    pub underdog_multiplier: f64,
    pub rare_fraction: f64,
    pub rare_bonus: f64,
    pub uncommon_fraction: f64,
    pub uncommon_bonus: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            exact_points: 500,
            close_points: 400,
            outcome_points: 300,
            close_total_goals_delta: 2,
            odds_gap_threshold: 1.5,
            draw_multiplier: 1.5,
            underdog_multiplier: 2.0,
            rare_fraction: 0.25,
            rare_bonus: 1.25,
            uncommon_fraction: 0.5,
            uncommon_bonus: 1.10,
        }
    }
}

/// Joining and leaving games
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MembershipConfig {
    pub max_games_per_player: usize,
    pub code_length: usize,
    pub code_ttl_secs: i64,
    pub code_sweep_interval_secs: u64,
}

impl Default for MembershipConfig {
    fn default() -> Self {
        Self {
            max_games_per_player: 5,
            code_length: 4,
            code_ttl_secs: 86_400,
            code_sweep_interval_secs: 3_600,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    pub level: LogLevel,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: LogLevel::Info }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(LogLevel::Error),
            "warn" => Ok(LogLevel::Warn),
            "info" => Ok(LogLevel::Info),
            "debug" => Ok(LogLevel::Debug),
            "trace" => Ok(LogLevel::Trace),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

impl MatchdayConfig {
    /// Short intervals for tests and local replays
    pub fn testing() -> Self {
        Self {
            watcher: WatcherConfig {
                poll_interval_ms: 50,
                fetch_timeout_ms: 20,
            },
            runtime: RuntimeConfig {
                update_wait_timeout_ms: 20,
                ..Default::default()
            },
            membership: MembershipConfig {
                code_sweep_interval_secs: 1,
                ..Default::default()
            },
            logging: LoggingConfig { level: LogLevel::Debug },
            ..Default::default()
        }
    }

    /// Production deployment defaults
    pub fn production() -> Self {
        Self {
            runtime: RuntimeConfig {
                update_wait_timeout_ms: 30_000,
                bet_deadline_secs: 60,
            },
            ..Default::default()
        }
    }

    /// Validate configuration for logical consistency
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.watcher.poll_interval_ms == 0 {
            return Err(invalid("watcher.poll_interval_ms", "0", "Poll interval cannot be zero"));
        }

        if self.watcher.fetch_timeout_ms == 0 || self.watcher.fetch_timeout_ms >= self.watcher.poll_interval_ms {
            return Err(invalid(
                "watcher.fetch_timeout_ms",
                &self.watcher.fetch_timeout_ms.to_string(),
                "Fetch timeout must be positive and shorter than the poll interval",
            ));
        }

        if self.runtime.update_wait_timeout_ms == 0 {
            return Err(invalid("runtime.update_wait_timeout_ms", "0", "Wait timeout cannot be zero"));
        }

        if self.runtime.bet_deadline_secs < 0 {
            return Err(invalid(
                "runtime.bet_deadline_secs",
                &self.runtime.bet_deadline_secs.to_string(),
                "Deadline cannot be after kickoff",
            ));
        }

        let multipliers = [
            ("scoring.draw_multiplier", self.scoring.draw_multiplier),
            ("scoring.underdog_multiplier", self.scoring.underdog_multiplier),
            ("scoring.rare_bonus", self.scoring.rare_bonus),
            ("scoring.uncommon_bonus", self.scoring.uncommon_bonus),
        ];
        for (field, value) in multipliers {
            if !(value > 0.0) {
                return Err(invalid(field, &value.to_string(), "Multiplier must be positive"));
            }
        }

        if self.scoring.rare_fraction > self.scoring.uncommon_fraction {
            return Err(ConfigurationError::ValidationFailed(
                "scoring.rare_fraction must not exceed scoring.uncommon_fraction".to_string(),
            ));
        }

        if self.membership.max_games_per_player == 0 {
            return Err(invalid("membership.max_games_per_player", "0", "Games limit cannot be zero"));
        }

        if !(4..=8).contains(&self.membership.code_length) {
            return Err(invalid(
                "membership.code_length",
                &self.membership.code_length.to_string(),
                "Code length must be between 4 and 8",
            ));
        }

        if self.membership.code_ttl_secs <= 0 {
            return Err(invalid(
                "membership.code_ttl_secs",
                &self.membership.code_ttl_secs.to_string(),
                "Code lifetime must be positive",
            ));
        }

        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.watcher.poll_interval_ms)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.watcher.fetch_timeout_ms)
    }

    pub fn update_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.runtime.update_wait_timeout_ms)
    }

    pub fn code_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.membership.code_sweep_interval_secs)
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigurationError {
    ConfigurationError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
