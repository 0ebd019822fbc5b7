//! Error types for the matchday game runtime
//!
//! One root error with a variant per failure category, so callers at the API
//! boundary can map categories to user-visible behavior without string matching.

use crate::common::types::{GameId, MatchId, PlayerId};
use chrono::{DateTime, Utc};
use thiserror::Error;

/// Root error type for all matchday operations
#[derive(Debug, Error)]
pub enum MatchdayError {
    /// Input rejected by game rules
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Referenced entity does not exist
    #[error("Not found: {0}")]
    NotFound(#[from] NotFoundError),

    /// Operation conflicts with current state
    #[error("Conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Store call failed
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Match feed or subscription errors
    #[error("Watcher error: {0}")]
    Watcher(#[from] WatcherError),

    /// Game runtime lifecycle errors
    #[error("Runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    /// Configuration related errors
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

/// Game rule violations
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Betting closed for match {match_id} (kickoff {kickoff})")]
    BettingClosed {
        match_id: MatchId,
        kickoff: DateTime<Utc>,
    },

    #[error("Match {0} is not part of this game")]
    UnknownMatch(MatchId),

    #[error("Player {player_id} is not a member of game {game_id}")]
    NotAMember { player_id: PlayerId, game_id: GameId },

    #[error("Invalid join code: {0}")]
    InvalidCode(String),

    #[error("Invalid identity: {0}")]
    InvalidIdentity(String),
}

/// Missing entities
#[derive(Debug, Error)]
pub enum NotFoundError {
    #[error("Game {0} not found")]
    Game(GameId),

    #[error("Match {0} not found")]
    Match(MatchId),

    #[error("Join code {0} not found")]
    Code(String),
}

/// State conflicts
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("Player {player_id} is not in game {game_id}")]
    NotInGame { player_id: PlayerId, game_id: GameId },

    #[error("Game {0} is finished")]
    GameFinished(GameId),

    #[error("Player {player_id} already plays {limit} games")]
    GamesLimitReached { player_id: PlayerId, limit: usize },

    #[error("Join code {0} has expired")]
    CodeExpired(String),

    #[error("Game {0} is already subscribed to the match watcher")]
    AlreadySubscribed(GameId),

    #[error("Game {0} is already registered")]
    AlreadyRegistered(GameId),

    #[error("No free join code after {0} attempts")]
    CodeUnavailable(usize),

    #[error("Score already recorded for player {player_id} on match {match_id} in game {game_id}")]
    ScoreAlreadyRecorded {
        game_id: GameId,
        match_id: MatchId,
        player_id: PlayerId,
    },
}

/// Store failures, assumed transient
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Read failed: {0}")]
    ReadFailed(String),

    #[error("Write failed: {0}")]
    WriteFailed(String),

    #[error("Corrupted data: {0}")]
    CorruptedData(String),
}

/// Match feed and subscription failures
#[derive(Debug, Error)]
pub enum WatcherError {
    #[error("Fetching match infos failed: {0}")]
    FetchFailed(String),

    #[error("Fetching match infos timed out after {timeout_ms}ms")]
    FetchTimeout { timeout_ms: u64 },

    #[error("Match watcher is stopped")]
    Stopped,
}

/// Runtime lifecycle failures
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("Game loop cancelled")]
    Cancelled,

    #[error("Invariant violated: {0}")]
    InvariantViolation(String),
}

/// Configuration and validation errors
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Missing required field: {0}")]
    MissingRequired(String),

    #[error("Invalid value for {field}: '{value}' ({reason})")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("Failed to save configuration: {0}")]
    SaveFailed(String),
}

impl MatchdayError {
    /// Removal of a non-member, distinguishable from generic failures
    pub fn is_not_in_game(&self) -> bool {
        matches!(self, MatchdayError::Conflict(ConflictError::NotInGame { .. }))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, MatchdayError::Conflict(_))
    }

    pub fn is_score_already_recorded(&self) -> bool {
        matches!(self, MatchdayError::Conflict(ConflictError::ScoreAlreadyRecorded { .. }))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, MatchdayError::NotFound(_))
    }

    /// Infrastructure failures worth retrying at the caller's discretion
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            MatchdayError::Storage(_)
                | MatchdayError::Watcher(WatcherError::FetchFailed(_))
                | MatchdayError::Watcher(WatcherError::FetchTimeout { .. })
        )
    }
}

impl From<std::io::Error> for MatchdayError {
    fn from(e: std::io::Error) -> Self {
        MatchdayError::Storage(StorageError::ReadFailed(e.to_string()))
    }
}

impl From<serde_json::Error> for MatchdayError {
    fn from(e: serde_json::Error) -> Self {
        MatchdayError::Storage(StorageError::CorruptedData(e.to_string()))
    }
}

/// Convenience type alias for Results
pub type MatchdayResult<T> = Result<T, MatchdayError>;
