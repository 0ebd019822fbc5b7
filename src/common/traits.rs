//! Shared traits and interfaces
//!
//! One trait per external collaborator of the game runtime. Concrete
//! implementations are injected through the service container.

use crate::common::types::{
    Bet, BetId, GameCode, GameId, GameRecord, Match, MatchId, MatchState, PlayerId, ScoreRecord,
};
use crate::errors::MatchdayResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// External source of live match information
#[async_trait]
pub trait MatchDataSource: Send + Sync {
    /// Current state of every requested match. Matches unknown to the source
    /// are simply absent from the result.
    async fn get_last_match_infos(&self, watched: &[MatchId]) -> MatchdayResult<HashMap<MatchId, MatchState>>;
}

/// Storage for player predictions
#[async_trait]
pub trait BetStore: Send + Sync {
    /// All bets placed on a match within a game
    async fn get_bets_for_match(&self, match_id: &str, game_id: &str) -> MatchdayResult<Vec<Bet>>;

    /// Store a bet, replacing any prior bet of the same player on the same match
    async fn save_bet(&self, game_id: &str, bet: &Bet) -> MatchdayResult<BetId>;

    /// All bets of a player within a game
    async fn get_bets(&self, game_id: &str, player_id: &str) -> MatchdayResult<Vec<Bet>>;
}

/// Storage for awarded points
#[async_trait]
pub trait ScoreStore: Send + Sync {
    /// Persist the scores of one finished match. Must succeed before the
    /// in-memory standings are touched.
    async fn update_scores(&self, game_id: &str, match_id: &str, scores: &HashMap<PlayerId, u32>) -> MatchdayResult<()>;

    /// Every score persisted for a game, used to rebuild standings on restart
    async fn get_scores(&self, game_id: &str) -> MatchdayResult<Vec<ScoreRecord>>;
}

/// Storage for the serializable game state
#[async_trait]
pub trait GameStore: Send + Sync {
    async fn create_game(&self, record: &GameRecord) -> MatchdayResult<GameId>;

    async fn get_game(&self, game_id: &str) -> MatchdayResult<Option<GameRecord>>;

    /// Insert or overwrite the record under its own id
    async fn save_with_id(&self, record: &GameRecord) -> MatchdayResult<()>;

    async fn get_all_games(&self) -> MatchdayResult<Vec<GameRecord>>;
}

/// Persisted (game, player) membership pairs
#[async_trait]
pub trait MembershipStore: Send + Sync {
    async fn is_player_in_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<bool>;

    async fn add_player_to_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()>;

    async fn remove_player_from_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()>;

    async fn get_players_in_game(&self, game_id: &str) -> MatchdayResult<Vec<PlayerId>>;

    async fn get_player_games(&self, player_id: &str) -> MatchdayResult<Vec<GameId>>;
}

/// Storage for join codes
#[async_trait]
pub trait GameCodeStore: Send + Sync {
    async fn create_game_code(&self, game_id: &str, code: &str, expires_at: DateTime<Utc>) -> MatchdayResult<()>;

    async fn get_game_code_by_code(&self, code: &str) -> MatchdayResult<Option<GameCode>>;

    async fn code_exists(&self, code: &str) -> MatchdayResult<bool>;

    async fn delete_game_code_by_game_id(&self, game_id: &str) -> MatchdayResult<()>;

    /// Remove every code expired at `now`, returning how many were removed
    async fn delete_expired_codes(&self, now: DateTime<Utc>) -> MatchdayResult<usize>;
}

/// Subscriber receiving match delta batches from the watcher
#[async_trait]
pub trait MatchUpdateHandler: Send + Sync {
    /// Key under which the subscription is registered
    fn game_id(&self) -> &str;

    /// Handle one batch of changed matches, in the order the watcher observed them
    async fn on_match_updates(&self, updates: Vec<Match>) -> MatchdayResult<()>;
}
