//! Matchday - live game runtime for football prediction leagues
//!
//! Watches an external match feed, applies match updates to per-game
//! runtimes, scores finished matches exactly once and keeps persisted
//! membership and the cached runtimes consistent.

pub mod common;
pub mod config;
pub mod errors;
pub mod membership;
pub mod registry;
pub mod runtime;
pub mod scoring;
pub mod services;
pub mod stores;
pub mod watcher;

pub use common::identity::OAuthUser;
pub use common::types::{
    Bet, GameCode, GameId, GameRecord, GameStatus, Goals, Match, MatchId, MatchState, MatchStatus,
    Odds, Outcome, Player, PlayerId, ScoreRecord, StandingEntry,
};
pub use config::MatchdayConfig;
pub use errors::{MatchdayError, MatchdayResult};
pub use membership::{CreatedGame, JoinOutcome, MembershipCoordinator, RemovalOutcome};
pub use registry::GameServiceRegistry;
pub use runtime::{GameRuntime, GameSnapshot};
pub use scoring::{PredictionClass, ScoringEngine};
pub use services::{ServiceBuilder, ServiceContainer};
pub use stores::{MemoryStores, ReplayMatchSource, Stores};
pub use watcher::{MatchWatcher, WatcherStats};
