//! Shared type definitions for the matchday runtime
//!
//! Canonical match, bet, score and game records passed between the watcher,
//! the runtimes and the stores.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type GameId = String;
pub type MatchId = String;
pub type PlayerId = String;
pub type BetId = String;

/// Lifecycle of a single football match
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum MatchStatus {
    Scheduled,
    InProgress,
    Finished,
}

/// Decimal odds for the three possible outcomes
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Default)]
pub struct Odds {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

impl Odds {
    pub fn new(home: f64, draw: f64, away: f64) -> Self {
        Self { home, draw, away }
    }

    /// Side with the lower odds, `None` when both sides are priced equally
    pub fn favorite(&self) -> Option<Outcome> {
        if self.home < self.away {
            Some(Outcome::HomeWin)
        } else if self.away < self.home {
            Some(Outcome::AwayWin)
        } else {
            None
        }
    }

    /// Absolute distance between the home and away prices
    pub fn gap(&self) -> f64 {
        (self.home - self.away).abs()
    }
}

/// Goals scored by each side
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
pub struct Goals {
    pub home: u8,
    pub away: u8,
}

impl Goals {
    pub fn new(home: u8, away: u8) -> Self {
        Self { home, away }
    }

    pub fn difference(&self) -> i16 {
        self.home as i16 - self.away as i16
    }

    pub fn total(&self) -> i16 {
        self.home as i16 + self.away as i16
    }

    pub fn outcome(&self) -> Outcome {
        match self.home.cmp(&self.away) {
            std::cmp::Ordering::Greater => Outcome::HomeWin,
            std::cmp::Ordering::Less => Outcome::AwayWin,
            std::cmp::Ordering::Equal => Outcome::Draw,
        }
    }
}

/// Result of a match from the home side's point of view
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    HomeWin,
    Draw,
    AwayWin,
}

/// Live state of a match as reported by the external data source
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct MatchState {
    pub scheduled_at: DateTime<Utc>,
    pub odds: Odds,
    #[serde(default)]
    pub goals: Goals,
    pub status: MatchStatus,
}

/// A tracked football match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Match {
    pub id: MatchId,
    pub home_team: String,
    pub away_team: String,
    pub competition: String,
    pub season: String,
    pub scheduled_at: DateTime<Utc>,
    pub odds: Odds,
    /// Only meaningful once the match is finished
    #[serde(default)]
    pub goals: Goals,
    pub status: MatchStatus,
}

impl Match {
    pub fn is_finished(&self) -> bool {
        self.status == MatchStatus::Finished
    }

    pub fn is_in_progress(&self) -> bool {
        self.status == MatchStatus::InProgress
    }

    /// Current feed state of this match
    pub fn state(&self) -> MatchState {
        MatchState {
            scheduled_at: self.scheduled_at,
            odds: self.odds,
            goals: self.goals,
            status: self.status,
        }
    }

    /// Copy of this match carrying the given feed state
    pub fn with_state(&self, state: &MatchState) -> Match {
        Match {
            scheduled_at: state.scheduled_at,
            odds: state.odds,
            goals: state.goals,
            status: state.status,
            ..self.clone()
        }
    }
}

/// Field of a match that the watcher compares between polls
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MatchField {
    Finished,
    HomeOdds,
    DrawOdds,
    AwayOdds,
    ScheduledAt,
    HomeGoals,
    AwayGoals,
    InProgress,
}

/// Set of fields that differ between two states of the same match
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MatchDelta {
    pub match_id: MatchId,
    pub changed: Vec<MatchField>,
}

impl MatchDelta {
    /// Field-by-field comparison, `None` when nothing changed
    pub fn between(previous: &Match, current: &MatchState) -> Option<MatchDelta> {
        let mut changed = Vec::new();

        if previous.is_finished() != (current.status == MatchStatus::Finished) {
            changed.push(MatchField::Finished);
        }
        if previous.odds.home != current.odds.home {
            changed.push(MatchField::HomeOdds);
        }
        if previous.odds.draw != current.odds.draw {
            changed.push(MatchField::DrawOdds);
        }
        if previous.odds.away != current.odds.away {
            changed.push(MatchField::AwayOdds);
        }
        if previous.scheduled_at != current.scheduled_at {
            changed.push(MatchField::ScheduledAt);
        }
        if previous.goals.home != current.goals.home {
            changed.push(MatchField::HomeGoals);
        }
        if previous.goals.away != current.goals.away {
            changed.push(MatchField::AwayGoals);
        }
        if previous.is_in_progress() != (current.status == MatchStatus::InProgress) {
            changed.push(MatchField::InProgress);
        }

        if changed.is_empty() {
            None
        } else {
            Some(MatchDelta {
                match_id: previous.id.clone(),
                changed,
            })
        }
    }
}

/// A player's score prediction for one match
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Bet {
    pub player_id: PlayerId,
    pub match_id: MatchId,
    pub predicted: Goals,
    pub placed_at: DateTime<Utc>,
}

impl Bet {
    pub fn new(player_id: impl Into<PlayerId>, match_id: impl Into<MatchId>, home: u8, away: u8, placed_at: DateTime<Utc>) -> Self {
        Self {
            player_id: player_id.into(),
            match_id: match_id.into(),
            predicted: Goals::new(home, away),
            placed_at,
        }
    }
}

/// Points awarded to one player for one finished match in one game
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ScoreRecord {
    pub game_id: GameId,
    pub match_id: MatchId,
    pub player_id: PlayerId,
    pub points: u32,
}

/// Lifecycle of a game instance
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GameStatus {
    NotStarted,
    InProgress,
    Finished,
}

/// Serializable state of a game as held by the game store
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GameRecord {
    pub id: GameId,
    pub name: String,
    pub competition: String,
    pub season: String,
    pub matches: Vec<Match>,
    pub status: GameStatus,
    pub created_at: DateTime<Utc>,
}

/// Short-lived token used to join a game
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct GameCode {
    pub game_id: GameId,
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

impl GameCode {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A participant as seen by the game runtime
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Player {
    pub id: PlayerId,
    pub display_name: String,
}

/// Cumulative score per player
pub type Standings = HashMap<PlayerId, u64>;

/// One leaderboard line
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct StandingEntry {
    pub player_id: PlayerId,
    pub points: u64,
}
