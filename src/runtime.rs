//! Per-game runtime
//!
//! Owns one game's authoritative state: its matches, current players and
//! cumulative standings. All mutation goes through a single async mutex, so
//! match updates from the watcher and membership changes from the coordinator
//! are serialized per game while different games run independently.
//!
//! Scoring a finished match is at-most-once: scores are persisted first, then
//! added to the standings and the match is marked as scored. Re-delivery of the
//! same finished match is ignored. A match whose score persistence failed is
//! kept pending and retried on the next update batch. A retry that finds the
//! scores already stored applies the stored records instead.

use crate::common::traits::MatchUpdateHandler;
use crate::common::types::{
    Bet, BetId, GameId, GameRecord, GameStatus, Match, MatchId, MatchStatus, PlayerId,
    ScoreRecord, StandingEntry, Standings,
};
use crate::config::MatchdayConfig;
use crate::errors::{ConflictError, MatchdayResult, RuntimeError, ValidationError};
use crate::scoring::ScoringEngine;
use crate::stores::Stores;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::time::Duration;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio_util::sync::CancellationToken;

struct GameState {
    record: GameRecord,
    players: BTreeSet<PlayerId>,
    standings: Standings,
    /// Matches whose scores are persisted and applied
    scored: HashSet<MatchId>,
    /// Finished matches whose scoring failed, retried on the next batch
    pending_scoring: BTreeMap<MatchId, Match>,
}

/// Serializable view of a running game
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct GameSnapshot {
    pub id: GameId,
    pub name: String,
    pub status: GameStatus,
    pub matches: Vec<Match>,
    pub players: Vec<PlayerId>,
    pub standings: Vec<StandingEntry>,
}

pub struct GameRuntime {
    id: GameId,
    stores: Stores,
    engine: ScoringEngine,
    bet_deadline: chrono::Duration,
    wait_timeout: Duration,
    state: Mutex<GameState>,
    status_tx: watch::Sender<GameStatus>,
}

impl GameRuntime {
    /// Runtime for a game with no score history
    pub fn new(record: GameRecord, players: Vec<PlayerId>, stores: Stores, config: &MatchdayConfig) -> Self {
        Self::restore(record, players, Vec::new(), stores, config)
    }

    /// Rebuild a runtime from persisted state.
    ///
    /// Standings are replayed from the score records. A match counts as scored
    /// when it has score records or is already finished in the game record.
    pub fn restore(
        record: GameRecord,
        players: Vec<PlayerId>,
        scores: Vec<ScoreRecord>,
        stores: Stores,
        config: &MatchdayConfig,
    ) -> Self {
        let mut standings = Standings::new();
        let mut scored: HashSet<MatchId> = HashSet::new();

        for score in scores.into_iter().filter(|s| s.game_id == record.id) {
            *standings.entry(score.player_id).or_insert(0) += score.points as u64;
            scored.insert(score.match_id);
        }
        scored.extend(record.matches.iter().filter(|m| m.is_finished()).map(|m| m.id.clone()));

        let (status_tx, _) = watch::channel(record.status);
        Self {
            id: record.id.clone(),
            stores,
            engine: ScoringEngine::new(config.scoring.clone()),
            bet_deadline: chrono::Duration::seconds(config.runtime.bet_deadline_secs),
            wait_timeout: config.update_wait_timeout(),
            state: Mutex::new(GameState {
                record,
                players: players.into_iter().collect(),
                standings,
                scored,
                pending_scoring: BTreeMap::new(),
            }),
            status_tx,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> GameStatus {
        *self.status_tx.borrow()
    }

    pub fn is_finished(&self) -> bool {
        self.status() == GameStatus::Finished
    }

    /// Apply one batch of match updates in order.
    ///
    /// Errors on a single match are logged and do not stop the rest of the batch.
    pub async fn handle_match_updates(&self, updates: Vec<Match>) -> MatchdayResult<()> {
        let mut state = self.state.lock().await;
        if state.record.status == GameStatus::Finished {
            tracing::debug!(game_id = %self.id, "Ignoring match updates for finished game");
            return Ok(());
        }

        let mut touched = false;

        let pending: Vec<Match> = std::mem::take(&mut state.pending_scoring).into_values().collect();
        for retry in pending {
            tracing::debug!(game_id = %self.id, match_id = %retry.id, "Retrying pending scoring");
            match self.apply_update(&mut state, retry).await {
                Ok(changed) => touched |= changed,
                Err(e) => tracing::warn!(game_id = %self.id, error = %e, "Pending scoring failed again"),
            }
        }

        for update in updates {
            let match_id = update.id.clone();
            match self.apply_update(&mut state, update).await {
                Ok(changed) => touched |= changed,
                Err(e) => {
                    tracing::warn!(game_id = %self.id, match_id = %match_id, error = %e, "Match update failed");
                }
            }
        }

        let advanced = self.advance_status(&mut state);
        if touched || advanced {
            if let Err(e) = self.stores.games.save_with_id(&state.record).await {
                tracing::warn!(game_id = %self.id, error = %e, "Failed to persist game record");
            }
        }
        Ok(())
    }

    async fn apply_update(&self, state: &mut GameState, update: Match) -> MatchdayResult<bool> {
        let Some(pos) = state.record.matches.iter().position(|m| m.id == update.id) else {
            return Ok(false);
        };

        if state.scored.contains(&update.id) {
            if update.is_finished() && !state.record.matches[pos].is_finished() {
                // scored before a restart, the record only lags behind
                state.record.matches[pos] = update;
                return Ok(true);
            }
            if state.record.matches[pos] != update {
                tracing::warn!(
                    game_id = %self.id,
                    match_id = %update.id,
                    "Correction for an already scored match, scores left unchanged"
                );
            } else {
                tracing::debug!(game_id = %self.id, match_id = %update.id, "Duplicate finished match ignored");
            }
            return Ok(false);
        }

        if update.is_finished() {
            if let Err(e) = self.score_match(state, &update).await {
                state.pending_scoring.insert(update.id.clone(), update);
                return Err(e);
            }
        }

        state.record.matches[pos] = update;
        Ok(true)
    }

    /// Bets, score, persist, then apply. Standings are untouched unless the
    /// scores were persisted.
    async fn score_match(&self, state: &mut GameState, finished: &Match) -> MatchdayResult<()> {
        let bets: Vec<Bet> = self
            .stores
            .bets
            .get_bets_for_match(&finished.id, &self.id)
            .await?
            .into_iter()
            .filter(|bet| state.players.contains(&bet.player_id))
            .collect();

        let mut scores = self.engine.score(finished, &bets);

        if !scores.is_empty() {
            match self.stores.scores.update_scores(&self.id, &finished.id, &scores).await {
                Ok(()) => {}
                Err(e) if e.is_score_already_recorded() => {
                    // an earlier attempt committed before reporting failure
                    scores = self.persisted_scores(&finished.id).await?;
                    tracing::info!(
                        game_id = %self.id,
                        match_id = %finished.id,
                        records = scores.len(),
                        "Scores already persisted, applying stored records"
                    );
                }
                Err(e) => {
                    tracing::error!(game_id = %self.id, match_id = %finished.id, error = %e, "Failed to persist scores");
                    return Err(e);
                }
            }
        }

        for (player_id, points) in &scores {
            *state.standings.entry(player_id.clone()).or_insert(0) += *points as u64;
        }
        state.scored.insert(finished.id.clone());

        tracing::info!(
            game_id = %self.id,
            match_id = %finished.id,
            bets = bets.len(),
            goals = ?finished.goals,
            "Match scored"
        );
        Ok(())
    }

    async fn persisted_scores(&self, match_id: &str) -> MatchdayResult<HashMap<PlayerId, u32>> {
        Ok(self
            .stores
            .scores
            .get_scores(&self.id)
            .await?
            .into_iter()
            .filter(|s| s.match_id == match_id)
            .map(|s| (s.player_id, s.points))
            .collect())
    }

    /// Move the status forward if the matches warrant it. Never moves back.
    fn advance_status(&self, state: &mut GameState) -> bool {
        let matches = &state.record.matches;
        let computed = if !matches.is_empty() && matches.iter().all(|m| state.scored.contains(&m.id)) {
            GameStatus::Finished
        } else if matches
            .iter()
            .any(|m| m.status != MatchStatus::Scheduled || state.scored.contains(&m.id))
        {
            GameStatus::InProgress
        } else {
            GameStatus::NotStarted
        };

        let next = state.record.status.max(computed);
        if next == state.record.status {
            return false;
        }

        state.record.status = next;
        self.status_tx.send_replace(next);
        tracing::info!(game_id = %self.id, status = ?next, "Game status advanced");
        true
    }

    /// Place or replace a player's bet.
    ///
    /// Betting closes `bet_deadline_secs` before kickoff and as soon as the
    /// match leaves the scheduled state.
    pub async fn place_bet(&self, bet: Bet, now: DateTime<Utc>) -> MatchdayResult<BetId> {
        let state = self.state.lock().await;

        if state.record.status == GameStatus::Finished {
            return Err(ConflictError::GameFinished(self.id.clone()).into());
        }

        if !state.players.contains(&bet.player_id) {
            return Err(ValidationError::NotAMember {
                player_id: bet.player_id.clone(),
                game_id: self.id.clone(),
            }
            .into());
        }

        let Some(target) = state.record.matches.iter().find(|m| m.id == bet.match_id) else {
            return Err(ValidationError::UnknownMatch(bet.match_id.clone()).into());
        };

        if target.status != MatchStatus::Scheduled || now >= target.scheduled_at - self.bet_deadline {
            return Err(ValidationError::BettingClosed {
                match_id: target.id.clone(),
                kickoff: target.scheduled_at,
            }
            .into());
        }

        let bet_id = self.stores.bets.save_bet(&self.id, &bet).await?;
        tracing::debug!(game_id = %self.id, player_id = %bet.player_id, match_id = %bet.match_id, "Bet placed");
        Ok(bet_id)
    }

    pub async fn get_player_bets(&self, player_id: &str) -> MatchdayResult<Vec<Bet>> {
        self.stores.bets.get_bets(&self.id, player_id).await
    }

    /// Add a player to the in-memory set. Adding a present player is a no-op.
    pub async fn add_player(&self, player_id: &str) -> MatchdayResult<bool> {
        let mut state = self.state.lock().await;
        if state.record.status == GameStatus::Finished {
            return Err(ConflictError::GameFinished(self.id.clone()).into());
        }

        let added = state.players.insert(player_id.to_string());
        if !added {
            tracing::debug!(game_id = %self.id, player_id = %player_id, "Player already present");
        }
        Ok(added)
    }

    /// Remove a player from the in-memory set. Removing an absent player is a no-op.
    pub async fn remove_player(&self, player_id: &str) -> bool {
        let mut state = self.state.lock().await;
        let removed = state.players.remove(player_id);
        if !removed {
            tracing::debug!(game_id = %self.id, player_id = %player_id, "Player already absent");
        }
        removed
    }

    /// Administrative finish, used when the last player leaves
    pub async fn finish(&self) -> GameRecord {
        let mut state = self.state.lock().await;
        if state.record.status != GameStatus::Finished {
            state.record.status = GameStatus::Finished;
            self.status_tx.send_replace(GameStatus::Finished);
            tracing::info!(game_id = %self.id, "Game finished");
        }
        state.record.clone()
    }

    /// Current players with the highest cumulative score. Ties produce several winners.
    pub async fn winners(&self) -> Vec<PlayerId> {
        let state = self.state.lock().await;
        let best = state
            .players
            .iter()
            .map(|p| state.standings.get(p).copied().unwrap_or(0))
            .max();

        match best {
            Some(best) => state
                .players
                .iter()
                .filter(|p| state.standings.get(*p).copied().unwrap_or(0) == best)
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Leaderboard of current players, highest first, ties by player id
    pub async fn standings(&self) -> Vec<StandingEntry> {
        let state = self.state.lock().await;
        Self::leaderboard(&state)
    }

    fn leaderboard(state: &MutexGuard<'_, GameState>) -> Vec<StandingEntry> {
        let mut entries: Vec<StandingEntry> = state
            .players
            .iter()
            .map(|p| StandingEntry {
                player_id: p.clone(),
                points: state.standings.get(p).copied().unwrap_or(0),
            })
            .collect();
        entries.sort_by(|a, b| b.points.cmp(&a.points).then_with(|| a.player_id.cmp(&b.player_id)));
        entries
    }

    pub async fn players(&self) -> Vec<PlayerId> {
        self.state.lock().await.players.iter().cloned().collect()
    }

    pub async fn has_player(&self, player_id: &str) -> bool {
        self.state.lock().await.players.contains(player_id)
    }

    pub async fn matches(&self) -> Vec<Match> {
        self.state.lock().await.record.matches.clone()
    }

    pub async fn record(&self) -> GameRecord {
        self.state.lock().await.record.clone()
    }

    pub async fn pending_scoring(&self) -> Vec<MatchId> {
        self.state.lock().await.pending_scoring.keys().cloned().collect()
    }

    pub async fn snapshot(&self) -> GameSnapshot {
        let state = self.state.lock().await;
        GameSnapshot {
            id: self.id.clone(),
            name: state.record.name.clone(),
            status: state.record.status,
            matches: state.record.matches.clone(),
            players: state.players.iter().cloned().collect(),
            standings: Self::leaderboard(&state),
        }
    }

    /// Block until the game finishes and return its winners.
    ///
    /// Each wait is bounded by the update wait timeout; a timeout only means no
    /// update arrived this cycle.
    pub async fn play(&self, cancel: &CancellationToken) -> MatchdayResult<Vec<PlayerId>> {
        let mut status_rx = self.status_tx.subscribe();

        loop {
            if *status_rx.borrow_and_update() == GameStatus::Finished {
                let winners = self.winners().await;
                tracing::info!(game_id = %self.id, winners = ?winners, "Game over");
                return Ok(winners);
            }

            tokio::select! {
                _ = cancel.cancelled() => return Err(RuntimeError::Cancelled.into()),
                waited = tokio::time::timeout(self.wait_timeout, status_rx.changed()) => match waited {
                    Ok(Ok(())) => {}
                    Ok(Err(_)) => {
                        return Err(RuntimeError::InvariantViolation("status channel closed".to_string()).into())
                    }
                    Err(_) => tracing::trace!(game_id = %self.id, "No updates this cycle"),
                }
            }
        }
    }
}

#[async_trait]
impl MatchUpdateHandler for GameRuntime {
    fn game_id(&self) -> &str {
        &self.id
    }

    async fn on_match_updates(&self, updates: Vec<Match>) -> MatchdayResult<()> {
        self.handle_match_updates(updates).await
    }
}
