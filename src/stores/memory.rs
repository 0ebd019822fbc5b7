//! In-memory stores
//!
//! Concurrent maps behind the store traits. Every store carries a
//! [`FaultSwitch`] counting reads and writes and able to fail them on demand.

use crate::common::traits::{
    BetStore, GameCodeStore, GameStore, MatchDataSource, MembershipStore, ScoreStore,
};
use crate::common::types::{
    Bet, BetId, GameCode, GameId, GameRecord, MatchId, MatchState, PlayerId, ScoreRecord,
};
use crate::errors::{ConflictError, MatchdayResult, StorageError, WatcherError};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;
use uuid::Uuid;

/// Call counters and failure injection shared by the in-memory stores
#[derive(Debug, Default)]
pub struct FaultSwitch {
    reads: AtomicU64,
    writes: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FaultSwitch {
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn read(&self, op: &str) -> MatchdayResult<()> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::ReadFailed(format!("{}: injected failure", op)).into());
        }
        Ok(())
    }

    fn write(&self, op: &str) -> MatchdayResult<()> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::WriteFailed(format!("{}: injected failure", op)).into());
        }
        Ok(())
    }
}

/// Bets keyed by (game, player, match), so a new bet replaces the prior one
#[derive(Default)]
pub struct MemoryBetStore {
    bets: DashMap<(GameId, PlayerId, MatchId), (BetId, Bet)>,
    pub faults: FaultSwitch,
}

impl MemoryBetStore {
    pub fn len(&self) -> usize {
        self.bets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bets.is_empty()
    }
}

#[async_trait]
impl BetStore for MemoryBetStore {
    async fn get_bets_for_match(&self, match_id: &str, game_id: &str) -> MatchdayResult<Vec<Bet>> {
        self.faults.read("get_bets_for_match")?;
        let mut bets: Vec<Bet> = self
            .bets
            .iter()
            .filter(|e| e.key().0 == game_id && e.key().2 == match_id)
            .map(|e| e.value().1.clone())
            .collect();
        bets.sort_by(|a, b| a.player_id.cmp(&b.player_id));
        Ok(bets)
    }

    async fn save_bet(&self, game_id: &str, bet: &Bet) -> MatchdayResult<BetId> {
        self.faults.write("save_bet")?;
        let id = Uuid::new_v4().to_string();
        self.bets.insert(
            (game_id.to_string(), bet.player_id.clone(), bet.match_id.clone()),
            (id.clone(), bet.clone()),
        );
        Ok(id)
    }

    async fn get_bets(&self, game_id: &str, player_id: &str) -> MatchdayResult<Vec<Bet>> {
        self.faults.read("get_bets")?;
        let mut bets: Vec<Bet> = self
            .bets
            .iter()
            .filter(|e| e.key().0 == game_id && e.key().1 == player_id)
            .map(|e| e.value().1.clone())
            .collect();
        bets.sort_by(|a, b| a.match_id.cmp(&b.match_id));
        Ok(bets)
    }
}

/// Scores keyed by (game, match, player). A second write for any existing
/// key is rejected whole.
#[derive(Default)]
pub struct MemoryScoreStore {
    scores: Mutex<HashMap<(GameId, MatchId, PlayerId), u32>>,
    pub faults: FaultSwitch,
}

impl MemoryScoreStore {
    pub fn records(&self, game_id: &str) -> Vec<ScoreRecord> {
        let scores = self.scores.lock().unwrap_or_else(|p| p.into_inner());
        let mut records: Vec<ScoreRecord> = scores
            .iter()
            .filter(|((g, _, _), _)| g == game_id)
            .map(|((g, m, p), points)| ScoreRecord {
                game_id: g.clone(),
                match_id: m.clone(),
                player_id: p.clone(),
                points: *points,
            })
            .collect();
        records.sort_by(|a, b| (&a.match_id, &a.player_id).cmp(&(&b.match_id, &b.player_id)));
        records
    }
}

#[async_trait]
impl ScoreStore for MemoryScoreStore {
    async fn update_scores(&self, game_id: &str, match_id: &str, scores: &HashMap<PlayerId, u32>) -> MatchdayResult<()> {
        self.faults.write("update_scores")?;
        let mut stored = self.scores.lock().unwrap_or_else(|p| p.into_inner());

        for player_id in scores.keys() {
            let key = (game_id.to_string(), match_id.to_string(), player_id.clone());
            if stored.contains_key(&key) {
                return Err(ConflictError::ScoreAlreadyRecorded {
                    game_id: game_id.to_string(),
                    match_id: match_id.to_string(),
                    player_id: player_id.clone(),
                }
                .into());
            }
        }

        for (player_id, points) in scores {
            stored.insert((game_id.to_string(), match_id.to_string(), player_id.clone()), *points);
        }
        Ok(())
    }

    async fn get_scores(&self, game_id: &str) -> MatchdayResult<Vec<ScoreRecord>> {
        self.faults.read("get_scores")?;
        Ok(self.records(game_id))
    }
}

#[derive(Default)]
pub struct MemoryGameStore {
    games: DashMap<GameId, GameRecord>,
    pub faults: FaultSwitch,
}

#[async_trait]
impl GameStore for MemoryGameStore {
    async fn create_game(&self, record: &GameRecord) -> MatchdayResult<GameId> {
        self.faults.write("create_game")?;
        self.games.insert(record.id.clone(), record.clone());
        Ok(record.id.clone())
    }

    async fn get_game(&self, game_id: &str) -> MatchdayResult<Option<GameRecord>> {
        self.faults.read("get_game")?;
        Ok(self.games.get(game_id).map(|r| r.value().clone()))
    }

    async fn save_with_id(&self, record: &GameRecord) -> MatchdayResult<()> {
        self.faults.write("save_with_id")?;
        self.games.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn get_all_games(&self) -> MatchdayResult<Vec<GameRecord>> {
        self.faults.read("get_all_games")?;
        let mut games: Vec<GameRecord> = self.games.iter().map(|r| r.value().clone()).collect();
        games.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(games)
    }
}

#[derive(Default)]
pub struct MemoryMembershipStore {
    members: DashMap<GameId, BTreeSet<PlayerId>>,
    pub faults: FaultSwitch,
}

#[async_trait]
impl MembershipStore for MemoryMembershipStore {
    async fn is_player_in_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<bool> {
        self.faults.read("is_player_in_game")?;
        Ok(self
            .members
            .get(game_id)
            .map(|players| players.contains(player_id))
            .unwrap_or(false))
    }

    async fn add_player_to_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()> {
        self.faults.write("add_player_to_game")?;
        self.members
            .entry(game_id.to_string())
            .or_default()
            .insert(player_id.to_string());
        Ok(())
    }

    async fn remove_player_from_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()> {
        self.faults.write("remove_player_from_game")?;
        if let Some(mut players) = self.members.get_mut(game_id) {
            players.remove(player_id);
        }
        Ok(())
    }

    async fn get_players_in_game(&self, game_id: &str) -> MatchdayResult<Vec<PlayerId>> {
        self.faults.read("get_players_in_game")?;
        Ok(self
            .members
            .get(game_id)
            .map(|players| players.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn get_player_games(&self, player_id: &str) -> MatchdayResult<Vec<GameId>> {
        self.faults.read("get_player_games")?;
        let mut games: Vec<GameId> = self
            .members
            .iter()
            .filter(|e| e.value().contains(player_id))
            .map(|e| e.key().clone())
            .collect();
        games.sort();
        Ok(games)
    }
}

#[derive(Default)]
pub struct MemoryGameCodeStore {
    codes: DashMap<String, GameCode>,
    pub faults: FaultSwitch,
}

#[async_trait]
impl GameCodeStore for MemoryGameCodeStore {
    async fn create_game_code(&self, game_id: &str, code: &str, expires_at: DateTime<Utc>) -> MatchdayResult<()> {
        self.faults.write("create_game_code")?;
        self.codes.insert(
            code.to_string(),
            GameCode {
                game_id: game_id.to_string(),
                code: code.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn get_game_code_by_code(&self, code: &str) -> MatchdayResult<Option<GameCode>> {
        self.faults.read("get_game_code_by_code")?;
        Ok(self.codes.get(code).map(|c| c.value().clone()))
    }

    async fn code_exists(&self, code: &str) -> MatchdayResult<bool> {
        self.faults.read("code_exists")?;
        Ok(self.codes.contains_key(code))
    }

    async fn delete_game_code_by_game_id(&self, game_id: &str) -> MatchdayResult<()> {
        self.faults.write("delete_game_code_by_game_id")?;
        self.codes.retain(|_, c| c.game_id != game_id);
        Ok(())
    }

    async fn delete_expired_codes(&self, now: DateTime<Utc>) -> MatchdayResult<usize> {
        self.faults.write("delete_expired_codes")?;
        let before = self.codes.len();
        self.codes.retain(|_, c| !c.is_expired(now));
        Ok(before.saturating_sub(self.codes.len()))
    }
}

/// Match source whose states are set directly, for tests and seeding
#[derive(Default)]
pub struct ScriptedMatchSource {
    states: DashMap<MatchId, MatchState>,
    fail: AtomicBool,
    delay_ms: AtomicU64,
    fetches: AtomicU64,
}

impl ScriptedMatchSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_state(&self, match_id: impl Into<MatchId>, state: MatchState) {
        self.states.insert(match_id.into(), state);
    }

    pub fn fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    /// Artificial latency applied to every fetch
    pub fn set_delay_ms(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::SeqCst);
    }

    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MatchDataSource for ScriptedMatchSource {
    async fn get_last_match_infos(&self, watched: &[MatchId]) -> MatchdayResult<HashMap<MatchId, MatchState>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
        }

        if self.fail.load(Ordering::SeqCst) {
            return Err(WatcherError::FetchFailed("scripted source failure".to_string()).into());
        }

        Ok(watched
            .iter()
            .filter_map(|id| self.states.get(id).map(|s| (id.clone(), s.value().clone())))
            .collect())
    }
}
