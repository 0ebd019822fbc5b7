//! Membership coordination
//!
//! Joining and leaving touch two resources: the persisted membership store and
//! the player set of the cached [`GameRuntime`]. Both are changed while holding
//! the registry's per-game lock, persisted side first. If the cached side then
//! refuses the change, the persisted change is undone before the error is
//! returned, so callers never observe the two disagreeing. Joins and game
//! creation also hold the player's lock, which keeps the games limit exact
//! when one player joins several games at once.

use crate::common::types::{GameId, GameRecord, GameStatus, Match, PlayerId};
use crate::config::MembershipConfig;
use crate::errors::{ConflictError, MatchdayResult, NotFoundError, ValidationError};
use crate::registry::GameServiceRegistry;
use crate::runtime::GameRuntime;
use crate::stores::Stores;
use crate::watcher::MatchWatcher;
use chrono::{DateTime, Utc};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

const CODE_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const MAX_CODE_ATTEMPTS: usize = 16;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined,
    /// Player was already a member, nothing was written
    AlreadyMember,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RemovalOutcome {
    /// Members left after the removal, `None` if the count could not be read
    pub remaining: Option<usize>,
    /// The leaver was the last member and the game was shut down
    pub game_deleted: bool,
}

/// Result of [`MembershipCoordinator::create_game`]
#[derive(Clone)]
pub struct CreatedGame {
    pub game_id: GameId,
    pub code: String,
    pub runtime: Arc<GameRuntime>,
}

pub struct MembershipCoordinator {
    registry: Arc<GameServiceRegistry>,
    watcher: Arc<MatchWatcher>,
    stores: Stores,
    config: MembershipConfig,
}

impl MembershipCoordinator {
    pub fn new(
        registry: Arc<GameServiceRegistry>,
        watcher: Arc<MatchWatcher>,
        stores: Stores,
        config: MembershipConfig,
    ) -> Self {
        Self {
            registry,
            watcher,
            stores,
            config,
        }
    }

    /// Add a player to a game.
    ///
    /// An existing member gets [`JoinOutcome::AlreadyMember`] without any write.
    /// A cache miss is fine: the runtime reads membership when next created.
    pub async fn add_player_to_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<JoinOutcome> {
        let _player = self.registry.lock_player(player_id).await;
        let _guard = self.registry.lock_game(game_id).await;

        if self.stores.memberships.is_player_in_game(game_id, player_id).await? {
            tracing::debug!(game_id = %game_id, player_id = %player_id, "Player already in game");
            return Ok(JoinOutcome::AlreadyMember);
        }

        let record = self
            .stores
            .games
            .get_game(game_id)
            .await?
            .ok_or_else(|| NotFoundError::Game(game_id.to_string()))?;
        let cached = self.registry.get(game_id);
        let finished = record.status == GameStatus::Finished
            || cached.as_ref().map(|rt| rt.is_finished()).unwrap_or(false);
        if finished {
            return Err(ConflictError::GameFinished(game_id.to_string()).into());
        }

        self.ensure_below_limit(player_id).await?;

        self.stores.memberships.add_player_to_game(game_id, player_id).await?;

        if let Some(runtime) = cached {
            if let Err(e) = runtime.add_player(player_id).await {
                if let Err(undo) = self.stores.memberships.remove_player_from_game(game_id, player_id).await {
                    tracing::error!(
                        game_id = %game_id,
                        player_id = %player_id,
                        error = %undo,
                        "Failed to roll back membership after runtime rejected player"
                    );
                }
                return Err(e);
            }
        }

        tracing::info!(game_id = %game_id, player_id = %player_id, "Player joined game");
        Ok(JoinOutcome::Joined)
    }

    /// Remove a member. The last member leaving shuts the game down: it is
    /// finished and persisted as such, unsubscribed, its join code deleted and
    /// its runtime unregistered.
    pub async fn remove_player_from_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<RemovalOutcome> {
        let _guard = self.registry.lock_game(game_id).await;

        if !self.stores.memberships.is_player_in_game(game_id, player_id).await? {
            return Err(ConflictError::NotInGame {
                player_id: player_id.to_string(),
                game_id: game_id.to_string(),
            }
            .into());
        }

        self.stores.memberships.remove_player_from_game(game_id, player_id).await?;

        let runtime = self.registry.get(game_id);
        if let Some(runtime) = &runtime {
            runtime.remove_player(player_id).await;
        }
        tracing::info!(game_id = %game_id, player_id = %player_id, "Player left game");

        let remaining = match self.stores.memberships.get_players_in_game(game_id).await {
            Ok(players) => Some(players.len()),
            Err(e) => {
                tracing::warn!(game_id = %game_id, error = %e, "Could not count remaining players");
                match &runtime {
                    Some(runtime) => Some(runtime.players().await.len()),
                    None => None,
                }
            }
        };

        let game_deleted = remaining == Some(0);
        if game_deleted {
            self.shut_down_game(game_id, runtime).await;
        }

        Ok(RemovalOutcome { remaining, game_deleted })
    }

    /// Cleanup after the primary removal already succeeded, so every step is
    /// best-effort and only logged on failure
    async fn shut_down_game(&self, game_id: &str, runtime: Option<Arc<GameRuntime>>) {
        let record = match runtime {
            Some(runtime) => Some(runtime.finish().await),
            None => match self.stores.games.get_game(game_id).await {
                Ok(record) => record.map(|mut r| {
                    r.status = GameStatus::Finished;
                    r
                }),
                Err(e) => {
                    tracing::warn!(game_id = %game_id, error = %e, "Could not load game to finish it");
                    None
                }
            },
        };

        if let Some(record) = record {
            if let Err(e) = self.stores.games.save_with_id(&record).await {
                tracing::warn!(game_id = %game_id, error = %e, "Failed to persist finished game");
            }
        }

        if !self.watcher.unsubscribe(game_id) {
            tracing::debug!(game_id = %game_id, "Game had no watcher subscription");
        }

        if let Err(e) = self.stores.codes.delete_game_code_by_game_id(game_id).await {
            tracing::warn!(game_id = %game_id, error = %e, "Failed to delete join code");
        }

        self.registry.unregister(game_id);
        tracing::info!(game_id = %game_id, "Last player left, game deleted");
    }

    /// Persist a new game, give it a join code, add its creator and start its runtime.
    ///
    /// Any failure after the record is written marks the game finished.
    pub async fn create_game(
        &self,
        name: &str,
        competition: &str,
        season: &str,
        matches: Vec<Match>,
        creator: &str,
        now: DateTime<Utc>,
    ) -> MatchdayResult<CreatedGame> {
        let _player = self.registry.lock_player(creator).await;
        self.ensure_below_limit(creator).await?;

        let game_id = Uuid::new_v4().to_string();
        let mut record = GameRecord {
            id: game_id.clone(),
            name: name.to_string(),
            competition: competition.to_string(),
            season: season.to_string(),
            matches,
            status: GameStatus::NotStarted,
            created_at: now,
        };

        let _guard = self.registry.lock_game(&game_id).await;
        self.stores.games.create_game(&record).await?;

        let started: MatchdayResult<(String, Arc<GameRuntime>)> = async {
            let code = self.unused_code().await?;
            let expires_at = now + chrono::Duration::seconds(self.config.code_ttl_secs);
            self.stores.codes.create_game_code(&game_id, &code, expires_at).await?;
            self.stores.memberships.add_player_to_game(&game_id, creator).await?;
            let runtime = self.registry.create_locked(&game_id).await?;
            Ok((code, runtime))
        }
        .await;

        match started {
            Ok((code, runtime)) => {
                tracing::info!(game_id = %game_id, creator = %creator, code = %code, "Game created");
                Ok(CreatedGame { game_id, code, runtime })
            }
            Err(e) => {
                tracing::warn!(game_id = %game_id, error = %e, "Game creation failed, closing game");
                record.status = GameStatus::Finished;
                if let Err(undo) = self.stores.games.save_with_id(&record).await {
                    tracing::error!(game_id = %game_id, error = %undo, "Failed to close half-created game");
                }
                if let Err(undo) = self.stores.codes.delete_game_code_by_game_id(&game_id).await {
                    tracing::error!(game_id = %game_id, error = %undo, "Failed to delete code of half-created game");
                }
                if let Err(undo) = self.stores.memberships.remove_player_from_game(&game_id, creator).await {
                    tracing::error!(
                        game_id = %game_id,
                        player_id = %creator,
                        error = %undo,
                        "Failed to remove creator from half-created game"
                    );
                }
                Err(e)
            }
        }
    }

    /// Join through a code. Unknown, expired, finished and over-limit cases
    /// surface as distinct errors.
    pub async fn join_by_code(&self, code: &str, player_id: &str, now: DateTime<Utc>) -> MatchdayResult<(GameId, JoinOutcome)> {
        let code = code.trim().to_ascii_uppercase();
        if !(4..=8).contains(&code.len()) || !code.bytes().all(|b| CODE_CHARSET.contains(&b)) {
            return Err(ValidationError::InvalidCode(code).into());
        }

        let entry = self
            .stores
            .codes
            .get_game_code_by_code(&code)
            .await?
            .ok_or_else(|| NotFoundError::Code(code.clone()))?;

        if entry.is_expired(now) {
            return Err(ConflictError::CodeExpired(code).into());
        }

        let outcome = self.add_player_to_game(&entry.game_id, player_id).await?;
        Ok((entry.game_id, outcome))
    }

    pub async fn player_games(&self, player_id: &str) -> MatchdayResult<Vec<GameId>> {
        self.stores.memberships.get_player_games(player_id).await
    }

    pub async fn players_in_game(&self, game_id: &str) -> MatchdayResult<Vec<PlayerId>> {
        self.stores.memberships.get_players_in_game(game_id).await
    }

    pub async fn purge_expired_codes(&self, now: DateTime<Utc>) -> MatchdayResult<usize> {
        let removed = self.stores.codes.delete_expired_codes(now).await?;
        if removed > 0 {
            tracing::info!(removed, "Expired join codes purged");
        }
        Ok(removed)
    }

    /// Purge expired codes on a fixed interval until cancelled
    pub async fn run_code_sweeper(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = interval(Duration::from_secs(self.config.code_sweep_interval_secs.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.purge_expired_codes(Utc::now()).await {
                        tracing::warn!(error = %e, "Join code sweep failed");
                    }
                }
            }
        }
        tracing::debug!("Join code sweeper stopped");
    }

    /// Finished games no longer count toward the limit. Callers hold the
    /// player's lock so the count stays valid until their write lands.
    async fn ensure_below_limit(&self, player_id: &str) -> MatchdayResult<()> {
        let mut active = 0;
        for game_id in self.stores.memberships.get_player_games(player_id).await? {
            match self.stores.games.get_game(&game_id).await? {
                Some(record) if record.status != GameStatus::Finished => active += 1,
                _ => {}
            }
        }

        if active >= self.config.max_games_per_player {
            return Err(ConflictError::GamesLimitReached {
                player_id: player_id.to_string(),
                limit: self.config.max_games_per_player,
            }
            .into());
        }
        Ok(())
    }

    async fn unused_code(&self) -> MatchdayResult<String> {
        for _ in 0..MAX_CODE_ATTEMPTS {
            let code = random_code(self.config.code_length);
            if !self.stores.codes.code_exists(&code).await? {
                return Ok(code);
            }
        }
        Err(ConflictError::CodeUnavailable(MAX_CODE_ATTEMPTS).into())
    }
}

fn random_code(length: usize) -> String {
    let mut rng = rand::thread_rng();
    (0..length)
        .map(|_| CODE_CHARSET[rng.gen_range(0..CODE_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::traits::{GameCodeStore, GameStore, MembershipStore};
    use crate::common::types::{Goals, MatchStatus, Odds};
    use crate::config::{MatchdayConfig, WatcherConfig};
    use crate::errors::MatchdayError;
    use crate::stores::{MemoryStores, ScriptedMatchSource};

    struct Harness {
        memory: MemoryStores,
        registry: Arc<GameServiceRegistry>,
        watcher: Arc<MatchWatcher>,
        coordinator: MembershipCoordinator,
    }

    fn harness_with(config: MatchdayConfig) -> Harness {
        let memory = MemoryStores::new();
        let watcher = Arc::new(MatchWatcher::new(
            Arc::new(ScriptedMatchSource::new()),
            &WatcherConfig::default(),
            CancellationToken::new(),
        ));
        let registry = Arc::new(GameServiceRegistry::new(watcher.clone(), memory.stores(), config.clone()));
        let coordinator = MembershipCoordinator::new(registry.clone(), watcher.clone(), memory.stores(), config.membership);
        Harness {
            memory,
            registry,
            watcher,
            coordinator,
        }
    }

    fn harness() -> Harness {
        harness_with(MatchdayConfig::testing())
    }

    fn fixture(id: &str) -> Match {
        Match {
            id: id.to_string(),
            home_team: "A".to_string(),
            away_team: "B".to_string(),
            competition: "league".to_string(),
            season: "2026".to_string(),
            scheduled_at: Utc::now() + chrono::Duration::days(2),
            odds: Odds::new(2.0, 3.0, 3.0),
            goals: Goals::default(),
            status: MatchStatus::Scheduled,
        }
    }

    async fn new_game(h: &Harness, creator: &str) -> CreatedGame {
        h.coordinator
            .create_game("Sunday", "league", "2026", vec![fixture("m1")], creator, Utc::now())
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_create_game_wires_everything() {
        let h = harness();
        let created = new_game(&h, "ana").await;

        assert_eq!(created.code.len(), 4);
        assert!(h.memory.codes.code_exists(&created.code).await.unwrap());
        assert_eq!(created.runtime.players().await, vec!["ana".to_string()]);
        assert!(h.watcher.is_subscribed(&created.game_id));
        assert!(h.watcher.is_watching("m1"));
        assert!(h.registry.get(&created.game_id).is_some());
    }

    #[tokio::test]
    async fn test_already_member_makes_no_writes() {
        let h = harness();
        let created = new_game(&h, "ana").await;
        let writes = h.memory.memberships.faults.writes();

        let outcome = h.coordinator.add_player_to_game(&created.game_id, "ana").await.unwrap();

        assert_eq!(outcome, JoinOutcome::AlreadyMember);
        assert_eq!(h.memory.memberships.faults.writes(), writes);
    }

    #[tokio::test]
    async fn test_join_updates_cached_runtime() {
        let h = harness();
        let created = new_game(&h, "ana").await;

        let (game_id, outcome) = h.coordinator.join_by_code(&created.code.to_lowercase(), "bo", Utc::now()).await.unwrap();

        assert_eq!(game_id, created.game_id);
        assert_eq!(outcome, JoinOutcome::Joined);
        assert_eq!(created.runtime.players().await, vec!["ana".to_string(), "bo".to_string()]);
        assert_eq!(
            h.coordinator.players_in_game(&game_id).await.unwrap(),
            vec!["ana".to_string(), "bo".to_string()]
        );
    }

    #[tokio::test]
    async fn test_join_by_code_errors_are_distinct() {
        let h = harness();
        let created = new_game(&h, "ana").await;

        let invalid = h.coordinator.join_by_code("a!", "bo", Utc::now()).await;
        assert!(matches!(invalid, Err(MatchdayError::Validation(ValidationError::InvalidCode(_)))));

        let unknown = h.coordinator.join_by_code("ZZZZZZZ", "bo", Utc::now()).await;
        assert!(matches!(unknown, Err(MatchdayError::NotFound(NotFoundError::Code(_)))));

        let later = Utc::now() + chrono::Duration::days(2);
        let expired = h.coordinator.join_by_code(&created.code, "bo", later).await;
        assert!(matches!(expired, Err(MatchdayError::Conflict(ConflictError::CodeExpired(_)))));

        created.runtime.finish().await;
        let finished = h.coordinator.join_by_code(&created.code, "bo", Utc::now()).await;
        assert!(matches!(finished, Err(MatchdayError::Conflict(ConflictError::GameFinished(_)))));
    }

    #[tokio::test]
    async fn test_games_limit() {
        let mut config = MatchdayConfig::testing();
        config.membership.max_games_per_player = 2;
        let h = harness_with(config);

        let first = new_game(&h, "ana").await;
        let _second = new_game(&h, "ana").await;

        let third = h
            .coordinator
            .create_game("Third", "league", "2026", vec![fixture("m3")], "ana", Utc::now())
            .await;
        assert!(matches!(
            third,
            Err(MatchdayError::Conflict(ConflictError::GamesLimitReached { limit: 2, .. }))
        ));

        // leaving frees a slot
        let other = new_game(&h, "bo").await;
        h.coordinator.remove_player_from_game(&first.game_id, "ana").await.unwrap();
        assert!(h.coordinator.add_player_to_game(&other.game_id, "ana").await.is_ok());
    }

    /// Membership store whose game listing takes a while, like one doing I/O
    struct SlowListing {
        inner: Arc<crate::stores::MemoryMembershipStore>,
    }

    #[async_trait::async_trait]
    impl MembershipStore for SlowListing {
        async fn is_player_in_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<bool> {
            self.inner.is_player_in_game(game_id, player_id).await
        }

        async fn add_player_to_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()> {
            self.inner.add_player_to_game(game_id, player_id).await
        }

        async fn remove_player_from_game(&self, game_id: &str, player_id: &str) -> MatchdayResult<()> {
            self.inner.remove_player_from_game(game_id, player_id).await
        }

        async fn get_players_in_game(&self, game_id: &str) -> MatchdayResult<Vec<PlayerId>> {
            self.inner.get_players_in_game(game_id).await
        }

        async fn get_player_games(&self, player_id: &str) -> MatchdayResult<Vec<GameId>> {
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.inner.get_player_games(player_id).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_joins_respect_games_limit() {
        let mut config = MatchdayConfig::testing();
        config.membership.max_games_per_player = 1;

        let memory = MemoryStores::new();
        let mut stores = memory.stores();
        stores.memberships = Arc::new(SlowListing {
            inner: memory.memberships.clone(),
        });
        let watcher = Arc::new(MatchWatcher::new(
            Arc::new(ScriptedMatchSource::new()),
            &WatcherConfig::default(),
            CancellationToken::new(),
        ));
        let registry = Arc::new(GameServiceRegistry::new(watcher.clone(), stores.clone(), config.clone()));
        let coordinator = MembershipCoordinator::new(registry, watcher, stores, config.membership);

        let mut games = Vec::new();
        for owner in ["o1", "o2", "o3"] {
            let created = coordinator
                .create_game("Pool", "league", "2026", vec![fixture("m1")], owner, Utc::now())
                .await
                .unwrap();
            games.push(created.game_id);
        }

        let (a, b, c) = tokio::join!(
            coordinator.add_player_to_game(&games[0], "ana"),
            coordinator.add_player_to_game(&games[1], "ana"),
            coordinator.add_player_to_game(&games[2], "ana"),
        );

        let joined = [&a, &b, &c].iter().filter(|r| r.is_ok()).count();
        assert_eq!(joined, 1);
        for result in [a, b, c].into_iter().filter(|r| r.is_err()) {
            assert!(matches!(
                result,
                Err(MatchdayError::Conflict(ConflictError::GamesLimitReached { limit: 1, .. }))
            ));
        }
        assert_eq!(memory.memberships.get_player_games("ana").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_failed_creation_removes_creator_and_code() {
        let h = harness();
        // the runtime cannot be built, everything written before is undone
        h.memory.scores.faults.fail_reads(true);

        let result = h
            .coordinator
            .create_game("Broken", "league", "2026", vec![fixture("m1")], "ana", Utc::now())
            .await;

        assert!(result.is_err());
        assert!(h.coordinator.player_games("ana").await.unwrap().is_empty());
        assert!(h.registry.is_empty());
        assert_eq!(h.watcher.stats().subscribers, 0);
        let far = Utc::now() + chrono::Duration::days(365);
        assert_eq!(h.memory.codes.delete_expired_codes(far).await.unwrap(), 0);
        let records = h.memory.games.get_all_games().await.unwrap();
        assert!(records.iter().all(|r| r.status == GameStatus::Finished));
    }

    #[tokio::test]
    async fn test_remove_non_member_changes_nothing() {
        let h = harness();
        let created = new_game(&h, "ana").await;
        let writes = h.memory.memberships.faults.writes();

        let result = h.coordinator.remove_player_from_game(&created.game_id, "zed").await;

        assert!(result.unwrap_err().is_not_in_game());
        assert_eq!(h.memory.memberships.faults.writes(), writes);
        assert_eq!(created.runtime.players().await, vec!["ana".to_string()]);
    }

    #[tokio::test]
    async fn test_last_leaver_deletes_game() {
        let h = harness();
        let created = new_game(&h, "ana").await;
        h.coordinator.join_by_code(&created.code, "bo", Utc::now()).await.unwrap();

        let first = h.coordinator.remove_player_from_game(&created.game_id, "bo").await.unwrap();
        assert_eq!(first, RemovalOutcome { remaining: Some(1), game_deleted: false });
        assert_eq!(created.runtime.players().await, vec!["ana".to_string()]);

        let last = h.coordinator.remove_player_from_game(&created.game_id, "ana").await.unwrap();
        assert!(last.game_deleted);

        let stored = h.memory.games.get_game(&created.game_id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Finished);
        assert!(!h.watcher.is_subscribed(&created.game_id));
        assert!(!h.memory.codes.code_exists(&created.code).await.unwrap());
        assert!(h.registry.get(&created.game_id).is_none());
        assert!(created.runtime.is_finished());
    }

    #[tokio::test]
    async fn test_failed_persisted_removal_keeps_cache() {
        let h = harness();
        let created = new_game(&h, "ana").await;
        h.memory.memberships.faults.fail_writes(true);

        let result = h.coordinator.remove_player_from_game(&created.game_id, "ana").await;

        assert!(result.is_err());
        assert_eq!(created.runtime.players().await, vec!["ana".to_string()]);
        assert!(h.memory.memberships.is_player_in_game(&created.game_id, "ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_finished_runtime_refuses_join() {
        let h = harness();
        let created = new_game(&h, "ana").await;

        // runtime finished while the stored record still says otherwise
        let mut record = created.runtime.finish().await;
        record.status = GameStatus::InProgress;
        h.memory.games.save_with_id(&record).await.unwrap();

        let result = h.coordinator.add_player_to_game(&created.game_id, "bo").await;
        assert!(matches!(result, Err(MatchdayError::Conflict(ConflictError::GameFinished(_)))));
        assert!(!h.memory.memberships.is_player_in_game(&created.game_id, "bo").await.unwrap());
    }

    #[tokio::test]
    async fn test_purge_expired_codes() {
        let h = harness();
        let created = new_game(&h, "ana").await;

        assert_eq!(h.coordinator.purge_expired_codes(Utc::now()).await.unwrap(), 0);
        let later = Utc::now() + chrono::Duration::days(2);
        assert_eq!(h.coordinator.purge_expired_codes(later).await.unwrap(), 1);
        assert!(h.memory.codes.get_game_code_by_code(&created.code).await.unwrap().is_none());
    }

    #[test]
    fn test_random_code_charset() {
        for _ in 0..100 {
            let code = random_code(6);
            assert_eq!(code.len(), 6);
            assert!(code.bytes().all(|b| CODE_CHARSET.contains(&b)));
        }
    }
}
