//! Process-wide registry of running games
//!
//! Maps game id to its [`GameRuntime`]. Lookups go through a concurrent map and
//! never wait on unrelated games. Creation and membership changes for one game
//! are serialized by a per-game lock handed out by [`GameServiceRegistry::lock_game`].
//! Changes that count a player's games take [`GameServiceRegistry::lock_player`]
//! first. A player lock is never requested while a game lock is held.

use crate::common::types::{GameId, GameStatus, PlayerId};
use crate::config::MatchdayConfig;
use crate::errors::{ConflictError, MatchdayResult, NotFoundError};
use crate::runtime::GameRuntime;
use crate::stores::Stores;
use crate::watcher::MatchWatcher;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

pub struct GameServiceRegistry {
    games: DashMap<GameId, Arc<GameRuntime>>,
    locks: DashMap<GameId, Arc<Mutex<()>>>,
    player_locks: DashMap<PlayerId, Arc<Mutex<()>>>,
    watcher: Arc<MatchWatcher>,
    stores: Stores,
    config: MatchdayConfig,
}

impl GameServiceRegistry {
    pub fn new(watcher: Arc<MatchWatcher>, stores: Stores, config: MatchdayConfig) -> Self {
        Self {
            games: DashMap::new(),
            locks: DashMap::new(),
            player_locks: DashMap::new(),
            watcher,
            stores,
            config,
        }
    }

    /// Exclusive section for everything that changes which players or which
    /// runtime a game has
    pub async fn lock_game(&self, game_id: &str) -> OwnedMutexGuard<()> {
        acquire(&self.locks, game_id).await
    }

    /// Exclusive section for a player's game count, so limit checks and the
    /// writes they guard cannot interleave across games
    pub async fn lock_player(&self, player_id: &str) -> OwnedMutexGuard<()> {
        acquire(&self.player_locks, player_id).await
    }

    /// Return the cached runtime or build one from the stores.
    ///
    /// The runtime is only registered once it is subscribed to the watcher.
    /// A finished game gets no runtime.
    /// Racing calls for the same id end up with the same runtime.
    pub async fn create(&self, game_id: &str) -> MatchdayResult<Arc<GameRuntime>> {
        if let Some(existing) = self.get(game_id) {
            return Ok(existing);
        }

        let _guard = self.lock_game(game_id).await;
        self.create_locked(game_id).await
    }

    /// [`create`](Self::create) for callers already holding the game lock
    pub(crate) async fn create_locked(&self, game_id: &str) -> MatchdayResult<Arc<GameRuntime>> {
        if let Some(existing) = self.get(game_id) {
            return Ok(existing);
        }

        let record = self
            .stores
            .games
            .get_game(game_id)
            .await?
            .ok_or_else(|| NotFoundError::Game(game_id.to_string()))?;
        if record.status == GameStatus::Finished {
            return Err(ConflictError::GameFinished(game_id.to_string()).into());
        }
        let players = self.stores.memberships.get_players_in_game(game_id).await?;
        let scores = self.stores.scores.get_scores(game_id).await?;

        let matches = record.matches.clone();
        let runtime = Arc::new(GameRuntime::restore(
            record,
            players,
            scores,
            self.stores.clone(),
            &self.config,
        ));

        match self.games.entry(game_id.to_string()) {
            Entry::Occupied(existing) => Ok(existing.get().clone()),
            Entry::Vacant(slot) => {
                self.watcher.subscribe_to(runtime.clone(), &matches)?;
                slot.insert(runtime.clone());
                tracing::info!(game_id = %game_id, matches = matches.len(), "Game runtime created");
                Ok(runtime)
            }
        }
    }

    /// Non-creating lookup
    pub fn get(&self, game_id: &str) -> Option<Arc<GameRuntime>> {
        self.games.get(game_id).map(|r| r.value().clone())
    }

    /// Lookup that treats a missing runtime as an error
    pub fn require(&self, game_id: &str) -> MatchdayResult<Arc<GameRuntime>> {
        self.get(game_id)
            .ok_or_else(|| NotFoundError::Game(game_id.to_string()).into())
    }

    /// Insert a runtime built elsewhere. Subscription is left to the caller.
    pub fn register(&self, runtime: Arc<GameRuntime>) -> MatchdayResult<()> {
        match self.games.entry(runtime.id().to_string()) {
            Entry::Occupied(_) => Err(ConflictError::AlreadyRegistered(runtime.id().to_string()).into()),
            Entry::Vacant(slot) => {
                slot.insert(runtime);
                Ok(())
            }
        }
    }

    pub fn unregister(&self, game_id: &str) -> Option<Arc<GameRuntime>> {
        let removed = self.games.remove(game_id).map(|(_, runtime)| runtime);
        if removed.is_some() {
            tracing::info!(game_id = %game_id, "Game runtime unregistered");
        }
        removed
    }

    /// Build a runtime for every unfinished persisted game.
    ///
    /// A game that fails to load is logged and skipped. Returns how many loaded.
    pub async fn load_all(&self) -> MatchdayResult<usize> {
        let records = self.stores.games.get_all_games().await?;
        let ids: Vec<GameId> = records
            .into_iter()
            .filter(|r| r.status != GameStatus::Finished)
            .map(|r| r.id)
            .collect();

        let results = join_all(ids.iter().map(|id| self.create(id))).await;

        let mut loaded = 0;
        for (id, result) in ids.iter().zip(results) {
            match result {
                Ok(_) => loaded += 1,
                Err(e) => tracing::warn!(game_id = %id, error = %e, "Failed to load game"),
            }
        }

        tracing::info!(loaded, total = ids.len(), "Games loaded");
        Ok(loaded)
    }

    pub fn len(&self) -> usize {
        self.games.len()
    }

    pub fn is_empty(&self) -> bool {
        self.games.is_empty()
    }

    pub fn game_ids(&self) -> Vec<GameId> {
        let mut ids: Vec<GameId> = self.games.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn watcher(&self) -> &Arc<MatchWatcher> {
        &self.watcher
    }
}

async fn acquire(locks: &DashMap<String, Arc<Mutex<()>>>, key: &str) -> OwnedMutexGuard<()> {
    let lock = locks
        .entry(key.to_string())
        .or_insert_with(|| Arc::new(Mutex::new(())))
        .clone();
    lock.lock_owned().await
}
