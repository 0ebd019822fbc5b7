//! Match watcher
//!
//! Polls the external match data source on a fixed interval, keeps the last
//! known state of every tracked match and pushes only the changed matches to
//! subscribed games.
//!
//! Each subscriber owns a delivery queue drained by its own task, so batches
//! reach one game in the order they were observed while a slow or failing game
//! never holds up the others or the poll loop. A game subscribed through
//! [`MatchWatcher::subscribe_to`] only receives its own matches.

use crate::common::traits::{MatchDataSource, MatchUpdateHandler};
use crate::common::types::{GameId, Match, MatchDelta, MatchId};
use crate::config::WatcherConfig;
use crate::errors::{ConflictError, MatchdayResult, WatcherError};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Default)]
struct WatcherCounters {
    polls: AtomicU64,
    failed_polls: AtomicU64,
    emitted_updates: AtomicU64,
    failed_deliveries: AtomicU64,
}

/// Point-in-time watcher statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatcherStats {
    pub polls: u64,
    pub failed_polls: u64,
    /// Changed matches emitted, counted once per poll regardless of subscribers
    pub emitted_updates: u64,
    pub failed_deliveries: u64,
    pub subscribers: usize,
    pub watched_matches: usize,
}

struct Subscription {
    tx: mpsc::UnboundedSender<Vec<Match>>,
    /// `None` receives every changed match
    matches: Option<HashSet<MatchId>>,
}

impl Subscription {
    fn batch_for(&self, updates: &[Match]) -> Vec<Match> {
        match &self.matches {
            None => updates.to_vec(),
            Some(ids) => updates.iter().filter(|m| ids.contains(&m.id)).cloned().collect(),
        }
    }
}

pub struct MatchWatcher {
    source: Arc<dyn MatchDataSource>,
    /// Last known state per tracked match
    watched: DashMap<MatchId, Match>,
    subscribers: DashMap<GameId, Subscription>,
    poll_interval: Duration,
    fetch_timeout: Duration,
    cancel: CancellationToken,
    counters: Arc<WatcherCounters>,
}

impl MatchWatcher {
    pub fn new(source: Arc<dyn MatchDataSource>, config: &WatcherConfig, cancel: CancellationToken) -> Self {
        Self {
            source,
            watched: DashMap::new(),
            subscribers: DashMap::new(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
            fetch_timeout: Duration::from_millis(config.fetch_timeout_ms),
            cancel,
            counters: Arc::new(WatcherCounters::default()),
        }
    }

    /// Start tracking matches. Already tracked matches keep their last known
    /// state; finished matches are never tracked.
    pub fn watch(&self, matches: &[Match]) -> usize {
        let mut added = 0;
        for m in matches {
            if m.is_finished() {
                continue;
            }
            if let Entry::Vacant(slot) = self.watched.entry(m.id.clone()) {
                slot.insert(m.clone());
                added += 1;
            }
        }

        if added > 0 {
            tracing::debug!(added, watched = self.watched.len(), "Tracking new matches");
        }
        added
    }

    pub fn is_watching(&self, match_id: &str) -> bool {
        self.watched.contains_key(match_id)
    }

    /// Register a handler for every delta batch. One subscription per game.
    pub fn subscribe(&self, handler: Arc<dyn MatchUpdateHandler>) -> MatchdayResult<()> {
        self.add_subscription(handler, None)
    }

    /// Register a game for changes to its own matches and start tracking them
    pub fn subscribe_to(&self, handler: Arc<dyn MatchUpdateHandler>, matches: &[Match]) -> MatchdayResult<()> {
        let ids = matches.iter().map(|m| m.id.clone()).collect();
        self.add_subscription(handler, Some(ids))?;
        self.watch(matches);
        Ok(())
    }

    fn add_subscription(
        &self,
        handler: Arc<dyn MatchUpdateHandler>,
        matches: Option<HashSet<MatchId>>,
    ) -> MatchdayResult<()> {
        if self.cancel.is_cancelled() {
            return Err(WatcherError::Stopped.into());
        }

        let game_id = handler.game_id().to_string();
        let rx = match self.subscribers.entry(game_id.clone()) {
            Entry::Occupied(_) => return Err(ConflictError::AlreadySubscribed(game_id).into()),
            Entry::Vacant(slot) => {
                let (tx, rx) = mpsc::unbounded_channel();
                slot.insert(Subscription { tx, matches });
                rx
            }
        };

        Self::spawn_delivery(game_id.clone(), handler, rx, self.counters.clone());
        tracing::info!(game_id = %game_id, "Game subscribed to match updates");
        Ok(())
    }

    /// Remove a game's subscription. Batches already queued are still delivered.
    pub fn unsubscribe(&self, game_id: &str) -> bool {
        let removed = self.subscribers.remove(game_id).is_some();
        if removed {
            tracing::info!(game_id = %game_id, "Game unsubscribed from match updates");
        }
        removed
    }

    pub fn is_subscribed(&self, game_id: &str) -> bool {
        self.subscribers.contains_key(game_id)
    }

    fn spawn_delivery(
        game_id: GameId,
        handler: Arc<dyn MatchUpdateHandler>,
        mut rx: mpsc::UnboundedReceiver<Vec<Match>>,
        counters: Arc<WatcherCounters>,
    ) {
        tokio::spawn(async move {
            while let Some(batch) = rx.recv().await {
                let size = batch.len();
                if let Err(e) = handler.on_match_updates(batch).await {
                    counters.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(game_id = %game_id, batch = size, error = %e, "Match update delivery failed");
                }
            }
            tracing::trace!(game_id = %game_id, "Delivery task finished");
        });
    }

    /// One poll cycle. Returns the number of changed matches emitted.
    ///
    /// A fetch failure aborts the cycle before any last known state is touched.
    pub async fn poll_once(&self) -> MatchdayResult<usize> {
        self.counters.polls.fetch_add(1, Ordering::Relaxed);

        let ids: Vec<MatchId> = self.watched.iter().map(|e| e.key().clone()).collect();
        if ids.is_empty() {
            return Ok(0);
        }

        let infos = match tokio::time::timeout(self.fetch_timeout, self.source.get_last_match_infos(&ids)).await {
            Ok(Ok(infos)) => infos,
            Ok(Err(e)) => {
                self.counters.failed_polls.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
            Err(_) => {
                self.counters.failed_polls.fetch_add(1, Ordering::Relaxed);
                return Err(WatcherError::FetchTimeout {
                    timeout_ms: self.fetch_timeout.as_millis() as u64,
                }
                .into());
            }
        };

        let mut updates = Vec::new();
        for id in &ids {
            let Some(current) = infos.get(id) else { continue };
            let Some(previous) = self.watched.get(id).map(|m| m.value().clone()) else { continue };

            if let Some(delta) = MatchDelta::between(&previous, current) {
                tracing::debug!(match_id = %id, changed = ?delta.changed, "Match changed");
                updates.push(previous.with_state(current));
            }
        }

        for updated in &updates {
            if updated.is_finished() {
                self.watched.remove(&updated.id);
            } else {
                self.watched.insert(updated.id.clone(), updated.clone());
            }
        }

        if !updates.is_empty() {
            self.counters.emitted_updates.fetch_add(updates.len() as u64, Ordering::Relaxed);
            self.dispatch(&updates);
        }
        Ok(updates.len())
    }

    fn dispatch(&self, updates: &[Match]) {
        let targets: Vec<(GameId, mpsc::UnboundedSender<Vec<Match>>, Vec<Match>)> = self
            .subscribers
            .iter()
            .map(|e| (e.key().clone(), e.value().tx.clone(), e.value().batch_for(updates)))
            .filter(|(_, _, batch)| !batch.is_empty())
            .collect();

        for (game_id, tx, batch) in targets {
            if tx.send(batch).is_err() {
                self.counters.failed_deliveries.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(game_id = %game_id, "Delivery queue closed, dropping batch");
            }
        }
    }

    /// Poll loop, runs until the cancellation token fires
    pub async fn run(&self) {
        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(interval_ms = self.poll_interval.as_millis() as u64, "Match watcher started");

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::warn!(error = %e, "Match poll failed, retrying next tick");
                    }
                }
            }
        }

        tracing::info!("Match watcher stopped");
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn stats(&self) -> WatcherStats {
        WatcherStats {
            polls: self.counters.polls.load(Ordering::Relaxed),
            failed_polls: self.counters.failed_polls.load(Ordering::Relaxed),
            emitted_updates: self.counters.emitted_updates.load(Ordering::Relaxed),
            failed_deliveries: self.counters.failed_deliveries.load(Ordering::Relaxed),
            subscribers: self.subscribers.len(),
            watched_matches: self.watched.len(),
        }
    }
}
