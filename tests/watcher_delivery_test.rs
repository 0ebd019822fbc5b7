//! Delta detection and delivery guarantees of the match watcher, plus a full
//! replay run through the service container

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use matchday::common::traits::{BetStore, GameStore, MatchUpdateHandler, MembershipStore};
use matchday::config::WatcherConfig;
use matchday::stores::ScriptedMatchSource;
use matchday::{
    Bet, GameRecord, GameStatus, Goals, Match, MatchState, MatchStatus, MatchWatcher, MatchdayConfig,
    MatchdayResult, MemoryStores, Odds, ReplayMatchSource, ServiceBuilder,
};
use std::collections::HashMap;
use std::io::Write;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

struct Probe {
    game_id: String,
    delay: Duration,
    seen: Mutex<Vec<f64>>,
    done: mpsc::UnboundedSender<()>,
}

#[async_trait]
impl MatchUpdateHandler for Probe {
    fn game_id(&self) -> &str {
        &self.game_id
    }

    async fn on_match_updates(&self, updates: Vec<Match>) -> MatchdayResult<()> {
        tokio::time::sleep(self.delay).await;
        self.seen
            .lock()
            .unwrap()
            .extend(updates.iter().map(|m| m.odds.home));
        let _ = self.done.send(());
        Ok(())
    }
}

fn probe(game_id: &str, delay_ms: u64) -> (Arc<Probe>, mpsc::UnboundedReceiver<()>) {
    let (done, rx) = mpsc::unbounded_channel();
    let probe = Arc::new(Probe {
        game_id: game_id.to_string(),
        delay: Duration::from_millis(delay_ms),
        seen: Mutex::new(Vec::new()),
        done,
    });
    (probe, rx)
}

fn scheduled(id: &str) -> Match {
    Match {
        id: id.to_string(),
        home_team: "Nice".to_string(),
        away_team: "Monaco".to_string(),
        competition: "ligue1".to_string(),
        season: "2026".to_string(),
        scheduled_at: Utc.with_ymd_and_hms(2026, 11, 8, 20, 45, 0).unwrap(),
        odds: Odds::new(2.4, 3.1, 2.9),
        goals: Goals::default(),
        status: MatchStatus::Scheduled,
    }
}

fn watcher(source: Arc<ScriptedMatchSource>) -> MatchWatcher {
    MatchWatcher::new(source, &WatcherConfig::default(), CancellationToken::new())
}

#[tokio::test]
async fn test_each_tracked_field_triggers_exactly_one_update() {
    let base = scheduled("m1");
    let variants: Vec<Box<dyn Fn(&mut MatchState)>> = vec![
        Box::new(|s: &mut MatchState| s.status = MatchStatus::Finished),
        Box::new(|s: &mut MatchState| s.odds.home += 0.1),
        Box::new(|s: &mut MatchState| s.odds.draw += 0.1),
        Box::new(|s: &mut MatchState| s.odds.away += 0.1),
        Box::new(|s: &mut MatchState| s.scheduled_at = s.scheduled_at + chrono::Duration::minutes(30)),
        Box::new(|s: &mut MatchState| s.goals.home = 1),
        Box::new(|s: &mut MatchState| s.goals.away = 1),
        Box::new(|s: &mut MatchState| s.status = MatchStatus::InProgress),
    ];

    for change in variants {
        let source = Arc::new(ScriptedMatchSource::new());
        let watcher = watcher(source.clone());
        watcher.watch(&[base.clone()]);

        source.set_state("m1", base.state());
        assert_eq!(watcher.poll_once().await.unwrap(), 0);

        let mut state = base.state();
        change(&mut state);
        source.set_state("m1", state);
        assert_eq!(watcher.poll_once().await.unwrap(), 1);
        assert_eq!(watcher.stats().emitted_updates, 1);
    }
}

#[tokio::test]
async fn test_slow_subscriber_keeps_order_and_does_not_block_others() {
    let source = Arc::new(ScriptedMatchSource::new());
    let watcher = watcher(source.clone());
    let base = scheduled("m1");
    watcher.watch(&[base.clone()]);

    let (slow, mut slow_done) = probe("slow", 50);
    let (fast, mut fast_done) = probe("fast", 0);
    watcher.subscribe(slow.clone()).unwrap();
    watcher.subscribe(fast.clone()).unwrap();

    let prices = [2.5, 2.6, 2.7, 2.8];
    for price in prices {
        let mut state = base.state();
        state.odds.home = price;
        source.set_state("m1", state);
        assert_eq!(watcher.poll_once().await.unwrap(), 1);
    }

    // the fast subscriber has everything before the slow one finished its first batch
    for _ in prices {
        fast_done.recv().await.unwrap();
    }
    assert_eq!(*fast.seen.lock().unwrap(), prices.to_vec());
    assert!(slow.seen.lock().unwrap().len() < prices.len());

    for _ in prices {
        slow_done.recv().await.unwrap();
    }
    assert_eq!(*slow.seen.lock().unwrap(), prices.to_vec());
}

#[tokio::test]
async fn test_unsubscribed_game_receives_nothing_new() {
    let source = Arc::new(ScriptedMatchSource::new());
    let watcher = watcher(source.clone());
    let base = scheduled("m1");
    watcher.watch(&[base.clone()]);

    let (gone, _done) = probe("gone", 0);
    watcher.subscribe(gone.clone()).unwrap();
    assert!(watcher.unsubscribe("gone"));

    let mut state = base.state();
    state.status = MatchStatus::InProgress;
    source.set_state("m1", state);
    watcher.poll_once().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(gone.seen.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_replayed_feed_plays_game_to_completion() {
    let memory = MemoryStores::new();
    let m1 = scheduled("m1");
    let m2 = Match {
        id: "m2".to_string(),
        scheduled_at: m1.scheduled_at + chrono::Duration::days(7),
        ..m1.clone()
    };

    memory
        .games
        .create_game(&GameRecord {
            id: "league".to_string(),
            name: "Autumn league".to_string(),
            competition: "ligue1".to_string(),
            season: "2026".to_string(),
            matches: vec![m1.clone(), m2.clone()],
            status: GameStatus::NotStarted,
            created_at: Utc::now(),
        })
        .await
        .unwrap();
    for player in ["ana", "bo"] {
        memory.memberships.add_player_to_game("league", player).await.unwrap();
    }
    let placed = Utc::now();
    memory.bets.save_bet("league", &Bet::new("ana", "m1", 1, 0, placed)).await.unwrap();
    memory.bets.save_bet("league", &Bet::new("bo", "m1", 0, 0, placed)).await.unwrap();
    memory.bets.save_bet("league", &Bet::new("ana", "m2", 2, 2, placed)).await.unwrap();
    memory.bets.save_bet("league", &Bet::new("bo", "m2", 1, 1, placed)).await.unwrap();

    let live = |m: &Match, home: u8, away: u8, status: MatchStatus| MatchState {
        scheduled_at: m.scheduled_at,
        odds: m.odds,
        goals: Goals::new(home, away),
        status,
    };
    let snapshots: Vec<HashMap<String, MatchState>> = vec![
        [("m1".to_string(), live(&m1, 0, 0, MatchStatus::InProgress)), ("m2".to_string(), m2.state())]
            .into_iter()
            .collect(),
        [("m1".to_string(), live(&m1, 1, 0, MatchStatus::Finished)), ("m2".to_string(), m2.state())]
            .into_iter()
            .collect(),
        [("m1".to_string(), live(&m1, 1, 0, MatchStatus::Finished)), ("m2".to_string(), live(&m2, 1, 1, MatchStatus::Finished))]
            .into_iter()
            .collect(),
    ];
    let mut feed = tempfile::NamedTempFile::new().unwrap();
    write!(feed, "{}", serde_json::to_string(&snapshots).unwrap()).unwrap();

    let services = ServiceBuilder::new()
        .with_config(MatchdayConfig::testing())
        .with_stores(memory.stores())
        .with_source(Arc::new(ReplayMatchSource::from_file(feed.path()).unwrap()))
        .build()
        .unwrap();
    let handles = services.start().await.unwrap();

    let game = services.registry().require("league").unwrap();
    let cancel = services.cancel_token();
    let winners = tokio::time::timeout(Duration::from_secs(5), game.play(&cancel))
        .await
        .expect("Game did not finish")
        .unwrap();

    // m1: ana exact, half the bettors right (500 x 1.10); m2: ana close, bo exact
    assert_eq!(winners, vec!["ana".to_string()]);
    let standings = game.standings().await;
    assert_eq!(standings[0].player_id, "ana");
    assert_eq!(standings[0].points, 550 + 400);
    assert_eq!(standings[1].points, 500);

    services.shutdown();
    for handle in handles {
        handle.await.unwrap();
    }
}
