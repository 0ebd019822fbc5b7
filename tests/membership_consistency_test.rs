//! Persisted membership and the cached runtime's players agree after every
//! join and leave, including under concurrency

use chrono::Utc;
use futures::future::join_all;
use matchday::common::traits::{GameCodeStore, GameStore, MembershipStore};
use matchday::stores::ScriptedMatchSource;
use matchday::{
    GameStatus, Goals, Match, MatchStatus, MatchdayConfig, MemoryStores, Odds, ServiceBuilder,
    ServiceContainer,
};
use std::sync::Arc;

fn fixture(id: &str) -> Match {
    Match {
        id: id.to_string(),
        home_team: "Rennes".to_string(),
        away_team: "Brest".to_string(),
        competition: "ligue1".to_string(),
        season: "2026".to_string(),
        scheduled_at: Utc::now() + chrono::Duration::days(3),
        odds: Odds::new(2.1, 3.3, 3.4),
        goals: Goals::default(),
        status: MatchStatus::Scheduled,
    }
}

fn services(memory: &MemoryStores) -> ServiceContainer {
    let mut config = MatchdayConfig::testing();
    config.membership.max_games_per_player = 50;
    ServiceBuilder::new()
        .with_config(config)
        .with_stores(memory.stores())
        .with_source(Arc::new(ScriptedMatchSource::new()))
        .build()
        .expect("Failed to build services")
}

async fn assert_consistent(services: &ServiceContainer, game_id: &str) {
    let persisted = services.coordinator().players_in_game(game_id).await.unwrap();
    let cached = services.registry().require(game_id).unwrap().players().await;
    assert_eq!(persisted, cached, "persisted and cached players diverged");
}

#[tokio::test]
async fn test_sequential_joins_and_leaves_stay_consistent() {
    let memory = MemoryStores::new();
    let services = services(&memory);
    let coordinator = services.coordinator();

    let created = coordinator
        .create_game("Office pool", "ligue1", "2026", vec![fixture("m1")], "owner", Utc::now())
        .await
        .expect("Failed to create game");
    let game_id = created.game_id.clone();
    assert_consistent(&services, &game_id).await;

    let steps: Vec<(&str, bool)> = vec![
        ("ana", true),
        ("bo", true),
        ("ana", true),
        ("ana", false),
        ("cy", true),
        ("bo", false),
        ("ana", true),
    ];

    for (player, join) in steps {
        if join {
            coordinator.add_player_to_game(&game_id, player).await.unwrap();
        } else {
            coordinator.remove_player_from_game(&game_id, player).await.unwrap();
        }
        assert_consistent(&services, &game_id).await;
    }

    let players = created.runtime.players().await;
    assert_eq!(players, vec!["ana".to_string(), "cy".to_string(), "owner".to_string()]);
}

#[tokio::test]
async fn test_concurrent_joins_and_leaves_stay_consistent() {
    let memory = MemoryStores::new();
    let services = Arc::new(services(&memory));
    let coordinator = services.coordinator();

    let created = coordinator
        .create_game("Crowd", "ligue1", "2026", vec![fixture("m1")], "owner", Utc::now())
        .await
        .unwrap();
    let game_id = created.game_id.clone();

    let joins = (0..20).map(|i| {
        let coordinator = coordinator.clone();
        let game_id = game_id.clone();
        tokio::spawn(async move { coordinator.add_player_to_game(&game_id, &format!("p{}", i)).await })
    });
    for result in join_all(joins).await {
        result.unwrap().unwrap();
    }
    assert_consistent(&services, &game_id).await;

    // even players leave while odd players re-join
    let churn = (0..20).map(|i| {
        let coordinator = coordinator.clone();
        let game_id = game_id.clone();
        tokio::spawn(async move {
            let player = format!("p{}", i);
            if i % 2 == 0 {
                coordinator.remove_player_from_game(&game_id, &player).await.map(|_| ())
            } else {
                coordinator.add_player_to_game(&game_id, &player).await.map(|_| ())
            }
        })
    });
    for result in join_all(churn).await {
        result.unwrap().unwrap();
    }

    assert_consistent(&services, &game_id).await;
    assert_eq!(created.runtime.players().await.len(), 11);
}

#[tokio::test]
async fn test_last_leaver_has_all_side_effects() {
    let memory = MemoryStores::new();
    let services = services(&memory);
    let coordinator = services.coordinator();

    let created = coordinator
        .create_game("Short lived", "ligue1", "2026", vec![fixture("m1")], "solo", Utc::now())
        .await
        .unwrap();
    assert!(services.watcher().is_subscribed(&created.game_id));

    let outcome = coordinator
        .remove_player_from_game(&created.game_id, "solo")
        .await
        .unwrap();
    assert!(outcome.game_deleted);
    assert_eq!(outcome.remaining, Some(0));

    // finished and persisted
    let record = memory.games.get_game(&created.game_id).await.unwrap().unwrap();
    assert_eq!(record.status, GameStatus::Finished);
    // unsubscribed
    assert!(!services.watcher().is_subscribed(&created.game_id));
    // join code gone
    assert!(memory.codes.get_game_code_by_code(&created.code).await.unwrap().is_none());
    // unregistered
    assert!(services.registry().get(&created.game_id).is_none());

    // the departed player is no longer listed anywhere
    assert!(created.runtime.players().await.is_empty());
    assert!(coordinator.player_games("solo").await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cleanup_failures_do_not_fail_the_removal() {
    let memory = MemoryStores::new();
    let services = services(&memory);
    let coordinator = services.coordinator();

    let created = coordinator
        .create_game("Flaky", "ligue1", "2026", vec![fixture("m1")], "solo", Utc::now())
        .await
        .unwrap();

    memory.codes.faults.fail_writes(true);
    memory.games.faults.fail_writes(true);

    let outcome = coordinator
        .remove_player_from_game(&created.game_id, "solo")
        .await
        .expect("Removal should succeed even if cleanup fails");

    assert!(outcome.game_deleted);
    assert!(!memory.memberships.is_player_in_game(&created.game_id, "solo").await.unwrap());
    assert!(services.registry().get(&created.game_id).is_none());
    assert!(!services.watcher().is_subscribed(&created.game_id));
}

#[tokio::test]
async fn test_join_without_cached_runtime() {
    let memory = MemoryStores::new();
    let game_id = {
        let services = services(&memory);
        let created = services
            .coordinator()
            .create_game("Cold", "ligue1", "2026", vec![fixture("m1")], "ana", Utc::now())
            .await
            .unwrap();
        created.game_id
    };

    // fresh process, nothing loaded yet
    let services = services(&memory);
    assert!(services.registry().get(&game_id).is_none());
    services.coordinator().add_player_to_game(&game_id, "bo").await.unwrap();

    let runtime = services.registry().create(&game_id).await.unwrap();
    assert_eq!(runtime.players().await, vec!["ana".to_string(), "bo".to_string()]);
    assert_consistent(&services, &game_id).await;
}
