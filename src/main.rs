//! Matchday CLI
//!
//! Replays a recorded match feed against seeded games and reports the winners.

use clap::{Parser, Subcommand};
use futures::future::join_all;
use matchday::common::config::{generate_sample_config, ConfigLoader};
use matchday::common::traits::{BetStore, GameStore, MembershipStore};
use matchday::{Bet, GameId, GameRecord, MatchdayResult, MemoryStores, PlayerId, ReplayMatchSource, ServiceBuilder};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Matchday game runtime CLI
#[derive(Parser)]
#[command(name = "matchday")]
#[command(about = "Live game runtime for football prediction leagues")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Play seeded games against a recorded match feed
    Run {
        /// Configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Games, members and bets to seed the stores with
        #[arg(short, long)]
        fixture: PathBuf,

        /// JSON list of match feed snapshots, one per poll
        #[arg(long)]
        feed: PathBuf,
    },

    /// Write the default configuration to a file
    GenerateConfig {
        #[arg(default_value = "matchday.toml")]
        path: String,
    },
}

#[derive(Deserialize)]
struct Fixture {
    games: Vec<GameRecord>,
    #[serde(default)]
    members: HashMap<GameId, Vec<PlayerId>>,
    #[serde(default)]
    bets: Vec<FixtureBet>,
}

#[derive(Deserialize)]
struct FixtureBet {
    game_id: GameId,
    #[serde(flatten)]
    bet: Bet,
}

#[tokio::main]
async fn main() -> MatchdayResult<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Run { config, fixture, feed } => run(config, fixture, feed).await,
        Commands::GenerateConfig { path } => {
            generate_sample_config(&path)?;
            println!("Wrote default configuration to {}", path);
            Ok(())
        }
    }
}

async fn run(config_path: Option<PathBuf>, fixture: PathBuf, feed: PathBuf) -> MatchdayResult<()> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = config_path {
        loader = loader.with_path(path);
    }
    let config = loader.load()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("matchday={}", config.logging.level.as_filter()).into()),
        )
        .init();

    let memory = MemoryStores::new();
    seed(&memory, &fixture).await?;

    let services = ServiceBuilder::new()
        .with_config(config)
        .with_stores(memory.stores())
        .with_source(Arc::new(ReplayMatchSource::from_file(&feed)?))
        .build()?;

    let handles = services.start().await?;
    let registry = services.registry();
    let cancel = services.cancel_token();

    let games: Vec<_> = registry.game_ids().into_iter().filter_map(|id| registry.get(&id)).collect();
    let plays = join_all(games.iter().map(|game| game.play(&cancel)));

    tokio::select! {
        results = plays => {
            for (game, result) in games.iter().zip(results) {
                match result {
                    Ok(winners) => {
                        println!("Game {} winners: {}", game.id(), winners.join(", "));
                        for entry in game.standings().await {
                            println!("  {:<24} {:>6}", entry.player_id, entry.points);
                        }
                    }
                    Err(e) => println!("Game {} did not finish: {}", game.id(), e),
                }
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted");
        }
    }

    services.shutdown();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Background task ended abnormally");
        }
    }

    let stats = services.watcher().stats();
    tracing::info!(
        polls = stats.polls,
        failed_polls = stats.failed_polls,
        emitted = stats.emitted_updates,
        "Match watcher summary"
    );
    Ok(())
}

async fn seed(memory: &MemoryStores, path: &PathBuf) -> MatchdayResult<()> {
    let content = std::fs::read_to_string(path)?;
    let fixture: Fixture = serde_json::from_str(&content)?;

    for game in &fixture.games {
        memory.games.create_game(game).await?;
    }
    for (game_id, players) in &fixture.members {
        for player_id in players {
            memory.memberships.add_player_to_game(game_id, player_id).await?;
        }
    }
    for entry in &fixture.bets {
        memory.bets.save_bet(&entry.game_id, &entry.bet).await?;
    }

    tracing::info!(
        games = fixture.games.len(),
        bets = fixture.bets.len(),
        "Seeded stores from fixture"
    );
    Ok(())
}
