//! Store implementations and the bundle injected into the runtime

pub mod memory;
pub mod replay;

use crate::common::traits::{BetStore, GameCodeStore, GameStore, MembershipStore, ScoreStore};
use std::sync::Arc;

pub use memory::{
    FaultSwitch, MemoryBetStore, MemoryGameCodeStore, MemoryGameStore, MemoryMembershipStore,
    MemoryScoreStore, ScriptedMatchSource,
};
pub use replay::ReplayMatchSource;

/// Every persisted store the core talks to
#[derive(Clone)]
pub struct Stores {
    pub bets: Arc<dyn BetStore>,
    pub scores: Arc<dyn ScoreStore>,
    pub games: Arc<dyn GameStore>,
    pub memberships: Arc<dyn MembershipStore>,
    pub codes: Arc<dyn GameCodeStore>,
}

/// Concrete in-memory stores, kept typed so tests can reach their counters
#[derive(Clone, Default)]
pub struct MemoryStores {
    pub bets: Arc<MemoryBetStore>,
    pub scores: Arc<MemoryScoreStore>,
    pub games: Arc<MemoryGameStore>,
    pub memberships: Arc<MemoryMembershipStore>,
    pub codes: Arc<MemoryGameCodeStore>,
}

impl MemoryStores {
    pub fn new() -> Self {
        Self::default()
    }

    /// Type-erased view for injection
    pub fn stores(&self) -> Stores {
        Stores {
            bets: self.bets.clone(),
            scores: self.scores.clone(),
            games: self.games.clone(),
            memberships: self.memberships.clone(),
            codes: self.codes.clone(),
        }
    }
}

impl Stores {
    pub fn in_memory() -> Self {
        MemoryStores::new().stores()
    }
}
