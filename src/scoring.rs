//! Scoring of finished matches
//!
//! Pure function from a finished match and the bets placed on it to the points
//! each bettor earns. Base points come from how close the prediction was, then
//! an odds multiplier rewards correct draws and upsets, and a risk bonus
//! rewards outcomes few players saw coming.

use crate::common::types::{Bet, Goals, Match, Outcome, PlayerId};
use crate::config::ScoringConfig;
use std::collections::HashMap;

/// How a prediction relates to the final score
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PredictionClass {
    Exact,
    /// Same goal difference, total goals within the configured delta
    Close,
    /// Right winner (or draw), nothing more
    Outcome,
    Wrong,
}

/// Stateless scorer holding the rule constants
#[derive(Clone, Debug, Default)]
pub struct ScoringEngine {
    rules: ScoringConfig,
}

impl ScoringEngine {
    pub fn new(rules: ScoringConfig) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &ScoringConfig {
        &self.rules
    }

    /// Points per player for a finished match.
    ///
    /// Players without a bet get no entry at all. A wrong prediction gets an
    /// explicit zero, so absence and failure stay distinguishable.
    pub fn score(&self, finished: &Match, bets: &[Bet]) -> HashMap<PlayerId, u32> {
        let mut result = HashMap::with_capacity(bets.len());
        if bets.is_empty() {
            return result;
        }

        let actual = finished.goals;
        let actual_outcome = actual.outcome();

        let correct_count = bets
            .iter()
            .filter(|bet| bet.predicted.outcome() == actual_outcome)
            .count();
        let correct_fraction = correct_count as f64 / bets.len() as f64;

        for bet in bets {
            let base = self.base_points(self.classify(&bet.predicted, &actual));
            if base == 0 {
                result.insert(bet.player_id.clone(), 0);
                continue;
            }

            let multiplier = self.odds_multiplier(finished, bet.predicted.outcome());
            let bonus = self.risk_bonus(correct_fraction);
            let points = (base as f64 * multiplier * bonus).round() as u32;

            result.insert(bet.player_id.clone(), points);
        }

        result
    }

    pub fn classify(&self, predicted: &Goals, actual: &Goals) -> PredictionClass {
        if predicted == actual {
            return PredictionClass::Exact;
        }

        if predicted.outcome() != actual.outcome() {
            return PredictionClass::Wrong;
        }

        let same_difference = predicted.difference() == actual.difference();
        let total_delta = (predicted.total() - actual.total()).abs();
        if same_difference && total_delta <= self.rules.close_total_goals_delta as i16 {
            PredictionClass::Close
        } else {
            PredictionClass::Outcome
        }
    }

    fn base_points(&self, class: PredictionClass) -> u32 {
        match class {
            PredictionClass::Exact => self.rules.exact_points,
            PredictionClass::Close => self.rules.close_points,
            PredictionClass::Outcome => self.rules.outcome_points,
            PredictionClass::Wrong => 0,
        }
    }

    /// Multiplier for a correctly predicted outcome, only once the odds gap
    /// between favorite and underdog exceeds the threshold
    fn odds_multiplier(&self, finished: &Match, predicted: Outcome) -> f64 {
        if finished.odds.gap() <= self.rules.odds_gap_threshold {
            return 1.0;
        }

        match (predicted, finished.odds.favorite()) {
            (Outcome::Draw, _) => self.rules.draw_multiplier,
            (winner, Some(favorite)) if winner != favorite => self.rules.underdog_multiplier,
            _ => 1.0,
        }
    }

    /// Non-cumulative: the rarer threshold wins when both apply
    fn risk_bonus(&self, correct_fraction: f64) -> f64 {
        if correct_fraction <= self.rules.rare_fraction {
            self.rules.rare_bonus
        } else if correct_fraction <= self.rules.uncommon_fraction {
            self.rules.uncommon_bonus
        } else {
            1.0
        }
    }
}
