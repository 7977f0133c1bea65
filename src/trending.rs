//! Trending leaderboard (C14): a time-decayed sorted set over entity
//! mentions, plus a nightly reconciliation replay (§4.13).
//!
//! No pack example speaks a sorted-set store (Redis `ZADD`/`ZINCRBY`); this
//! models the same semantics in-process with a `BTreeMap` keyed on the
//! score's total-order bit pattern (`f64::total_cmp`'s scheme, via
//! `to_bits`/`from_bits`), alongside a `HashMap` for O(1) current-score
//! lookup by entity id — mirroring the teacher's `parking_lot::RwLock`-guarded
//! in-memory state idiom (`signals/mod.rs`'s cache maps) rather than its
//! sqlite storage idiom, since this is explicitly a volatile ranking
//! structure that reconciliation can rebuild from the column store at any
//! time. `ordered-float` isn't in this crate's dependency stack, so scores
//! are keyed by their IEEE-754 bit pattern directly rather than pulling in a
//! wrapper type for it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;

use crate::error::PipelineResult;
use crate::store::EntityStore;

/// Half-life for the exponential decay, in hours (§4.13).
pub const HALF_LIFE_HOURS: f64 = 168.0;

/// Orders non-NaN `f64`s by bit pattern the way `f64::total_cmp` does:
/// non-negative floats sort as their bits; negative floats sort as the
/// bitwise complement. Scores here are always `>= 0`, but this stays correct
/// if a future caller passes a negative weight.
fn score_key(score: f64) -> u64 {
    let bits = score.to_bits();
    if score.is_sign_negative() {
        !bits
    } else {
        bits | (1 << 63)
    }
}

struct LeaderboardState {
    scores: HashMap<String, f64>,
    by_score: BTreeMap<u64, HashSet<String>>,
}

impl LeaderboardState {
    fn new() -> Self {
        Self {
            scores: HashMap::new(),
            by_score: BTreeMap::new(),
        }
    }

    fn incrby(&mut self, entity_id: &str, delta: f64) {
        let previous = self.scores.get(entity_id).copied().unwrap_or(0.0);
        if let Some(set) = self.by_score.get_mut(&score_key(previous)) {
            set.remove(entity_id);
            if set.is_empty() {
                self.by_score.remove(&score_key(previous));
            }
        }
        let updated = previous + delta;
        self.scores.insert(entity_id.to_string(), updated);
        self.by_score.entry(score_key(updated)).or_default().insert(entity_id.to_string());
    }

    fn top_n(&self, n: usize) -> Vec<(String, f64)> {
        self.by_score
            .iter()
            .rev()
            .flat_map(|(_, ids)| ids.iter().map(|id| (id.clone(), self.scores[id])))
            .take(n)
            .collect()
    }
}

/// `score_delta = weight · exp(−age_hours / 168)` (§4.13). `age_hours` is the
/// gap between the mention's own timestamp and `now`, not the sorted set's
/// insertion time, so replays of historical mentions decay correctly.
pub fn score_delta(weight: f64, mentioned_at: DateTime<Utc>, now: DateTime<Utc>) -> f64 {
    let age_hours = (now - mentioned_at).num_milliseconds() as f64 / 3_600_000.0;
    weight * (-age_hours.max(0.0) / HALF_LIFE_HOURS).exp()
}

pub struct TrendingLeaderboard {
    state: RwLock<LeaderboardState>,
    entity_store: Arc<dyn EntityStore>,
}

impl TrendingLeaderboard {
    pub fn new(entity_store: Arc<dyn EntityStore>) -> Self {
        Self {
            state: RwLock::new(LeaderboardState::new()),
            entity_store,
        }
    }

    /// Records one mention's contribution to the leaderboard (§4.13).
    /// `weight` is the caller's per-event weight (severity/direction); decay
    /// is computed against the current instant.
    pub fn record_mention(&self, entity_id: &str, weight: f64, mentioned_at: DateTime<Utc>) {
        let delta = score_delta(weight, mentioned_at, Utc::now());
        self.state.write().incrby(entity_id, delta);
    }

    /// Top-N entities by current decayed score, read off the score-ordered
    /// index (§4.13).
    pub fn top_n(&self, n: usize) -> Vec<(String, f64)> {
        self.state.read().top_n(n)
    }

    pub fn current_score(&self, entity_id: &str) -> f64 {
        self.state.read().scores.get(entity_id).copied().unwrap_or(0.0)
    }

    /// Nightly reconciliation (§4.13): rebuilds the sorted set from a replay
    /// of the last 30 days of mentions in the column store, so in-memory
    /// ranking cannot drift indefinitely from the system of record.
    pub fn reconcile(&self) -> PipelineResult<usize> {
        let since = Utc::now() - Duration::days(30);
        let mentions = self.entity_store.recent_mentions(since)?;

        let mut fresh = LeaderboardState::new();
        let now = Utc::now();
        for mention in &mentions {
            let delta = score_delta(mention.relevance.max(0.1), mention.mentioned_at, now);
            fresh.incrby(&mention.canonical_id, delta);
        }

        *self.state.write() = fresh;
        Ok(mentions.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decay_is_monotonically_non_increasing_with_age() {
        let now = Utc::now();
        let fresh = score_delta(1.0, now, now);
        let one_week_old = score_delta(1.0, now - Duration::hours(168), now);
        let two_weeks_old = score_delta(1.0, now - Duration::hours(336), now);
        assert!(fresh > one_week_old);
        assert!(one_week_old > two_weeks_old);
        assert!((one_week_old - fresh * (-1.0_f64).exp()).abs() < 1e-9);
    }

    #[test]
    fn incrby_accumulates_and_top_n_orders_descending() {
        let board = empty_board();
        board.record_mention("a", 1.0, Utc::now());
        board.record_mention("b", 5.0, Utc::now());
        board.record_mention("a", 1.0, Utc::now());
        let top = board.top_n(2);
        assert_eq!(top[0].0, "b");
        assert_eq!(top[1].0, "a");
        assert!(board.current_score("a") > 1.9);
    }

    #[test]
    fn score_key_preserves_float_order() {
        let mut scores = vec![0.0, 5.5, 100.0, 0.01, 99.999];
        let mut by_key = scores.clone();
        by_key.sort_by_key(|s| score_key(*s));
        scores.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(by_key, scores);
    }

    struct NullEntityStore;
    impl EntityStore for NullEntityStore {
        fn insert_canonical(&self, _: &crate::event::CanonicalEntity) -> PipelineResult<()> {
            Ok(())
        }
        fn get_canonical(&self, _: &str) -> PipelineResult<Option<crate::event::CanonicalEntity>> {
            Ok(None)
        }
        fn find_by_alias(&self, _: &str, _: crate::event::Source) -> PipelineResult<Option<crate::event::EntityAlias>> {
            Ok(None)
        }
        fn candidates_by_block(&self, _: &str, _: crate::event::EntityType) -> PipelineResult<Vec<crate::event::CanonicalEntity>> {
            Ok(vec![])
        }
        fn insert_alias(&self, _: &crate::event::EntityAlias) -> PipelineResult<()> {
            Ok(())
        }
        fn insert_mention(&self, _: &crate::event::EntityMention) -> PipelineResult<()> {
            Ok(())
        }
        fn aliases_for(&self, _: &str) -> PipelineResult<Vec<crate::event::EntityAlias>> {
            Ok(vec![])
        }
        fn mentions_for(&self, _: &str, _: DateTime<Utc>) -> PipelineResult<Vec<crate::event::EntityMention>> {
            Ok(vec![])
        }
        fn recent_mentions(&self, _: DateTime<Utc>) -> PipelineResult<Vec<crate::event::EntityMention>> {
            Ok(vec![])
        }
    }

    fn empty_board() -> TrendingLeaderboard {
        TrendingLeaderboard::new(Arc::new(NullEntityStore))
    }
}
