//! Category sub-scores and daily composite (C11).
//!
//! Severity-weighted per-category averages, folded into a single
//! domain-tuned composite with a P1 floor/boost (§4.10).

use std::collections::HashMap;

use crate::event::{Category, Priority};

fn severity_weight(priority: Priority) -> f64 {
    match priority {
        Priority::P1 => 4.0,
        Priority::P2 => 3.0,
        Priority::P3 => 2.0,
        Priority::P4 => 1.0,
    }
}

pub struct CategoryInput {
    pub category: Category,
    pub risk_score: f64,
    pub priority: Priority,
}

/// `score_<cat> = min(avg · (1 + 0.2 · min(n/10, 1)), 100)` where `avg` is
/// the severity-weighted mean risk score over events of that category.
pub fn category_sub_scores(events: &[CategoryInput]) -> HashMap<Category, f64> {
    let mut weighted_sum: HashMap<Category, f64> = HashMap::new();
    let mut weight_sum: HashMap<Category, f64> = HashMap::new();
    let mut counts: HashMap<Category, u32> = HashMap::new();

    for e in events {
        let w = severity_weight(e.priority);
        *weighted_sum.entry(e.category).or_insert(0.0) += e.risk_score * w;
        *weight_sum.entry(e.category).or_insert(0.0) += w;
        *counts.entry(e.category).or_insert(0) += 1;
    }

    let mut out = HashMap::new();
    for category in Category::ALL {
        let Some(&w) = weight_sum.get(&category) else {
            continue;
        };
        if w <= 0.0 {
            continue;
        }
        let avg = weighted_sum[&category] / w;
        let n = counts[&category] as f64;
        let boosted = avg * (1.0 + 0.2 * (n / 10.0).min(1.0));
        out.insert(category, boosted.min(100.0));
    }
    out
}

/// Domain-tuned weight vector over the 10 category sub-scores. This
/// deployment places its heaviest weight on energy and regulatory risk,
/// reflecting a commodity-exporting economy as the primary coverage domain
/// (an open configuration point per the design notes).
#[derive(Debug, Clone, Copy)]
pub struct CompositeWeights {
    pub political: f64,
    pub conflict: f64,
    pub economic: f64,
    pub trade: f64,
    pub regulatory: f64,
    pub infrastructure: f64,
    pub healthcare: f64,
    pub social: f64,
    pub environmental: f64,
    pub energy: f64,
}

impl Default for CompositeWeights {
    fn default() -> Self {
        Self {
            political: 0.12,
            conflict: 0.10,
            economic: 0.12,
            trade: 0.10,
            regulatory: 0.15,
            infrastructure: 0.06,
            healthcare: 0.04,
            social: 0.05,
            environmental: 0.06,
            energy: 0.20,
        }
    }
}

impl CompositeWeights {
    fn sum(&self) -> f64 {
        self.political
            + self.conflict
            + self.economic
            + self.trade
            + self.regulatory
            + self.infrastructure
            + self.healthcare
            + self.social
            + self.environmental
            + self.energy
    }

    pub fn normalized(self) -> (Self, bool) {
        let sum = self.sum();
        if (sum - 1.0).abs() <= 1e-3 {
            return (self, false);
        }
        let scale = if sum.abs() < f64::EPSILON { 0.0 } else { 1.0 / sum };
        (
            Self {
                political: self.political * scale,
                conflict: self.conflict * scale,
                economic: self.economic * scale,
                trade: self.trade * scale,
                regulatory: self.regulatory * scale,
                infrastructure: self.infrastructure * scale,
                healthcare: self.healthcare * scale,
                social: self.social * scale,
                environmental: self.environmental * scale,
                energy: self.energy * scale,
            },
            true,
        )
    }

    fn weight_for(&self, category: Category) -> f64 {
        match category {
            Category::Political => self.political,
            Category::Conflict => self.conflict,
            Category::Economic => self.economic,
            Category::Trade => self.trade,
            Category::Regulatory => self.regulatory,
            Category::Infrastructure => self.infrastructure,
            Category::Healthcare => self.healthcare,
            Category::Social => self.social,
            Category::Environmental => self.environmental,
            Category::Energy => self.energy,
        }
    }
}

pub struct DailyComposite {
    pub composite: f64,
    pub renormalized: bool,
}

/// Folds per-category sub-scores into the daily composite, then applies the
/// P1 floor and boost: any P1 in the window floors the composite at 70 and
/// multiplies by `1 + 0.05 · min(p1_count, 5)`, clipped to `[0,100]` (§4.10).
pub fn daily_composite(
    sub_scores: &HashMap<Category, f64>,
    weights: CompositeWeights,
    p1_count: u32,
) -> DailyComposite {
    let (weights, renormalized) = weights.normalized();

    let composite: f64 = Category::ALL
        .iter()
        .map(|&c| weights.weight_for(c) * sub_scores.get(&c).copied().unwrap_or(0.0))
        .sum();

    let composite = if p1_count > 0 {
        let floored = composite.max(70.0);
        floored * (1.0 + 0.05 * (p1_count.min(5) as f64))
    } else {
        composite
    };

    DailyComposite {
        composite: composite.clamp(0.0, 100.0),
        renormalized,
    }
}
