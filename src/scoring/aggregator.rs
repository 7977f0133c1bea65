//! Multi-dimensional risk aggregator (C10).
//!
//! Five dimensions blended under event-type weight profiles, following
//! `original_source/backend/data_pipeline/services/risk_aggregator.py`'s
//! NCISS/ICRG-style weighted arithmetic mean with strict weight
//! normalization (§4.9).

use crate::event::{clip, Urgency};

#[derive(Debug, Clone, Copy)]
pub struct DimensionWeights {
    pub llm: f64,
    pub sanctions: f64,
    pub sentiment: f64,
    pub urgency: f64,
    pub supply_chain: f64,
}

impl DimensionWeights {
    pub const DEFAULT: Self = Self {
        llm: 0.25,
        sanctions: 0.30,
        sentiment: 0.20,
        urgency: 0.15,
        supply_chain: 0.10,
    };
    pub const TRADE: Self = Self {
        llm: 0.20,
        sanctions: 0.35,
        sentiment: 0.15,
        urgency: 0.05,
        supply_chain: 0.25,
    };
    pub const POLITICAL: Self = Self {
        llm: 0.30,
        sanctions: 0.40,
        sentiment: 0.20,
        urgency: 0.10,
        supply_chain: 0.00,
    };
    pub const HUMANITARIAN: Self = Self {
        llm: 0.25,
        sanctions: 0.15,
        sentiment: 0.25,
        urgency: 0.30,
        supply_chain: 0.05,
    };
    pub const ECONOMIC: Self = Self {
        llm: 0.30,
        sanctions: 0.25,
        sentiment: 0.15,
        urgency: 0.05,
        supply_chain: 0.25,
    };
    pub const CRISIS: Self = Self {
        llm: 0.30,
        sanctions: 0.10,
        sentiment: 0.20,
        urgency: 0.35,
        supply_chain: 0.05,
    };

    pub fn for_event_type(event_type: &str) -> Self {
        match event_type.to_uppercase().as_str() {
            "TRADE" => Self::TRADE,
            "POLITICAL" => Self::POLITICAL,
            "HUMANITARIAN" => Self::HUMANITARIAN,
            "ECONOMIC" => Self::ECONOMIC,
            "CRISIS" => Self::CRISIS,
            _ => Self::DEFAULT,
        }
    }

    fn sum(&self) -> f64 {
        self.llm + self.sanctions + self.sentiment + self.urgency + self.supply_chain
    }

    /// Validates weights sum to 1.0 (± 1e-3); renormalizes and reports if not.
    pub fn normalized(self) -> (Self, bool) {
        let sum = self.sum();
        if (sum - 1.0).abs() <= 1e-3 {
            return (self, false);
        }
        let scale = if sum.abs() < f64::EPSILON { 0.0 } else { 1.0 / sum };
        (
            Self {
                llm: self.llm * scale,
                sanctions: self.sanctions * scale,
                sentiment: self.sentiment * scale,
                urgency: self.urgency * scale,
                supply_chain: self.supply_chain * scale,
            },
            true,
        )
    }
}

/// Supply-chain keyword hits in `themes` → `supply_chain_risk` dimension.
pub fn supply_chain_risk(themes: &[String]) -> f64 {
    const KEYWORDS: &[&str] = &[
        "supply chain",
        "logistics",
        "shipping",
        "port",
        "export ban",
        "import restriction",
        "customs",
        "freight",
    ];
    let lower: Vec<String> = themes.iter().map(|t| t.to_lowercase()).collect();
    let hits = lower
        .iter()
        .filter(|t| KEYWORDS.iter().any(|k| t.contains(k)))
        .count();
    match hits {
        0 => 0.0,
        1 => 0.4,
        2 => 0.6,
        _ => 0.8,
    }
}

pub fn sentiment_risk(sentiment: f64) -> f64 {
    clip(0.5 - 0.5 * sentiment, 0.0, 1.0)
}

pub struct AggregatorInput {
    pub llm_base_risk: f64,
    pub sanctions_hit: bool,
    pub sentiment: f64,
    pub urgency: Urgency,
    pub themes: Vec<String>,
}

pub struct AggregatorOutcome {
    pub composite: f64,
    pub renormalized: bool,
}

/// Composite = `100 · Σ weight_i · dim_i`, clamped to `[0,100]` (§4.9).
pub fn composite_risk(input: &AggregatorInput, event_type: &str) -> AggregatorOutcome {
    let (weights, renormalized) = DimensionWeights::for_event_type(event_type).normalized();

    let dims = [
        (weights.llm, clip(input.llm_base_risk, 0.0, 1.0)),
        (weights.sanctions, if input.sanctions_hit { 1.0 } else { 0.0 }),
        (weights.sentiment, sentiment_risk(input.sentiment)),
        (weights.urgency, input.urgency.risk_weight()),
        (weights.supply_chain, supply_chain_risk(&input.themes)),
    ];

    let composite = 100.0 * dims.iter().map(|(w, d)| w * d).sum::<f64>();

    AggregatorOutcome {
        composite: clip(composite, 0.0, 100.0),
        renormalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_profiles_sum_to_one() {
        for (name, w) in [
            ("default", DimensionWeights::DEFAULT),
            ("trade", DimensionWeights::TRADE),
            ("political", DimensionWeights::POLITICAL),
            ("humanitarian", DimensionWeights::HUMANITARIAN),
            ("economic", DimensionWeights::ECONOMIC),
            ("crisis", DimensionWeights::CRISIS),
        ] {
            assert!((w.sum() - 1.0).abs() <= 1e-3, "{name} weights do not sum to 1.0");
        }
    }

    #[test]
    fn supply_chain_bands() {
        assert_eq!(supply_chain_risk(&[]), 0.0);
        assert_eq!(supply_chain_risk(&["Port disruption".into()]), 0.4);
        assert_eq!(
            supply_chain_risk(&["Port disruption".into(), "Shipping delays".into()]),
            0.6
        );
        assert_eq!(
            supply_chain_risk(&[
                "Port disruption".into(),
                "Shipping delays".into(),
                "Customs strike".into()
            ]),
            0.8
        );
    }

    #[test]
    fn sentiment_risk_extremes() {
        assert_eq!(sentiment_risk(1.0), 0.0);
        assert_eq!(sentiment_risk(-1.0), 1.0);
        assert_eq!(sentiment_risk(0.0), 0.5);
    }

    #[test]
    fn composite_is_clamped_and_uses_event_type_profile() {
        let input = AggregatorInput {
            llm_base_risk: 1.0,
            sanctions_hit: true,
            sentiment: -1.0,
            urgency: Urgency::Immediate,
            themes: vec!["port strike".into(), "export ban".into(), "freight".into()],
        };
        let outcome = composite_risk(&input, "CRISIS");
        assert!((outcome.composite - 100.0).abs() < 1e-6);
        assert!(!outcome.renormalized);
    }

    #[test]
    fn unknown_event_type_uses_default_profile() {
        let input = AggregatorInput {
            llm_base_risk: 0.0,
            sanctions_hit: false,
            sentiment: 0.0,
            urgency: Urgency::Low,
            themes: vec![],
        };
        let outcome = composite_risk(&input, "SOMETHING_UNKNOWN");
        // default profile, sentiment_risk(0)=0.5 weight 0.20, urgency low=0.2 weight 0.15
        let expected = 100.0 * (0.20 * 0.5 + 0.15 * 0.2);
        assert!((outcome.composite - expected).abs() < 1e-6);
    }
}
