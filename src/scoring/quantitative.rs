//! Quantitative scorer (C7): a pure function from structured source signals
//! to a deterministic risk score in `[0, 100]`.
//!
//! Grounded in the design's weighted four-signal blend
//! (`original_source/backend/data_pipeline/services/tests/test_gdelt_quantitative_scorer.py`).
//! Missing signals default to neutral 50, never 0 — absence must never read
//! as maximum risk (§4.6).

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy)]
pub struct ScorerWeights {
    pub tone_negativity: f64,
    pub avg_sentiment: f64,
    pub theme_presence: f64,
    pub theme_intensity: f64,
}

impl Default for ScorerWeights {
    fn default() -> Self {
        Self {
            tone_negativity: 0.35,
            avg_sentiment: 0.25,
            theme_presence: 0.25,
            theme_intensity: 0.15,
        }
    }
}

impl ScorerWeights {
    /// Validates the weights sum to 1.0 (± 1e-3); renormalizes and reports
    /// if they do not (§8 property 4).
    pub fn normalized(self) -> (Self, bool) {
        let sum = self.tone_negativity + self.avg_sentiment + self.theme_presence + self.theme_intensity;
        if (sum - 1.0).abs() <= 1e-3 {
            return (self, false);
        }
        let scale = if sum.abs() < f64::EPSILON { 0.0 } else { 1.0 / sum };
        (
            Self {
                tone_negativity: self.tone_negativity * scale,
                avg_sentiment: self.avg_sentiment * scale,
                theme_presence: self.theme_presence * scale,
                theme_intensity: self.theme_intensity * scale,
            },
            true,
        )
    }
}

/// Source metadata hint consulted by C7 (and forwarded to C8's prompt context).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuantitativeSignals {
    /// Directed tone on a Goldstein-like -10..+10 scale.
    pub goldstein_scale: Option<f64>,
    /// Average sentiment tone on a -100..+100 scale.
    pub avg_tone: Option<f64>,
    /// Risk-taxonomy themes present on the event.
    pub themes: Vec<String>,
    /// Mention count used as an intensity proxy.
    pub num_mentions: Option<u32>,
}

const NEUTRAL: f64 = 50.0;

fn tone_negativity_score(goldstein: Option<f64>) -> f64 {
    match goldstein {
        Some(x) => ((10.0 - x) / 20.0 * 100.0).clamp(0.0, 100.0),
        None => NEUTRAL,
    }
}

fn avg_sentiment_score(avg_tone: Option<f64>) -> f64 {
    match avg_tone {
        Some(x) => ((-x + 100.0) / 200.0 * 100.0).clamp(0.0, 100.0),
        None => NEUTRAL,
    }
}

fn theme_presence_score(themes: &[String]) -> f64 {
    match themes.len() {
        0 => 20.0,
        1 => 60.0,
        2 => 80.0,
        _ => 100.0,
    }
}

fn theme_intensity_score(num_mentions: Option<u32>) -> f64 {
    match num_mentions {
        None => NEUTRAL,
        Some(0) => 20.0,
        Some(1..=2) => 50.0,
        Some(3..=5) => 75.0,
        Some(_) => 100.0,
    }
}

/// Computes the quantitative score `G ∈ [0,100]` for the given signals. Pure
/// and non-suspending, per §5's scheduling model.
pub fn score(signals: &QuantitativeSignals, weights: ScorerWeights) -> (f64, bool) {
    let (weights, renormalized) = weights.normalized();

    let tone = tone_negativity_score(signals.goldstein_scale);
    let sentiment = avg_sentiment_score(signals.avg_tone);
    let presence = theme_presence_score(&signals.themes);
    let intensity = theme_intensity_score(signals.num_mentions);

    let blended = weights.tone_negativity * tone
        + weights.avg_sentiment * sentiment
        + weights.theme_presence * presence
        + weights.theme_intensity * intensity;

    (blended.clamp(0.0, 100.0), renormalized)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S4 — high-risk event metadata should score above the neutral midpoint.
    #[test]
    fn s4_high_risk_metadata_scores_above_fifty() {
        let signals = QuantitativeSignals {
            goldstein_scale: Some(-8.5),
            avg_tone: Some(-6.2),
            themes: vec!["CRISIS".into(), "PROTEST".into(), "EPU_POLICY_UNCERTAINTY".into()],
            num_mentions: Some(12),
        };
        let (gdelt_score, renormalized) = score(&signals, ScorerWeights::default());
        assert!(!renormalized);
        assert!(gdelt_score > 50.0, "expected > 50, got {gdelt_score}");
    }

    #[test]
    fn missing_signals_default_neutral_not_zero() {
        let signals = QuantitativeSignals::default();
        let (s, _) = score(&signals, ScorerWeights::default());
        assert!((s - 50.0).abs() < 1e-9);
    }

    #[test]
    fn bad_weights_get_renormalized_and_flagged() {
        let weights = ScorerWeights {
            tone_negativity: 0.5,
            avg_sentiment: 0.5,
            theme_presence: 0.5,
            theme_intensity: 0.5,
        };
        let signals = QuantitativeSignals::default();
        let (s, renormalized) = score(&signals, weights);
        assert!(renormalized);
        assert!((s - 50.0).abs() < 1e-6);
    }

    #[test]
    fn score_always_clamped() {
        let signals = QuantitativeSignals {
            goldstein_scale: Some(-10.0),
            avg_tone: Some(-100.0),
            themes: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            num_mentions: Some(20),
        };
        let (s, _) = score(&signals, ScorerWeights::default());
        assert!((0.0..=100.0).contains(&s));
        assert!((s - 100.0).abs() < 1e-6);
    }
}
