//! Hybrid risk + severity derivation (C9).
//!
//! Blends the quantitative scorer (C7) and the LLM risk score (C8) under
//! fixed weights, with a graceful `llm_only` fallback when no source
//! metadata is available or C7 fails (§4.8).

use crate::event::{clip, Severity};

pub const DEFAULT_W_QUANTITATIVE: f64 = 0.3;
pub const DEFAULT_W_LLM: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoringMethod {
    Hybrid,
    LlmOnly,
}

impl ScoringMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScoringMethod::Hybrid => "hybrid",
            ScoringMethod::LlmOnly => "llm_only",
        }
    }
}

pub struct HybridOutcome {
    pub hybrid_score: f64,
    pub severity: Severity,
    /// backward-compat scalar: `H/100`.
    pub risk_score_unit: f64,
    pub method: ScoringMethod,
}

/// `quantitative_score` is `None` when no source metadata is present, or
/// when C7 threw — both fall back to `llm_only` (§4.8).
pub fn derive(quantitative_score: Option<f64>, llm_risk: f64) -> HybridOutcome {
    let llm_risk = clip(llm_risk, 0.0, 1.0);

    let (hybrid_score, method) = match quantitative_score {
        Some(g) => (
            DEFAULT_W_QUANTITATIVE * g + DEFAULT_W_LLM * (llm_risk * 100.0),
            ScoringMethod::Hybrid,
        ),
        None => (llm_risk * 100.0, ScoringMethod::LlmOnly),
    };

    let hybrid_score = clip(hybrid_score, 0.0, 100.0);

    HybridOutcome {
        hybrid_score,
        severity: Severity::from_hybrid_score(hybrid_score),
        risk_score_unit: hybrid_score / 100.0,
        method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// S4 — hybrid scoring, high-risk event.
    #[test]
    fn s4_hybrid_blend() {
        let gdelt_score = 72.5; // representative value > 50 per C7 test
        let outcome = derive(Some(gdelt_score), 0.85);
        let expected = 0.3 * gdelt_score + 0.7 * 85.0;
        assert!((outcome.hybrid_score - expected).abs() < 1e-9);
        assert!(matches!(outcome.severity, Severity::Sev4 | Severity::Sev5));
        assert_eq!(outcome.method, ScoringMethod::Hybrid);
    }

    /// S5 — hybrid scoring fallback (no metadata).
    #[test]
    fn s5_llm_only_fallback() {
        let outcome = derive(None, 0.85);
        assert!((outcome.hybrid_score - 85.0).abs() < 1e-9);
        assert!(matches!(outcome.severity, Severity::Sev5));
        assert_eq!(outcome.method, ScoringMethod::LlmOnly);
    }

    #[test]
    fn risk_score_unit_is_hybrid_over_100() {
        let outcome = derive(Some(50.0), 0.5);
        assert!((outcome.risk_score_unit - outcome.hybrid_score / 100.0).abs() < 1e-12);
    }

    #[test]
    fn llm_risk_clipped_before_blending() {
        let outcome = derive(None, 1.5);
        assert!((outcome.hybrid_score - 100.0).abs() < 1e-9);
    }
}
