//! Mention spike detector (C17): z-score over a rolling mention-count
//! baseline, classified into confidence bands (§4.15).
//!
//! Pure and non-suspending, grounded in the same baseline-vs-observed z-score
//! shape as the teacher's `risk.rs` volatility checks, narrowed to the exact
//! thresholds this contract specifies.

use chrono::NaiveDate;

use crate::event::SpikeConfidence;

/// One day's observed mention count against its rolling baseline (§4.15).
#[derive(Debug, Clone)]
pub struct SpikeObservation {
    pub event_id: String,
    pub date: NaiveDate,
    pub mention_count: f64,
    pub rolling_avg: Option<f64>,
    pub rolling_stddev: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct SpikeFinding {
    pub event_id: String,
    pub date: NaiveDate,
    pub mention_count: f64,
    pub baseline_avg: f64,
    pub baseline_stddev: f64,
    pub z_score: f64,
    pub confidence: SpikeConfidence,
}

/// `z = (count - avg) / stddev`; `z = 0` when `stddev == 0` (avoids a NaN
/// when the baseline window was perfectly flat) (§4.15).
fn z_score(count: f64, avg: f64, stddev: f64) -> f64 {
    if stddev == 0.0 {
        0.0
    } else {
        (count - avg) / stddev
    }
}

fn classify(z: f64) -> Option<SpikeConfidence> {
    if z >= 3.0 {
        Some(SpikeConfidence::Critical)
    } else if z >= 2.5 {
        Some(SpikeConfidence::High)
    } else if z >= 2.0 {
        Some(SpikeConfidence::Medium)
    } else {
        None
    }
}

/// Scores every observation with a non-null baseline, dropping those whose
/// z-score classifies below MEDIUM (§4.15).
pub fn detect(observations: &[SpikeObservation]) -> Vec<SpikeFinding> {
    observations
        .iter()
        .filter_map(|obs| {
            let avg = obs.rolling_avg?;
            let stddev = obs.rolling_stddev?;
            let z = z_score(obs.mention_count, avg, stddev);
            let confidence = classify(z)?;
            Some(SpikeFinding {
                event_id: obs.event_id.clone(),
                date: obs.date,
                mention_count: obs.mention_count,
                baseline_avg: avg,
                baseline_stddev: stddev,
                z_score: z,
                confidence,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(count: f64, avg: f64, stddev: f64) -> SpikeObservation {
        SpikeObservation {
            event_id: "ev1".to_string(),
            date: NaiveDate::from_ymd_opt(2026, 1, 1).unwrap(),
            mention_count: count,
            rolling_avg: Some(avg),
            rolling_stddev: Some(stddev),
        }
    }

    /// S1 — z=5.0 classifies CRITICAL.
    #[test]
    fn s1_high_zscore_is_critical() {
        let findings = detect(&[obs(60.0, 10.0, 10.0)]);
        assert_eq!(findings.len(), 1);
        assert!((findings[0].z_score - 5.0).abs() < 1e-9);
        assert_eq!(findings[0].confidence, SpikeConfidence::Critical);
    }

    /// S2 — the HIGH/CRITICAL boundary is inclusive on the HIGH side at 2.5.
    #[test]
    fn s2_boundary_is_inclusive() {
        let findings = detect(&[obs(35.0, 10.0, 10.0)]); // z = 2.5
        assert_eq!(findings.len(), 1);
        assert_eq!(findings[0].confidence, SpikeConfidence::High);
    }

    #[test]
    fn zero_stddev_yields_zero_zscore_and_is_filtered() {
        let findings = detect(&[obs(100.0, 10.0, 0.0)]);
        assert!(findings.is_empty());
    }

    #[test]
    fn null_baseline_rows_are_skipped() {
        let mut o = obs(50.0, 10.0, 5.0);
        o.rolling_avg = None;
        assert!(detect(&[o]).is_empty());
    }

    #[test]
    fn below_medium_threshold_is_filtered_out() {
        let findings = detect(&[obs(19.0, 10.0, 10.0)]); // z = 0.9
        assert!(findings.is_empty());
    }

    #[test]
    fn medium_band_is_inclusive_at_two() {
        let findings = detect(&[obs(30.0, 10.0, 10.0)]); // z = 2.0
        assert_eq!(findings[0].confidence, SpikeConfidence::Medium);
    }
}
