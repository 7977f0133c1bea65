//! Correlation engine (C15): pairwise Pearson/Spearman over inner-joined
//! dated series, with Bonferroni-corrected significance and an effect-size
//! floor (§4.14).
//!
//! Grounded in the teacher's `statrs::statistics::Statistics` import
//! (`risk.rs`) for `.mean()`/population variance; statrs has no built-in
//! correlation coefficient or p-value routine, so the coefficient and its
//! significance are computed directly from the formulas this contract
//! specifies rather than reached for piecemeal from the crate.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::Serialize;
use statrs::distribution::{ContinuousCDF, StudentsT};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrelationMethod {
    Pearson,
    Spearman,
}

impl CorrelationMethod {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pearson" => Some(CorrelationMethod::Pearson),
            "spearman" => Some(CorrelationMethod::Spearman),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrelationMethod::Pearson => "pearson",
            CorrelationMethod::Spearman => "spearman",
        }
    }
}

/// One named, dated series (entity risk, macro indicator, event-type daily
/// count — §4.14); `points` need not share dates with other series until
/// [`inner_join`] aligns them.
#[derive(Debug, Clone)]
pub struct Series {
    pub name: String,
    pub points: BTreeMap<NaiveDate, f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationPair {
    pub a: String,
    pub b: String,
    pub r: f64,
    pub p: f64,
    pub n: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CorrelationReport {
    pub method: CorrelationMethod,
    pub n_tested: usize,
    pub n_significant: usize,
    pub bonferroni_threshold: f64,
    pub correlations: Vec<CorrelationPair>,
}

/// Drops any date not present in both series (§4.14).
fn inner_join(a: &Series, b: &Series) -> (Vec<f64>, Vec<f64>) {
    let mut xs = Vec::new();
    let mut ys = Vec::new();
    for (date, x) in &a.points {
        if let Some(y) = b.points.get(date) {
            xs.push(*x);
            ys.push(*y);
        }
    }
    (xs, ys)
}

fn mean(v: &[f64]) -> f64 {
    v.iter().sum::<f64>() / v.len() as f64
}

fn pearson_r(xs: &[f64], ys: &[f64]) -> f64 {
    let mx = mean(xs);
    let my = mean(ys);
    let mut cov = 0.0;
    let mut var_x = 0.0;
    let mut var_y = 0.0;
    for (x, y) in xs.iter().zip(ys) {
        let dx = x - mx;
        let dy = y - my;
        cov += dx * dy;
        var_x += dx * dx;
        var_y += dy * dy;
    }
    if var_x <= 0.0 || var_y <= 0.0 {
        return 0.0;
    }
    cov / (var_x.sqrt() * var_y.sqrt())
}

/// Competition ranks with tie-averaging, the standard input transform for
/// Spearman's rho computed as Pearson-on-ranks.
fn ranks(values: &[f64]) -> Vec<f64> {
    let mut indexed: Vec<(usize, f64)> = values.iter().copied().enumerate().collect();
    indexed.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());

    let mut out = vec![0.0; values.len()];
    let mut i = 0;
    while i < indexed.len() {
        let mut j = i;
        while j + 1 < indexed.len() && indexed[j + 1].1 == indexed[i].1 {
            j += 1;
        }
        let avg_rank = ((i + j) as f64 / 2.0) + 1.0;
        for k in i..=j {
            out[indexed[k].0] = avg_rank;
        }
        i = j + 1;
    }
    out
}

/// Two-tailed p-value for a Pearson/Spearman correlation coefficient under
/// the usual `t = r * sqrt((n-2)/(1-r^2))`, `df = n-2` Student's t
/// approximation.
fn p_value(r: f64, n: usize) -> f64 {
    if n <= 2 {
        return 1.0;
    }
    let df = (n - 2) as f64;
    if (r.abs() - 1.0).abs() < 1e-12 {
        return 0.0;
    }
    let t = r * (df / (1.0 - r * r)).sqrt();
    let dist = StudentsT::new(0.0, 1.0, df).expect("valid Student's t parameters");
    2.0 * (1.0 - dist.cdf(t.abs()))
}

/// A series fails this crude stationarity check when its first-half and
/// second-half means differ by more than one pooled standard deviation
/// (§4.14's flag, not a formal unit-root test — no pack example carries one).
fn is_stationary(values: &[f64]) -> bool {
    if values.len() < 4 {
        return true;
    }
    let mid = values.len() / 2;
    let (first, second) = values.split_at(mid);
    let m1 = mean(first);
    let m2 = mean(second);
    let pooled_std = {
        let overall = mean(values);
        let var = values.iter().map(|v| (v - overall).powi(2)).sum::<f64>() / values.len() as f64;
        var.sqrt()
    };
    if pooled_std <= 0.0 {
        return true;
    }
    (m1 - m2).abs() <= pooled_std
}

/// Runs the full pairwise analysis over `series` (§4.14): `n_tests =
/// k(k-1)/2`, Bonferroni threshold `alpha / n_tests`, reporting only pairs
/// that clear both the corrected significance level and `min_effect_size`.
pub fn analyze(
    series: &[Series],
    method: CorrelationMethod,
    alpha: f64,
    min_effect_size: f64,
) -> CorrelationReport {
    let k = series.len();
    let n_tests = if k < 2 { 0 } else { k * (k - 1) / 2 };
    let bonferroni_threshold = if n_tests == 0 { alpha } else { alpha / n_tests as f64 };

    // Each (i, j) pair's join + correlation + significance check is
    // independent of every other pair, so the fan-out runs on rayon's
    // global pool rather than a serial nested loop (§4.14).
    let pairs: Vec<(usize, usize)> = (0..k).flat_map(|i| ((i + 1)..k).map(move |j| (i, j))).collect();

    let correlations: Vec<CorrelationPair> = pairs
        .par_iter()
        .filter_map(|&(i, j)| {
            let (xs, ys) = inner_join(&series[i], &series[j]);
            if xs.len() < 3 {
                return None;
            }

            let (rx, ry) = match method {
                CorrelationMethod::Pearson => (xs.clone(), ys.clone()),
                CorrelationMethod::Spearman => (ranks(&xs), ranks(&ys)),
            };
            let r = pearson_r(&rx, &ry);
            let p = p_value(r, xs.len());

            let mut warnings = Vec::new();
            if !is_stationary(&xs) {
                warnings.push(format!("{} series appears non-stationary", series[i].name));
            }
            if !is_stationary(&ys) {
                warnings.push(format!("{} series appears non-stationary", series[j].name));
            }

            if p <= bonferroni_threshold && r.abs() >= min_effect_size {
                Some(CorrelationPair {
                    a: series[i].name.clone(),
                    b: series[j].name.clone(),
                    r,
                    p,
                    n: xs.len(),
                    warnings,
                })
            } else {
                None
            }
        })
        .collect();

    let n_significant = correlations.len();

    CorrelationReport {
        method,
        n_tested: n_tests,
        n_significant,
        bonferroni_threshold,
        correlations,
    }
}
