//! Sanctions screener (C13): screens the entity names C8 extracts against a
//! watchlist, producing the binary `sanctions` dimension C10 consumes.
//!
//! Grounded in `examples/other_examples/.../sanctions_monitor.rs`'s
//! `strsim`-based name comparison (normalize, then take the best of several
//! similarity measures), narrowed to the Levenshtein-plus-substring-floor
//! rule this system's contract specifies (§4.12) instead of that module's
//! multi-algorithm blend.

use std::collections::HashMap;

use crate::event::{EntityType, SanctionsMatch};

/// Matches at or above this score count toward the event's `sanctions` dimension (§4.12).
pub const MATCH_THRESHOLD: f64 = 0.7;

/// Floor applied when one name is a substring of the other, so truncated or
/// legal-suffix-stripped aliases ("PDVSA" vs "Petroleos de Venezuela SA")
/// still register as a plausible match (§4.12).
const SUBSTRING_FLOOR: f64 = 0.8;

/// Minimal free watchlist covering Venezuela-adjacent sanctions exposure;
/// a premium list (sourced from `opensanctions_api_key`) supersedes this
/// when credentials are configured.
const FREE_WATCHLIST: &[(&str, &str)] = &[
    ("Nicolas Maduro", "OFAC SDN"),
    ("Petroleos de Venezuela SA", "OFAC SDN"),
    ("PDVSA", "OFAC SDN"),
    ("Tareck El Aissami", "OFAC SDN"),
    ("Diosdado Cabello", "OFAC SDN"),
    ("Banco de Venezuela", "OFAC SDN"),
    ("CLAP", "OFAC SDN"),
];

pub struct SanctionsScreener {
    watchlist: Vec<(String, String)>,
}

impl SanctionsScreener {
    pub fn new() -> Self {
        Self::with_watchlist(FREE_WATCHLIST.iter().map(|(n, l)| (n.to_string(), l.to_string())).collect())
    }

    /// Constructs a screener over the premium list when credentials are
    /// configured, otherwise the free list (§4.12). The premium fetch
    /// itself is an external collaborator's concern; this constructor just
    /// takes whichever entries the caller already resolved.
    pub fn with_watchlist(watchlist: Vec<(String, String)>) -> Self {
        Self { watchlist }
    }

    /// Screens one name, returning the best match at or above
    /// [`MATCH_THRESHOLD`], if any.
    pub fn screen_name(&self, event_id: &str, name: &str, entity_type: EntityType) -> Option<SanctionsMatch> {
        let normalized = normalize(name);
        if normalized.is_empty() {
            return None;
        }

        let mut best: Option<SanctionsMatch> = None;
        for (listed_name, list) in &self.watchlist {
            let score = similarity(&normalized, &normalize(listed_name));
            if score < MATCH_THRESHOLD {
                continue;
            }
            let better = best.as_ref().map(|b| score > b.match_score).unwrap_or(true);
            if better {
                best = Some(SanctionsMatch {
                    event_id: event_id.to_string(),
                    entity_name: name.to_string(),
                    entity_type,
                    list: list.clone(),
                    match_score: score,
                    raw_payload: serde_json::json!({ "listed_as": listed_name }),
                });
            }
        }
        best
    }

    /// Screens every name in the event's extracted entities block, returning
    /// the thresholded `sanctions` dimension (1.0 if any match `>= 0.7`,
    /// else 0.0) plus the matches themselves for persistence (§4.12).
    pub fn screen_event(&self, event_id: &str, names: &HashMap<EntityType, Vec<String>>) -> (f64, Vec<SanctionsMatch>) {
        let mut matches = Vec::new();
        for (entity_type, names) in names {
            for name in names {
                if let Some(m) = self.screen_name(event_id, name, *entity_type) {
                    matches.push(m);
                }
            }
        }
        let hit = if matches.is_empty() { 0.0 } else { 1.0 };
        (hit, matches)
    }
}

impl Default for SanctionsScreener {
    fn default() -> Self {
        Self::new()
    }
}

fn normalize(name: &str) -> String {
    name.to_lowercase()
        .chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Normalized Levenshtein similarity with a substring-containment floor
/// (§4.12): `strsim::normalized_levenshtein`, raised to [`SUBSTRING_FLOOR`]
/// when one name fully contains the other.
fn similarity(a: &str, b: &str) -> f64 {
    if a == b {
        return 1.0;
    }
    let levenshtein = strsim::normalized_levenshtein(a, b);
    if a.contains(b) || b.contains(a) {
        levenshtein.max(SUBSTRING_FLOOR)
    } else {
        levenshtein
    }
}
