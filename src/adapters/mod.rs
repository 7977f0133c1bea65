//! Source-adapter framework (C4): the contract every feed integration
//! implements, a framework-provided `publish` helper, and a registry that
//! tracks per-adapter health.
//!
//! Grounded in the HTTP-polling shape of the teacher's `scrapers` module
//! (retry/backoff around `reqwest`, `tracing` spans per fetch) generalized
//! to a fetch/transform/validate contract instead of one-off scraper
//! methods.

pub mod fred;
pub mod gdelt;
pub mod google_trends;
pub mod reliefweb;
pub mod sec_edgar;
pub mod un_comtrade;
pub mod world_bank;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;

use crate::error::PipelineResult;
use crate::event::Event;

/// A raw, source-native record fetched but not yet normalized.
pub type RawRecord = serde_json::Value;

/// Half-open fetch window `[start, end)`.
#[derive(Debug, Clone, Copy)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub limit: u32,
}

/// The contract every feed integration implements (§4.1).
#[async_trait]
pub trait Adapter: Send + Sync {
    /// Unique tag, e.g. `"gdelt"`. Matches `Source::as_str()`.
    fn source_name(&self) -> &'static str;

    /// Cron-style schedule hint; informational only (no scheduler in this crate).
    fn schedule_frequency(&self) -> &'static str;

    fn default_lookback_minutes(&self) -> u32;

    /// Pulls records within `[window.start, window.end)`. `Transient` on
    /// rate limit / network / 5xx (retryable); `Permanent` on schema change
    /// or auth failure (not retryable).
    async fn fetch(&self, window: FetchWindow) -> PipelineResult<Vec<RawRecord>>;

    /// Maps raw records to the canonical model. Never aborts on one bad
    /// record: skips and logs, returns the valid remainder.
    fn transform(&self, raw: Vec<RawRecord>) -> Vec<Event>;

    /// Per-event contract check: required fields, invariants, and
    /// cross-source duplicate window.
    fn validate(&self, event: &Event) -> (bool, Option<String>) {
        match event.check_invariants() {
            Ok(()) => (true, None),
            Err(e) => (false, Some(e.message)),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub published: u32,
    pub failed: u32,
}

/// Calls `validate` per event and enqueues valid ones to `sink`, reporting
/// `{published, failed}` counts (§4.1). `sink` stands in for the *ingest*
/// topic publish call (C6 owns the actual bus).
pub fn publish(
    adapter: &dyn Adapter,
    events: Vec<Event>,
    mut sink: impl FnMut(Event),
) -> PublishOutcome {
    let mut outcome = PublishOutcome::default();
    for event in events {
        let (ok, reason) = adapter.validate(&event);
        if ok {
            outcome.published += 1;
            sink(event);
        } else {
            outcome.failed += 1;
            tracing::warn!(
                source = adapter.source_name(),
                event_id = %event.id,
                reason = reason.as_deref().unwrap_or("unknown"),
                "event failed validation, dropping"
            );
        }
    }
    outcome
}

/// Per-adapter health tracked by the registry (§4.1).
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct AdapterHealth {
    pub last_run: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
    pub total_runs: u64,
    pub success_rate: f64,
    pub last_events_count: u32,
    pub last_duration_ms: u64,
}

struct HealthCounters {
    total_runs: AtomicU64,
    successful_runs: AtomicU64,
}

/// Discovers adapters by naming convention and indexes by `source_name`.
/// Rust has no runtime classpath scan, so "discovery" here is a fixed
/// registration list built at construction time; a bad adapter constructor
/// is still only ever logged and skipped, never aborts the process.
pub struct AdapterRegistry {
    adapters: HashMap<String, Box<dyn Adapter>>,
    health: RwLock<HashMap<String, AdapterHealth>>,
    counters: RwLock<HashMap<String, HealthCounters>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
            health: RwLock::new(HashMap::new()),
            counters: RwLock::new(HashMap::new()),
        }
    }

    /// Registers every adapter this crate ships. Standing in for the
    /// directory scan over `<source>_adapter.*` files (§4.1): each adapter
    /// module still advertises its own `source_name`/`schedule_frequency`.
    pub fn discover() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(gdelt::GdeltAdapter::new()));
        registry.register(Box::new(reliefweb::ReliefwebAdapter::new()));
        registry.register(Box::new(fred::FredAdapter::new()));
        registry.register(Box::new(un_comtrade::UnComtradeAdapter::new()));
        registry.register(Box::new(world_bank::WorldBankAdapter::new()));
        registry.register(Box::new(google_trends::GoogleTrendsAdapter::new()));
        registry.register(Box::new(sec_edgar::SecEdgarAdapter::new()));
        registry
    }

    pub fn register(&mut self, adapter: Box<dyn Adapter>) {
        let name = adapter.source_name().to_string();
        self.health.write().insert(name.clone(), AdapterHealth::default());
        self.counters.write().insert(
            name.clone(),
            HealthCounters {
                total_runs: AtomicU64::new(0),
                successful_runs: AtomicU64::new(0),
            },
        );
        self.adapters.insert(name, adapter);
    }

    pub fn get(&self, source_name: &str) -> Option<&dyn Adapter> {
        self.adapters.get(source_name).map(|b| b.as_ref())
    }

    pub fn source_names(&self) -> Vec<String> {
        self.adapters.keys().cloned().collect()
    }

    pub fn health(&self, source_name: &str) -> Option<AdapterHealth> {
        self.health.read().get(source_name).cloned()
    }

    /// Snapshot of every adapter's health, for flushing to the relational
    /// store (SPEC_FULL.md's restart-survival extension to §4.1).
    pub fn health_snapshot(&self) -> HashMap<String, AdapterHealth> {
        self.health.read().clone()
    }

    /// Seeds the in-memory health map from a persisted snapshot at startup.
    /// Only overwrites entries for adapters this registry actually has
    /// registered; an unknown source_name in the snapshot (a retired
    /// adapter) is silently dropped rather than reintroduced.
    pub fn restore_health(&self, snapshot: HashMap<String, AdapterHealth>) {
        let mut health = self.health.write();
        for (source_name, restored) in snapshot {
            if health.contains_key(&source_name) {
                health.insert(source_name, restored);
            }
        }
    }

    /// Fetches + transforms + publishes one window for `source_name`,
    /// recording health regardless of outcome.
    pub async fn run_once(
        &self,
        source_name: &str,
        window: FetchWindow,
        sink: impl FnMut(Event),
    ) -> PipelineResult<PublishOutcome> {
        let adapter = self
            .get(source_name)
            .ok_or_else(|| crate::error::PipelineError::bad_input(format!("unknown adapter: {source_name}")))?;

        let started = Instant::now();
        let fetch_result = adapter.fetch(window).await;
        let now = Utc::now();

        {
            let counters = self.counters.read();
            if let Some(c) = counters.get(source_name) {
                c.total_runs.fetch_add(1, Ordering::Relaxed);
            }
        }

        let raw = match fetch_result {
            Ok(raw) => raw,
            Err(e) => {
                self.record_run(source_name, now, false, 0, started.elapsed().as_millis() as u64);
                return Err(e);
            }
        };

        let events = adapter.transform(raw);
        let event_count = events.len() as u32;
        let outcome = publish(adapter, events, sink);

        {
            let counters = self.counters.read();
            if let Some(c) = counters.get(source_name) {
                c.successful_runs.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.record_run(source_name, now, true, event_count, started.elapsed().as_millis() as u64);

        Ok(outcome)
    }

    fn record_run(&self, source_name: &str, at: DateTime<Utc>, success: bool, events: u32, duration_ms: u64) {
        let counters = self.counters.read();
        let rate = counters.get(source_name).map(|c| {
            let total = c.total_runs.load(Ordering::Relaxed).max(1);
            let ok = c.successful_runs.load(Ordering::Relaxed);
            ok as f64 / total as f64
        });
        drop(counters);

        let mut health = self.health.write();
        if let Some(h) = health.get_mut(source_name) {
            h.last_run = Some(at);
            h.total_runs += 1;
            if success {
                h.last_success = Some(at);
            }
            h.last_events_count = events;
            h.last_duration_ms = duration_ms;
            if let Some(rate) = rate {
                h.success_rate = rate;
            }
        }
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared normalization helpers used by every adapter's `transform` (§4.2).
pub mod normalize {
    use crate::event::{clip, Direction, MagnitudeUnit};

    /// `(x + 10) / 20`, clipped to `[0,1]`.
    pub fn goldstein(x: f64) -> f64 {
        clip((x + 10.0) / 20.0, 0.0, 1.0)
    }

    /// `min(|x| / 50, 1)`.
    pub fn percent_change(x: f64) -> f64 {
        clip((x.abs() / 50.0).min(1.0), 0.0, 1.0)
    }

    /// `x / 100`, for a 0..100 interest-score scale.
    pub fn interest_score(x: f64) -> f64 {
        clip(x / 100.0, 0.0, 1.0)
    }

    /// GDELT `AvgTone` (roughly -10..+10, negative is worse) inverted onto
    /// `[0,1]` with 1 meaning worst tone: `(-avg_tone + 10) / 20`.
    pub fn tone_from_avg_tone(avg_tone: f64) -> f64 {
        clip((-avg_tone + 10.0) / 20.0, 0.0, 1.0)
    }

    /// `min(num_sources/10, 1) * source_credibility`.
    pub fn confidence(num_sources: u32, source_credibility: f64) -> f64 {
        ((num_sources as f64 / 10.0).min(1.0)) * source_credibility
    }

    /// Sign-based direction with a dead-band, for indicators where "up" has
    /// a fixed good/bad semantics (`bad_when_up=true` for inflation-like
    /// series, `false` for GDP-like series).
    pub fn direction_from_change(x: f64, bad_when_up: bool, epsilon: f64) -> Direction {
        if x.abs() <= epsilon {
            return Direction::Neutral;
        }
        let rising_is_bad = bad_when_up;
        match (x > 0.0, rising_is_bad) {
            (true, true) => Direction::Negative,
            (true, false) => Direction::Positive,
            (false, true) => Direction::Positive,
            (false, false) => Direction::Negative,
        }
    }

    pub fn magnitude_unit_str(unit: MagnitudeUnit) -> &'static str {
        match unit {
            MagnitudeUnit::Fatalities => "fatalities",
            MagnitudeUnit::Percent => "percent",
            MagnitudeUnit::Goldstein => "goldstein",
            MagnitudeUnit::Usd => "usd",
            MagnitudeUnit::InterestScore => "interest_score",
            MagnitudeUnit::PercentChange => "percent_change",
        }
    }
}
