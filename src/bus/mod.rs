//! Event bus & orchestrator (C6): three logical topics — *ingest*, *analyze*,
//! *extract* — each an at-least-once, bounded-prefetch subscription with
//! retry/backoff and a dead-letter queue on exhaustion (§4.5).
//!
//! There is no managed-queue broker in this crate's deployment model (no
//! pack example speaks GCP Pub/Sub or SQS wire protocol); topics are modeled
//! as `tokio::sync::mpsc` channels so the same happens-before guarantee the
//! spec requires (a later stage never runs before the earlier one acks) falls
//! out of the channel handoff itself. [`Envelope::to_wire`]/[`from_wire`]
//! still produce the documented base64-JSON message shape (§6) so the wire
//! contract is exercised even though the transport is in-process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};
use crate::event::Event;
use crate::scoring::ModelTier;

/// One message on a topic, carrying the redelivery bookkeeping the framework
/// needs for retry/backoff and the dead-letter decision (§4.5).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
    pub message_id: String,
    pub publish_time: DateTime<Utc>,
    pub delivery_attempt: u32,
}

impl<T> Envelope<T> {
    pub fn new(data: T) -> Self {
        Self {
            data,
            message_id: Uuid::new_v4().to_string(),
            publish_time: Utc::now(),
            delivery_attempt: 0,
        }
    }
}

impl<T: Serialize + for<'de> Deserialize<'de>> Envelope<T> {
    /// Encodes as the managed-queue wire shape: `{message: {data: base64(json), messageId, publishTime}}` (§6).
    pub fn to_wire(&self) -> serde_json::Value {
        let json = serde_json::to_vec(&self.data).unwrap_or_default();
        let data_b64 = base64::engine::general_purpose::STANDARD.encode(json);
        serde_json::json!({
            "message": {
                "data": data_b64,
                "messageId": self.message_id,
                "publishTime": self.publish_time.to_rfc3339(),
            }
        })
    }

    pub fn from_wire(wire: &serde_json::Value) -> PipelineResult<Self> {
        let message = wire
            .get("message")
            .ok_or_else(|| PipelineError::bad_input("envelope missing 'message'"))?;
        let data_b64 = message
            .get("data")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PipelineError::bad_input("envelope missing 'message.data'"))?;
        let message_id = message
            .get("messageId")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let publish_time = message
            .get("publishTime")
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let raw = base64::engine::general_purpose::STANDARD
            .decode(data_b64)
            .map_err(|e| PipelineError::bad_input(format!("envelope data not valid base64: {e}")))?;
        let data = serde_json::from_slice(&raw)
            .map_err(|e| PipelineError::bad_input(format!("envelope data not valid json: {e}")))?;

        Ok(Self {
            data,
            message_id,
            publish_time,
            delivery_attempt: 0,
        })
    }
}

/// `analyze-event` / `event-analysis` (compat alias) message shape (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalyzeMessage {
    pub event_id: String,
    pub model: ModelTier,
    /// Forces a re-run of C7/C8 even if `llm_analysis` is already populated (§4.5).
    pub reanalyze: bool,
}

/// `extract-entities` message shape (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractMessage {
    pub event_id: String,
}

/// A message that exhausted its retry budget, preserved for inspection (§4.5, §7).
#[derive(Debug, Clone)]
pub struct DeadLetter<T> {
    pub payload: T,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

pub struct DeadLetterQueue<T> {
    items: Mutex<Vec<DeadLetter<T>>>,
}

impl<T: Clone> DeadLetterQueue<T> {
    fn new() -> Self {
        Self { items: Mutex::new(Vec::new()) }
    }

    fn push(&self, payload: T, error: String, attempts: u32) {
        self.items.lock().push(DeadLetter {
            payload,
            error,
            attempts,
            failed_at: Utc::now(),
        });
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn drain(&self) -> Vec<DeadLetter<T>> {
        std::mem::take(&mut *self.items.lock())
    }
}

impl<T: Clone> Default for DeadLetterQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
pub trait IngestHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> PipelineResult<()>;
}

#[async_trait]
pub trait AnalyzeHandler: Send + Sync {
    async fn handle(&self, msg: &AnalyzeMessage) -> PipelineResult<()>;
}

#[async_trait]
pub trait ExtractHandler: Send + Sync {
    async fn handle(&self, msg: &ExtractMessage) -> PipelineResult<()>;
}

/// Exponential backoff before a nacked message is redelivered: `100ms · 2^attempt`,
/// plus up to 20% jitter so a burst of messages failing together doesn't retry
/// in lockstep (§4.5, §5).
async fn backoff(attempt: u32) {
    let base = 100u64.saturating_mul(1u64 << attempt.min(10));
    let jitter = rand::thread_rng().gen_range(0..=(base / 5).max(1));
    tokio::time::sleep(Duration::from_millis(base + jitter)).await;
}

/// The three-topic bus (§4.5). Each topic is a bounded channel: the sender
/// blocks once `prefetch` messages are outstanding, which is the mechanism
/// by which slow `analyze` work naturally stalls ingestion upstream (§5).
pub struct EventBus {
    ingest_tx: mpsc::Sender<Envelope<Event>>,
    ingest_rx: Mutex<Option<mpsc::Receiver<Envelope<Event>>>>,
    analyze_tx: mpsc::Sender<Envelope<AnalyzeMessage>>,
    analyze_rx: Mutex<Option<mpsc::Receiver<Envelope<AnalyzeMessage>>>>,
    extract_tx: mpsc::Sender<Envelope<ExtractMessage>>,
    extract_rx: Mutex<Option<mpsc::Receiver<Envelope<ExtractMessage>>>>,
    max_retries: u32,

    pub dlq_ingest: DeadLetterQueue<Event>,
    pub dlq_analyze: DeadLetterQueue<AnalyzeMessage>,
    pub dlq_extract: DeadLetterQueue<ExtractMessage>,
}

impl EventBus {
    pub fn new(prefetch: usize, max_retries: u32) -> Self {
        let prefetch = prefetch.max(1);
        let (ingest_tx, ingest_rx) = mpsc::channel(prefetch);
        let (analyze_tx, analyze_rx) = mpsc::channel(prefetch);
        let (extract_tx, extract_rx) = mpsc::channel(prefetch);
        Self {
            ingest_tx,
            ingest_rx: Mutex::new(Some(ingest_rx)),
            analyze_tx,
            analyze_rx: Mutex::new(Some(analyze_rx)),
            extract_tx,
            extract_rx: Mutex::new(Some(extract_rx)),
            max_retries,
            dlq_ingest: DeadLetterQueue::default(),
            dlq_analyze: DeadLetterQueue::default(),
            dlq_extract: DeadLetterQueue::default(),
        }
    }

    pub async fn publish_ingest(&self, event: Event) -> PipelineResult<()> {
        self.ingest_tx
            .send(Envelope::new(event))
            .await
            .map_err(|_| PipelineError::dependency_unavailable("ingest topic closed"))
    }

    pub async fn publish_analyze(&self, msg: AnalyzeMessage) -> PipelineResult<()> {
        self.analyze_tx
            .send(Envelope::new(msg))
            .await
            .map_err(|_| PipelineError::dependency_unavailable("analyze topic closed"))
    }

    pub async fn publish_extract(&self, msg: ExtractMessage) -> PipelineResult<()> {
        self.extract_tx
            .send(Envelope::new(msg))
            .await
            .map_err(|_| PipelineError::dependency_unavailable("extract topic closed"))
    }

    /// Spawns the ingest consumer. Panics if called twice (a topic has one subscriber).
    pub fn run_ingest(self: &Arc<Self>, handler: Arc<dyn IngestHandler>) {
        let mut rx = self
            .ingest_rx
            .lock()
            .take()
            .expect("run_ingest called more than once");
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(mut envelope) = rx.recv().await {
                match handler.handle(&envelope.data).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() && envelope.delivery_attempt < bus.max_retries => {
                        envelope.delivery_attempt += 1;
                        tracing::warn!(
                            topic = "ingest",
                            attempt = envelope.delivery_attempt,
                            error = %e,
                            "nacking message for retry"
                        );
                        backoff(envelope.delivery_attempt).await;
                        let _ = bus.ingest_tx.send(envelope).await;
                    }
                    Err(e) => {
                        tracing::error!(topic = "ingest", error = %e, "moving message to dead-letter subscription");
                        bus.dlq_ingest.push(envelope.data, e.to_string(), envelope.delivery_attempt);
                    }
                }
            }
        });
    }

    pub fn run_analyze(self: &Arc<Self>, handler: Arc<dyn AnalyzeHandler>) {
        let mut rx = self
            .analyze_rx
            .lock()
            .take()
            .expect("run_analyze called more than once");
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(mut envelope) = rx.recv().await {
                match handler.handle(&envelope.data).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() && envelope.delivery_attempt < bus.max_retries => {
                        envelope.delivery_attempt += 1;
                        tracing::warn!(
                            topic = "analyze",
                            attempt = envelope.delivery_attempt,
                            error = %e,
                            "nacking message for retry"
                        );
                        backoff(envelope.delivery_attempt).await;
                        let _ = bus.analyze_tx.send(envelope).await;
                    }
                    Err(e) => {
                        tracing::error!(topic = "analyze", error = %e, "moving message to dead-letter subscription");
                        bus.dlq_analyze.push(envelope.data, e.to_string(), envelope.delivery_attempt);
                    }
                }
            }
        });
    }

    pub fn run_extract(self: &Arc<Self>, handler: Arc<dyn ExtractHandler>) {
        let mut rx = self
            .extract_rx
            .lock()
            .take()
            .expect("run_extract called more than once");
        let bus = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(mut envelope) = rx.recv().await {
                match handler.handle(&envelope.data).await {
                    Ok(()) => {}
                    Err(e) if e.is_retryable() && envelope.delivery_attempt < bus.max_retries => {
                        envelope.delivery_attempt += 1;
                        tracing::warn!(
                            topic = "extract",
                            attempt = envelope.delivery_attempt,
                            error = %e,
                            "nacking message for retry"
                        );
                        backoff(envelope.delivery_attempt).await;
                        let _ = bus.extract_tx.send(envelope).await;
                    }
                    Err(e) => {
                        tracing::error!(topic = "extract", error = %e, "moving message to dead-letter subscription");
                        bus.dlq_extract.push(envelope.data, e.to_string(), envelope.delivery_attempt);
                    }
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{Category, Direction, Source};
    use std::collections::HashMap;

    fn sample_event() -> Event {
        let now = Utc::now();
        Event {
            id: Event::stable_id(Source::Gdelt, "1"),
            source: Source::Gdelt,
            source_event_id: "1".into(),
            source_url: None,
            event_timestamp: now,
            ingested_at: now,
            created_at: now,
            category: Category::Political,
            subcategory: None,
            event_type: None,
            country_code: None,
            admin1: None,
            admin2: None,
            latitude: None,
            longitude: None,
            magnitude_raw: None,
            magnitude_unit: None,
            magnitude_norm: Some(0.2),
            direction: Direction::Neutral,
            tone_raw: None,
            tone_norm: None,
            num_sources: 1,
            source_credibility: 0.5,
            confidence: 0.5,
            actor1: None,
            actor2: None,
            commodities: vec![],
            sectors: vec![],
            themes: vec![],
            title: "t".into(),
            content: "c".into(),
            sentiment: None,
            risk_score: None,
            priority: None,
            severity: None,
            urgency: None,
            language: None,
            summary: None,
            relationships: vec![],
            llm_analysis: None,
            scoring_method: None,
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn envelope_round_trips_through_wire_shape() {
        let envelope = Envelope::new(ExtractMessage { event_id: "gdelt:1".to_string() });
        let wire = envelope.to_wire();
        assert!(wire["message"]["data"].is_string());
        let decoded = Envelope::<ExtractMessage>::from_wire(&wire).unwrap();
        assert_eq!(decoded.data.event_id, "gdelt:1");
    }

    #[tokio::test]
    async fn ingest_handler_failure_retries_then_dead_letters() {
        struct AlwaysTransient;
        #[async_trait]
        impl IngestHandler for AlwaysTransient {
            async fn handle(&self, _event: &Event) -> PipelineResult<()> {
                Err(PipelineError::transient("downstream unavailable"))
            }
        }

        let bus = Arc::new(EventBus::new(4, 1));
        bus.run_ingest(Arc::new(AlwaysTransient));

        let event = sample_event();
        bus.publish_ingest(event).await.unwrap();

        // one retry (max_retries=1) then dead-letter.
        for _ in 0..50 {
            if !bus.dlq_ingest.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert_eq!(bus.dlq_ingest.len(), 1);
    }

    #[tokio::test]
    async fn bad_input_skips_retry_and_dead_letters_immediately() {
        struct AlwaysBadInput;
        #[async_trait]
        impl IngestHandler for AlwaysBadInput {
            async fn handle(&self, _event: &Event) -> PipelineResult<()> {
                Err(PipelineError::bad_input("missing field"))
            }
        }

        let bus = Arc::new(EventBus::new(4, 5));
        bus.run_ingest(Arc::new(AlwaysBadInput));
        bus.publish_ingest(sample_event()).await.unwrap();

        for _ in 0..50 {
            if !bus.dlq_ingest.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(bus.dlq_ingest.len(), 1);
    }
}
