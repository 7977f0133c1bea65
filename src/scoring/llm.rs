//! LLM intelligence analyzer (C8).
//!
//! One structured call per event: sentiment, summary, entities,
//! relationships, risk, themes, urgency, language (§4.7). Grounded in the
//! teacher's managed-LLM client shape (`vault/llm.rs::LlmClient::from_env`,
//! `chat_completion`) and in
//! `original_source/backend/data_pipeline/services/llm_intelligence.py` for
//! the schema and caching contract.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::event::{
    EntitiesBlock, LlmAnalysis, RiskBlock, RiskLevel, SentimentBlock, SentimentLabel, SummaryBlock,
    Urgency,
};
use crate::scoring::quantitative::QuantitativeSignals;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelTier {
    Fast,
    Standard,
    Premium,
}

impl ModelTier {
    pub fn parse(s: &str) -> Self {
        match s {
            "standard" => ModelTier::Standard,
            "premium" => ModelTier::Premium,
            _ => ModelTier::Fast,
        }
    }

    pub fn model_name(&self) -> &'static str {
        match self {
            ModelTier::Fast => "claude-haiku",
            ModelTier::Standard => "claude-sonnet",
            ModelTier::Premium => "claude-opus",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub source: String,
    pub event_type: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub quantitative_hint: Option<QuantitativeSignals>,
}

/// Injectable chat completion backend; tests substitute a stub, production
/// points at the managed LLM endpoint.
#[async_trait::async_trait]
pub trait ChatCompletionClient: Send + Sync {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, model: &str) -> anyhow::Result<String>;
}

/// Default backend, grounded in `vault/llm.rs`'s OpenRouter-style client.
pub struct HttpChatClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl HttpChatClient {
    pub fn new(endpoint: String, api_key: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
            api_key,
        }
    }
}

#[async_trait::async_trait]
impl ChatCompletionClient for HttpChatClient {
    async fn complete(&self, system_prompt: &str, user_prompt: &str, model: &str) -> anyhow::Result<String> {
        #[derive(Serialize)]
        struct Msg<'a> {
            role: &'a str,
            content: &'a str,
        }
        #[derive(Serialize)]
        struct Req<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f64,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: String,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
        }

        let body = Req {
            model,
            messages: vec![
                Msg { role: "system", content: system_prompt },
                Msg { role: "user", content: user_prompt },
            ],
            temperature: 0.3,
            max_tokens: 2048,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json::<Resp>()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("empty choices array"))
    }
}

fn intelligence_schema_prompt() -> &'static str {
    r#"Respond with a single JSON object matching exactly this schema (no prose, no markdown fences):
{
  "sentiment": {"score": <-1..1>, "label": "positive|neutral|negative", "confidence": <0..1>, "reasoning": "...", "nuances": ["..."]},
  "summary": {"short": "...", "key_points": ["...", "...", "..."], "full": "..."},
  "entities": {"people": [{"name": "...", "role": "...", "relevance": <0..1>}], "organizations": [...], "locations": [...]},
  "relationships": [{"subject": "...", "predicate": "...", "object": "...", "confidence": <0..1>}],
  "risk": {"score": <0..1>, "level": "low|medium|high|critical", "reasoning": "...", "factors": ["..."], "mitigation": ["..."]},
  "themes": ["..."],
  "urgency": "low|medium|high|immediate",
  "language": "<ISO-639-1>"
}"#
}

fn build_user_prompt(title: &str, content: &str, ctx: &AnalysisContext) -> String {
    let truncated: String = content.chars().take(5_000).collect();
    let hint = ctx
        .quantitative_hint
        .as_ref()
        .map(|h| format!("{h:?}"))
        .unwrap_or_else(|| "none".to_string());
    format!(
        "Source: {}\nEvent type: {}\nTimestamp: {}\nQuantitative score hint: {}\n\nTitle: {title}\nContent: {truncated}",
        ctx.source,
        ctx.event_type.as_deref().unwrap_or("unknown"),
        ctx.timestamp.to_rfc3339(),
        hint,
    )
}

/// Strips code fences and extracts the first top-level `{...}` or `[...]`
/// from a possibly-chatty model response (§4.7 robustness).
fn extract_json(raw: &str) -> Option<&str> {
    let stripped = raw
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();

    let start = stripped.find(['{', '['])?;
    let opening = stripped.as_bytes()[start];
    let closing = if opening == b'{' { b'}' } else { b']' };
    let end = stripped.as_bytes()[start..]
        .iter()
        .rposition(|&b| b == closing)?;
    Some(&stripped[start..=start + end])
}

fn fallback_analysis(reason: &str) -> LlmAnalysis {
    let mut metadata = HashMap::new();
    metadata.insert(
        "error_origin".to_string(),
        serde_json::Value::String(reason.to_string()),
    );
    LlmAnalysis {
        sentiment: SentimentBlock {
            score: 0.0,
            label: SentimentLabel::Neutral,
            confidence: 0.0,
            reasoning: "fallback: analysis unavailable".to_string(),
            nuances: vec![],
        },
        summary: SummaryBlock {
            short: String::new(),
            key_points: vec![],
            full: None,
        },
        entities: EntitiesBlock::default(),
        relationships: vec![],
        risk: RiskBlock {
            score: 0.5,
            level: RiskLevel::Medium,
            reasoning: "fallback: neutral risk assigned".to_string(),
            factors: vec![],
            mitigation: vec![],
        },
        themes: vec![],
        urgency: Some(Urgency::Medium),
        language: None,
        metadata,
    }
}

struct CacheEntry {
    analysis: LlmAnalysis,
    inserted_at: Instant,
}

pub struct LlmAnalyzer {
    client: Box<dyn ChatCompletionClient>,
    cache: Mutex<HashMap<String, CacheEntry>>,
    cache_ttl: Duration,
    max_retries: u32,
}

impl LlmAnalyzer {
    pub fn new(client: Box<dyn ChatCompletionClient>, cache_ttl: Duration) -> Self {
        Self {
            client,
            cache: Mutex::new(HashMap::new()),
            cache_ttl,
            max_retries: 2,
        }
    }

    fn cache_key(title: &str, content: &str, ctx: &AnalysisContext, model_tier: ModelTier) -> String {
        let mut hasher = Sha256::new();
        hasher.update(title.as_bytes());
        hasher.update(content.as_bytes());
        hasher.update(ctx.source.as_bytes());
        hasher.update(ctx.event_type.as_deref().unwrap_or("").as_bytes());
        hasher.update([model_tier as u8]);
        hex::encode(hasher.finalize())
    }

    pub async fn analyze(
        &self,
        title: &str,
        content: &str,
        ctx: AnalysisContext,
        model_tier: ModelTier,
    ) -> LlmAnalysis {
        let key = Self::cache_key(title, content, &ctx, model_tier);

        if let Some(hit) = self.cache.lock().get(&key) {
            if hit.inserted_at.elapsed() < self.cache_ttl {
                debug!(cache_key = %key, "LLM analysis cache hit");
                return hit.analysis.clone();
            }
        }

        let system_prompt = intelligence_schema_prompt();
        let user_prompt = build_user_prompt(title, content, &ctx);

        let mut last_err = None;
        for attempt in 0..=self.max_retries {
            match self
                .client
                .complete(system_prompt, &user_prompt, model_tier.model_name())
                .await
            {
                Ok(raw) => match extract_json(&raw).and_then(|j| serde_json::from_str::<LlmAnalysis>(j).ok()) {
                    Some(analysis) => {
                        self.cache.lock().insert(
                            key,
                            CacheEntry {
                                analysis: analysis.clone(),
                                inserted_at: Instant::now(),
                            },
                        );
                        return analysis;
                    }
                    None => {
                        last_err = Some("response did not parse against schema".to_string());
                    }
                },
                Err(e) => {
                    last_err = Some(e.to_string());
                }
            }
            warn!(attempt, error = ?last_err, "LLM analysis attempt failed, retrying");
        }

        warn!(error = ?last_err, "LLM analysis exhausted retries, returning fallback");
        fallback_analysis(last_err.as_deref().unwrap_or("unknown error"))
    }
}
