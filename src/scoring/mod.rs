//! Risk and severity scoring pipeline: quantitative scorer (C7), LLM
//! analyzer (C8), hybrid derivation (C9), multi-dimensional aggregator
//! (C10), and category/daily composite (C11).

pub mod aggregator;
pub mod composite;
pub mod hybrid;
pub mod llm;
pub mod quantitative;

pub use aggregator::{composite_risk, AggregatorInput, AggregatorOutcome, DimensionWeights};
pub use composite::{category_sub_scores, daily_composite, CategoryInput, CompositeWeights, DailyComposite};
pub use hybrid::{derive as derive_hybrid, HybridOutcome, ScoringMethod};
pub use llm::{ChatCompletionClient, HttpChatClient, LlmAnalyzer, ModelTier};
pub use quantitative::{score as quantitative_score, QuantitativeSignals, ScorerWeights};
