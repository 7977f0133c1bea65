//! Process configuration, loaded once at startup from the environment.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub port: u16,

    /// Max retries for adapter `fetch` on transient errors (§4.1, §7).
    pub adapter_max_retries: u32,
    /// Max retries for bus handlers before a message moves to the DLQ (§4.5).
    pub bus_max_retries: u32,
    /// Max retries for the entity resolver on unique-constraint contention (§4.11).
    pub resolver_max_retries: u32,

    /// Duplicate-detection window for adapters and the ingest handler (§4.5).
    pub dedup_window: Duration,

    /// Bounded prefetch for the analyze stage; the pacing point for backpressure (§4.5, §5).
    pub analyze_prefetch: usize,

    /// Model tier used when a caller does not specify one (§4.7).
    pub default_model_tier: String,
    /// LLM analyzer cache TTL (§4.7).
    pub llm_cache_ttl: Duration,

    /// Optional premium sanctions-list credentials (§4.12); free list used when absent.
    pub opensanctions_api_key: Option<String>,

    /// External LLM endpoint base URL; injectable so tests can point at a stub.
    pub llm_endpoint: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv::dotenv().ok();

        let database_path =
            std::env::var("DATABASE_PATH").unwrap_or_else(|_| "./eventintel.db".to_string());

        let port = std::env::var("PORT")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let adapter_max_retries = env_u32("ADAPTER_MAX_RETRIES", 5);
        let bus_max_retries = env_u32("BUS_MAX_RETRIES", 5);
        let resolver_max_retries = env_u32("RESOLVER_MAX_RETRIES", 3);

        let dedup_window_days = env_u32("DEDUP_WINDOW_DAYS", 7);
        let analyze_prefetch = env_u32("ANALYZE_PREFETCH", 16) as usize;

        let default_model_tier =
            std::env::var("DEFAULT_MODEL_TIER").unwrap_or_else(|_| "fast".to_string());
        let llm_cache_ttl_hours = env_u32("LLM_CACHE_TTL_HOURS", 24);

        let opensanctions_api_key = std::env::var("OPENSANCTIONS_API_KEY")
            .ok()
            .filter(|s| !s.trim().is_empty());
        let llm_endpoint = std::env::var("LLM_ENDPOINT").ok();

        Ok(Self {
            database_path,
            port,
            adapter_max_retries,
            bus_max_retries,
            resolver_max_retries,
            dedup_window: Duration::from_secs(u64::from(dedup_window_days) * 86_400),
            analyze_prefetch,
            default_model_tier,
            llm_cache_ttl: Duration::from_secs(u64::from(llm_cache_ttl_hours) * 3_600),
            opensanctions_api_key,
            llm_endpoint,
        })
    }
}

fn env_u32(name: &str, default: u32) -> u32 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_u32_falls_back_on_missing_or_bad_value() {
        std::env::remove_var("ZZZ_NOT_SET");
        assert_eq!(env_u32("ZZZ_NOT_SET", 42), 42);
    }
}
