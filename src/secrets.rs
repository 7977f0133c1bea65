//! Process-local secret cache.
//!
//! Identity/secret stores are an external collaborator (§1); this module is
//! just the injectable lookup contract and the lazy in-process cache over
//! it, so adapters and the LLM/sanctions clients never touch the secret
//! backend directly.

use parking_lot::RwLock;
use std::collections::HashMap;

#[async_trait::async_trait]
pub trait SecretSource: Send + Sync {
    async fn fetch(&self, name: &str) -> anyhow::Result<Option<String>>;
}

/// Falls back to process environment variables; the default for local runs
/// and tests. Production deployments inject a real secret-manager client.
pub struct EnvSecretSource;

#[async_trait::async_trait]
impl SecretSource for EnvSecretSource {
    async fn fetch(&self, name: &str) -> anyhow::Result<Option<String>> {
        Ok(std::env::var(name).ok())
    }
}

pub struct SecretCache {
    source: Box<dyn SecretSource>,
    cache: RwLock<HashMap<String, String>>,
}

impl SecretCache {
    pub fn new(source: Box<dyn SecretSource>) -> Self {
        Self {
            source,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn from_env() -> Self {
        Self::new(Box::new(EnvSecretSource))
    }

    pub async fn get(&self, name: &str) -> anyhow::Result<Option<String>> {
        if let Some(v) = self.cache.read().get(name).cloned() {
            return Ok(Some(v));
        }
        let fetched = self.source.fetch(name).await?;
        if let Some(v) = &fetched {
            self.cache.write().insert(name.to_string(), v.clone());
        }
        Ok(fetched)
    }

    pub fn invalidate(&self, name: &str) {
        self.cache.write().remove(name);
    }
}
