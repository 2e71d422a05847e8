//! Provider router: selects the generation provider based on config.
//!
//! Every provider built here is wrapped in a [`RetryProvider`] so transport
//! failures are absorbed before they reach the reasoning loop.

use crate::openai_compat::OpenAiCompatProvider;
use crate::retry::{RetryPolicy, RetryProvider};
use reasonflow_core::error::ProviderError;
use reasonflow_core::provider::Provider;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// Routes generation requests to the correct provider.
pub struct ProviderRouter {
    providers: HashMap<String, Arc<dyn Provider>>,
    default_provider: String,
}

impl ProviderRouter {
    /// Create a new router with a default provider.
    pub fn new(default_provider: impl Into<String>) -> Self {
        Self {
            providers: HashMap::new(),
            default_provider: default_provider.into(),
        }
    }

    /// Register a provider.
    pub fn register(&mut self, name: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(name.into(), provider);
    }

    /// Get the default provider.
    pub fn default_provider(&self) -> Option<Arc<dyn Provider>> {
        self.providers.get(&self.default_provider).cloned()
    }

    /// Get a specific provider by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Provider>> {
        self.providers.get(name).cloned()
    }

    /// List all registered provider names.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<_> = self.providers.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }
}

/// Build providers from configuration.
///
/// Fails when a provider has neither a configured `api_url` nor a
/// well-known default endpoint.
pub fn build_from_config(
    config: &reasonflow_config::AppConfig,
) -> Result<ProviderRouter, ProviderError> {
    let mut router = ProviderRouter::new(&config.default_provider);
    let policy = RetryPolicy::from(&config.retry);

    for (name, provider_config) in &config.providers {
        let api_key = provider_config
            .api_key
            .clone()
            .or_else(|| config.api_key.clone())
            .unwrap_or_default();

        let base_url = match provider_config.api_url.clone() {
            Some(url) => url,
            None => default_base_url(name).ok_or_else(|| unknown_provider(name))?,
        };

        router.register(name.clone(), build_one(name, &base_url, &api_key, &policy));
    }

    // Ensure the default provider exists (even if not explicitly configured)
    if router.get(&config.default_provider).is_none() {
        let name = &config.default_provider;
        let api_key = config.api_key.clone().unwrap_or_default();
        let base_url = default_base_url(name).ok_or_else(|| unknown_provider(name))?;
        router.register(name.clone(), build_one(name, &base_url, &api_key, &policy));
    }

    debug!(providers = ?router.list(), default = %config.default_provider, "Providers ready");
    Ok(router)
}

fn build_one(name: &str, base_url: &str, api_key: &str, policy: &RetryPolicy) -> Arc<dyn Provider> {
    let inner = Arc::new(OpenAiCompatProvider::new(name, base_url, api_key));
    Arc::new(RetryProvider::new(inner).with_policy(policy.clone()))
}

fn unknown_provider(name: &str) -> ProviderError {
    ProviderError::NotConfigured(format!(
        "provider '{name}' has no known endpoint; set providers.{name}.api_url"
    ))
}

/// Get the default base URL for well-known OpenAI-compatible providers.
fn default_base_url(provider_name: &str) -> Option<String> {
    let url = match provider_name {
        "openrouter" => "https://openrouter.ai/api/v1",
        "openai" => "https://api.openai.com/v1",
        "ollama" => "http://localhost:11434/v1",
        "deepseek" => "https://api.deepseek.com/v1",
        "groq" => "https://api.groq.com/openai/v1",
        "together" => "https://api.together.xyz/v1",
        "fireworks" => "https://api.fireworks.ai/inference/v1",
        "vllm" => "http://localhost:8000/v1",
        "llamacpp" | "llama.cpp" => "http://localhost:8080/v1",
        _ => return None,
    };
    Some(url.to_string())
}
