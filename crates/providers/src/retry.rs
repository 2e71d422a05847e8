//! Provider retry: bounded exponential backoff for transport failures.
//!
//! Wraps any provider and re-issues a request when it fails with a
//! retryable [`ProviderError`] (rate limit, timeout, network, 5xx). Errors
//! that another attempt cannot fix are returned immediately.

use async_trait::async_trait;
use reasonflow_config::RetryConfig;
use reasonflow_core::error::ProviderError;
use reasonflow_core::provider::*;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Attempt budget and backoff curve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 8000,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff_ms: config.initial_backoff_ms,
            max_backoff_ms: config.max_backoff_ms,
        }
    }
}

impl RetryPolicy {
    /// Wait before retry number `retry` (1-based): `initial * 2^(retry-1)`,
    /// capped at `max_backoff_ms`.
    pub fn backoff_ms(&self, retry: u32) -> u64 {
        let cap = self.max_backoff_ms.max(self.initial_backoff_ms);
        if retry == 0 {
            return self.initial_backoff_ms.min(cap);
        }
        let shift = (retry - 1).min(20);
        let factor = 1u64.checked_shl(shift).unwrap_or(u64::MAX);
        self.initial_backoff_ms.saturating_mul(factor).min(cap)
    }

    /// The wait after `error`, honouring a rate limit's hint up to the cap.
    fn delay_for(&self, retry: u32, error: &ProviderError) -> Duration {
        let mut wait_ms = self.backoff_ms(retry);
        if let ProviderError::RateLimited { retry_after_secs } = error {
            let hinted = retry_after_secs.saturating_mul(1000);
            wait_ms = wait_ms.max(hinted.min(self.max_backoff_ms));
        }
        Duration::from_millis(wait_ms)
    }
}

/// A provider that retries its inner provider on transient failures.
pub struct RetryProvider {
    inner: Arc<dyn reasonflow_core::Provider>,
    policy: RetryPolicy,
}

impl RetryProvider {
    pub fn new(inner: Arc<dyn reasonflow_core::Provider>) -> Self {
        Self {
            inner,
            policy: RetryPolicy::default(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    async fn run<T, F, Fut>(&self, operation: &str, mut attempt_fn: F) -> Result<T, ProviderError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ProviderError>>,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 1;

        loop {
            match attempt_fn().await {
                Ok(value) => {
                    if attempt > 1 {
                        info!(
                            provider = %self.inner.name(),
                            operation,
                            attempt,
                            "Retry: provider recovered"
                        );
                    }
                    return Ok(value);
                }
                Err(e) if e.is_retryable() && attempt < max_attempts => {
                    let delay = self.policy.delay_for(attempt, &e);
                    warn!(
                        provider = %self.inner.name(),
                        operation,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Retry: transient provider failure, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    if e.is_retryable() {
                        warn!(
                            provider = %self.inner.name(),
                            operation,
                            attempts = attempt,
                            error = %e,
                            "Retry: attempts exhausted"
                        );
                    }
                    return Err(e);
                }
            }
        }
    }
}

#[async_trait]
impl reasonflow_core::Provider for RetryProvider {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn supports_streaming(&self) -> bool {
        self.inner.supports_streaming()
    }

    async fn complete(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<ProviderResponse, ProviderError> {
        self.run("complete", || self.inner.complete(request.clone()))
            .await
    }

    /// Only stream setup is retried. Once fragments have been delivered a
    /// mid-stream failure is passed through, since replaying would duplicate
    /// text the consumer has already parsed.
    async fn stream(
        &self,
        request: ProviderRequest,
    ) -> std::result::Result<StreamReceiver, ProviderError> {
        self.run("stream", || self.inner.stream(request.clone()))
            .await
    }

    async fn health_check(&self) -> std::result::Result<bool, ProviderError> {
        self.inner.health_check().await
    }
}
