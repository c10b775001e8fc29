use crate::core::rate_limiter::TokenBucketLimiter;
use crate::core::retry::RetryController;
use crate::utils::error::{RemoteError, Result};
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Everything that guards calls to one upstream dependency: its token
/// bucket and its retry controller (which carries the circuit breaker).
/// Built once per dependency and shared by every job that calls it.
pub struct DependencyGateway {
    name: String,
    identifier: String,
    limiter: Arc<TokenBucketLimiter>,
    retry: RetryController,
}

impl DependencyGateway {
    pub fn new(
        name: impl Into<String>,
        limiter: Arc<TokenBucketLimiter>,
        retry: RetryController,
    ) -> Self {
        Self {
            name: name.into(),
            identifier: "global".to_string(),
            limiter,
            retry,
        }
    }

    /// Bucket identifier inside the limiter's scope. Defaults to `global`.
    pub fn with_identifier(mut self, identifier: impl Into<String>) -> Self {
        self.identifier = identifier.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn limiter(&self) -> &TokenBucketLimiter {
        &self.limiter
    }

    pub fn retry(&self) -> &RetryController {
        &self.retry
    }

    /// Takes one token, then runs `op` under the retry controller.
    pub async fn call<T, F, Fut>(&self, label: &str, op: F) -> Result<T>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, RemoteError>> + Send,
        T: Send,
    {
        let permit = self.limiter.acquire(&self.identifier, label).await?;
        debug!(
            dependency = %self.name,
            label,
            remaining = permit.remaining,
            waited_ms = permit.waited_ms,
            "calling dependency"
        );

        let (value, report) = self.retry.execute(label, op).await?;
        if report.retried() {
            debug!(
                dependency = %self.name,
                label,
                calls = report.calls,
                "dependency call needed retries"
            );
        }
        Ok(value)
    }
}
