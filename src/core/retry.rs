use crate::core::circuit_breaker::CircuitBreaker;
use crate::domain::model::{Classification, RetryAttempt};
use crate::domain::ports::Clock;
use crate::utils::best_effort::best_effort;
use crate::utils::error::{HarvestError, RemoteError, Result};
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Backoff schedule for a single remote call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_millis(10_000),
            jitter: Duration::from_millis(250),
        }
    }
}

impl RetryPolicy {
    /// Wait before the next attempt once `failures` attempts have failed,
    /// jitter excluded: `min(max_delay, base_delay * 2^(failures - 1))`.
    pub fn backoff(&self, failures: u32) -> Duration {
        let exponent = failures.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    fn jitter(&self) -> Duration {
        let max = self.jitter.as_millis() as u64;
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::rng().random_range(0..=max))
    }
}

/// Failed attempts of one `execute` call, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryReport {
    pub calls: u32,
    pub attempts: Vec<RetryAttempt>,
}

impl RetryReport {
    pub fn retried(&self) -> bool {
        self.calls > 1
    }
}

/// Runs one remote operation with classification, backoff and breaker
/// bookkeeping.
pub struct RetryController {
    policy: RetryPolicy,
    breaker: Option<Arc<CircuitBreaker>>,
    clock: Arc<dyn Clock>,
}

impl RetryController {
    pub fn new(policy: RetryPolicy, clock: Arc<dyn Clock>) -> Self {
        Self {
            policy,
            breaker: None,
            clock,
        }
    }

    pub fn with_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.breaker.as_ref()
    }

    async fn ensure_circuit_allows(&self) -> Result<()> {
        let Some(breaker) = &self.breaker else {
            return Ok(());
        };
        if breaker.can_proceed().await? {
            return Ok(());
        }
        let status = breaker.status().await?;
        Err(HarvestError::CircuitOpen {
            dependency: breaker.name().to_string(),
            next_try_at_ms: status.next_try_at_ms.unwrap_or_else(|| self.clock.now_ms()),
        })
    }

    /// Calls `op` until it succeeds, fails permanently or runs out of
    /// attempts. The breaker hears about every outcome; a failed breaker
    /// write is logged and never replaces the call's own result.
    pub async fn execute<T, F, Fut>(&self, label: &str, mut op: F) -> Result<(T, RetryReport)>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = std::result::Result<T, RemoteError>> + Send,
        T: Send,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut report = RetryReport::default();
        let mut last_error: Option<RemoteError> = None;

        loop {
            if let Err(e) = self.ensure_circuit_allows().await {
                return Err(stop_on_open_circuit(label, e, last_error.take(), report.calls));
            }
            report.calls += 1;
            let attempt = report.calls;

            let error = match op().await {
                Ok(value) => {
                    if let Some(breaker) = &self.breaker {
                        best_effort("circuit.on_success", breaker.on_success()).await;
                    }
                    if report.retried() {
                        debug!(label, attempts = attempt, "call succeeded after retry");
                    }
                    return Ok((value, report));
                }
                Err(error) => error,
            };

            if let Some(breaker) = &self.breaker {
                best_effort("circuit.on_failure", breaker.on_failure()).await;
            }

            let classification = if error.is_transient() {
                Classification::Transient
            } else {
                Classification::Permanent
            };

            if classification == Classification::Permanent || attempt >= max_attempts {
                report.attempts.push(RetryAttempt {
                    attempt_number: attempt,
                    classification,
                    wait_ms: None,
                });
                warn!(
                    label,
                    attempt,
                    ?classification,
                    status = ?error.status(),
                    error = %error,
                    "giving up on remote call"
                );
                return Err(HarvestError::Remote(error));
            }

            let wait = self.policy.backoff(attempt) + self.policy.jitter();
            let wait_ms = wait.as_millis() as u64;
            report.attempts.push(RetryAttempt {
                attempt_number: attempt,
                classification,
                wait_ms: Some(wait_ms),
            });
            warn!(
                label,
                attempt,
                wait_ms,
                status = ?error.status(),
                error = %error,
                "transient failure, backing off"
            );
            last_error = Some(error);
            self.clock.sleep(wait).await;
        }
    }
}

/// A breaker that opens after this call already failed reports the call's
/// own last failure, not the breaker state.
fn stop_on_open_circuit(
    label: &str,
    error: HarvestError,
    last_error: Option<RemoteError>,
    calls: u32,
) -> HarvestError {
    match (error, last_error) {
        (HarvestError::CircuitOpen { dependency, .. }, Some(last)) => {
            warn!(
                label,
                attempts = calls,
                %dependency,
                error = %last,
                "circuit opened while retrying, giving up"
            );
            HarvestError::Remote(last)
        }
        (error, _) => error,
    }
}
