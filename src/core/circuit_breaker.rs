use crate::domain::model::{CircuitState, CircuitStatus};
use crate::domain::ports::{Clock, SharedCounterStore};
use crate::utils::error::Result;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_COOLDOWN: Duration = Duration::from_millis(60_000);

struct Keys {
    state: String,
    failures: String,
    opened_at: String,
    next_try_at: String,
}

impl Keys {
    fn new(name: &str) -> Self {
        let base = format!("circuit:{}", name);
        Self {
            state: format!("{}:state", base),
            failures: format!("{}:failures", base),
            opened_at: format!("{}:opened_at", base),
            next_try_at: format!("{}:next_try_at", base),
        }
    }

    fn all(&self) -> Vec<String> {
        vec![
            self.state.clone(),
            self.failures.clone(),
            self.opened_at.clone(),
            self.next_try_at.clone(),
        ]
    }
}

/// Outcomes this process has reported to the breaker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReportedOutcomes {
    pub successes: u64,
    pub failures: u64,
}

/// Circuit breaker whose state lives in the shared store, so every worker
/// calling the same dependency sees the same circuit.
///
/// The open to half-open move is a plain write. Several workers may see an
/// expired cooldown at once and all be let through as trial calls; the
/// first failure among them reopens the circuit.
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    cooldown: Duration,
    keys: Keys,
    store: Arc<dyn SharedCounterStore>,
    clock: Arc<dyn Clock>,
    successes: AtomicU64,
    failures: AtomicU64,
}

impl CircuitBreaker {
    pub fn new(
        name: impl Into<String>,
        failure_threshold: u32,
        cooldown: Duration,
        store: Arc<dyn SharedCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let name = name.into();
        Self {
            keys: Keys::new(&name),
            name,
            failure_threshold: failure_threshold.max(1),
            cooldown,
            store,
            clock,
            successes: AtomicU64::new(0),
            failures: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn reported(&self) -> ReportedOutcomes {
        ReportedOutcomes {
            successes: self.successes.load(Ordering::Relaxed),
            failures: self.failures.load(Ordering::Relaxed),
        }
    }

    pub async fn status(&self) -> Result<CircuitStatus> {
        let values = self.store.mget(&self.keys.all()).await?;
        let field = |i: usize| values.get(i).cloned().flatten();

        let state = field(0)
            .and_then(|raw| raw.parse::<CircuitState>().ok())
            .unwrap_or(CircuitState::Closed);
        Ok(CircuitStatus {
            state,
            failure_count: field(1).and_then(|raw| raw.parse().ok()).unwrap_or(0),
            opened_at_ms: field(2).and_then(|raw| raw.parse().ok()),
            next_try_at_ms: field(3).and_then(|raw| raw.parse().ok()),
        })
    }

    /// `false` means fast-fail: the circuit is open and cooling down.
    pub async fn can_proceed(&self) -> Result<bool> {
        let status = self.status().await?;
        match status.state {
            CircuitState::Closed | CircuitState::HalfOpen => Ok(true),
            CircuitState::Open => {
                let now = self.clock.now_ms();
                if status.next_try_at_ms.is_some_and(|at| now < at) {
                    return Ok(false);
                }
                self.store
                    .set(&self.keys.state, CircuitState::HalfOpen.as_str(), None)
                    .await?;
                info!(circuit = %self.name, "cooldown elapsed, circuit half-open");
                Ok(true)
            }
        }
    }

    pub async fn on_success(&self) -> Result<()> {
        self.successes.fetch_add(1, Ordering::Relaxed);
        let status = self.status().await?;
        match status.state {
            CircuitState::HalfOpen => {
                info!(circuit = %self.name, "trial call succeeded, circuit closed");
                self.reset().await
            }
            CircuitState::Closed if status.failure_count > 0 => {
                self.store.del(std::slice::from_ref(&self.keys.failures)).await
            }
            _ => Ok(()),
        }
    }

    pub async fn on_failure(&self) -> Result<()> {
        self.failures.fetch_add(1, Ordering::Relaxed);
        let status = self.status().await?;
        match status.state {
            CircuitState::HalfOpen => {
                warn!(circuit = %self.name, "trial call failed");
                self.open(status.failure_count.saturating_add(1)).await
            }
            CircuitState::Open => Ok(()),
            CircuitState::Closed => {
                let failures = self.store.incr(&self.keys.failures, None).await?;
                debug!(circuit = %self.name, failures, "failure recorded");
                if failures >= i64::from(self.failure_threshold) {
                    self.open(failures as u32).await
                } else {
                    Ok(())
                }
            }
        }
    }

    async fn open(&self, failures: u32) -> Result<()> {
        let now = self.clock.now_ms();
        let next_try_at = now + self.cooldown.as_millis() as i64;
        self.store
            .mset(
                &[
                    (self.keys.state.clone(), CircuitState::Open.as_str().to_string()),
                    (self.keys.failures.clone(), failures.to_string()),
                    (self.keys.opened_at.clone(), now.to_string()),
                    (self.keys.next_try_at.clone(), next_try_at.to_string()),
                ],
                None,
            )
            .await?;
        warn!(
            circuit = %self.name,
            failures,
            next_try_at_ms = next_try_at,
            "circuit opened"
        );
        Ok(())
    }

    pub async fn reset(&self) -> Result<()> {
        self.store.del(&self.keys.all()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::memory::MemoryCounterStore;

    fn breaker(threshold: u32) -> (CircuitBreaker, Arc<ManualClock>, Arc<MemoryCounterStore>) {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryCounterStore::with_clock(clock.clone()));
        let breaker = CircuitBreaker::new(
            "scraper",
            threshold,
            Duration::from_secs(60),
            store.clone(),
            clock.clone(),
        );
        (breaker, clock, store)
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_half_opens_after_cooldown() {
        let (breaker, clock, _) = breaker(3);

        for _ in 0..3 {
            assert!(breaker.can_proceed().await.unwrap());
            breaker.on_failure().await.unwrap();
        }
        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.next_try_at_ms, Some(clock.now_ms() + 60_000));
        assert!(!breaker.can_proceed().await.unwrap());

        clock.advance(Duration::from_millis(59_999));
        assert!(!breaker.can_proceed().await.unwrap());

        clock.advance(Duration::from_millis(1));
        assert!(breaker.can_proceed().await.unwrap());
        assert_eq!(breaker.status().await.unwrap().state, CircuitState::HalfOpen);
    }

    #[tokio::test]
    async fn test_half_open_success_closes_and_clears_failures() {
        let (breaker, clock, _) = breaker(2);
        breaker.on_failure().await.unwrap();
        breaker.on_failure().await.unwrap();
        clock.advance(Duration::from_secs(60));
        assert!(breaker.can_proceed().await.unwrap());

        breaker.on_success().await.unwrap();

        assert_eq!(breaker.status().await.unwrap(), CircuitStatus::default());
    }

    #[tokio::test]
    async fn test_half_open_failure_reopens_immediately() {
        let (breaker, clock, _) = breaker(5);
        for _ in 0..5 {
            breaker.on_failure().await.unwrap();
        }
        clock.advance(Duration::from_secs(61));
        assert!(breaker.can_proceed().await.unwrap());

        breaker.on_failure().await.unwrap();

        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Open);
        assert_eq!(status.next_try_at_ms, Some(clock.now_ms() + 60_000));
        assert!(!breaker.can_proceed().await.unwrap());
    }

    #[tokio::test]
    async fn test_success_in_closed_clears_partial_failures() {
        let (breaker, _, _) = breaker(3);
        breaker.on_failure().await.unwrap();
        breaker.on_failure().await.unwrap();
        breaker.on_success().await.unwrap();
        breaker.on_failure().await.unwrap();

        let status = breaker.status().await.unwrap();
        assert_eq!(status.state, CircuitState::Closed);
        assert_eq!(status.failure_count, 1);
        assert_eq!(
            breaker.reported(),
            ReportedOutcomes {
                successes: 1,
                failures: 3
            }
        );
    }

    #[tokio::test]
    async fn test_breakers_with_same_name_share_state() {
        let (first, clock, store) = breaker(1);
        let second = CircuitBreaker::new("scraper", 1, Duration::from_secs(60), store, clock);

        first.on_failure().await.unwrap();
        assert!(!second.can_proceed().await.unwrap());

        second.reset().await.unwrap();
        assert!(first.can_proceed().await.unwrap());
    }
}
