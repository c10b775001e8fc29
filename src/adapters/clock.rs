use crate::domain::ports::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Mutex;
use std::time::Duration;

/// Wall clock backed by tokio's timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

#[async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Simulated clock: `sleep` returns immediately and moves time forward.
/// Every requested sleep is recorded so callers can inspect backoff waits.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    sleeps: Mutex<Vec<Duration>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            sleeps: Mutex::new(Vec::new()),
        }
    }

    /// Starts at a whole minute so window arithmetic in tests is readable.
    pub fn at_epoch_ms(ms: i64) -> Self {
        let start = DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_else(Utc::now);
        Self::new(start)
    }

    pub fn advance(&self, duration: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        }
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn total_slept(&self) -> Duration {
        self.sleeps().into_iter().sum()
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::at_epoch_ms(1_700_000_040_000)
    }
}

#[async_trait]
impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map(|n| *n).unwrap_or_else(|p| *p.into_inner())
    }

    async fn sleep(&self, duration: Duration) {
        if let Ok(mut sleeps) = self.sleeps.lock() {
            sleeps.push(duration);
        }
        self.advance(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_manual_clock_sleep_advances_time() {
        let clock = ManualClock::at_epoch_ms(60_000);
        clock.sleep(Duration::from_millis(1_500)).await;
        clock.sleep(Duration::from_millis(500)).await;

        assert_eq!(clock.now_ms(), 62_000);
        assert_eq!(
            clock.sleeps(),
            vec![Duration::from_millis(1_500), Duration::from_millis(500)]
        );
        assert_eq!(clock.total_slept(), Duration::from_secs(2));
    }
}
