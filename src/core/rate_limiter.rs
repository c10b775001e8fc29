use crate::domain::model::{AcquireOutcome, RateLimitBucket};
use crate::domain::ports::{Clock, SharedCounterStore};
use crate::utils::error::{HarvestError, Result};
use rand::Rng;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const JITTER_MIN_MS: u64 = 50;
const JITTER_MAX_MS: u64 = 250;

/// Resolution of the rolling window. Grants are counted per slot.
const SLOTS_PER_WINDOW: i64 = 60;

enum Decision {
    Granted { remaining: u64, limit: u64 },
    Denied { retry_at_ms: i64 },
}

/// Distributed sliding-window token bucket over a [`SharedCounterStore`].
///
/// The window is split into slots and every grant is counted in the slot it
/// happened in with an atomic `incr`, so every worker sharing the store
/// draws from the same budget without a lock. A caller first claims its
/// slot, then sums the slots covering the last window. If the sum is over
/// `capacity` the claim is handed back and the caller waits for the oldest
/// counted slot to age out. Tokens come back as time passes, with no
/// refill timer.
///
/// The slots summed always span a little more than one window, so grants
/// in any rolling window never exceed `capacity`. When `refill_per_window`
/// is below `capacity`, grants over any two consecutive windows are also
/// held to `capacity + refill_per_window`: a full burst is followed by the
/// steady refill rate.
pub struct TokenBucketLimiter {
    bucket: RateLimitBucket,
    store: Arc<dyn SharedCounterStore>,
    clock: Arc<dyn Clock>,
    acquisitions: AtomicU64,
    granted: AtomicU64,
}

impl TokenBucketLimiter {
    pub fn new(
        bucket: RateLimitBucket,
        store: Arc<dyn SharedCounterStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            bucket,
            store,
            clock,
            acquisitions: AtomicU64::new(0),
            granted: AtomicU64::new(0),
        }
    }

    pub fn bucket(&self) -> &RateLimitBucket {
        &self.bucket
    }

    /// Number of `acquire` calls made through this instance.
    pub fn acquisitions(&self) -> u64 {
        self.acquisitions.load(Ordering::Relaxed)
    }

    /// Number of tokens this instance was granted.
    pub fn granted(&self) -> u64 {
        self.granted.load(Ordering::Relaxed)
    }

    fn slot_ms(&self) -> i64 {
        let window_ms = (self.bucket.window.as_millis() as i64).max(1);
        (window_ms / SLOTS_PER_WINDOW).max(1)
    }

    /// Slots needed to cover one window.
    fn slots_per_window(&self) -> i64 {
        let window_ms = (self.bucket.window.as_millis() as i64).max(1);
        let slot_ms = self.slot_ms();
        (window_ms + slot_ms - 1) / slot_ms
    }

    fn refill_limited(&self) -> bool {
        self.bucket.refill_per_window < self.bucket.capacity
    }

    fn key(&self, identifier: &str, slot: i64) -> String {
        format!("ratelimit:{}:{}:{}", self.bucket.scope, identifier, slot)
    }

    async fn try_take(&self, identifier: &str) -> Result<Decision> {
        let slot_ms = self.slot_ms();
        let per_window = self.slots_per_window();
        let current = self.clock.now_ms().div_euclid(slot_ms);

        // One extra slot on each span keeps the sums a superset of the
        // rolling windows they stand for.
        let span = if self.refill_limited() {
            2 * per_window + 1
        } else {
            per_window + 1
        };
        let ttl = Duration::from_millis(((span + 1) * slot_ms) as u64);
        let slot_key = self.key(identifier, current);
        self.store.incr(&slot_key, Some(ttl)).await?;

        let first = current - span + 1;
        let keys: Vec<String> = (first..=current).map(|s| self.key(identifier, s)).collect();
        let counts: Vec<u64> = self
            .store
            .mget(&keys)
            .await?
            .into_iter()
            .map(|raw| raw.and_then(|v| v.parse::<i64>().ok()).unwrap_or(0).max(0) as u64)
            .collect();

        let recent_from = (current - per_window - first) as usize;
        let recent: u64 = counts[recent_from..].iter().sum();
        let capacity = self.bucket.capacity;
        let mut remaining = capacity.saturating_sub(recent);
        let mut retry_at_ms = None;

        if recent > capacity {
            retry_at_ms = Some(release_at(&counts[recent_from..], current, slot_ms));
        }
        if self.refill_limited() {
            let long_cap = capacity + self.bucket.refill_per_window;
            let total: u64 = counts.iter().sum();
            if total > long_cap {
                let long_retry = release_at(&counts, current, slot_ms);
                retry_at_ms = Some(retry_at_ms.map_or(long_retry, |at: i64| at.max(long_retry)));
            }
            remaining = remaining.min(long_cap.saturating_sub(total));
        }

        let Some(retry_at_ms) = retry_at_ms else {
            return Ok(Decision::Granted {
                remaining,
                limit: capacity,
            });
        };

        // Hand the claim back. If that fails the slot stays over-counted,
        // which only denies more.
        if let Err(e) = self.store.incr_by(&slot_key, -1, Some(ttl)).await {
            warn!(key = %slot_key, error = %e, "failed to release rate limit claim");
        }
        Ok(Decision::Denied { retry_at_ms })
    }

    /// Blocks until a token for `identifier` is granted.
    ///
    /// Fails with [`HarvestError::RateLimitTimeout`] instead of sleeping when
    /// the next wait would push the total past the bucket's `max_wait`.
    pub async fn acquire(&self, identifier: &str, label: &str) -> Result<AcquireOutcome> {
        self.acquisitions.fetch_add(1, Ordering::Relaxed);
        let started = self.clock.now_ms();

        loop {
            match self.try_take(identifier).await? {
                Decision::Granted { remaining, limit } => {
                    self.granted.fetch_add(1, Ordering::Relaxed);
                    let waited_ms = (self.clock.now_ms() - started).max(0) as u64;
                    debug!(
                        scope = %self.bucket.scope,
                        identifier,
                        label,
                        remaining,
                        waited_ms,
                        "rate limit token granted"
                    );
                    return Ok(AcquireOutcome {
                        remaining,
                        limit,
                        waited_ms,
                    });
                }
                Decision::Denied { retry_at_ms } => {
                    let now = self.clock.now_ms();
                    let jitter: u64 = rand::rng().random_range(JITTER_MIN_MS..=JITTER_MAX_MS);
                    let wait_ms = (retry_at_ms - now).max(0) as u64 + jitter;
                    let elapsed_ms = (now - started).max(0) as u64;

                    if let Some(max_wait) = self.bucket.max_wait {
                        let max_wait_ms = max_wait.as_millis() as u64;
                        if elapsed_ms + wait_ms > max_wait_ms {
                            return Err(HarvestError::RateLimitTimeout {
                                label: label.to_string(),
                                max_wait_ms,
                                elapsed_ms,
                                next_wait_ms: wait_ms,
                            });
                        }
                    }

                    info!(
                        scope = %self.bucket.scope,
                        identifier,
                        label,
                        wait_ms,
                        "rate limited, waiting for a token to free up"
                    );
                    self.clock.sleep(Duration::from_millis(wait_ms)).await;
                }
            }
        }
    }
}

/// Start of the slot in which the oldest counted grant in `counts` stops
/// being summed. `counts` ends at slot `current`.
fn release_at(counts: &[u64], current: i64, slot_ms: i64) -> i64 {
    let oldest = counts.iter().position(|&n| n > 0).unwrap_or(counts.len() - 1);
    (current + oldest as i64 + 1) * slot_ms
}
