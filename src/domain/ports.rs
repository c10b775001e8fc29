use crate::core::gateway::DependencyGateway;
use crate::domain::model::{JobType, OutboundEvent};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Duration;

/// Time source. Injected so limiter, breaker and backoff can run on
/// simulated time.
#[async_trait]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    fn now_ms(&self) -> i64 {
        self.now().timestamp_millis()
    }

    async fn sleep(&self, duration: Duration);
}

/// Atomic, TTL-capable key/value store reachable from every worker.
#[async_trait]
pub trait SharedCounterStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()>;

    /// Atomically adds `delta` to `key` and returns the new value. `ttl`
    /// only applies when the call creates the key.
    async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64>;

    async fn incr(&self, key: &str, ttl: Option<Duration>) -> Result<i64> {
        self.incr_by(key, 1, ttl).await
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>>;

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> Result<()>;

    async fn del(&self, keys: &[String]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    pub fn is_new(&self) -> bool {
        matches!(self, UpsertOutcome::Inserted)
    }
}

#[async_trait]
pub trait PersistentStore: Send + Sync {
    /// Inserts `row`, or merges it into the row sharing the same values
    /// for `conflict_key`.
    async fn upsert(
        &self,
        table: &str,
        row: serde_json::Value,
        conflict_key: &[&str],
    ) -> Result<UpsertOutcome>;

    /// Looks a row up by its joined conflict key (see [`conflict_key_of`]).
    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>>;

    async fn count(&self, table: &str) -> Result<usize>;
}

/// Joins the conflict columns of `row` into a single lookup key.
pub fn conflict_key_of(table: &str, row: &serde_json::Value, columns: &[&str]) -> Result<String> {
    if columns.is_empty() {
        return Err(HarvestError::persistence(table, "conflict key has no columns"));
    }
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        let value = row.get(*column).ok_or_else(|| {
            HarvestError::persistence(table, format!("row is missing conflict column '{}'", column))
        })?;
        let part = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => {
                return Err(HarvestError::persistence(
                    table,
                    format!("conflict column '{}' is null", column),
                ))
            }
            other => other.to_string(),
        };
        parts.push(part);
    }
    Ok(parts.join("|"))
}

#[async_trait]
pub trait EventBus: Send + Sync {
    async fn send(&self, event: OutboundEvent) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Alert {
    pub title: String,
    pub message: String,
    pub details: Option<serde_json::Value>,
}

#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn notify(&self, alert: &Alert) -> Result<()>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallOptions {
    pub sticky: bool,
    pub session_id: Option<String>,
    pub idempotency_key: Option<String>,
}

/// Scraping/search API. Errors are already classified at this boundary.
#[async_trait]
pub trait ScraperApi: Send + Sync {
    async fn call(
        &self,
        tool: &str,
        params: serde_json::Value,
        options: &CallOptions,
    ) -> std::result::Result<serde_json::Value, crate::utils::error::RemoteError>;
}

/// What a site answered to a reachability check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteResponse {
    pub status: u16,
    pub server: Option<String>,
    /// `HEAD`, or `GET` when the site refused HEAD.
    pub method: String,
}

/// Reachability checks against advertised sites.
#[async_trait]
pub trait SiteChecker: Send + Sync {
    /// Whether `base_url/robots.txt` disallows `/` for every user agent.
    /// A missing or unreadable file allows.
    async fn robots_disallow_all(&self, base_url: &str) -> bool;

    /// HEAD `url`, retried as GET when the site answers 405.
    async fn check(&self, url: &str) -> std::result::Result<SiteResponse, crate::utils::error::RemoteError>;
}

/// One job type: what to fetch, how to persist it idempotently and which
/// events to emit for newly stored items.
#[async_trait]
pub trait JobHandler: Send + Sync {
    type Event: Serialize + DeserializeOwned + Send + Sync;
    type Item: Serialize + DeserializeOwned + Clone + Send + Sync;

    fn job_type(&self) -> JobType;

    /// Upstream dependency whose limiter and breaker guard `fetch`.
    fn dependency(&self) -> Option<&str>;

    async fn fetch(
        &self,
        event: &Self::Event,
        gateway: Option<&DependencyGateway>,
    ) -> Result<Vec<Self::Item>>;

    /// Upserts `items` and returns the ones whose upsert reported
    /// [`UpsertOutcome::Inserted`]. The orchestrator passes a job-scoped
    /// store, so rows a failed earlier attempt of the same job created still
    /// count as inserted.
    async fn persist(
        &self,
        store: &dyn PersistentStore,
        event: &Self::Event,
        items: &[Self::Item],
    ) -> Result<Vec<Self::Item>>;

    fn fan_out(&self, event: &Self::Event, new_items: &[Self::Item]) -> Vec<OutboundEvent>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conflict_key_joins_columns() {
        let row = json!({"domain_name": "example.com", "comment_id": "c1", "n": 3});
        assert_eq!(
            conflict_key_of("domain_mention", &row, &["domain_name", "comment_id"]).unwrap(),
            "example.com|c1"
        );
        assert_eq!(conflict_key_of("t", &row, &["n"]).unwrap(), "3");
    }

    #[test]
    fn test_conflict_key_requires_columns() {
        let row = json!({"video_id": null});
        assert!(conflict_key_of("video", &row, &["video_id"]).is_err());
        assert!(conflict_key_of("video", &row, &["url"]).is_err());
        assert!(conflict_key_of("video", &row, &[]).is_err());
    }
}
