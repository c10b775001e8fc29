use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use uuid::Uuid;

pub mod tables {
    pub const VIDEO: &str = "video";
    pub const COMMENT: &str = "comment";
    pub const DOMAIN: &str = "domain";
    pub const DOMAIN_MENTION: &str = "domain_mention";
    pub const JOB_STATUS: &str = "job_status";
    pub const JOB_STEPS: &str = "job_steps";
    /// Rows each job created, so a retried job still knows them as its own.
    pub const JOB_ITEMS: &str = "job_items";
    pub const DEAD_LETTER_QUEUE: &str = "dead_letter_queue";
}

pub mod events {
    pub const VIDEO_DISCOVERY: &str = "tiktok/video.discovery.scheduled";
    pub const COMMENT_HARVEST: &str = "tiktok/comment.harvest";
    pub const DOMAIN_EXTRACT: &str = "tiktok/domain.extract";
    pub const DOMAIN_HTTP_ENRICH: &str = "domain/http.enrich.scheduled";
}

/// Shape of one distributed token bucket. The counters themselves live in
/// the shared store under `(scope, identifier)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitBucket {
    pub scope: String,
    pub capacity: u64,
    pub refill_per_window: u64,
    pub window: Duration,
    pub max_wait: Option<Duration>,
}

impl RateLimitBucket {
    pub fn per_minute(scope: impl Into<String>, tokens: u64) -> Self {
        Self {
            scope: scope.into(),
            capacity: tokens,
            refill_per_window: tokens,
            window: Duration::from_secs(60),
            max_wait: None,
        }
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcquireOutcome {
    pub remaining: u64,
    pub limit: u64,
    pub waited_ms: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half-open",
        }
    }
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CircuitState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "closed" => Ok(CircuitState::Closed),
            "open" => Ok(CircuitState::Open),
            "half-open" => Ok(CircuitState::HalfOpen),
            other => Err(format!("unknown circuit state '{}'", other)),
        }
    }
}

/// Snapshot of one dependency's breaker as read from the shared store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub opened_at_ms: Option<i64>,
    pub next_try_at_ms: Option<i64>,
}

impl Default for CircuitStatus {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at_ms: None,
            next_try_at_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Transient,
    Permanent,
}

/// One failed attempt inside a retry loop. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryAttempt {
    pub attempt_number: u32,
    pub classification: Classification,
    /// Backoff slept after this attempt, `None` when the loop gave up.
    pub wait_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    VideoDiscovery,
    CommentHarvest,
    DomainExtraction,
    HttpEnrichment,
}

impl JobType {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobType::VideoDiscovery => "video_discovery",
            JobType::CommentHarvest => "comment_harvest",
            JobType::DomainExtraction => "domain_extraction",
            JobType::HttpEnrichment => "http_enrichment",
        }
    }

    /// Event that triggers this job type.
    pub fn event_name(&self) -> &'static str {
        match self {
            JobType::VideoDiscovery => events::VIDEO_DISCOVERY,
            JobType::CommentHarvest => events::COMMENT_HARVEST,
            JobType::DomainExtraction => events::DOMAIN_EXTRACT,
            JobType::HttpEnrichment => events::DOMAIN_HTTP_ENRICH,
        }
    }
}

impl fmt::Display for JobType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Observability record for one job invocation. Never read back for
/// coordination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobExecution {
    pub job_id: String,
    pub job_type: JobType,
    pub status: JobStatus,
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub correlation_id: String,
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeadLetterStatus {
    Pending,
    RetryScheduled,
    Processed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub id: Uuid,
    pub job_id: String,
    pub original_event_name: String,
    pub original_payload: serde_json::Value,
    pub attempt_count: u32,
    pub last_error: String,
    pub status: DeadLetterStatus,
    pub created_at: DateTime<Utc>,
}

/// Registrable split of a host, e.g. `sub.example.co.uk` becomes
/// `example.co.uk` / `co.uk` / `sub`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NormalizedDomain {
    pub domain_name: String,
    pub tld: String,
    pub subdomain: Option<String>,
}

impl NormalizedDomain {
    /// Full host including any subdomain.
    pub fn host(&self) -> String {
        match &self.subdomain {
            Some(sub) => format!("{}.{}", sub, self.domain_name),
            None => self.domain_name.clone(),
        }
    }
}

/// A normalized domain together with the text span it was found in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainMention {
    pub domain: NormalizedDomain,
    pub mention_text: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KillSwitchState {
    pub active: bool,
    pub reason: Option<String>,
    pub requested_by: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// Fire-and-forget event for the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEvent {
    pub name: String,
    pub payload: serde_json::Value,
}

impl OutboundEvent {
    pub fn new(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }
}

/// Envelope handed over by the step executor. `job_id` is stable across
/// re-deliveries of the same logical job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobInvocation<E> {
    pub job_id: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub event: E,
}

impl<E> JobInvocation<E> {
    pub fn new(job_id: impl Into<String>, event: E) -> Self {
        Self {
            job_id: job_id.into(),
            attempt: 1,
            max_attempts: 1,
            event,
        }
    }

    pub fn with_attempt(mut self, attempt: u32, max_attempts: u32) -> Self {
        self.attempt = attempt;
        self.max_attempts = max_attempts;
        self
    }

    pub fn is_final_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSummary {
    pub job_id: String,
    pub job_type: JobType,
    pub correlation_id: String,
    pub items_fetched: usize,
    pub items_new: usize,
    pub events_sent: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum JobOutcome {
    Completed(JobSummary),
    Skipped { job_id: String, reason: String },
}

impl JobOutcome {
    pub fn is_skipped(&self) -> bool {
        matches!(self, JobOutcome::Skipped { .. })
    }
}
