use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum number of characters kept from a remote response body.
pub const BODY_SNIPPET_LIMIT: usize = 300;

/// Failure of a single remote call, classified where the response is read.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RemoteError {
    #[error("transient remote error (status {status:?}): {body}")]
    Transient { status: Option<u16>, body: String },

    #[error("permanent remote error (status {status:?}): {body}")]
    Permanent { status: Option<u16>, body: String },

    #[error("network failure: {message}")]
    NetworkFailure { message: String },
}

impl RemoteError {
    /// Builds the variant from what the remote collaborator reported.
    ///
    /// An explicit transient flag wins over the status code. Without one,
    /// 429 and 5xx are transient, every other status is permanent, and a
    /// missing status means the request never got an answer.
    pub fn classify(status: Option<u16>, is_transient: Option<bool>, body: impl AsRef<str>) -> Self {
        let body = snippet(body.as_ref());
        match (status, is_transient) {
            (None, Some(false)) => RemoteError::Permanent { status: None, body },
            (None, _) => RemoteError::NetworkFailure { message: body },
            (Some(code), Some(true)) => RemoteError::Transient { status: Some(code), body },
            (Some(code), Some(false)) => RemoteError::Permanent { status: Some(code), body },
            (Some(code), None) if code == 429 || (500..=599).contains(&code) => {
                RemoteError::Transient { status: Some(code), body }
            }
            (Some(code), None) => RemoteError::Permanent { status: Some(code), body },
        }
    }

    pub fn network(message: impl AsRef<str>) -> Self {
        RemoteError::NetworkFailure {
            message: snippet(message.as_ref()),
        }
    }

    pub fn is_transient(&self) -> bool {
        !matches!(self, RemoteError::Permanent { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            RemoteError::Transient { status, .. } | RemoteError::Permanent { status, .. } => *status,
            RemoteError::NetworkFailure { .. } => None,
        }
    }

    pub fn body_snippet(&self) -> &str {
        match self {
            RemoteError::Transient { body, .. } | RemoteError::Permanent { body, .. } => body,
            RemoteError::NetworkFailure { message } => message,
        }
    }
}

fn snippet(text: &str) -> String {
    if text.chars().count() > BODY_SNIPPET_LIMIT {
        let mut cut: String = text.chars().take(BODY_SNIPPET_LIMIT).collect();
        cut.push('…');
        cut
    } else {
        text.to_string()
    }
}

#[derive(Error, Debug)]
pub enum HarvestError {
    #[error("Rate limit wait exceeded {max_wait_ms}ms for {label} (elapsed={elapsed_ms}ms, next_wait={next_wait_ms}ms)")]
    RateLimitTimeout {
        label: String,
        max_wait_ms: u64,
        elapsed_ms: u64,
        next_wait_ms: u64,
    },

    #[error("Circuit '{dependency}' is open until {next_try_at_ms}")]
    CircuitOpen {
        dependency: String,
        next_try_at_ms: i64,
    },

    #[error("Remote call failed: {0}")]
    Remote(#[from] RemoteError),

    #[error("Persistence error on table '{table}': {message}")]
    Persistence { table: String, message: String },

    #[error("Shared store error: {message}")]
    Store { message: String },

    #[error("Event bus error: {message}")]
    EventBus { message: String },

    #[error("Alert delivery failed: {message}")]
    Alert { message: String },

    #[error("HTTP transport error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Invalid value '{value}' for {field}: {reason}")]
    InvalidConfigValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required configuration: {field}")]
    MissingConfig { field: String },

    #[error("Extraction error: {message}")]
    Extraction { message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Throttling,
    Remote,
    Storage,
    Configuration,
    Delivery,
    Data,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ErrorSeverity {
    Low,
    Medium,
    High,
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorSeverity::Low => "low",
            ErrorSeverity::Medium => "medium",
            ErrorSeverity::High => "high",
            ErrorSeverity::Critical => "critical",
        };
        f.write_str(label)
    }
}

impl HarvestError {
    pub fn persistence(table: impl Into<String>, message: impl Into<String>) -> Self {
        HarvestError::Persistence {
            table: table.into(),
            message: message.into(),
        }
    }

    pub fn store(message: impl Into<String>) -> Self {
        HarvestError::Store {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        HarvestError::Config {
            message: message.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            HarvestError::RateLimitTimeout { .. } | HarvestError::CircuitOpen { .. } => {
                ErrorCategory::Throttling
            }
            HarvestError::Remote(_) | HarvestError::Http(_) => ErrorCategory::Remote,
            HarvestError::Persistence { .. } | HarvestError::Store { .. } | HarvestError::Io(_) => {
                ErrorCategory::Storage
            }
            HarvestError::Config { .. }
            | HarvestError::InvalidConfigValue { .. }
            | HarvestError::MissingConfig { .. } => ErrorCategory::Configuration,
            HarvestError::EventBus { .. } | HarvestError::Alert { .. } => ErrorCategory::Delivery,
            HarvestError::Serialization(_) | HarvestError::Extraction { .. } => ErrorCategory::Data,
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            HarvestError::Alert { .. } => ErrorSeverity::Low,
            HarvestError::RateLimitTimeout { .. } | HarvestError::CircuitOpen { .. } => {
                ErrorSeverity::Medium
            }
            HarvestError::Remote(e) if e.is_transient() => ErrorSeverity::Medium,
            HarvestError::Config { .. }
            | HarvestError::InvalidConfigValue { .. }
            | HarvestError::MissingConfig { .. } => ErrorSeverity::Critical,
            _ => ErrorSeverity::High,
        }
    }

    /// Whether a job-level retry by the step executor has a chance to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            HarvestError::Remote(e) => e.is_transient(),
            HarvestError::Config { .. }
            | HarvestError::InvalidConfigValue { .. }
            | HarvestError::MissingConfig { .. }
            | HarvestError::Serialization(_)
            | HarvestError::Extraction { .. } => false,
            _ => true,
        }
    }

    pub fn recovery_suggestion(&self) -> &'static str {
        match self.category() {
            ErrorCategory::Throttling => {
                "The upstream budget is exhausted or the circuit is open; the job will be retried later"
            }
            ErrorCategory::Remote => "Check the scraping API status and credentials",
            ErrorCategory::Storage => "Verify the database and cache are reachable",
            ErrorCategory::Configuration => "Fix the configuration file and restart",
            ErrorCategory::Delivery => "Check the event bus or alert webhook settings",
            ErrorCategory::Data => "Inspect the payload that triggered the job",
        }
    }

    pub fn user_friendly_message(&self) -> String {
        match self {
            HarvestError::RateLimitTimeout { label, .. } => {
                format!("Rate limit for '{}' did not free up in time", label)
            }
            HarvestError::CircuitOpen { dependency, .. } => {
                format!("'{}' is failing and temporarily disabled", dependency)
            }
            HarvestError::InvalidConfigValue { field, reason, .. } => {
                format!("Configuration field '{}' is invalid: {}", field, reason)
            }
            HarvestError::MissingConfig { field } => {
                format!("Configuration field '{}' is required", field)
            }
            other => other.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, HarvestError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_by_status() {
        assert!(matches!(
            RemoteError::classify(Some(503), None, "unavailable"),
            RemoteError::Transient { status: Some(503), .. }
        ));
        assert!(matches!(
            RemoteError::classify(Some(429), None, "slow down"),
            RemoteError::Transient { status: Some(429), .. }
        ));
        assert!(matches!(
            RemoteError::classify(Some(404), None, "missing"),
            RemoteError::Permanent { status: Some(404), .. }
        ));
        assert!(matches!(
            RemoteError::classify(None, None, "connection reset"),
            RemoteError::NetworkFailure { .. }
        ));
    }

    #[test]
    fn test_explicit_flag_overrides_status() {
        assert!(RemoteError::classify(Some(400), Some(true), "").is_transient());
        assert!(!RemoteError::classify(Some(502), Some(false), "").is_transient());
    }

    #[test]
    fn test_body_snippet_is_truncated() {
        let body = "x".repeat(1000);
        let err = RemoteError::classify(Some(500), None, &body);
        assert_eq!(err.body_snippet().chars().count(), BODY_SNIPPET_LIMIT + 1);
    }

    #[test]
    fn test_severity_and_retryability() {
        let timeout = HarvestError::RateLimitTimeout {
            label: "discovery".to_string(),
            max_wait_ms: 10,
            elapsed_ms: 0,
            next_wait_ms: 50,
        };
        assert_eq!(timeout.severity(), ErrorSeverity::Medium);
        assert!(timeout.is_retryable());

        let permanent = HarvestError::Remote(RemoteError::classify(Some(403), None, "forbidden"));
        assert_eq!(permanent.severity(), ErrorSeverity::High);
        assert!(!permanent.is_retryable());

        let missing = HarvestError::MissingConfig {
            field: "scraper.base_url".to_string(),
        };
        assert_eq!(missing.category(), ErrorCategory::Configuration);
        assert_eq!(missing.severity(), ErrorSeverity::Critical);
    }
}
