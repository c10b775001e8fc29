use crate::app::jobs::discovery::{DiscoverySettings, DEFAULT_KEYWORDS};
use crate::core::circuit_breaker::{DEFAULT_COOLDOWN, DEFAULT_FAILURE_THRESHOLD};
use crate::core::retry::RetryPolicy;
use crate::domain::model::RateLimitBucket;
use crate::utils::error::{HarvestError, Result};
use crate::utils::validation::{
    validate_http_url, validate_non_empty_string, validate_path, validate_positive_number,
    validate_range, validate_redis_url, validate_required_field, Validate,
};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

/// Tokens per minute for a dependency without its own `[rate_limits.*]` table.
pub const DEFAULT_TOKENS_PER_MINUTE: u64 = 30;

static ENV_VAR_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("env var pattern should compile"));

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HarvestConfig {
    pub scraper: Option<ScraperConfig>,
    #[serde(default)]
    pub circuit: CircuitConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitConfig>,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub alerts: AlertsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScraperConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_sticky_minutes")]
    pub sticky_minutes: u64,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_sticky_minutes() -> u64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    pub failure_threshold: u32,
    pub cooldown_ms: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            cooldown_ms: DEFAULT_COOLDOWN.as_millis() as u64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 10_000,
            jitter_ms: 250,
            max_attempts: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub capacity: u64,
    /// Defaults to `capacity`.
    pub refill_per_window: Option<u64>,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
    pub max_wait_ms: Option<u64>,
}

fn default_window_ms() -> u64 {
    60_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JobsConfig {
    pub max_job_attempts: u32,
    pub discovery_limit: u32,
    pub discovery_region: String,
    pub discovery_content_type: String,
    pub discovery_keywords: Vec<String>,
    pub comment_max_pages: u32,
    /// Per-request timeout when checking advertised sites.
    pub http_check_timeout_seconds: u64,
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_job_attempts: 3,
            discovery_limit: 50,
            discovery_region: "US".to_string(),
            discovery_content_type: "all".to_string(),
            discovery_keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            comment_max_pages: 2,
            http_check_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub data_dir: String,
    pub redis_url: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: "./data".to_string(),
            redis_url: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AlertsConfig {
    pub enabled: bool,
    pub slack_webhook_url: Option<String>,
}

impl HarvestConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content);

        toml::from_str(&processed_content).map_err(|e| HarvestError::InvalidConfigValue {
            field: "toml_parsing".to_string(),
            value: String::new(),
            reason: format!("TOML parsing error: {}", e),
        })
    }

    /// Replaces `${VAR}` with the environment value. Unset variables are
    /// left as written so validation can point at them.
    fn substitute_env_vars(content: &str) -> String {
        ENV_VAR_PATTERN
            .replace_all(content, |caps: &regex::Captures| {
                let var_name = &caps[1];
                std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
            })
            .into_owned()
    }

    pub fn validate_config(&self) -> Result<()> {
        if let Some(scraper) = &self.scraper {
            validate_http_url("scraper.base_url", &scraper.base_url)?;
            let api_key = validate_required_field("scraper.api_key", &scraper.api_key)?;
            validate_non_empty_string("scraper.api_key", api_key)?;
            if api_key.starts_with("${") {
                return Err(HarvestError::InvalidConfigValue {
                    field: "scraper.api_key".to_string(),
                    value: api_key.clone(),
                    reason: "Environment variable is not set".to_string(),
                });
            }
            validate_range("scraper.timeout_seconds", scraper.timeout_seconds, 1, 300)?;
            validate_positive_number("scraper.sticky_minutes", scraper.sticky_minutes, 1)?;
        }

        validate_range("circuit.failure_threshold", self.circuit.failure_threshold, 1, 100)?;
        validate_positive_number("circuit.cooldown_ms", self.circuit.cooldown_ms, 1)?;

        validate_range("retry.max_attempts", self.retry.max_attempts, 1, 20)?;
        validate_positive_number("retry.base_delay_ms", self.retry.base_delay_ms, 1)?;
        validate_positive_number(
            "retry.max_delay_ms",
            self.retry.max_delay_ms,
            self.retry.base_delay_ms,
        )?;

        for (dependency, limit) in &self.rate_limits {
            let field = format!("rate_limits.{}", dependency);
            validate_positive_number(&format!("{}.capacity", field), limit.capacity, 1)?;
            if let Some(refill) = limit.refill_per_window {
                validate_range(&format!("{}.refill_per_window", field), refill, 1, limit.capacity)?;
            }
            validate_positive_number(&format!("{}.window_ms", field), limit.window_ms, 1)?;
        }

        validate_positive_number("jobs.max_job_attempts", self.jobs.max_job_attempts, 1)?;
        validate_range("jobs.discovery_limit", self.jobs.discovery_limit, 1, 500)?;
        validate_non_empty_string("jobs.discovery_region", &self.jobs.discovery_region)?;
        validate_positive_number("jobs.comment_max_pages", self.jobs.comment_max_pages, 1)?;
        validate_range(
            "jobs.http_check_timeout_seconds",
            self.jobs.http_check_timeout_seconds,
            1,
            60,
        )?;

        validate_path("store.data_dir", &self.store.data_dir)?;
        if let Some(redis_url) = &self.store.redis_url {
            validate_redis_url("store.redis_url", redis_url)?;
        }

        if self.alerts.enabled {
            let url = validate_required_field("alerts.slack_webhook_url", &self.alerts.slack_webhook_url)?;
            validate_http_url("alerts.slack_webhook_url", url)?;
        }

        Ok(())
    }

    /// Scraper settings, required by the jobs that call the remote API.
    pub fn scraper(&self) -> Result<&ScraperConfig> {
        validate_required_field("scraper", &self.scraper)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            jitter: Duration::from_millis(self.retry.jitter_ms),
        }
    }

    pub fn circuit_cooldown(&self) -> Duration {
        Duration::from_millis(self.circuit.cooldown_ms)
    }

    pub fn rate_limit_bucket(&self, dependency: &str) -> RateLimitBucket {
        match self.rate_limits.get(dependency) {
            Some(limit) => RateLimitBucket {
                scope: dependency.to_string(),
                capacity: limit.capacity,
                refill_per_window: limit.refill_per_window.unwrap_or(limit.capacity),
                window: Duration::from_millis(limit.window_ms),
                max_wait: limit.max_wait_ms.map(Duration::from_millis),
            },
            None => RateLimitBucket::per_minute(dependency, DEFAULT_TOKENS_PER_MINUTE),
        }
    }

    pub fn discovery_settings(&self) -> DiscoverySettings {
        DiscoverySettings {
            region: self.jobs.discovery_region.clone(),
            keywords: self.jobs.discovery_keywords.clone(),
            limit: self.jobs.discovery_limit,
            content_type: self.jobs.discovery_content_type.clone(),
            comment_max_pages: self.jobs.comment_max_pages,
        }
    }
}

impl Validate for HarvestConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}
