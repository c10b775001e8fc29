use crate::core::gateway::DependencyGateway;
use crate::domain::model::{tables, JobType, OutboundEvent};
use crate::domain::ports::{Clock, JobHandler, PersistentStore, SiteChecker};
use crate::utils::error::{HarvestError, RemoteError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DEPENDENCY: &str = "http_enrich";
pub const CHECK_LABEL: &str = "http_check";
pub const REASON_ROBOTS: &str = "robots_disallow_root";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpEnrichmentPayload {
    pub domain: String,
}

/// Outcome of checking one domain, stored under `metadata.http`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpCheck {
    pub domain: String,
    pub reachable: bool,
    pub status: Option<u16>,
    pub server: Option<String>,
    pub method: Option<String>,
    pub url: String,
    pub reason: Option<String>,
    pub checked_at: String,
}

impl HttpCheck {
    fn metadata(&self) -> Value {
        let mut http = json!({
            "reachable": self.reachable,
            "status": self.status,
            "server": self.server,
            "method": self.method,
            "url": self.url,
            "checked_at": self.checked_at,
        });
        if let Some(reason) = &self.reason {
            http["reason"] = json!(reason);
        }
        http
    }
}

fn already_checked(row: &Value) -> bool {
    row.pointer("/metadata/http/checked_at")
        .is_some_and(|checked_at| !checked_at.is_null())
}

/// Checks whether a newly found domain answers over HTTP. Domains whose
/// robots.txt disallows everything are recorded without being requested.
pub struct HttpEnrichmentJob {
    checker: Arc<dyn SiteChecker>,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
}

impl HttpEnrichmentJob {
    pub fn new(
        checker: Arc<dyn SiteChecker>,
        store: Arc<dyn PersistentStore>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            checker,
            store,
            clock,
        }
    }

    /// HTTPS first, then plain HTTP. A site that answers neither is
    /// recorded as unreachable rather than raised.
    async fn inspect(&self, domain: &str) -> std::result::Result<HttpCheck, RemoteError> {
        let checked_at = self.clock.now().to_rfc3339();
        let https = format!("https://{}", domain);

        if self.checker.robots_disallow_all(&https).await {
            debug!(domain, "robots.txt disallows everything, not checking");
            return Ok(HttpCheck {
                domain: domain.to_string(),
                reachable: false,
                status: None,
                server: None,
                method: None,
                url: https,
                reason: Some(REASON_ROBOTS.to_string()),
                checked_at,
            });
        }

        let mut url = https;
        let mut answer = self.checker.check(&url).await;
        if let Err(e) = &answer {
            debug!(domain, error = %e, "https check failed, trying http");
            url = format!("http://{}", domain);
            answer = self.checker.check(&url).await;
        }

        let check = match answer {
            Ok(response) => HttpCheck {
                domain: domain.to_string(),
                reachable: (1..600).contains(&response.status),
                status: Some(response.status),
                server: response.server,
                method: Some(response.method),
                url,
                reason: None,
                checked_at,
            },
            Err(e) => {
                debug!(domain, error = %e, "site unreachable");
                HttpCheck {
                    domain: domain.to_string(),
                    reachable: false,
                    status: None,
                    server: None,
                    method: None,
                    url,
                    reason: None,
                    checked_at,
                }
            }
        };
        Ok(check)
    }
}

#[async_trait]
impl JobHandler for HttpEnrichmentJob {
    type Event = HttpEnrichmentPayload;
    type Item = HttpCheck;

    fn job_type(&self) -> JobType {
        JobType::HttpEnrichment
    }

    fn dependency(&self) -> Option<&str> {
        Some(DEPENDENCY)
    }

    async fn fetch(
        &self,
        event: &HttpEnrichmentPayload,
        gateway: Option<&DependencyGateway>,
    ) -> Result<Vec<HttpCheck>> {
        let gateway = gateway.ok_or_else(|| {
            HarvestError::config(format!("http enrichment requires the '{}' gateway", DEPENDENCY))
        })?;
        let domain = event.domain.trim().to_ascii_lowercase();

        match self.store.fetch(tables::DOMAIN, &domain).await? {
            None => {
                warn!(domain = %domain, "domain is not stored, nothing to enrich");
                return Ok(Vec::new());
            }
            Some(row) if already_checked(&row) => {
                debug!(domain = %domain, "domain already checked");
                return Ok(Vec::new());
            }
            Some(_) => {}
        }

        let check = gateway.call(CHECK_LABEL, || self.inspect(&domain)).await?;
        info!(
            domain = %domain,
            reachable = check.reachable,
            status = ?check.status,
            "domain checked"
        );
        Ok(vec![check])
    }

    /// Merges each check into the domain's metadata. Every written check is
    /// returned, since enrichment only ever updates existing domains.
    async fn persist(
        &self,
        store: &dyn PersistentStore,
        _event: &HttpEnrichmentPayload,
        items: &[HttpCheck],
    ) -> Result<Vec<HttpCheck>> {
        let mut written = Vec::with_capacity(items.len());
        for check in items {
            let mut metadata = store
                .fetch(tables::DOMAIN, &check.domain)
                .await?
                .and_then(|mut row| row.get_mut("metadata").map(Value::take))
                .filter(Value::is_object)
                .unwrap_or_else(|| json!({}));
            metadata["http"] = check.metadata();

            let mut row = json!({"domain_name": check.domain, "metadata": metadata});
            if check.reachable {
                row["verified_at"] = json!(check.checked_at);
            }
            store.upsert(tables::DOMAIN, row, &["domain_name"]).await?;
            written.push(check.clone());
        }
        Ok(written)
    }

    fn fan_out(&self, _event: &HttpEnrichmentPayload, _new_items: &[HttpCheck]) -> Vec<OutboundEvent> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::memory::{MemoryCounterStore, MemoryStore};
    use crate::core::rate_limiter::TokenBucketLimiter;
    use crate::core::retry::{RetryController, RetryPolicy};
    use crate::domain::model::RateLimitBucket;
    use crate::domain::ports::SiteResponse;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// Answers per URL; unknown URLs fail as unreachable.
    #[derive(Default)]
    struct FakeSites {
        robots_block: bool,
        answers: HashMap<String, SiteResponse>,
        checked: Mutex<Vec<String>>,
    }

    impl FakeSites {
        fn answering(url: &str, status: u16) -> Self {
            let mut answers = HashMap::new();
            answers.insert(
                url.to_string(),
                SiteResponse {
                    status,
                    server: Some("nginx".to_string()),
                    method: "HEAD".to_string(),
                },
            );
            Self {
                answers,
                ..Self::default()
            }
        }

        fn checked(&self) -> Vec<String> {
            self.checked.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SiteChecker for FakeSites {
        async fn robots_disallow_all(&self, _base_url: &str) -> bool {
            self.robots_block
        }

        async fn check(&self, url: &str) -> std::result::Result<SiteResponse, RemoteError> {
            self.checked.lock().unwrap().push(url.to_string());
            self.answers
                .get(url)
                .cloned()
                .ok_or_else(|| RemoteError::network("connection refused"))
        }
    }

    struct Setup {
        store: Arc<MemoryStore>,
        gateway: DependencyGateway,
        sites: Arc<FakeSites>,
        job: HttpEnrichmentJob,
    }

    async fn setup(sites: FakeSites, domain_row: Option<Value>) -> Setup {
        let clock = Arc::new(ManualClock::default());
        let store = Arc::new(MemoryStore::new());
        if let Some(row) = domain_row {
            store.upsert(tables::DOMAIN, row, &["domain_name"]).await.unwrap();
        }
        let limiter = Arc::new(TokenBucketLimiter::new(
            RateLimitBucket::per_minute(DEPENDENCY, 30),
            Arc::new(MemoryCounterStore::with_clock(clock.clone())),
            clock.clone(),
        ));
        let gateway = DependencyGateway::new(
            DEPENDENCY,
            limiter,
            RetryController::new(RetryPolicy::default(), clock.clone()),
        );
        let sites = Arc::new(sites);
        let job = HttpEnrichmentJob::new(sites.clone(), store.clone(), clock);
        Setup {
            store,
            gateway,
            sites,
            job,
        }
    }

    fn payload(domain: &str) -> HttpEnrichmentPayload {
        HttpEnrichmentPayload {
            domain: domain.to_string(),
        }
    }

    async fn run(s: &Setup, domain: &str) -> Vec<HttpCheck> {
        let event = payload(domain);
        let checks = s.job.fetch(&event, Some(&s.gateway)).await.unwrap();
        s.job.persist(s.store.as_ref(), &event, &checks).await.unwrap()
    }

    #[tokio::test]
    async fn test_reachable_domain_is_verified_and_keeps_other_metadata() {
        let s = setup(
            FakeSites::answering("https://brand.io", 200),
            Some(json!({"domain_name": "brand.io", "tld": "io", "metadata": {"source": "comment"}})),
        )
        .await;

        let written = run(&s, "Brand.io").await;

        assert_eq!(written.len(), 1);
        let row = s.store.fetch(tables::DOMAIN, "brand.io").await.unwrap().unwrap();
        assert_eq!(row["tld"], "io");
        assert_eq!(row["metadata"]["source"], "comment");
        assert_eq!(row["metadata"]["http"]["status"], 200);
        assert_eq!(row["metadata"]["http"]["reachable"], true);
        assert_eq!(row["metadata"]["http"]["method"], "HEAD");
        assert_eq!(row["metadata"]["http"]["server"], "nginx");
        assert_eq!(row["verified_at"], row["metadata"]["http"]["checked_at"]);
        assert_eq!(s.gateway.limiter().acquisitions(), 1);
    }

    #[tokio::test]
    async fn test_https_failure_falls_back_to_http() {
        let s = setup(
            FakeSites::answering("http://brand.io", 301),
            Some(json!({"domain_name": "brand.io", "tld": "io"})),
        )
        .await;

        let written = run(&s, "brand.io").await;

        assert_eq!(s.sites.checked(), vec!["https://brand.io", "http://brand.io"]);
        assert_eq!(written[0].url, "http://brand.io");
        assert_eq!(written[0].status, Some(301));
        assert!(written[0].reachable);
    }

    #[tokio::test]
    async fn test_unreachable_site_is_recorded_not_raised() {
        let s = setup(
            FakeSites::default(),
            Some(json!({"domain_name": "gone.example", "tld": "example"})),
        )
        .await;

        let written = run(&s, "gone.example").await;

        assert!(!written[0].reachable);
        let row = s.store.fetch(tables::DOMAIN, "gone.example").await.unwrap().unwrap();
        assert!(row["metadata"]["http"]["status"].is_null());
        assert!(row["metadata"]["http"]["checked_at"].is_string());
        assert!(row.get("verified_at").is_none());
    }

    #[tokio::test]
    async fn test_robots_block_records_reason_without_requesting() {
        let sites = FakeSites {
            robots_block: true,
            ..FakeSites::answering("https://brand.io", 200)
        };
        let s = setup(sites, Some(json!({"domain_name": "brand.io", "tld": "io"}))).await;

        run(&s, "brand.io").await;

        assert!(s.sites.checked().is_empty());
        let row = s.store.fetch(tables::DOMAIN, "brand.io").await.unwrap().unwrap();
        assert_eq!(row["metadata"]["http"]["reason"], REASON_ROBOTS);
        assert_eq!(row["metadata"]["http"]["reachable"], false);
    }

    #[tokio::test]
    async fn test_checked_or_unknown_domains_are_skipped() {
        let s = setup(
            FakeSites::answering("https://brand.io", 200),
            Some(json!({
                "domain_name": "brand.io",
                "metadata": {"http": {"checked_at": "2024-01-01T00:00:00Z"}}
            })),
        )
        .await;

        assert!(run(&s, "brand.io").await.is_empty());
        assert!(run(&s, "unknown.io").await.is_empty());
        assert!(s.sites.checked().is_empty());
        assert_eq!(s.gateway.limiter().acquisitions(), 0);
    }

    #[test]
    fn test_no_events_follow_enrichment() {
        let job = HttpEnrichmentJob::new(
            Arc::new(FakeSites::default()),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::default()),
        );
        assert!(job.fan_out(&payload("brand.io"), &[]).is_empty());
        assert_eq!(job.job_type().event_name(), crate::domain::model::events::DOMAIN_HTTP_ENRICH);
    }
}
