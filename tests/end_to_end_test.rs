use httpmock::prelude::*;
use promo_harvest::adapters::{
    HttpScraperClient, JsonFileStore, ManualClock, MemoryCounterStore, MemoryEventBus,
};
use promo_harvest::app::jobs::{
    discovery, harvesting, CommentHarvestJob, CommentHarvestPayload, DiscoverySettings,
    DomainExtractionJob, DomainExtractionPayload, VideoDiscoveryJob, VideoDiscoveryPayload,
};
use promo_harvest::config::HarvestConfig;
use promo_harvest::core::dead_letter::DeadLetterSink;
use promo_harvest::domain::model::{events, tables, JobInvocation, JobOutcome};
use promo_harvest::domain::ports::{PersistentStore, ScraperApi};
use promo_harvest::{
    CircuitBreaker, DependencyGateway, JobOrchestrator, KillSwitch, RetryController,
    TokenBucketLimiter,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn orchestrator(
    config: &HarvestConfig,
    store: Arc<JsonFileStore>,
    bus: Arc<MemoryEventBus>,
    clock: Arc<ManualClock>,
) -> JobOrchestrator {
    let counters = Arc::new(MemoryCounterStore::with_clock(clock.clone()));
    let mut orchestrator = JobOrchestrator::new(
        store.clone(),
        bus,
        Arc::new(KillSwitch::new(counters.clone(), clock.clone())),
        DeadLetterSink::new(store, clock.clone()),
        clock.clone(),
    );
    for dependency in [discovery::DEPENDENCY, harvesting::DEPENDENCY] {
        let limiter = Arc::new(TokenBucketLimiter::new(
            config.rate_limit_bucket(dependency),
            counters.clone(),
            clock.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            dependency,
            config.circuit.failure_threshold,
            config.circuit_cooldown(),
            counters.clone(),
            clock.clone(),
        ));
        let retry = RetryController::new(config.retry_policy(), clock.clone()).with_breaker(breaker);
        orchestrator = orchestrator.with_gateway(Arc::new(DependencyGateway::new(dependency, limiter, retry)));
    }
    orchestrator
}

#[tokio::test]
async fn test_discovery_to_domains_over_http_and_json_files() {
    let server = MockServer::start();
    let search = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .header("Authorization", "Bearer test-key")
            .json_body_partial(r#"{"tool": "tiktok.ccl.search"}"#);
        then.status(200).json_body(json!({
            "result": [{"id": "v100", "url": "https://videos.example/v100", "advertiser": "Acme"}]
        }));
    });
    let comments = server.mock(|when, then| {
        when.method(POST)
            .path("/mcp")
            .header("Idempotency-Key", "comments:v100:1")
            .json_body_partial(r#"{"tool": "tiktok.comments.page", "sticky": true}"#);
        then.status(200).json_body(json!({
            "sessionId": "sess-9",
            "hasMore": false,
            "items": [
                {"id": "c1", "text": "20% off at https://www.ShopNow.com/deal?ref=tt", "lang": "en"},
                {"id": "c2", "text": "mail me at support@shopnow.com"}
            ]
        }));
    });

    let config = HarvestConfig::from_toml_str(&format!(
        r#"
[scraper]
base_url = "{}"
api_key = "test-key"

[jobs]
discovery_keywords = ["sale"]
comment_max_pages = 1
"#,
        server.base_url()
    ))
    .unwrap();
    let scraper_config = config.scraper().unwrap();
    let scraper: Arc<dyn ScraperApi> = Arc::new(
        HttpScraperClient::new(
            &scraper_config.base_url,
            scraper_config.api_key.as_deref().unwrap(),
            Duration::from_secs(5),
            scraper_config.sticky_minutes,
        )
        .unwrap(),
    );

    let data_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(data_dir.path()));
    let bus = Arc::new(MemoryEventBus::new());
    let clock = Arc::new(ManualClock::default());
    let orchestrator = orchestrator(&config, store.clone(), bus.clone(), clock.clone());

    let settings: DiscoverySettings = config.discovery_settings();
    let discovery_job = VideoDiscoveryJob::new(scraper.clone(), clock.clone(), settings);
    let outcome = orchestrator
        .run(&discovery_job, &JobInvocation::new("disc-1", VideoDiscoveryPayload::default()))
        .await
        .unwrap();
    assert!(matches!(outcome, JobOutcome::Completed(ref s) if s.items_new == 1));
    search.assert();

    let harvest_event = bus.events_named(events::COMMENT_HARVEST).remove(0);
    let harvest_payload: CommentHarvestPayload = serde_json::from_value(harvest_event.payload).unwrap();
    assert_eq!(harvest_payload.max_pages, Some(1));
    let harvest_job = CommentHarvestJob::new(scraper, config.jobs.comment_max_pages);
    orchestrator
        .run(&harvest_job, &JobInvocation::new("harvest-v100", harvest_payload))
        .await
        .unwrap();
    comments.assert_hits(1);

    let extraction = DomainExtractionJob::new();
    for event in bus.events_named(events::DOMAIN_EXTRACT) {
        let payload: DomainExtractionPayload = serde_json::from_value(event.payload).unwrap();
        let job_id = format!("extract-{}", payload.comment_id);
        orchestrator
            .run(&extraction, &JobInvocation::new(job_id, payload))
            .await
            .unwrap();
    }

    // Email addresses are not advertised domains.
    assert_eq!(store.count(tables::DOMAIN).await.unwrap(), 1);
    let domain = store.fetch(tables::DOMAIN, "shopnow.com").await.unwrap().unwrap();
    assert_eq!(domain["tld"], "com");
    assert_eq!(store.count(tables::DOMAIN_MENTION).await.unwrap(), 1);
    assert_eq!(
        bus.events_named(events::DOMAIN_HTTP_ENRICH)[0].payload,
        json!({"domain": "shopnow.com"})
    );

    // Everything survives a restart of the store.
    let reopened = JsonFileStore::new(data_dir.path());
    assert_eq!(reopened.count(tables::VIDEO).await.unwrap(), 1);
    assert_eq!(reopened.count(tables::COMMENT).await.unwrap(), 2);
    assert_eq!(reopened.count(tables::JOB_STATUS).await.unwrap(), 4);
    assert!(reopened.fetch(tables::JOB_STEPS, "disc-1|fan-out").await.unwrap().is_some());
}

#[tokio::test]
async fn test_server_outage_opens_circuit_and_dead_letters() {
    let server = MockServer::start();
    let outage = server.mock(|when, then| {
        when.method(POST).path("/mcp");
        then.status(503).body("maintenance");
    });

    let config = HarvestConfig::from_toml_str(
        r#"
[circuit]
failure_threshold = 3

[retry]
max_attempts = 3
"#,
    )
    .unwrap();
    let scraper: Arc<dyn ScraperApi> = Arc::new(
        HttpScraperClient::new(&server.base_url(), "k", Duration::from_secs(5), 10).unwrap(),
    );

    let data_dir = TempDir::new().unwrap();
    let store = Arc::new(JsonFileStore::new(data_dir.path()));
    let clock = Arc::new(ManualClock::default());
    let orchestrator = orchestrator(&config, store.clone(), Arc::new(MemoryEventBus::new()), clock.clone());
    let job = VideoDiscoveryJob::new(scraper, clock.clone(), config.discovery_settings());

    let final_attempt = JobInvocation::new("disc-outage", VideoDiscoveryPayload::default()).with_attempt(3, 3);
    let result = orchestrator.run(&job, &final_attempt).await;

    assert!(result.is_err());
    outage.assert_hits(3);
    assert_eq!(clock.sleeps().len(), 2);
    let entry = store
        .fetch(tables::DEAD_LETTER_QUEUE, "disc-outage")
        .await
        .unwrap()
        .unwrap();
    assert!(entry["last_error"].as_str().unwrap().contains("503"));

    let breaker = orchestrator
        .gateway(discovery::DEPENDENCY)
        .unwrap()
        .retry()
        .breaker()
        .unwrap()
        .clone();
    assert_eq!(breaker.status().await.unwrap().failure_count, 3);
}
