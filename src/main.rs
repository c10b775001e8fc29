use anyhow::{Context, Result};
use clap::Parser;
use promo_harvest::adapters::{
    HttpScraperClient, HttpSiteChecker, JsonFileStore, MemoryCounterStore, MemoryEventBus,
    SlackAlertSink, SystemClock, TracingAlertSink,
};
use promo_harvest::app::jobs::{
    discovery, enrichment, harvesting, CommentHarvestJob, CommentHarvestPayload,
    DomainExtractionJob, DomainExtractionPayload, HttpEnrichmentJob, HttpEnrichmentPayload,
    VideoDiscoveryJob, VideoDiscoveryPayload,
};
use promo_harvest::config::{Cli, Command, HarvestConfig, JobKind, KillSwitchAction};
use promo_harvest::core::dead_letter::DeadLetterSink;
use promo_harvest::core::extractor::{extract_mentions, normalize_domain};
use promo_harvest::domain::model::{JobInvocation, JobOutcome};
use promo_harvest::domain::ports::{
    AlertSink, Clock, JobHandler, PersistentStore, ScraperApi, SharedCounterStore,
};
use promo_harvest::utils::error::{ErrorSeverity, HarvestError};
use promo_harvest::utils::{logger, validation::Validate};
use promo_harvest::{
    CircuitBreaker, DependencyGateway, JobOrchestrator, KillSwitch, RetryController,
    TokenBucketLimiter,
};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if cli.json_logs {
        logger::init_json_logger();
    } else {
        logger::init_cli_logger(cli.verbose);
    }
    tracing::debug!("CLI arguments: {:?}", cli);

    if let Err(e) = run(cli).await {
        let Some(harvest_error) = e.downcast_ref::<HarvestError>() else {
            tracing::error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            std::process::exit(1);
        };

        tracing::error!(
            category = ?harvest_error.category(),
            severity = %harvest_error.severity(),
            "❌ {:#}",
            e
        );
        eprintln!("❌ {}", harvest_error.user_friendly_message());
        eprintln!("💡 {}", harvest_error.recovery_suggestion());

        let exit_code = match harvest_error.severity() {
            ErrorSeverity::Low => 0,
            ErrorSeverity::Medium => 2,
            ErrorSeverity::High => 1,
            ErrorSeverity::Critical => 3,
        };
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => HarvestConfig::from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?,
        None => HarvestConfig::default(),
    };
    config.validate()?;

    match cli.command {
        Command::Extract { text } => {
            for mention in extract_mentions(&text) {
                println!("{}", serde_json::to_string(&mention)?);
            }
            Ok(())
        }
        Command::Normalize { raw } => {
            match normalize_domain(&raw) {
                Some(domain) => println!("{}", serde_json::to_string(&domain)?),
                None => println!("null"),
            }
            Ok(())
        }
        Command::CheckConfig => {
            println!("✅ Configuration is valid");
            Ok(())
        }
        Command::KillSwitch {
            action,
            reason,
            requested_by,
        } => {
            let runtime = Runtime::build(config).await?;
            if !runtime.shared {
                tracing::warn!("No shared store configured; the kill switch only lives for this process");
            }
            let kill_switch = runtime.kill_switch();
            let state = match action {
                KillSwitchAction::Activate => {
                    let reason = reason.unwrap_or_else(|| "manual stop".to_string());
                    kill_switch.activate(&reason, &requested_by).await?
                }
                KillSwitchAction::Deactivate => kill_switch.deactivate(&requested_by).await?,
                KillSwitchAction::Status => kill_switch.state().await?,
            };
            println!("{}", serde_json::to_string_pretty(&state)?);
            Ok(())
        }
        Command::RunJob {
            job,
            job_id,
            attempt,
            payload,
        } => {
            let runtime = Runtime::build(config).await?;
            let job_id = job_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            match job {
                JobKind::Discovery => {
                    let handler = VideoDiscoveryJob::new(
                        runtime.scraper()?,
                        runtime.clock.clone(),
                        runtime.config.discovery_settings(),
                    );
                    runtime
                        .run_job::<_, VideoDiscoveryPayload>(&handler, &job_id, attempt, &payload)
                        .await
                }
                JobKind::Harvest => {
                    let handler = CommentHarvestJob::new(
                        runtime.scraper()?,
                        runtime.config.jobs.comment_max_pages,
                    );
                    runtime
                        .run_job::<_, CommentHarvestPayload>(&handler, &job_id, attempt, &payload)
                        .await
                }
                JobKind::Extract => {
                    runtime
                        .run_job::<_, DomainExtractionPayload>(
                            &DomainExtractionJob::new(),
                            &job_id,
                            attempt,
                            &payload,
                        )
                        .await
                }
                JobKind::Enrich => {
                    let checker = HttpSiteChecker::new(Duration::from_secs(
                        runtime.config.jobs.http_check_timeout_seconds,
                    ))?;
                    let handler = HttpEnrichmentJob::new(
                        Arc::new(checker),
                        runtime.store.clone(),
                        runtime.clock.clone(),
                    );
                    runtime
                        .run_job::<_, HttpEnrichmentPayload>(&handler, &job_id, attempt, &payload)
                        .await
                }
            }
        }
    }
}

/// Collaborators shared by every job run from this process.
struct Runtime {
    config: HarvestConfig,
    clock: Arc<dyn Clock>,
    counters: Arc<dyn SharedCounterStore>,
    store: Arc<dyn PersistentStore>,
    alerts: Arc<dyn AlertSink>,
    shared: bool,
}

impl Runtime {
    async fn build(config: HarvestConfig) -> Result<Self> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let (counters, shared) = counter_store(&config, clock.clone()).await?;
        let store: Arc<dyn PersistentStore> = Arc::new(JsonFileStore::new(&config.store.data_dir));

        let alerts: Arc<dyn AlertSink> = match (&config.alerts.slack_webhook_url, config.alerts.enabled) {
            (Some(url), true) => Arc::new(SlackAlertSink::new(url.clone())),
            _ => Arc::new(TracingAlertSink),
        };

        Ok(Self {
            config,
            clock,
            counters,
            store,
            alerts,
            shared,
        })
    }

    fn kill_switch(&self) -> KillSwitch {
        KillSwitch::new(self.counters.clone(), self.clock.clone()).with_alerts(self.alerts.clone())
    }

    fn scraper(&self) -> Result<Arc<dyn ScraperApi>> {
        let scraper = self.config.scraper()?;
        let api_key = scraper.api_key.as_deref().unwrap_or_default();
        let client = HttpScraperClient::new(
            &scraper.base_url,
            api_key,
            Duration::from_secs(scraper.timeout_seconds),
            scraper.sticky_minutes,
        )?;
        Ok(Arc::new(client))
    }

    fn gateway(&self, dependency: &str) -> Arc<DependencyGateway> {
        let limiter = Arc::new(TokenBucketLimiter::new(
            self.config.rate_limit_bucket(dependency),
            self.counters.clone(),
            self.clock.clone(),
        ));
        let breaker = Arc::new(CircuitBreaker::new(
            dependency,
            self.config.circuit.failure_threshold,
            self.config.circuit_cooldown(),
            self.counters.clone(),
            self.clock.clone(),
        ));
        let retry = RetryController::new(self.config.retry_policy(), self.clock.clone()).with_breaker(breaker);
        Arc::new(DependencyGateway::new(dependency, limiter, retry))
    }

    async fn run_job<H, E>(&self, handler: &H, job_id: &str, attempt: u32, payload: &str) -> Result<()>
    where
        H: JobHandler<Event = E>,
        E: DeserializeOwned,
    {
        let event: E = serde_json::from_str(payload)
            .map_err(HarvestError::from)
            .context("parsing --payload")?;

        let bus = Arc::new(MemoryEventBus::new());
        let orchestrator = JobOrchestrator::new(
            self.store.clone(),
            bus.clone(),
            Arc::new(self.kill_switch()),
            DeadLetterSink::new(self.store.clone(), self.clock.clone()).with_alerts(self.alerts.clone()),
            self.clock.clone(),
        )
        .with_gateway(self.gateway(discovery::DEPENDENCY))
        .with_gateway(self.gateway(harvesting::DEPENDENCY))
        .with_gateway(self.gateway(enrichment::DEPENDENCY));

        let invocation = JobInvocation::new(job_id, event)
            .with_attempt(attempt, self.config.jobs.max_job_attempts);

        match orchestrator.run(handler, &invocation).await? {
            JobOutcome::Completed(summary) => {
                tracing::info!("✅ Job {} completed", summary.job_id);
                println!("{}", serde_json::to_string(&summary)?);
            }
            JobOutcome::Skipped { job_id, reason } => {
                tracing::warn!("⏸️ Job {} skipped: {}", job_id, reason);
                println!("{}", serde_json::json!({"job_id": job_id, "skipped": reason}));
            }
        }

        // Scheduled events go to stdout, one per line, for the step executor.
        for event in bus.events() {
            println!("{}", serde_json::to_string(&event)?);
        }
        Ok(())
    }
}

#[cfg(feature = "redis")]
async fn counter_store(
    config: &HarvestConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn SharedCounterStore>, bool)> {
    use promo_harvest::adapters::RedisCounterStore;

    match &config.store.redis_url {
        Some(url) => {
            let store = RedisCounterStore::connect(url).await?;
            Ok((Arc::new(store), true))
        }
        None => Ok((Arc::new(MemoryCounterStore::with_clock(clock)), false)),
    }
}

#[cfg(not(feature = "redis"))]
async fn counter_store(
    config: &HarvestConfig,
    clock: Arc<dyn Clock>,
) -> Result<(Arc<dyn SharedCounterStore>, bool)> {
    if config.store.redis_url.is_some() {
        tracing::warn!("store.redis_url is set but this build lacks the `redis` feature; using in-process counters");
    }
    Ok((Arc::new(MemoryCounterStore::with_clock(clock)), false))
}
