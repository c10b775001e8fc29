use crate::core::dead_letter::DeadLetterSink;
use crate::core::gateway::DependencyGateway;
use crate::core::kill_switch::KillSwitch;
use crate::core::steps::{JobScopedStore, StepLedger};
use crate::domain::model::{
    tables, JobExecution, JobInvocation, JobOutcome, JobStatus, JobSummary,
};
use crate::domain::ports::{Clock, EventBus, JobHandler, PersistentStore};
use crate::utils::best_effort::best_effort_within;
use crate::utils::error::{HarvestError, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn, Instrument};

pub const STEP_FETCH: &str = "fetch";
pub const STEP_PERSIST: &str = "persist";
pub const STEP_FAN_OUT: &str = "fan-out";

/// Upper bound on a status or dead-letter write.
pub const DEFAULT_SIDE_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// 16 lowercase hex characters.
pub fn new_correlation_id() -> String {
    let value: u64 = rand::rng().random();
    format!("{:016x}", value)
}

/// Runs job invocations through the same sequence for every job type:
/// kill-switch check, running status, fetch through the dependency
/// gateway, idempotent persistence, fan-out, terminal status.
pub struct JobOrchestrator {
    store: Arc<dyn PersistentStore>,
    bus: Arc<dyn EventBus>,
    kill_switch: Arc<KillSwitch>,
    dead_letters: DeadLetterSink,
    steps: StepLedger,
    clock: Arc<dyn Clock>,
    gateways: HashMap<String, Arc<DependencyGateway>>,
    side_call_timeout: Duration,
}

impl JobOrchestrator {
    pub fn new(
        store: Arc<dyn PersistentStore>,
        bus: Arc<dyn EventBus>,
        kill_switch: Arc<KillSwitch>,
        dead_letters: DeadLetterSink,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            steps: StepLedger::new(store.clone(), clock.clone()),
            store,
            bus,
            kill_switch,
            dead_letters,
            clock,
            gateways: HashMap::new(),
            side_call_timeout: DEFAULT_SIDE_CALL_TIMEOUT,
        }
    }

    pub fn with_side_call_timeout(mut self, timeout: Duration) -> Self {
        self.side_call_timeout = timeout;
        self
    }

    pub fn with_gateway(mut self, gateway: Arc<DependencyGateway>) -> Self {
        self.gateways.insert(gateway.name().to_string(), gateway);
        self
    }

    pub fn gateway(&self, dependency: &str) -> Option<&Arc<DependencyGateway>> {
        self.gateways.get(dependency)
    }

    pub fn kill_switch(&self) -> &KillSwitch {
        &self.kill_switch
    }

    /// Runs one invocation. Errors are returned to the caller (the step
    /// executor) after the failure is recorded; on the final attempt the
    /// event is also dead-lettered.
    pub async fn run<H: JobHandler>(
        &self,
        handler: &H,
        invocation: &JobInvocation<H::Event>,
    ) -> Result<JobOutcome> {
        let correlation_id = new_correlation_id();
        let span = tracing::info_span!(
            "job",
            job_id = %invocation.job_id,
            job_type = %handler.job_type(),
            attempt = invocation.attempt,
            correlation_id = %correlation_id,
        );
        self.run_inner(handler, invocation, correlation_id)
            .instrument(span)
            .await
    }

    async fn run_inner<H: JobHandler>(
        &self,
        handler: &H,
        invocation: &JobInvocation<H::Event>,
        correlation_id: String,
    ) -> Result<JobOutcome> {
        let kill_switch = self.kill_switch.state().await?;
        if kill_switch.active {
            let reason = kill_switch
                .reason
                .unwrap_or_else(|| "kill switch is active".to_string());
            warn!(reason = %reason, "kill switch active, skipping job");
            return Ok(JobOutcome::Skipped {
                job_id: invocation.job_id.clone(),
                reason,
            });
        }

        let started_at = self.clock.now();
        self.record_status(
            handler,
            invocation,
            &correlation_id,
            started_at,
            JobStatus::Running,
            json!({}),
        )
        .await;
        info!("job started");

        match self.execute(handler, invocation, &correlation_id).await {
            Ok(summary) => {
                self.record_status(
                    handler,
                    invocation,
                    &correlation_id,
                    started_at,
                    JobStatus::Completed,
                    json!({
                        "items_fetched": summary.items_fetched,
                        "items_new": summary.items_new,
                        "events_sent": summary.events_sent,
                    }),
                )
                .await;
                info!(
                    items_fetched = summary.items_fetched,
                    items_new = summary.items_new,
                    events_sent = summary.events_sent,
                    "job completed"
                );
                Ok(JobOutcome::Completed(summary))
            }
            Err(e) => {
                let final_attempt = invocation.is_final_attempt();
                self.record_status(
                    handler,
                    invocation,
                    &correlation_id,
                    started_at,
                    JobStatus::Failed,
                    json!({
                        "error": e.to_string(),
                        "category": format!("{:?}", e.category()),
                        "will_retry": !final_attempt,
                    }),
                )
                .await;
                error!(error = %e, final_attempt, "job failed");

                if final_attempt {
                    self.dead_letter(handler, invocation, &e).await;
                }
                Err(e)
            }
        }
    }

    async fn execute<H: JobHandler>(
        &self,
        handler: &H,
        invocation: &JobInvocation<H::Event>,
        correlation_id: &str,
    ) -> Result<JobSummary> {
        let gateway = match handler.dependency() {
            Some(name) => Some(self.gateways.get(name).ok_or_else(|| {
                HarvestError::config(format!("no gateway registered for dependency '{}'", name))
            })?),
            None => None,
        };
        let job_id = invocation.job_id.as_str();
        let event = &invocation.event;

        let fetched: Vec<H::Item> = self
            .steps
            .run(job_id, STEP_FETCH, || {
                handler.fetch(event, gateway.map(|g| g.as_ref()))
            })
            .await?;

        let scoped = JobScopedStore::new(self.store.clone(), job_id);
        let new_items: Vec<H::Item> = self
            .steps
            .run(job_id, STEP_PERSIST, || handler.persist(&scoped, event, &fetched))
            .await?;

        let events_sent: usize = self
            .steps
            .run(job_id, STEP_FAN_OUT, || async {
                let events = handler.fan_out(event, &new_items);
                let count = events.len();
                for outbound in events {
                    self.bus.send(outbound).await?;
                }
                Ok::<_, HarvestError>(count)
            })
            .await?;

        Ok(JobSummary {
            job_id: job_id.to_string(),
            job_type: handler.job_type(),
            correlation_id: correlation_id.to_string(),
            items_fetched: fetched.len(),
            items_new: new_items.len(),
            events_sent,
        })
    }

    async fn record_status<H: JobHandler>(
        &self,
        handler: &H,
        invocation: &JobInvocation<H::Event>,
        correlation_id: &str,
        started_at: DateTime<Utc>,
        status: JobStatus,
        metadata: serde_json::Value,
    ) {
        let completed_at = match status {
            JobStatus::Completed | JobStatus::Failed => Some(self.clock.now()),
            JobStatus::Pending | JobStatus::Running => None,
        };
        let execution = JobExecution {
            job_id: invocation.job_id.clone(),
            job_type: handler.job_type(),
            status,
            attempt: invocation.attempt,
            started_at,
            completed_at,
            correlation_id: correlation_id.to_string(),
            metadata,
        };
        best_effort_within("job_status", self.side_call_timeout, async {
            let row = serde_json::to_value(&execution)?;
            self.store.upsert(tables::JOB_STATUS, row, &["job_id"]).await
        })
        .await;
    }

    async fn dead_letter<H: JobHandler>(
        &self,
        handler: &H,
        invocation: &JobInvocation<H::Event>,
        cause: &HarvestError,
    ) {
        best_effort_within("dead_letter", self.side_call_timeout, async {
            let payload = serde_json::to_value(&invocation.event)?;
            self.dead_letters
                .record(
                    &invocation.job_id,
                    handler.job_type().event_name(),
                    payload,
                    invocation.attempt,
                    cause,
                )
                .await
        })
        .await;
    }
}
