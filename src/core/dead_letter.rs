use crate::domain::model::{tables, DeadLetterEntry, DeadLetterStatus};
use crate::domain::ports::{Alert, AlertSink, Clock, PersistentStore};
use crate::utils::best_effort::best_effort;
use crate::utils::error::{HarvestError, Result};
use serde_json::json;
use std::sync::Arc;
use tracing::error;
use uuid::Uuid;

/// Durable record of jobs that used up their attempt budget.
pub struct DeadLetterSink {
    store: Arc<dyn PersistentStore>,
    alerts: Option<Arc<dyn AlertSink>>,
    clock: Arc<dyn Clock>,
}

impl DeadLetterSink {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            alerts: None,
            clock,
        }
    }

    pub fn with_alerts(mut self, alerts: Arc<dyn AlertSink>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Writes (or refreshes) the entry for `job_id`, then alerts. A job that
    /// dead-letters twice keeps one entry with its original id.
    pub async fn record(
        &self,
        job_id: &str,
        event_name: &str,
        payload: serde_json::Value,
        attempt_count: u32,
        last_error: &HarvestError,
    ) -> Result<DeadLetterEntry> {
        let existing: Option<DeadLetterEntry> = match self
            .store
            .fetch(tables::DEAD_LETTER_QUEUE, job_id)
            .await?
        {
            Some(row) => serde_json::from_value(row).ok(),
            None => None,
        };

        let entry = DeadLetterEntry {
            id: existing.as_ref().map(|e| e.id).unwrap_or_else(Uuid::new_v4),
            job_id: job_id.to_string(),
            original_event_name: event_name.to_string(),
            original_payload: payload,
            attempt_count,
            last_error: last_error.to_string(),
            status: DeadLetterStatus::Pending,
            created_at: existing.map(|e| e.created_at).unwrap_or_else(|| self.clock.now()),
        };

        self.store
            .upsert(
                tables::DEAD_LETTER_QUEUE,
                serde_json::to_value(&entry)?,
                &["job_id"],
            )
            .await?;
        error!(
            job_id,
            event = event_name,
            attempt_count,
            error = %last_error,
            "job moved to dead-letter queue"
        );

        if let Some(sink) = &self.alerts {
            let alert = Alert {
                title: "Job Failed Permanently".to_string(),
                message: format!(
                    "{} failed after {} attempts: {}",
                    event_name, attempt_count, entry.last_error
                ),
                details: Some(json!({
                    "job_id": job_id,
                    "dead_letter_id": entry.id,
                    "payload": entry.original_payload,
                })),
            };
            best_effort("dead_letter.alert", sink.notify(&alert)).await;
        }

        Ok(entry)
    }
}
