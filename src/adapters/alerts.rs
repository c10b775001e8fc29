use crate::domain::ports::{Alert, AlertSink};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde_json::json;

/// Slack caps a section block at 3000 characters.
const DETAILS_LIMIT: usize = 3000;

/// Writes alerts to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAlertSink;

#[async_trait]
impl AlertSink for TracingAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        tracing::warn!(title = %alert.title, details = ?alert.details, "{}", alert.message);
        Ok(())
    }
}

/// Posts alerts to a Slack incoming webhook.
#[derive(Debug, Clone)]
pub struct SlackAlertSink {
    webhook_url: String,
    client: Client,
}

impl SlackAlertSink {
    pub fn new(webhook_url: impl Into<String>) -> Self {
        Self {
            webhook_url: webhook_url.into(),
            client: Client::new(),
        }
    }

    fn payload(alert: &Alert) -> serde_json::Value {
        let mut blocks = vec![
            json!({"type": "header", "text": {"type": "plain_text", "text": alert.title}}),
            json!({"type": "section", "text": {"type": "mrkdwn", "text": alert.message}}),
        ];
        if let Some(details) = &alert.details {
            let pretty = serde_json::to_string_pretty(details).unwrap_or_default();
            let clipped: String = pretty.chars().take(DETAILS_LIMIT).collect();
            blocks.push(json!({
                "type": "section",
                "text": {"type": "mrkdwn", "text": format!("```{}```", clipped)}
            }));
        }
        json!({
            "text": format!("{}: {}", alert.title, alert.message),
            "blocks": blocks,
        })
    }
}

#[async_trait]
impl AlertSink for SlackAlertSink {
    async fn notify(&self, alert: &Alert) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&Self::payload(alert))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(HarvestError::Alert {
                message: format!("Slack webhook returned {}", response.status()),
            });
        }
        Ok(())
    }
}
