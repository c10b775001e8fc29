use crate::domain::ports::{CallOptions, ScraperApi};
use crate::utils::error::{RemoteError, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ToolRequest<'a> {
    tool: &'a str,
    params: serde_json::Value,
    sticky: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    session_id: Option<&'a str>,
    sticky_ttl_min: u64,
}

/// HTTP client for the scraping gateway. Every failure is classified into
/// a [`RemoteError`] before it leaves this type.
#[derive(Debug, Clone)]
pub struct HttpScraperClient {
    base_url: String,
    api_key: String,
    sticky_minutes: u64,
    client: Client,
}

impl HttpScraperClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration, sticky_minutes: u64) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            sticky_minutes,
            client,
        })
    }
}

/// Reads the gateway's optional `isTransient` hint from an error body.
fn transient_hint(body: &str) -> Option<bool> {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| v.get("isTransient").and_then(|t| t.as_bool()))
}

#[async_trait]
impl ScraperApi for HttpScraperClient {
    async fn call(
        &self,
        tool: &str,
        params: serde_json::Value,
        options: &CallOptions,
    ) -> std::result::Result<serde_json::Value, RemoteError> {
        let body = ToolRequest {
            tool,
            params,
            sticky: options.sticky,
            session_id: options.session_id.as_deref(),
            sticky_ttl_min: self.sticky_minutes,
        };

        let mut request = self
            .client
            .post(format!("{}/mcp", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body);
        if let Some(key) = &options.idempotency_key {
            request = request.header("Idempotency-Key", key);
        }

        tracing::debug!(tool, idempotency_key = ?options.idempotency_key, "calling scraper");
        let response = request
            .send()
            .await
            .map_err(|e| RemoteError::network(format!("{} request failed: {}", tool, e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(RemoteError::classify(
                Some(status.as_u16()),
                transient_hint(&text),
                text,
            ));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| RemoteError::network(format!("{} returned unreadable body: {}", tool, e)))
    }
}
