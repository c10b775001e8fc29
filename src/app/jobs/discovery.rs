use crate::core::gateway::DependencyGateway;
use crate::domain::model::{events, tables, JobType, OutboundEvent};
use crate::domain::ports::{CallOptions, Clock, JobHandler, PersistentStore, ScraperApi};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const SEARCH_TOOL: &str = "tiktok.ccl.search";
pub const DEPENDENCY: &str = "discovery";

pub const DEFAULT_KEYWORDS: &[&str] = &[
    "sale", "deal", "coupon", "fashion", "beauty", "tech", "gadgets", "home",
];

/// Trigger payload. Every field falls back to [`DiscoverySettings`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VideoDiscoveryPayload {
    pub region: Option<String>,
    pub keywords: Option<Vec<String>>,
    pub limit: Option<u32>,
    pub content_type: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoverySettings {
    pub region: String,
    pub keywords: Vec<String>,
    pub limit: u32,
    pub content_type: String,
    /// Pages requested by the harvest jobs this discovery schedules.
    pub comment_max_pages: u32,
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self {
            region: "US".to_string(),
            keywords: DEFAULT_KEYWORDS.iter().map(|k| k.to_string()).collect(),
            limit: 50,
            content_type: "all".to_string(),
            comment_max_pages: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredVideo {
    pub video_id: String,
    pub url: String,
    pub advertiser: Option<String>,
    pub seen_at: String,
}

/// Searches for promoted videos and schedules comment harvesting for the
/// ones not seen before.
pub struct VideoDiscoveryJob {
    scraper: Arc<dyn ScraperApi>,
    clock: Arc<dyn Clock>,
    settings: DiscoverySettings,
}

impl VideoDiscoveryJob {
    pub fn new(scraper: Arc<dyn ScraperApi>, clock: Arc<dyn Clock>, settings: DiscoverySettings) -> Self {
        Self {
            scraper,
            clock,
            settings,
        }
    }

    fn parse_results(&self, response: &Value) -> Vec<DiscoveredVideo> {
        let Some(items) = response.get("result").and_then(Value::as_array) else {
            return Vec::new();
        };
        let now = self.clock.now().to_rfc3339();

        items
            .iter()
            .filter_map(|raw| {
                let video_id = text_field(raw, &["id", "video_id"])?;
                let url = text_field(raw, &["url"])?;
                Some(DiscoveredVideo {
                    video_id,
                    url,
                    advertiser: text_field(raw, &["advertiser"]),
                    seen_at: text_field(raw, &["discovered_at", "seen_at"])
                        .unwrap_or_else(|| now.clone()),
                })
            })
            .collect()
    }
}

/// First non-empty value among `names`, numbers rendered as text.
pub(crate) fn text_field(raw: &Value, names: &[&str]) -> Option<String> {
    names.iter().find_map(|name| match raw.get(*name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

#[async_trait]
impl JobHandler for VideoDiscoveryJob {
    type Event = VideoDiscoveryPayload;
    type Item = DiscoveredVideo;

    fn job_type(&self) -> JobType {
        JobType::VideoDiscovery
    }

    fn dependency(&self) -> Option<&str> {
        Some(DEPENDENCY)
    }

    async fn fetch(
        &self,
        event: &VideoDiscoveryPayload,
        gateway: Option<&DependencyGateway>,
    ) -> Result<Vec<DiscoveredVideo>> {
        let gateway = gateway.ok_or_else(|| {
            HarvestError::config(format!("video discovery requires the '{}' gateway", DEPENDENCY))
        })?;

        let region = event.region.as_deref().unwrap_or(&self.settings.region);
        let content_type = event
            .content_type
            .as_deref()
            .unwrap_or(&self.settings.content_type);
        let limit = event.limit.unwrap_or(self.settings.limit);
        let keywords = event.keywords.as_ref().unwrap_or(&self.settings.keywords);

        let params = json!({
            "keywords": keywords.join(" "),
            "limit": limit,
            "country": region,
            "content_type": content_type,
        });
        let options = CallOptions {
            idempotency_key: Some(format!(
                "discovery:{}:{}:{}:{}",
                region,
                content_type,
                limit,
                keywords.join(",")
            )),
            ..CallOptions::default()
        };

        let response = gateway
            .call(SEARCH_TOOL, || {
                self.scraper.call(SEARCH_TOOL, params.clone(), &options)
            })
            .await?;

        let videos = self.parse_results(&response);
        info!(region, found = videos.len(), "discovery search finished");
        Ok(videos)
    }

    async fn persist(
        &self,
        store: &dyn PersistentStore,
        _event: &VideoDiscoveryPayload,
        items: &[DiscoveredVideo],
    ) -> Result<Vec<DiscoveredVideo>> {
        let mut fresh = Vec::new();
        for video in items {
            let row = json!({
                "video_id": video.video_id,
                "url": video.url,
                "advertiser": video.advertiser,
                "last_seen_at": video.seen_at,
            });
            if store.upsert(tables::VIDEO, row, &["video_id"]).await?.is_new() {
                fresh.push(video.clone());
            } else {
                debug!(video_id = %video.video_id, "video already known");
            }
        }
        Ok(fresh)
    }

    fn fan_out(&self, _event: &VideoDiscoveryPayload, new_items: &[DiscoveredVideo]) -> Vec<OutboundEvent> {
        new_items
            .iter()
            .map(|video| {
                OutboundEvent::new(
                    events::COMMENT_HARVEST,
                    json!({
                        "videoId": video.video_id,
                        "maxPages": self.settings.comment_max_pages,
                    }),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;

    struct NoScraper;

    #[async_trait]
    impl ScraperApi for NoScraper {
        async fn call(
            &self,
            _tool: &str,
            _params: Value,
            _options: &CallOptions,
        ) -> std::result::Result<Value, crate::utils::error::RemoteError> {
            Ok(Value::Null)
        }
    }

    fn job() -> VideoDiscoveryJob {
        VideoDiscoveryJob::new(
            Arc::new(NoScraper),
            Arc::new(ManualClock::default()),
            DiscoverySettings::default(),
        )
    }

    #[test]
    fn test_parse_results_accepts_both_id_fields_and_drops_incomplete() {
        let response = json!({"result": [
            {"id": "v1", "url": "https://t.example/v1", "advertiser": "Acme"},
            {"video_id": 42, "url": "https://t.example/42", "seen_at": "2024-01-01T00:00:00Z"},
            {"id": "v3"},
            {"url": "https://t.example/none"},
        ]});

        let videos = job().parse_results(&response);

        assert_eq!(videos.len(), 2);
        assert_eq!(videos[0].video_id, "v1");
        assert_eq!(videos[0].advertiser.as_deref(), Some("Acme"));
        assert_eq!(videos[1].video_id, "42");
        assert_eq!(videos[1].seen_at, "2024-01-01T00:00:00Z");
    }

    #[test]
    fn test_missing_result_array_is_empty() {
        assert!(job().parse_results(&json!({"success": true})).is_empty());
    }

    #[test]
    fn test_fan_out_schedules_harvest_per_new_video() {
        let video = DiscoveredVideo {
            video_id: "v1".to_string(),
            url: "u".to_string(),
            advertiser: None,
            seen_at: "now".to_string(),
        };
        let scheduled = job().fan_out(&VideoDiscoveryPayload::default(), &[video]);
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].name, events::COMMENT_HARVEST);
        assert_eq!(scheduled[0].payload, json!({"videoId": "v1", "maxPages": 2}));
    }
}
