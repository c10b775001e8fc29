use crate::app::jobs::discovery::text_field;
use crate::core::gateway::DependencyGateway;
use crate::domain::model::{events, tables, JobType, OutboundEvent};
use crate::domain::ports::{CallOptions, JobHandler, PersistentStore, ScraperApi};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{debug, info};

pub const COMMENTS_TOOL: &str = "tiktok.comments.page";
pub const DEPENDENCY: &str = "comments";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentHarvestPayload {
    pub video_id: String,
    #[serde(default)]
    pub max_pages: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestedComment {
    pub comment_id: String,
    pub video_id: String,
    pub text: String,
    pub user_id: Option<String>,
    pub created_at: Option<String>,
    pub lang: Option<String>,
}

/// One page as returned by the comments tool.
struct CommentPage {
    comments: Vec<HarvestedComment>,
    session_id: Option<String>,
    has_more: bool,
}

fn parse_page(video_id: &str, response: &Value) -> CommentPage {
    let comments = response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|raw| {
                    Some(HarvestedComment {
                        comment_id: text_field(raw, &["id"])?,
                        video_id: video_id.to_string(),
                        text: text_field(raw, &["text"])?,
                        user_id: text_field(raw, &["user_id"]),
                        created_at: text_field(raw, &["created_at"]),
                        lang: text_field(raw, &["lang"]),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    CommentPage {
        comments,
        session_id: response
            .get("sessionId")
            .and_then(Value::as_str)
            .map(str::to_string),
        has_more: response
            .get("hasMore")
            .and_then(Value::as_bool)
            .unwrap_or(false),
    }
}

/// Pages through a video's comments on one sticky session and schedules
/// domain extraction for comments not stored before.
pub struct CommentHarvestJob {
    scraper: Arc<dyn ScraperApi>,
    default_max_pages: u32,
}

impl CommentHarvestJob {
    pub fn new(scraper: Arc<dyn ScraperApi>, default_max_pages: u32) -> Self {
        Self {
            scraper,
            default_max_pages: default_max_pages.max(1),
        }
    }
}

#[async_trait]
impl JobHandler for CommentHarvestJob {
    type Event = CommentHarvestPayload;
    type Item = HarvestedComment;

    fn job_type(&self) -> JobType {
        JobType::CommentHarvest
    }

    fn dependency(&self) -> Option<&str> {
        Some(DEPENDENCY)
    }

    async fn fetch(
        &self,
        event: &CommentHarvestPayload,
        gateway: Option<&DependencyGateway>,
    ) -> Result<Vec<HarvestedComment>> {
        let gateway = gateway.ok_or_else(|| {
            HarvestError::config(format!("comment harvesting requires the '{}' gateway", DEPENDENCY))
        })?;
        let max_pages = event.max_pages.unwrap_or(self.default_max_pages).max(1);

        let mut session_id: Option<String> = None;
        let mut comments = Vec::new();
        for page in 1..=max_pages {
            let params = json!({"videoId": event.video_id, "page": page});
            let options = CallOptions {
                sticky: true,
                session_id: session_id.clone(),
                idempotency_key: Some(format!("comments:{}:{}", event.video_id, page)),
            };

            let response = gateway
                .call(COMMENTS_TOOL, || {
                    self.scraper.call(COMMENTS_TOOL, params.clone(), &options)
                })
                .await?;

            let parsed = parse_page(&event.video_id, &response);
            debug!(
                video_id = %event.video_id,
                page,
                comments = parsed.comments.len(),
                has_more = parsed.has_more,
                "comment page fetched"
            );
            if parsed.session_id.is_some() {
                session_id = parsed.session_id;
            }
            comments.extend(parsed.comments);
            if !parsed.has_more {
                break;
            }
        }

        info!(video_id = %event.video_id, comments = comments.len(), "comments harvested");
        Ok(comments)
    }

    async fn persist(
        &self,
        store: &dyn PersistentStore,
        _event: &CommentHarvestPayload,
        items: &[HarvestedComment],
    ) -> Result<Vec<HarvestedComment>> {
        let mut fresh = Vec::new();
        for comment in items {
            let row = serde_json::to_value(comment)?;
            if store.upsert(tables::COMMENT, row, &["comment_id"]).await?.is_new() {
                fresh.push(comment.clone());
            }
        }
        Ok(fresh)
    }

    fn fan_out(&self, _event: &CommentHarvestPayload, new_items: &[HarvestedComment]) -> Vec<OutboundEvent> {
        new_items
            .iter()
            .map(|comment| {
                OutboundEvent::new(
                    events::DOMAIN_EXTRACT,
                    json!({
                        "commentId": comment.comment_id,
                        "videoId": comment.video_id,
                        "commentText": comment.text,
                    }),
                )
            })
            .collect()
    }
}
