use crate::core::extractor::extract_mentions;
use crate::core::gateway::DependencyGateway;
use crate::domain::model::{events, tables, DomainMention, JobType, OutboundEvent};
use crate::domain::ports::{JobHandler, PersistentStore};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::debug;

pub const EXTRACTION_METHOD: &str = "regex";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainExtractionPayload {
    pub comment_id: String,
    pub video_id: String,
    pub comment_text: String,
}

/// Extracts domains from one comment. Pure CPU work, so no dependency
/// gateway is involved.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomainExtractionJob;

impl DomainExtractionJob {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl JobHandler for DomainExtractionJob {
    type Event = DomainExtractionPayload;
    type Item = DomainMention;

    fn job_type(&self) -> JobType {
        JobType::DomainExtraction
    }

    fn dependency(&self) -> Option<&str> {
        None
    }

    async fn fetch(
        &self,
        event: &DomainExtractionPayload,
        _gateway: Option<&DependencyGateway>,
    ) -> Result<Vec<DomainMention>> {
        let mentions = extract_mentions(&event.comment_text);
        debug!(comment_id = %event.comment_id, found = mentions.len(), "domains extracted");
        Ok(mentions)
    }

    /// Upserts the domain and the mention. Returned items are the mentions
    /// whose domain was seen for the first time.
    async fn persist(
        &self,
        store: &dyn PersistentStore,
        event: &DomainExtractionPayload,
        items: &[DomainMention],
    ) -> Result<Vec<DomainMention>> {
        let mut new_domains = Vec::new();
        for mention in items {
            let domain = &mention.domain;
            let outcome = store
                .upsert(
                    tables::DOMAIN,
                    json!({"domain_name": domain.domain_name, "tld": domain.tld}),
                    &["domain_name"],
                )
                .await?;

            store
                .upsert(
                    tables::DOMAIN_MENTION,
                    json!({
                        "domain_name": domain.domain_name,
                        "comment_id": event.comment_id,
                        "video_id": event.video_id,
                        "subdomain": domain.subdomain,
                        "mention_text": mention.mention_text,
                        "confidence_score": 1.0,
                        "extraction_method": EXTRACTION_METHOD,
                    }),
                    &["domain_name", "comment_id"],
                )
                .await?;

            if outcome.is_new() {
                new_domains.push(mention.clone());
            }
        }
        Ok(new_domains)
    }

    fn fan_out(&self, _event: &DomainExtractionPayload, new_items: &[DomainMention]) -> Vec<OutboundEvent> {
        new_items
            .iter()
            .map(|mention| {
                OutboundEvent::new(
                    events::DOMAIN_HTTP_ENRICH,
                    json!({"domain": mention.domain.domain_name}),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::MemoryStore;

    fn payload(comment_id: &str, text: &str) -> DomainExtractionPayload {
        DomainExtractionPayload {
            comment_id: comment_id.to_string(),
            video_id: "v1".to_string(),
            comment_text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_shared_domain_is_new_only_once() {
        let store = MemoryStore::new();
        let job = DomainExtractionJob::new();

        let first = payload("c1", "use code SAVE at shop.example.com");
        let found = job.fetch(&first, None).await.unwrap();
        let fresh = job.persist(&store, &first, &found).await.unwrap();
        assert_eq!(fresh.len(), 1);

        let second = payload("c2", "also on example.com and brand.io");
        let found = job.fetch(&second, None).await.unwrap();
        let fresh = job.persist(&store, &second, &found).await.unwrap();
        let names: Vec<&str> = fresh.iter().map(|m| m.domain.domain_name.as_str()).collect();
        assert_eq!(names, vec!["brand.io"]);

        assert_eq!(store.count(tables::DOMAIN).await.unwrap(), 2);
        assert_eq!(store.count(tables::DOMAIN_MENTION).await.unwrap(), 3);
        let mention = store
            .fetch(tables::DOMAIN_MENTION, "example.com|c1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(mention["subdomain"], "shop");
        assert_eq!(mention["extraction_method"], "regex");
    }

    #[test]
    fn test_fan_out_requests_enrichment() {
        let job = DomainExtractionJob::new();
        let mentions = crate::core::extractor::extract_mentions("brand.io");
        let scheduled = job.fan_out(&payload("c1", "brand.io"), &mentions);
        assert_eq!(scheduled[0].name, events::DOMAIN_HTTP_ENRICH);
        assert_eq!(scheduled[0].payload, json!({"domain": "brand.io"}));
    }
}
