pub mod discovery;
pub mod enrichment;
pub mod extraction;
pub mod harvesting;

pub use discovery::{DiscoverySettings, VideoDiscoveryJob, VideoDiscoveryPayload};
pub use enrichment::{HttpEnrichmentJob, HttpEnrichmentPayload};
pub use extraction::{DomainExtractionJob, DomainExtractionPayload};
pub use harvesting::{CommentHarvestJob, CommentHarvestPayload};
