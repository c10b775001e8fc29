pub mod adapters;
pub mod app;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::Cli;
pub use config::HarvestConfig;

pub use app::jobs::{CommentHarvestJob, DomainExtractionJob, HttpEnrichmentJob, VideoDiscoveryJob};
pub use core::{
    CircuitBreaker, DependencyGateway, JobOrchestrator, KillSwitch, RetryController, TokenBucketLimiter,
};
pub use utils::error::{HarvestError, RemoteError, Result};
