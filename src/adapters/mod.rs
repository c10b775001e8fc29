// Adapters layer: concrete implementations of the domain ports.

pub mod alerts;
pub mod clock;
pub mod file_store;
pub mod memory;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod scraper;
pub mod site_checker;

pub use alerts::{SlackAlertSink, TracingAlertSink};
pub use clock::{ManualClock, SystemClock};
pub use file_store::JsonFileStore;
pub use memory::{MemoryCounterStore, MemoryEventBus, MemoryStore};
#[cfg(feature = "redis")]
pub use redis_store::RedisCounterStore;
pub use scraper::HttpScraperClient;
pub use site_checker::HttpSiteChecker;
