pub mod circuit_breaker;
pub mod dead_letter;
pub mod extractor;
pub mod gateway;
pub mod kill_switch;
pub mod orchestrator;
pub mod public_suffix;
pub mod rate_limiter;
pub mod retry;
pub mod steps;

pub use crate::domain::model::{JobInvocation, JobOutcome, NormalizedDomain};
pub use crate::domain::ports::JobHandler;
pub use crate::utils::error::Result;
pub use circuit_breaker::CircuitBreaker;
pub use dead_letter::DeadLetterSink;
pub use gateway::DependencyGateway;
pub use kill_switch::KillSwitch;
pub use orchestrator::JobOrchestrator;
pub use rate_limiter::TokenBucketLimiter;
pub use retry::{RetryController, RetryPolicy, RetryReport};
pub use steps::StepLedger;
