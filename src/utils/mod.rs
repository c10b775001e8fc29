pub mod best_effort;
pub mod error;
pub mod logger;
pub mod validation;
