//! Side calls whose failure must never fail the job that issued them
//! (status records, alerts, audit logs).

use crate::utils::error::Result;
use std::future::Future;
use std::time::Duration;

/// What happened to a best-effort side call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BestEffort<T> {
    Done(T),
    Failed { label: String, error: String },
}

impl<T> BestEffort<T> {
    pub fn is_done(&self) -> bool {
        matches!(self, BestEffort::Done(_))
    }

    pub fn into_option(self) -> Option<T> {
        match self {
            BestEffort::Done(value) => Some(value),
            BestEffort::Failed { .. } => None,
        }
    }
}

fn failed<T>(label: &str, error: String) -> BestEffort<T> {
    tracing::warn!(side_call = label, error = %error, "best-effort call failed");
    BestEffort::Failed {
        label: label.to_string(),
        error,
    }
}

/// Awaits `fut` and downgrades its error to a warning.
pub async fn best_effort<T, F>(label: &str, fut: F) -> BestEffort<T>
where
    F: Future<Output = Result<T>>,
{
    match fut.await {
        Ok(value) => BestEffort::Done(value),
        Err(e) => failed(label, e.to_string()),
    }
}

/// Like [`best_effort`], but gives up on `fut` once `limit` has passed so a
/// stalled store cannot hold the caller.
pub async fn best_effort_within<T, F>(label: &str, limit: Duration, fut: F) -> BestEffort<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(Ok(value)) => BestEffort::Done(value),
        Ok(Err(e)) => failed(label, e.to_string()),
        Err(_) => failed(label, format!("timed out after {}ms", limit.as_millis())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::error::HarvestError;

    #[tokio::test]
    async fn test_failure_is_reported_not_raised() {
        let outcome: BestEffort<()> =
            best_effort("alert", async { Err(HarvestError::store("down")) }).await;

        match outcome {
            BestEffort::Failed { label, error } => {
                assert_eq!(label, "alert");
                assert!(error.contains("down"));
            }
            BestEffort::Done(_) => panic!("expected failure"),
        }
    }

    #[tokio::test]
    async fn test_stalled_call_is_abandoned() {
        let outcome: BestEffort<()> = best_effort_within(
            "job_status",
            Duration::from_millis(20),
            std::future::pending(),
        )
        .await;

        match outcome {
            BestEffort::Failed { label, error } => {
                assert_eq!(label, "job_status");
                assert!(error.contains("timed out after 20ms"));
            }
            BestEffort::Done(_) => panic!("expected timeout"),
        }

        let quick = best_effort_within("job_status", Duration::from_secs(1), async { Ok(1) }).await;
        assert_eq!(quick.into_option(), Some(1));
    }

    #[tokio::test]
    async fn test_success_passes_value_through() {
        let outcome = best_effort("status", async { Ok(7) }).await;
        assert!(outcome.is_done());
        assert_eq!(outcome.into_option(), Some(7));
    }
}
