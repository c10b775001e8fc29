use crate::domain::model::tables;
use crate::domain::ports::{conflict_key_of, Clock, PersistentStore, UpsertOutcome};
use crate::utils::error::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

/// Memoizes job steps by `(job_id, step_name)`. A step that completed once
/// is replayed from its stored output when the same job is invoked again.
pub struct StepLedger {
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
}

impl StepLedger {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    fn key(job_id: &str, step: &str) -> String {
        format!("{}|{}", job_id, step)
    }

    pub async fn completed<T: DeserializeOwned>(&self, job_id: &str, step: &str) -> Result<Option<T>> {
        let row = self
            .store
            .fetch(tables::JOB_STEPS, &Self::key(job_id, step))
            .await?;
        match row.and_then(|mut r| r.get_mut("output").map(serde_json::Value::take)) {
            Some(output) => Ok(Some(serde_json::from_value(output)?)),
            None => Ok(None),
        }
    }

    pub async fn run<T, F, Fut>(&self, job_id: &str, step: &str, f: F) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(output) = self.completed(job_id, step).await? {
            debug!(job_id, step, "step already completed, replaying output");
            return Ok(output);
        }

        let output = f().await?;
        self.store
            .upsert(
                tables::JOB_STEPS,
                json!({
                    "job_id": job_id,
                    "step_name": step,
                    "output": serde_json::to_value(&output)?,
                    "completed_at": self.clock.now(),
                }),
                &["job_id", "step_name"],
            )
            .await?;
        debug!(job_id, step, "step completed");
        Ok(output)
    }
}

/// The store as one job sees it while persisting.
///
/// Before a row is first written, the job claims it in
/// [`tables::JOB_ITEMS`]. An upsert then reports [`UpsertOutcome::Inserted`]
/// for every row this job claimed, including rows written by an earlier
/// attempt that failed before the persist step completed. Fan-out for those
/// rows is therefore never lost to a retry. Two jobs racing on the same new
/// row may both claim it and both fan out.
pub struct JobScopedStore {
    inner: Arc<dyn PersistentStore>,
    job_id: String,
}

impl JobScopedStore {
    pub fn new(inner: Arc<dyn PersistentStore>, job_id: impl Into<String>) -> Self {
        Self {
            inner,
            job_id: job_id.into(),
        }
    }

    fn claim_key(&self, table: &str, key: &str) -> String {
        format!("{}|{}|{}", self.job_id, table, key)
    }

    async fn claim(&self, table: &str, key: &str) -> Result<()> {
        self.inner
            .upsert(
                tables::JOB_ITEMS,
                json!({"job_id": self.job_id, "table_name": table, "item_key": key}),
                &["job_id", "table_name", "item_key"],
            )
            .await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for JobScopedStore {
    async fn upsert(
        &self,
        table: &str,
        row: serde_json::Value,
        conflict_key: &[&str],
    ) -> Result<UpsertOutcome> {
        let key = conflict_key_of(table, &row, conflict_key)?;
        let existed = self.inner.fetch(table, &key).await?.is_some();
        if !existed {
            self.claim(table, &key).await?;
        }

        let outcome = self.inner.upsert(table, row, conflict_key).await?;
        if outcome.is_new() || !existed {
            return Ok(UpsertOutcome::Inserted);
        }

        let ours = self
            .inner
            .fetch(tables::JOB_ITEMS, &self.claim_key(table, &key))
            .await?
            .is_some();
        if ours {
            debug!(job_id = %self.job_id, table, key = %key, "row written by an earlier attempt");
            return Ok(UpsertOutcome::Inserted);
        }
        Ok(UpsertOutcome::Updated)
    }

    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>> {
        self.inner.fetch(table, key).await
    }

    async fn count(&self, table: &str) -> Result<usize> {
        self.inner.count(table).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::clock::ManualClock;
    use crate::adapters::memory::MemoryStore;
    use crate::utils::error::HarvestError;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn ledger() -> (StepLedger, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (
            StepLedger::new(store.clone(), Arc::new(ManualClock::default())),
            store,
        )
    }

    #[tokio::test]
    async fn test_completed_step_is_not_recomputed() {
        let (ledger, store) = ledger();
        let runs = AtomicU32::new(0);

        for _ in 0..2 {
            let out: Vec<String> = ledger
                .run("job-1", "fetch", || async {
                    runs.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, HarvestError>(vec!["v1".to_string()])
                })
                .await
                .unwrap();
            assert_eq!(out, vec!["v1"]);
        }

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.count(tables::JOB_STEPS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_step_is_not_recorded() {
        let (ledger, store) = ledger();

        let err = ledger
            .run::<u32, _, _>("job-1", "persist", || async {
                Err(HarvestError::persistence("video", "connection refused"))
            })
            .await;
        assert!(err.is_err());
        assert_eq!(store.count(tables::JOB_STEPS).await.unwrap(), 0);

        let retried = ledger.run("job-1", "persist", || async { Ok::<_, HarvestError>(7u32) }).await.unwrap();
        assert_eq!(retried, 7);
    }

    #[tokio::test]
    async fn test_steps_are_scoped_by_job() {
        let (ledger, _) = ledger();
        ledger.run("job-1", "fetch", || async { Ok::<_, HarvestError>(1u32) }).await.unwrap();
        let other: u32 = ledger.run("job-2", "fetch", || async { Ok::<_, HarvestError>(2u32) }).await.unwrap();
        assert_eq!(other, 2);
        assert_eq!(ledger.completed::<u32>("job-1", "fetch").await.unwrap(), Some(1));
        assert_eq!(ledger.completed::<u32>("job-1", "fan-out").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scoped_store_remembers_rows_from_an_earlier_attempt() {
        let store = Arc::new(MemoryStore::new());
        let row = json!({"video_id": "v1", "url": "u"});

        let first_attempt = JobScopedStore::new(store.clone(), "job-1");
        let outcome = first_attempt.upsert(tables::VIDEO, row.clone(), &["video_id"]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        // Same job retried: the row is still its own.
        let retry = JobScopedStore::new(store.clone(), "job-1");
        let outcome = retry.upsert(tables::VIDEO, row.clone(), &["video_id"]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        // Any other job only updates it.
        let other = JobScopedStore::new(store.clone(), "job-2");
        let outcome = other.upsert(tables::VIDEO, row, &["video_id"]).await.unwrap();
        assert_eq!(outcome, UpsertOutcome::Updated);

        assert_eq!(store.count(tables::VIDEO).await.unwrap(), 1);
        assert!(store
            .fetch(tables::JOB_ITEMS, "job-1|video|v1")
            .await
            .unwrap()
            .is_some());
        assert_eq!(store.count(tables::JOB_ITEMS).await.unwrap(), 1);
    }
}
