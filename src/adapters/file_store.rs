use crate::adapters::memory::merge_row;
use crate::domain::ports::{conflict_key_of, PersistentStore, UpsertOutcome};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

type Table = BTreeMap<String, serde_json::Value>;

/// Persistent store backed by one JSON document per table under a data
/// directory. Writes are serialized within the process.
#[derive(Debug)]
pub struct JsonFileStore {
    base_path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn table_path(&self, table: &str) -> Result<PathBuf> {
        if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(HarvestError::persistence(table, "invalid table name"));
        }
        Ok(self.base_path.join(format!("{}.json", table)))
    }

    async fn read_table(&self, table: &str) -> Result<Table> {
        let path = self.table_path(table)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| HarvestError::persistence(table, format!("corrupt table file: {}", e))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Table::new()),
            Err(e) => Err(HarvestError::Io(e)),
        }
    }

    async fn write_table(&self, table: &str, rows: &Table) -> Result<()> {
        let path = self.table_path(table)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let data = serde_json::to_vec_pretty(rows)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }
}

#[async_trait]
impl PersistentStore for JsonFileStore {
    async fn upsert(
        &self,
        table: &str,
        row: serde_json::Value,
        conflict_key: &[&str],
    ) -> Result<UpsertOutcome> {
        if !row.is_object() {
            return Err(HarvestError::persistence(table, "row must be a JSON object"));
        }
        let key = conflict_key_of(table, &row, conflict_key)?;

        let _guard = self.write_lock.lock().await;
        let mut rows = self.read_table(table).await?;
        let outcome = match rows.get_mut(&key) {
            Some(existing) => {
                merge_row(existing, row);
                UpsertOutcome::Updated
            }
            None => {
                rows.insert(key, row);
                UpsertOutcome::Inserted
            }
        };
        self.write_table(table, &rows).await?;
        Ok(outcome)
    }

    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let rows = self.read_table(table).await?;
        Ok(rows.get(key).cloned())
    }

    async fn count(&self, table: &str) -> Result<usize> {
        Ok(self.read_table(table).await?.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_upsert_persists_across_instances() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());

        let outcome = store
            .upsert("domain", json!({"domain_name": "example.com", "tld": "com"}), &["domain_name"])
            .await
            .unwrap();
        assert_eq!(outcome, UpsertOutcome::Inserted);

        let reopened = JsonFileStore::new(dir.path());
        assert_eq!(reopened.count("domain").await.unwrap(), 1);
        let row = reopened.fetch("domain", "example.com").await.unwrap().unwrap();
        assert_eq!(row["tld"], "com");
    }

    #[tokio::test]
    async fn test_repeated_upsert_keeps_one_row() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        let row = json!({"comment_id": "c1", "text": "see example.com"});

        store.upsert("comment", row.clone(), &["comment_id"]).await.unwrap();
        let second = store.upsert("comment", row, &["comment_id"]).await.unwrap();

        assert_eq!(second, UpsertOutcome::Updated);
        assert_eq!(store.count("comment").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_missing_table_is_empty() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path().join("nested"));
        assert_eq!(store.count("video").await.unwrap(), 0);
        assert!(store.fetch("video", "v1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_rejects_path_like_table_names() {
        let dir = TempDir::new().unwrap();
        let store = JsonFileStore::new(dir.path());
        assert!(store.count("../etc").await.is_err());
    }
}
