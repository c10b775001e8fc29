//! In-process implementations of the ports. Used by tests and by
//! single-process runs of the CLI.

use crate::adapters::clock::SystemClock;
use crate::domain::model::OutboundEvent;
use crate::domain::ports::{
    conflict_key_of, Clock, EventBus, PersistentStore, SharedCounterStore, UpsertOutcome,
};
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

fn lock<'a, T>(mutex: &'a Mutex<T>, what: &str) -> Result<MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| HarvestError::store(format!("{} lock poisoned", what)))
}

#[derive(Debug, Clone)]
struct CounterEntry {
    value: String,
    expires_at_ms: Option<i64>,
}

/// TTL-aware counter store. Expiry is evaluated lazily against the
/// injected clock.
pub struct MemoryCounterStore {
    entries: Mutex<HashMap<String, CounterEntry>>,
    clock: Arc<dyn Clock>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            clock,
        }
    }

    fn expiry(&self, ttl: Option<Duration>) -> Option<i64> {
        ttl.map(|t| self.clock.now_ms() + t.as_millis() as i64)
    }

    fn live_value(&self, entries: &mut HashMap<String, CounterEntry>, key: &str) -> Option<String> {
        let now = self.clock.now_ms();
        let expired = match entries.get(key) {
            Some(entry) => entry.expires_at_ms.is_some_and(|at| at <= now),
            None => return None,
        };
        if expired {
            entries.remove(key);
            None
        } else {
            entries.get(key).map(|e| e.value.clone())
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemoryCounterStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SharedCounterStore for MemoryCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut entries = lock(&self.entries, "counter store")?;
        Ok(self.live_value(&mut entries, key))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at_ms = self.expiry(ttl);
        let mut entries = lock(&self.entries, "counter store")?;
        entries.insert(
            key.to_string(),
            CounterEntry {
                value: value.to_string(),
                expires_at_ms,
            },
        );
        Ok(())
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let created_expiry = self.expiry(ttl);
        let mut entries = lock(&self.entries, "counter store")?;
        let current = self.live_value(&mut entries, key);
        let next = match &current {
            Some(raw) => {
                raw.parse::<i64>()
                    .map_err(|_| HarvestError::store(format!("value at '{}' is not an integer", key)))?
                    + delta
            }
            None => delta,
        };
        let expires_at_ms = match current {
            Some(_) => entries.get(key).and_then(|e| e.expires_at_ms),
            None => created_expiry,
        };
        entries.insert(
            key.to_string(),
            CounterEntry {
                value: next.to_string(),
                expires_at_ms,
            },
        );
        Ok(next)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let mut entries = lock(&self.entries, "counter store")?;
        Ok(keys
            .iter()
            .map(|key| self.live_value(&mut entries, key))
            .collect())
    }

    async fn mset(&self, pairs: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        let expires_at_ms = self.expiry(ttl);
        let mut entries = lock(&self.entries, "counter store")?;
        for (key, value) in pairs {
            entries.insert(
                key.clone(),
                CounterEntry {
                    value: value.clone(),
                    expires_at_ms,
                },
            );
        }
        Ok(())
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        let mut entries = lock(&self.entries, "counter store")?;
        for key in keys {
            entries.remove(key);
        }
        Ok(())
    }
}

/// Tables of JSON rows keyed by their joined conflict key.
#[derive(Debug, Default)]
pub struct MemoryStore {
    tables: Mutex<HashMap<String, BTreeMap<String, serde_json::Value>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rows(&self, table: &str) -> Vec<serde_json::Value> {
        self.tables
            .lock()
            .map(|t| t.get(table).map(|rows| rows.values().cloned().collect()).unwrap_or_default())
            .unwrap_or_default()
    }
}

/// Shallow merge: fields present in `incoming` overwrite `existing`.
pub(crate) fn merge_row(existing: &mut serde_json::Value, incoming: serde_json::Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(target), serde_json::Value::Object(source)) => {
            for (k, v) in source {
                target.insert(k, v);
            }
        }
        (_, other) => *existing = other,
    }
}

#[async_trait]
impl PersistentStore for MemoryStore {
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
        let mut tables = lock(&self.tables, "memory store")?;
        let rows = tables.entry(table.to_string()).or_default();
        match rows.get_mut(&key) {
            Some(existing) => {
                merge_row(existing, row);
                Ok(UpsertOutcome::Updated)
            }
            None => {
                rows.insert(key, row);
                Ok(UpsertOutcome::Inserted)
            }
        }
    }

    async fn fetch(&self, table: &str, key: &str) -> Result<Option<serde_json::Value>> {
        let tables = lock(&self.tables, "memory store")?;
        Ok(tables.get(table).and_then(|rows| rows.get(key)).cloned())
    }

    async fn count(&self, table: &str) -> Result<usize> {
        let tables = lock(&self.tables, "memory store")?;
        Ok(tables.get(table).map(|rows| rows.len()).unwrap_or(0))
    }
}

/// Records every event it is asked to send.
#[derive(Debug, Default)]
pub struct MemoryEventBus {
    sent: Mutex<Vec<OutboundEvent>>,
}

impl MemoryEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn events_named(&self, name: &str) -> Vec<OutboundEvent> {
        self.events().into_iter().filter(|e| e.name == name).collect()
    }
}

#[async_trait]
impl EventBus for MemoryEventBus {
    async fn send(&self, event: OutboundEvent) -> Result<()> {
        tracing::debug!(event = %event.name, "queued event");
        lock(&self.sent, "event bus")?.push(event);
        Ok(())
    }
}
