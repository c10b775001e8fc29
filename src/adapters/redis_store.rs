use crate::domain::ports::SharedCounterStore;
use crate::utils::error::{HarvestError, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Script};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info};

/// INCRBY that only sets an expiry on a key that has none yet.
const INCR_WITH_TTL: &str = r#"
local value = redis.call('INCRBY', KEYS[1], ARGV[1])
local ttl = tonumber(ARGV[2])
if ttl > 0 and redis.call('PTTL', KEYS[1]) == -1 then
    redis.call('PEXPIRE', KEYS[1], ttl)
end
return value
"#;

/// Shared counter store on Redis, reachable from every worker process.
#[derive(Clone)]
pub struct RedisCounterStore {
    conn: ConnectionManager,
    incr_script: Script,
}

impl fmt::Debug for RedisCounterStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisCounterStore")
            .field("connection", &"ConnectionManager")
            .finish()
    }
}

fn redis_err(op: &str, e: redis::RedisError) -> HarvestError {
    HarvestError::store(format!("Redis {} failed: {}", op, e))
}

impl RedisCounterStore {
    pub async fn connect(redis_url: &str) -> Result<Self> {
        info!("Connecting to shared counter store at {}", redis_url);

        let client = redis::Client::open(redis_url)
            .map_err(|e| HarvestError::config(format!("Failed to create Redis client: {}", e)))?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| redis_err("connect", e))?;

        Ok(Self {
            conn,
            incr_script: Script::new(INCR_WITH_TTL),
        })
    }
}

fn ttl_ms(ttl: Option<Duration>) -> u64 {
    ttl.map(|t| t.as_millis() as u64).unwrap_or(0)
}

#[async_trait]
impl SharedCounterStore for RedisCounterStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(|e| redis_err("GET", e))
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut cmd = redis::cmd("SET");
        cmd.arg(key).arg(value);
        if ttl_ms(ttl) > 0 {
            cmd.arg("PX").arg(ttl_ms(ttl));
        }
        cmd.query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("SET", e))
    }

    async fn incr_by(&self, key: &str, delta: i64, ttl: Option<Duration>) -> Result<i64> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .incr_script
            .key(key)
            .arg(delta)
            .arg(ttl_ms(ttl))
            .invoke_async(&mut conn)
            .await
            .map_err(|e| redis_err("INCR", e))?;
        debug!(key, delta, value, "counter incremented");
        Ok(value)
    }

    async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        if keys.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn.clone();
        redis::cmd("MGET")
            .arg(keys)
            .query_async(&mut conn)
            .await
            .map_err(|e| redis_err("MGET", e))
    }

    async fn mset(&self, entries: &[(String, String)], ttl: Option<Duration>) -> Result<()> {
        if entries.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in entries {
            let cmd = pipe.cmd("SET").arg(key).arg(value);
            if ttl_ms(ttl) > 0 {
                cmd.arg("PX").arg(ttl_ms(ttl));
            }
            cmd.ignore();
        }
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| redis_err("MSET", e))
    }

    async fn del(&self, keys: &[String]) -> Result<()> {
        if keys.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(keys).await.map_err(|e| redis_err("DEL", e))
    }
}
