//! Redis-backed pool store shared across service instances.
//!
//! Each pool lives in a hash `{prefix}:{content}:{platform}` with fields
//! `version` and `pool` (JSON). Commits run as a Lua compare-and-swap so two
//! writers holding the same version cannot both succeed.
//!
//! One connection is opened lazily and reused; it is dropped and reopened on
//! the next call after an I/O failure.

use parking_lot::Mutex;
use redis::Commands;
use tracing::{debug, info, warn};
use variant_core::config::RedisConfig;
use variant_core::{Pool, PoolKey, VariantError, VariantResult};

use crate::store::{conflict, PoolStore};

/// Returns the new version on success, or `-(found + 1)` on a version mismatch.
const COMMIT_SCRIPT: &str = r#"
local current = redis.call('HGET', KEYS[1], 'version')
if not current then current = '0' end
if current ~= ARGV[1] then
  return -(tonumber(current) + 1)
end
redis.call('HSET', KEYS[1], 'version', ARGV[2], 'pool', ARGV[3])
redis.call('SADD', KEYS[2], ARGV[4])
return tonumber(ARGV[2])
"#;

pub struct RedisPoolStore {
    client: redis::Client,
    conn: Mutex<Option<redis::Connection>>,
    prefix: String,
    commit_script: redis::Script,
}

fn storage(e: redis::RedisError) -> VariantError {
    VariantError::Storage(e.to_string())
}

impl RedisPoolStore {
    pub fn new(config: &RedisConfig) -> VariantResult<Self> {
        info!(url = %config.url, prefix = %config.key_prefix, "Opening Redis pool store");
        let client = redis::Client::open(config.url.as_str()).map_err(storage)?;
        Ok(Self {
            client,
            conn: Mutex::new(None),
            prefix: config.key_prefix.clone(),
            commit_script: redis::Script::new(COMMIT_SCRIPT),
        })
    }

    pub fn pool_key(&self, key: &PoolKey) -> String {
        format!("{}:{}:{}", self.prefix, key.content_id, key.platform)
    }

    pub fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }

    fn with_connection<T>(
        &self,
        f: impl FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    ) -> VariantResult<T> {
        let mut slot = self.conn.lock();
        let mut conn = match slot.take() {
            Some(conn) => conn,
            None => {
                metrics::counter!("pool_store.redis.connects").increment(1);
                self.client.get_connection().map_err(storage)?
            }
        };
        let result = f(&mut conn);
        match &result {
            Err(e) if e.is_io_error() || e.is_connection_dropped() => {
                warn!(error = %e, "Redis connection lost, reconnecting on next call");
            }
            _ => *slot = Some(conn),
        }
        result.map_err(storage)
    }
}

impl PoolStore for RedisPoolStore {
    fn load(&self, key: &PoolKey) -> VariantResult<Option<Pool>> {
        let pool_key = self.pool_key(key);
        let raw: Option<String> = self.with_connection(|conn| conn.hget(&pool_key, "pool"))?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => {
                debug!(pool = %key, "pool not in Redis");
                Ok(None)
            }
        }
    }

    fn commit(&self, pool: &Pool) -> VariantResult<u64> {
        let mut next = pool.clone();
        next.version = pool.version + 1;
        let json = serde_json::to_string(&next)?;
        let member = serde_json::to_string(&pool.key)?;

        let mut invocation = self.commit_script.key(self.pool_key(&pool.key));
        invocation
            .key(self.index_key())
            .arg(pool.version)
            .arg(next.version)
            .arg(json)
            .arg(member);
        let result: i64 = self.with_connection(|conn| invocation.invoke(conn))?;

        if result < 0 {
            let found = (-result - 1) as u64;
            return Err(conflict(&pool.key, pool.version, found));
        }
        Ok(result as u64)
    }

    fn keys(&self) -> VariantResult<Vec<PoolKey>> {
        let index_key = self.index_key();
        let members: Vec<String> = self.with_connection(|conn| conn.smembers(&index_key))?;
        members
            .iter()
            .map(|m| serde_json::from_str(m).map_err(VariantError::from))
            .collect()
    }
}
