//! The `KvStore` capability (spec §6): hash/set/scalar primitives plus an
//! atomic "execute" and a health check. The registry (C3) and auth core
//! (C4) are built against this trait only; the concrete Redis dependency
//! lives entirely in [`RedisKvStore`], built on the teacher's
//! [`super::redis_pool::RedisPool`].

use async_trait::async_trait;
use redis::AsyncCommands;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::error::KvError;

use super::redis_pool::RedisPool;

/// Hash / set / scalar key-value capability with one atomic compound
/// operation, matching spec.md §6's KVStore description.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError>;
    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError>;
    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError>;
    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError>;

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError>;
    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError>;
    async fn scard(&self, key: &str) -> Result<u64, KvError>;

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), KvError>;
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;
    async fn del(&self, key: &str) -> Result<(), KvError>;

    /// Atomically reads `key` and deletes it, returning the prior value if
    /// present. Used by the rotation-atomicity compare-and-delete (§4.3):
    /// only the caller that observes `Some(_)` may proceed with rotation.
    async fn take(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn health_check(&self) -> bool;
}

/// Redis-backed implementation, reusing the teacher's `RedisPool` for
/// connection lifecycle, retry and health-check behavior.
pub struct RedisKvStore {
    pool: RedisPool,
}

impl RedisKvStore {
    pub fn new(pool: RedisPool) -> Self {
        Self { pool }
    }

    fn unavailable(err: redis::RedisError) -> KvError {
        KvError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        let key = key.to_string();
        let field = field.to_string();
        let value = value.to_string();
        self.pool
            .execute(|mut conn| async move {
                let _: () = conn.hset(&key, &field, &value).await?;
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        let field = field.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: Option<String> = conn.hget(&key, &field).await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: HashMap<String, String> = conn.hgetall(&key).await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        let key = key.to_string();
        let field = field.to_string();
        self.pool
            .execute(|mut conn| async move {
                let _: () = conn.hdel(&key, &field).await?;
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        let key = key.to_string();
        let member = member.to_string();
        self.pool
            .execute(|mut conn| async move {
                let _: () = conn.sadd(&key, &member).await?;
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        let key = key.to_string();
        let member = member.to_string();
        self.pool
            .execute(|mut conn| async move {
                let _: () = conn.srem(&key, &member).await?;
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: Vec<String> = conn.smembers(&key).await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: u64 = conn.scard(&key).await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn set(&self, key: &str, value: &str, ttl_seconds: Option<u64>) -> Result<(), KvError> {
        let key = key.to_string();
        let value = value.to_string();
        self.pool
            .execute(|mut conn| async move {
                match ttl_seconds {
                    Some(ttl) => {
                        let _: () = conn.set_ex(&key, &value, ttl).await?;
                    }
                    None => {
                        let _: () = conn.set(&key, &value).await?;
                    }
                }
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: Option<String> = conn.get(&key).await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let _: () = conn.del(&key).await?;
                Ok(((), conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn take(&self, key: &str) -> Result<Option<String>, KvError> {
        let key = key.to_string();
        self.pool
            .execute(|mut conn| async move {
                let v: Option<String> = redis::pipe()
                    .atomic()
                    .get(&key)
                    .del(&key)
                    .ignore()
                    .query_async(&mut conn)
                    .await?;
                Ok((v, conn))
            })
            .await
            .map_err(Self::unavailable)
    }

    async fn health_check(&self) -> bool {
        self.pool.health_check().await.is_healthy
    }
}

/// In-memory `KvStore` for unit/integration tests, analogous to the
/// teacher's `JwtConfig::for_test()` pattern: no network, deterministic.
#[derive(Default)]
pub struct InMemoryKvStore {
    hashes: Arc<Mutex<HashMap<String, HashMap<String, String>>>>,
    sets: Arc<Mutex<HashMap<String, std::collections::HashSet<String>>>>,
    scalars: Arc<Mutex<HashMap<String, String>>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hset(&self, key: &str, field: &str, value: &str) -> Result<(), KvError> {
        self.hashes
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(field.to_string(), value.to_string());
        Ok(())
    }

    async fn hget(&self, key: &str, field: &str) -> Result<Option<String>, KvError> {
        Ok(self
            .hashes
            .lock()
            .await
            .get(key)
            .and_then(|h| h.get(field).cloned()))
    }

    async fn hgetall(&self, key: &str) -> Result<HashMap<String, String>, KvError> {
        Ok(self.hashes.lock().await.get(key).cloned().unwrap_or_default())
    }

    async fn hdel(&self, key: &str, field: &str) -> Result<(), KvError> {
        if let Some(h) = self.hashes.lock().await.get_mut(key) {
            h.remove(field);
        }
        Ok(())
    }

    async fn sadd(&self, key: &str, member: &str) -> Result<(), KvError> {
        self.sets
            .lock()
            .await
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
        Ok(())
    }

    async fn srem(&self, key: &str, member: &str) -> Result<(), KvError> {
        if let Some(s) = self.sets.lock().await.get_mut(key) {
            s.remove(member);
        }
        Ok(())
    }

    async fn smembers(&self, key: &str) -> Result<Vec<String>, KvError> {
        Ok(self
            .sets
            .lock()
            .await
            .get(key)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn scard(&self, key: &str) -> Result<u64, KvError> {
        Ok(self
            .sets
            .lock()
            .await
            .get(key)
            .map(|s| s.len() as u64)
            .unwrap_or(0))
    }

    async fn set(&self, key: &str, value: &str, _ttl_seconds: Option<u64>) -> Result<(), KvError> {
        self.scalars
            .lock()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.scalars.lock().await.get(key).cloned())
    }

    async fn del(&self, key: &str) -> Result<(), KvError> {
        self.scalars.lock().await.remove(key);
        Ok(())
    }

    async fn take(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.scalars.lock().await.remove(key))
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn hash_roundtrip() {
        let kv = InMemoryKvStore::new();
        kv.hset("h", "f1", "v1").await.unwrap();
        assert_eq!(kv.hget("h", "f1").await.unwrap(), Some("v1".to_string()));
        kv.hdel("h", "f1").await.unwrap();
        assert_eq!(kv.hget("h", "f1").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_roundtrip() {
        let kv = InMemoryKvStore::new();
        kv.sadd("s", "m1").await.unwrap();
        kv.sadd("s", "m2").await.unwrap();
        assert_eq!(kv.scard("s").await.unwrap(), 2);
        kv.srem("s", "m1").await.unwrap();
        assert_eq!(kv.scard("s").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn take_is_destructive() {
        let kv = InMemoryKvStore::new();
        kv.set("k", "v", None).await.unwrap();
        assert_eq!(kv.take("k").await.unwrap(), Some("v".to_string()));
        assert_eq!(kv.take("k").await.unwrap(), None);
    }
}
