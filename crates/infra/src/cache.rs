use std::future::Future;
use std::time::Duration;

use chatrank_domain::ports::BoxFuture;
use chatrank_domain::ports::cache::{CacheError, CacheStore, ttl_ms};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

/// Redis-backed store shared by every API and worker replica. Each command
/// is bounded by `timeout`.
#[derive(Clone)]
pub struct RedisCacheStore {
    manager: ConnectionManager,
    prefix: String,
    timeout: Duration,
}

impl RedisCacheStore {
    pub async fn connect(
        redis_url: &str,
        prefix: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, CacheError> {
        let client =
            redis::Client::open(redis_url).map_err(|err| CacheError::Unavailable(err.to_string()))?;
        let manager = tokio::time::timeout(timeout, ConnectionManager::new(client))
            .await
            .map_err(|_| CacheError::Timeout)?
            .map_err(|err| CacheError::Unavailable(err.to_string()))?;
        Ok(Self {
            manager,
            prefix: prefix.into(),
            timeout,
        })
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    async fn bounded<T>(
        &self,
        command: impl Future<Output = redis::RedisResult<T>>,
    ) -> Result<T, CacheError> {
        match tokio::time::timeout(self.timeout, command).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(map_redis_error(err)),
            Err(_) => Err(CacheError::Timeout),
        }
    }
}

fn map_redis_error(err: redis::RedisError) -> CacheError {
    if err.is_io_error() || err.is_connection_dropped() || err.is_connection_refusal() {
        CacheError::Unavailable(err.to_string())
    } else {
        CacheError::Store(err.to_string())
    }
}

impl CacheStore for RedisCacheStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            self.bounded(conn.get::<_, Option<Vec<u8>>>(cache_key)).await
        })
    }

    fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut command = redis::cmd("SET");
            command.arg(&cache_key).arg(value).arg("PX").arg(ttl_ms(ttl));
            self.bounded(command.query_async::<_, ()>(&mut conn)).await
        })
    }

    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let mut command = redis::cmd("SET");
            command
                .arg(&cache_key)
                .arg(value)
                .arg("NX")
                .arg("PX")
                .arg(ttl_ms(ttl));
            let stored = self
                .bounded(command.query_async::<_, Option<String>>(&mut conn))
                .await?;
            Ok(stored.is_some())
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let mut conn = self.manager.clone();
            let removed = self.bounded(conn.del::<_, i64>(cache_key)).await?;
            Ok(removed > 0)
        })
    }
}
