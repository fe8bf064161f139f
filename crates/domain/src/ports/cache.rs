use std::time::Duration;
use thiserror::Error;

use super::BoxFuture;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache store unavailable: {0}")]
    Unavailable(String),
    #[error("cache store timed out")]
    Timeout,
    #[error("cache serialization error: {0}")]
    Serialization(String),
    #[error("cache store error: {0}")]
    Store(String),
}

/// Key/value store with per-key expiry. Keys passed in are unprefixed;
/// implementations own their namespace.
pub trait CacheStore: Send + Sync {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>>;

    fn set_with_ttl(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<(), CacheError>>;

    /// Stores only when the key is absent or expired. Returns whether it stored.
    fn set_if_absent(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> BoxFuture<'_, Result<bool, CacheError>>;

    /// Returns whether a live entry was removed.
    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>>;
}

pub fn ttl_ms(ttl: Duration) -> u64 {
    let ms = ttl.as_millis() as u64;
    if ms == 0 { 1 } else { ms }
}
