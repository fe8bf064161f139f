use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::clock::{Clock, SystemClock};
use crate::ports::BoxFuture;
use crate::ports::cache::{CacheError, CacheStore, ttl_ms};

/// Expired entries are dropped on read of their key and by a sweep that runs
/// on write at most once a second of clock time.
#[derive(Clone)]
pub struct InMemoryCacheStore {
    prefix: String,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<MemoryState>>,
}

const SWEEP_INTERVAL_MS: i64 = 1_000;

#[derive(Clone, Debug)]
struct MemoryEntry {
    value: Vec<u8>,
    expires_at_ms: i64,
}

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<String, MemoryEntry>,
    next_sweep_ms: i64,
}

impl MemoryState {
    fn sweep(&mut self, now: i64) {
        if now < self.next_sweep_ms {
            return;
        }
        self.entries.retain(|_, entry| entry.expires_at_ms > now);
        self.next_sweep_ms = now.saturating_add(SWEEP_INTERVAL_MS);
    }

    fn insert(&mut self, key: String, value: Vec<u8>, expires_at_ms: i64, now: i64) {
        self.sweep(now);
        self.entries.insert(
            key,
            MemoryEntry {
                value,
                expires_at_ms,
            },
        );
    }
}

impl InMemoryCacheStore {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self::with_clock(prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            prefix: prefix.into(),
            clock,
            inner: Arc::new(Mutex::new(MemoryState::default())),
        }
    }

    fn cache_key(&self, key: &str) -> String {
        format!("{}:{key}", self.prefix)
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryState>, CacheError> {
        self.inner
            .lock()
            .map_err(|_| CacheError::Store("in-memory cache lock poisoned".into()))
    }

    fn expiry(&self, ttl: Duration) -> i64 {
        self.clock.now_ms().saturating_add(ttl_ms(ttl) as i64)
    }

    pub fn len(&self) -> usize {
        let now = self.clock.now_ms();
        self.lock()
            .map(|guard| {
                guard
                    .entries
                    .values()
                    .filter(|entry| entry.expires_at_ms > now)
                    .count()
            })
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl CacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> BoxFuture<'_, Result<Option<Vec<u8>>, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let now = self.clock.now_ms();
            let mut guard = self.lock()?;
            if let Some(entry) = guard.entries.get(&cache_key) {
                if entry.expires_at_ms <= now {
                    guard.entries.remove(&cache_key);
                    return Ok(None);
                }
                return Ok(Some(entry.value.clone()));
            }
            Ok(None)
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
            let now = self.clock.now_ms();
            let expires_at_ms = self.expiry(ttl);
            let mut guard = self.lock()?;
            guard.insert(cache_key, value, expires_at_ms, now);
            Ok(())
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
            let now = self.clock.now_ms();
            let expires_at_ms = self.expiry(ttl);
            let mut guard = self.lock()?;
            if let Some(entry) = guard.entries.get(&cache_key) {
                if entry.expires_at_ms > now {
                    return Ok(false);
                }
            }
            guard.insert(cache_key, value, expires_at_ms, now);
            Ok(true)
        })
    }

    fn delete(&self, key: &str) -> BoxFuture<'_, Result<bool, CacheError>> {
        let cache_key = self.cache_key(key);
        Box::pin(async move {
            let now = self.clock.now_ms();
            let mut guard = self.lock()?;
            Ok(guard
                .entries
                .remove(&cache_key)
                .is_some_and(|entry| entry.expires_at_ms > now))
        })
    }
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    serde_json::to_vec(value).map_err(|err| CacheError::Serialization(err.to_string()))
}

pub fn decode_json<T: DeserializeOwned>(payload: &[u8]) -> Result<T, CacheError> {
    serde_json::from_slice(payload).map_err(|err| CacheError::Serialization(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn store() -> (ManualClock, InMemoryCacheStore) {
        let clock = ManualClock::new(1_700_000_000_000);
        let store = InMemoryCacheStore::with_clock("test", Arc::new(clock.clone()));
        (clock, store)
    }

    #[tokio::test]
    async fn entries_expire_with_the_clock() {
        let (clock, store) = store();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        clock.advance(Duration::from_millis(4_999));
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
        clock.advance(Duration::from_millis(1));
        assert_eq!(store.get("k").await.unwrap(), None);
    }

    #[tokio::test]
    async fn set_if_absent_respects_live_entries_only() {
        let (clock, store) = store();
        assert!(
            store
                .set_if_absent("claim", b"1".to_vec(), Duration::from_secs(1))
                .await
                .unwrap()
        );
        assert!(
            !store
                .set_if_absent("claim", b"2".to_vec(), Duration::from_secs(1))
                .await
                .unwrap()
        );
        clock.advance(Duration::from_secs(2));
        assert!(
            store
                .set_if_absent("claim", b"3".to_vec(), Duration::from_secs(1))
                .await
                .unwrap()
        );
        assert_eq!(store.get("claim").await.unwrap(), Some(b"3".to_vec()));
    }

    #[tokio::test]
    async fn delete_reports_live_removal() {
        let (_clock, store) = store();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(store.delete("k").await.unwrap());
        assert!(!store.delete("k").await.unwrap());
        assert!(store.is_empty());
    }

    fn resident(store: &InMemoryCacheStore) -> usize {
        store.inner.lock().unwrap().entries.len()
    }

    #[tokio::test]
    async fn writes_sweep_expired_entries_for_other_keys() {
        let (clock, store) = store();
        for i in 0..1000 {
            store
                .set_with_ttl(&format!("rate_limit:10.0.{i}"), b"1".to_vec(), Duration::from_secs(10))
                .await
                .unwrap();
        }
        assert_eq!(resident(&store), 1000);

        clock.advance(Duration::from_secs(3600));
        store
            .set_with_ttl("rate_limit:10.1.0", b"1".to_vec(), Duration::from_secs(10))
            .await
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(resident(&store), 1);
    }

    #[tokio::test]
    async fn claim_write_also_sweeps() {
        let (clock, store) = store();
        store
            .set_with_ttl("blocked:a", b"1".to_vec(), Duration::from_secs(5))
            .await
            .unwrap();
        clock.advance(Duration::from_secs(6));
        assert!(
            store
                .set_if_absent("rollover:2025-01", b"1".to_vec(), Duration::from_secs(60))
                .await
                .unwrap()
        );
        assert_eq!(resident(&store), 1);
    }

    #[tokio::test]
    async fn zero_ttl_is_rounded_up() {
        let (_clock, store) = store();
        store
            .set_with_ttl("k", b"v".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(store.get("k").await.unwrap(), Some(b"v".to_vec()));
    }
}
