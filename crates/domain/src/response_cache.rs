//! Read-through cache for endpoint payloads with TTLs chosen by how settled
//! the underlying data window is.

use std::fmt::{self, Write as _};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::format_description::well_known::Rfc3339;
use time::{OffsetDateTime, UtcOffset};

use crate::DomainResult;
use crate::cache::encode_json;
use crate::error::DomainError;
use crate::period::YearMonth;
use crate::ports::cache::CacheStore;

const KEY_NAMESPACE: &str = "resp";
const ABSENT: &str = "!";

/// Deterministic key from an endpoint name and every parameter that shapes
/// its result. An absent parameter renders differently from any present
/// value, including the empty string.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheKey {
    endpoint: &'static str,
    rendered: String,
}

impl CacheKey {
    pub fn new(endpoint: &'static str) -> Self {
        Self {
            endpoint,
            rendered: format!("{KEY_NAMESPACE}:{endpoint}"),
        }
    }

    pub fn endpoint(&self) -> &'static str {
        self.endpoint
    }

    pub fn as_str(&self) -> &str {
        &self.rendered
    }

    pub fn param<T: fmt::Display>(mut self, name: &str, value: Option<T>) -> Self {
        match value {
            Some(value) => {
                let _ = write!(self.rendered, "|{name}={}", escape(&value.to_string()));
            }
            None => {
                let _ = write!(self.rendered, "|{name}{ABSENT}");
            }
        }
        self
    }

    /// Order-insensitive list parameter: values are sorted and deduplicated.
    pub fn param_set<T: fmt::Display>(mut self, name: &str, values: Option<&[T]>) -> Self {
        let Some(values) = values else {
            let _ = write!(self.rendered, "|{name}{ABSENT}");
            return self;
        };
        let mut rendered: Vec<String> = values.iter().map(|value| escape(&value.to_string())).collect();
        rendered.sort();
        rendered.dedup();
        let _ = write!(self.rendered, "|{name}=[{}]", rendered.join(","));
        self
    }

    /// Instants are normalized to UTC so equal cutoffs share a key.
    pub fn param_instant(self, name: &str, value: Option<OffsetDateTime>) -> Self {
        let rendered = value.map(|at| {
            at.to_offset(UtcOffset::UTC)
                .format(&Rfc3339)
                .unwrap_or_else(|_| at.unix_timestamp_nanos().to_string())
        });
        self.param(name, rendered)
    }

    pub fn param_month(self, month: YearMonth) -> Self {
        self.param("month", Some(month))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.rendered)
    }
}

fn escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '%' => out.push_str("%25"),
            '|' => out.push_str("%7C"),
            ',' => out.push_str("%2C"),
            '!' => out.push_str("%21"),
            '[' => out.push_str("%5B"),
            ']' => out.push_str("%5D"),
            _ => out.push(ch),
        }
    }
    out
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Freshness {
    /// Window still accumulating data.
    Live,
    /// Window whose end has passed.
    Finalized,
    /// Current calendar month.
    OpenMonth,
    /// Reference data keyed by immutable identifiers.
    Static,
    SnapshotList,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FreshnessPolicy {
    pub live_ttl: Duration,
    pub finalized_ttl: Duration,
    pub open_month_ttl: Duration,
    pub static_ttl: Duration,
    pub snapshot_list_ttl: Duration,
    pub reporting_offset: UtcOffset,
}

impl Default for FreshnessPolicy {
    fn default() -> Self {
        Self {
            live_ttl: Duration::from_secs(300),
            finalized_ttl: Duration::from_secs(86_400),
            open_month_ttl: Duration::from_secs(600),
            static_ttl: Duration::from_secs(3_600),
            snapshot_list_ttl: Duration::from_secs(600),
            reporting_offset: UtcOffset::UTC,
        }
    }
}

impl FreshnessPolicy {
    pub fn ttl(&self, freshness: Freshness) -> Duration {
        match freshness {
            Freshness::Live => self.live_ttl,
            Freshness::Finalized => self.finalized_ttl,
            Freshness::OpenMonth => self.open_month_ttl,
            Freshness::Static => self.static_ttl,
            Freshness::SnapshotList => self.snapshot_list_ttl,
        }
    }

    /// Any explicit cutoff pins the window as finalized; only the open-ended
    /// all-time window is live.
    pub fn for_cutoff(&self, cutoff: Option<OffsetDateTime>) -> Freshness {
        match cutoff {
            Some(_) => Freshness::Finalized,
            None => Freshness::Live,
        }
    }

    pub fn for_month(&self, month: YearMonth, now: OffsetDateTime) -> Freshness {
        if month.is_closed(now, self.reporting_offset) {
            Freshness::Finalized
        } else {
            Freshness::OpenMonth
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CacheStatus {
    Hit,
    Miss,
}

impl CacheStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheStatus::Hit => "hit",
            CacheStatus::Miss => "miss",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CachedPayload {
    /// Serialized JSON body.
    pub payload: Vec<u8>,
    /// TTL selected by the freshness policy, also used for `Cache-Control`.
    pub ttl: Duration,
    pub status: CacheStatus,
}

#[derive(Clone)]
pub struct ResponseCache {
    store: Arc<dyn CacheStore>,
    policy: FreshnessPolicy,
}

impl ResponseCache {
    pub fn new(store: Arc<dyn CacheStore>, policy: FreshnessPolicy) -> Self {
        Self { store, policy }
    }

    pub fn policy(&self) -> &FreshnessPolicy {
        &self.policy
    }

    /// Serves `key` from the store or computes, stores and returns it.
    ///
    /// Failed computations are never stored. Store failures degrade to
    /// computing without caching. Concurrent misses may compute more than
    /// once; the last write wins.
    pub async fn serve<T, F, Fut>(
        &self,
        key: &CacheKey,
        freshness: Freshness,
        compute: F,
    ) -> DomainResult<CachedPayload>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = DomainResult<T>>,
    {
        let ttl = self.policy.ttl(freshness);
        match self.store.get(key.as_str()).await {
            Ok(Some(payload)) => {
                return Ok(CachedPayload {
                    payload,
                    ttl,
                    status: CacheStatus::Hit,
                });
            }
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(key = %key, error = %err, "response cache read failed; computing");
            }
        }

        let value = compute().await.map_err(|err| {
            tracing::error!(endpoint = key.endpoint(), key = %key, error = %err, "response computation failed");
            err
        })?;
        let payload = encode_json(&value).map_err(DomainError::upstream)?;

        if let Err(err) = self
            .store
            .set_with_ttl(key.as_str(), payload.clone(), ttl)
            .await
        {
            tracing::warn!(key = %key, error = %err, "response cache write failed");
        }

        Ok(CachedPayload {
            payload,
            ttl,
            status: CacheStatus::Miss,
        })
    }

    /// Drops `key` before returning. A store failure is logged; the next
    /// read may then observe the previous payload until its TTL lapses.
    pub async fn invalidate(&self, key: &CacheKey) {
        match self.store.delete(key.as_str()).await {
            Ok(_) => tracing::debug!(key = %key, "response cache invalidated"),
            Err(err) => tracing::error!(key = %key, error = %err, "response cache invalidation failed"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::InMemoryCacheStore;
    use crate::clock::ManualClock;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    #[test]
    fn absent_and_literal_none_do_not_collide() {
        let absent = CacheKey::new("rank_t").param::<&str>("channel_id", None);
        let literal = CacheKey::new("rank_t").param("channel_id", Some("None"));
        let empty = CacheKey::new("rank_t").param("channel_id", Some(""));
        assert_ne!(absent, literal);
        assert_ne!(absent, empty);
        assert_ne!(literal, empty);
    }

    #[test]
    fn separators_in_values_are_escaped() {
        let a = CacheKey::new("x")
            .param("a", Some("1|b=2"))
            .param::<&str>("b", None);
        let b = CacheKey::new("x")
            .param("a", Some("1"))
            .param("b", Some("2"));
        assert_ne!(a, b);
    }

    #[test]
    fn set_params_ignore_order_and_duplicates() {
        let a = CacheKey::new("hist").param_set("user_id", Some(&["2", "1", "2"][..]));
        let b = CacheKey::new("hist").param_set("user_id", Some(&["1", "2"][..]));
        let absent = CacheKey::new("hist").param_set::<&str>("user_id", None);
        let empty = CacheKey::new("hist").param_set::<&str>("user_id", Some(&[]));
        assert_eq!(a, b);
        assert_ne!(absent, empty);
    }

    #[test]
    fn instants_normalize_to_utc() {
        let a = CacheKey::new("t").param_instant("end_date", Some(datetime!(2025-01-01 9:00 +9)));
        let b = CacheKey::new("t").param_instant("end_date", Some(datetime!(2025-01-01 0:00 UTC)));
        assert_eq!(a, b);
    }

    #[test]
    fn any_cutoff_outlives_live_window() {
        let policy = FreshnessPolicy::default();
        let finalized = policy.ttl(policy.for_cutoff(Some(datetime!(2025-05-01 0:00 UTC))));
        let live = policy.ttl(policy.for_cutoff(None));
        assert!(finalized > live);
        assert_eq!(finalized, Duration::from_secs(86_400));
    }

    #[test]
    fn future_cutoff_is_still_finalized() {
        let policy = FreshnessPolicy::default();
        assert_eq!(
            policy.for_cutoff(Some(datetime!(2099-07-01 0:00 UTC))),
            Freshness::Finalized
        );
    }

    #[test]
    fn closed_months_are_finalized() {
        let policy = FreshnessPolicy::default();
        let now = datetime!(2025-06-15 0:00 UTC);
        assert_eq!(
            policy.for_month(YearMonth::new(2025, 5).unwrap(), now),
            Freshness::Finalized
        );
        assert_eq!(
            policy.for_month(YearMonth::new(2025, 6).unwrap(), now),
            Freshness::OpenMonth
        );
    }

    fn cache() -> (ManualClock, ResponseCache) {
        let clock = ManualClock::new(1_700_000_000_000);
        let store = InMemoryCacheStore::with_clock("test", Arc::new(clock.clone()));
        (clock, ResponseCache::new(Arc::new(store), FreshnessPolicy::default()))
    }

    #[tokio::test]
    async fn hit_returns_stored_bytes_until_ttl_lapses() {
        let (clock, cache) = cache();
        let key = CacheKey::new("channels");
        let calls = AtomicUsize::new(0);
        let compute = || async {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![n])
        };

        let first = cache.serve(&key, Freshness::Live, compute).await.unwrap();
        assert_eq!(first.status, CacheStatus::Miss);
        let second = cache.serve(&key, Freshness::Live, compute).await.unwrap();
        assert_eq!(second.status, CacheStatus::Hit);
        assert_eq!(second.payload, first.payload);
        assert_eq!(second.ttl, Duration::from_secs(300));

        clock.advance(Duration::from_secs(300));
        let third = cache.serve(&key, Freshness::Live, compute).await.unwrap();
        assert_eq!(third.status, CacheStatus::Miss);
        assert_eq!(third.payload, b"[1]".to_vec());
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let (_clock, cache) = cache();
        let key = CacheKey::new("ranking");
        let failed = cache
            .serve(&key, Freshness::Live, || async {
                Err::<Vec<u8>, _>(DomainError::Upstream("db down".into()))
            })
            .await;
        assert!(matches!(failed, Err(DomainError::Upstream(_))));

        let served = cache
            .serve(&key, Freshness::Live, || async { Ok(vec![1u8]) })
            .await
            .unwrap();
        assert_eq!(served.status, CacheStatus::Miss);
    }

    #[tokio::test]
    async fn invalidate_forces_recompute() {
        let (_clock, cache) = cache();
        let key = CacheKey::new("snapshots_list");
        cache
            .serve(&key, Freshness::SnapshotList, || async { Ok(1) })
            .await
            .unwrap();
        cache.invalidate(&key).await;
        let served = cache
            .serve(&key, Freshness::SnapshotList, || async { Ok(2) })
            .await
            .unwrap();
        assert_eq!(served.status, CacheStatus::Miss);
        assert_eq!(served.payload, b"2".to_vec());
    }
}
