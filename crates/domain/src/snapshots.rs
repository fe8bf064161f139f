//! Snapshot bookkeeping. The list endpoint is cached, so every membership
//! change drops the list key before returning to the caller.

use std::sync::Arc;

use crate::DomainResult;
use crate::error::DomainError;
use crate::ports::snapshots::SnapshotRepository;
use crate::response_cache::{CacheKey, CachedPayload, Freshness, ResponseCache};

pub const TITLE_MAX_CHARS: usize = 200;

pub fn list_cache_key() -> CacheKey {
    CacheKey::new("snapshots_list")
}

pub fn detail_cache_key(snapshot_id: i64) -> CacheKey {
    CacheKey::new("snapshot").param("id", Some(snapshot_id))
}

pub fn normalize_title(title: &str) -> DomainResult<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(DomainError::Validation("title is required".into()));
    }
    if title.chars().count() > TITLE_MAX_CHARS {
        return Err(DomainError::Validation(format!(
            "title must be at most {TITLE_MAX_CHARS} characters"
        )));
    }
    Ok(title.to_string())
}

#[derive(Clone)]
pub struct SnapshotService {
    repository: Arc<dyn SnapshotRepository>,
    cache: ResponseCache,
}

impl SnapshotService {
    pub fn new(repository: Arc<dyn SnapshotRepository>, cache: ResponseCache) -> Self {
        Self { repository, cache }
    }

    pub async fn create(&self, title: &str, data: serde_json::Value) -> DomainResult<i64> {
        let title = normalize_title(title)?;
        let snapshot_id = self.repository.create(&title, data).await?;
        self.cache.invalidate(&list_cache_key()).await;
        tracing::info!(snapshot_id, "snapshot created");
        Ok(snapshot_id)
    }

    pub async fn list(&self) -> DomainResult<CachedPayload> {
        self.cache
            .serve(&list_cache_key(), Freshness::SnapshotList, || {
                self.repository.list()
            })
            .await
    }

    /// Snapshots are immutable once written, so a found record is cached for
    /// the static TTL. Unknown ids are never cached.
    pub async fn get(&self, snapshot_id: i64) -> DomainResult<CachedPayload> {
        self.cache
            .serve(&detail_cache_key(snapshot_id), Freshness::Static, || async {
                self.repository
                    .get(snapshot_id)
                    .await?
                    .ok_or(DomainError::NotFound)
            })
            .await
    }

    pub async fn delete(&self, snapshot_id: i64) -> DomainResult<()> {
        let removed = self.repository.delete(snapshot_id).await?;
        if !removed {
            return Err(DomainError::NotFound);
        }
        self.cache.invalidate(&list_cache_key()).await;
        self.cache.invalidate(&detail_cache_key(snapshot_id)).await;
        tracing::info!(snapshot_id, "snapshot deleted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn title_is_trimmed_and_bounded() {
        assert_eq!(normalize_title("  May top 10 ").unwrap(), "May top 10");
        assert!(matches!(
            normalize_title("   "),
            Err(DomainError::Validation(_))
        ));
        let long = "x".repeat(TITLE_MAX_CHARS + 1);
        assert!(normalize_title(&long).is_err());
        assert!(normalize_title(&"é".repeat(TITLE_MAX_CHARS)).is_ok());
    }

    #[test]
    fn detail_keys_differ_per_id() {
        assert_ne!(detail_cache_key(1), detail_cache_key(2));
        assert_ne!(detail_cache_key(1), list_cache_key());
    }
}
