use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::DomainResult;
use crate::ports::BoxFuture;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct SnapshotSummary {
    pub snapshot_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub title: String,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Snapshot {
    pub snapshot_id: i64,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    pub title: String,
    pub data: serde_json::Value,
}

impl Snapshot {
    pub fn summary(&self) -> SnapshotSummary {
        SnapshotSummary {
            snapshot_id: self.snapshot_id,
            created_at: self.created_at,
            title: self.title.clone(),
        }
    }
}

/// Stored ranking snapshots. Ids are assigned by the store and increase
/// monotonically.
pub trait SnapshotRepository: Send + Sync {
    fn create(&self, title: &str, data: serde_json::Value) -> BoxFuture<'_, DomainResult<i64>>;

    /// Newest first.
    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<SnapshotSummary>>>;

    fn get(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<Option<Snapshot>>>;

    /// Returns whether a snapshot was removed.
    fn delete(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<bool>>;
}
