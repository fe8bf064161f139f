use std::time::Duration;

use chatrank_domain::DomainResult;
use chatrank_domain::error::DomainError;
use chatrank_domain::period::TimeRange;
use chatrank_domain::ports::BoxFuture;
use chatrank_domain::ports::snapshots::{Snapshot, SnapshotRepository, SnapshotSummary};
use chatrank_domain::ports::stats::StatsRepository;
use chatrank_domain::stats::{
    ActivityAnalysis, ChannelInfo, ChannelShare, DailyCount, DailyUserCount, DateCount, DowCount,
    HeatmapCell, HourCount, RankingRow, StatsFilter, UserSummary,
};
use sqlx::postgres::{PgPool, PgRow};
use sqlx::types::Json;
use sqlx::{Postgres, QueryBuilder, Row};
use time::{Date, OffsetDateTime, UtcOffset};

use crate::db::bounded;

/// Authors that still exist and are not placeholder "deleted user" accounts.
const ACTIVE_AUTHOR: &str = "u.user_id IS NOT NULL \
     AND u.username NOT ILIKE 'deleted%user' \
     AND u.display_name NOT ILIKE 'deleted%user'";

const UNCATEGORIZED: &str = "Uncategorized";

#[derive(Clone)]
pub struct PostgresStatsRepository {
    pool: PgPool,
    timeout: Duration,
    offset_hours: i32,
}

impl PostgresStatsRepository {
    pub fn new(pool: PgPool, timeout: Duration, reporting_offset: UtcOffset) -> Self {
        Self {
            pool,
            timeout,
            offset_hours: i32::from(reporting_offset.whole_hours()),
        }
    }

    /// `created_at` shifted into the reporting offset, for day/hour buckets.
    fn push_local_time(&self, qb: &mut QueryBuilder<'_, Postgres>) {
        qb.push("(m.created_at AT TIME ZONE make_interval(hours => ");
        qb.push_bind(self.offset_hours);
        qb.push("))");
    }
}

fn push_window(qb: &mut QueryBuilder<'_, Postgres>, range: TimeRange, filter: &StatsFilter) {
    qb.push(" WHERE m.is_bot = FALSE");
    if let Some(start) = range.start {
        qb.push(" AND m.created_at >= ").push_bind(start);
    }
    if let Some(end) = range.end {
        qb.push(" AND m.created_at <= ").push_bind(end);
    }
    if let Some(channel_id) = filter.channel_id {
        qb.push(" AND m.channel_id = ").push_bind(channel_id);
    }
    if let Some(user_id) = filter.user_id {
        qb.push(" AND m.user_id = ").push_bind(user_id);
    }
    if let Some(excluded) = filter.excluded_channel_id {
        qb.push(" AND m.channel_id <> ").push_bind(excluded);
    }
    if let Some(guild_id) = filter.guild_id {
        qb.push(" AND m.guild_id = ").push_bind(guild_id);
    }
}

fn ranking_row(row: &PgRow) -> Result<RankingRow, sqlx::Error> {
    let user_id: i64 = row.try_get("user_id")?;
    let display_name: Option<String> = row.try_get("display_name")?;
    let username: Option<String> = row.try_get("username")?;
    Ok(RankingRow {
        user_id: user_id.to_string(),
        display_name: display_name.unwrap_or_else(|| "Unknown".to_string()),
        username: username.unwrap_or_else(|| "unknown".to_string()),
        avatar: row.try_get("avatar_url")?,
        message_count: row.try_get("message_count")?,
        char_count: row.try_get("char_count")?,
    })
}

fn user_summary(row: &PgRow) -> Result<UserSummary, sqlx::Error> {
    let user_id: i64 = row.try_get("user_id")?;
    Ok(UserSummary {
        user_id: user_id.to_string(),
        display_name: row.try_get("display_name")?,
        username: row.try_get("username")?,
        avatar: row.try_get("avatar_url")?,
    })
}

fn snapshot_row(row: &PgRow) -> Result<Snapshot, sqlx::Error> {
    let Json(data) = row.try_get::<Json<serde_json::Value>, _>("data")?;
    Ok(Snapshot {
        snapshot_id: row.try_get("snapshot_id")?,
        created_at: row.try_get("created_at")?,
        title: row.try_get("title")?,
        data,
    })
}

fn clamp_u8(value: i32) -> u8 {
    value.clamp(0, i32::from(u8::MAX)) as u8
}

impl StatsRepository for PostgresStatsRepository {
    fn channels(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelInfo>>> {
        Box::pin(async move {
            let rows = bounded(self.timeout, "channels", async {
                sqlx::query(
                    "SELECT channel_id, name, category_name FROM channels ORDER BY position ASC",
                )
                .fetch_all(&self.pool)
                .await
            })
            .await?;
            rows.iter()
                .map(|row| {
                    let channel_id: i64 = row.try_get("channel_id")?;
                    let category: Option<String> = row.try_get("category_name")?;
                    Ok(ChannelInfo {
                        id: channel_id.to_string(),
                        name: row.try_get("name")?,
                        category: category.unwrap_or_else(|| UNCATEGORIZED.to_string()),
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn ranking(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<RankingRow>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT m.user_id, COUNT(*)::BIGINT AS message_count, \
                 COALESCE(SUM(m.char_count), 0)::BIGINT AS char_count, \
                 u.display_name, u.username, u.avatar_url \
                 FROM messages m LEFT JOIN users u ON m.user_id = u.user_id",
            );
            push_window(&mut qb, range, &filter);
            qb.push(" AND ").push(ACTIVE_AUTHOR);
            qb.push(
                " GROUP BY m.user_id, u.display_name, u.username, u.avatar_url \
                 ORDER BY message_count DESC LIMIT ",
            );
            qb.push_bind(limit as i64);

            let rows = bounded(self.timeout, "ranking", qb.build().fetch_all(&self.pool)).await?;
            rows.iter()
                .map(ranking_row)
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::upstream)
        })
    }

    fn daily_totals(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<DailyCount>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT DATE(");
            self.push_local_time(&mut qb);
            qb.push(") AS day, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" GROUP BY day ORDER BY day");

            let rows =
                bounded(self.timeout, "daily_totals", qb.build().fetch_all(&self.pool)).await?;
            rows.iter()
                .map(|row| {
                    Ok(DailyCount {
                        date: row.try_get::<Date, _>("day")?,
                        count: row.try_get("total")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn daily_user_counts(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
        user_ids: &[i64],
    ) -> BoxFuture<'_, DomainResult<Vec<DailyUserCount>>> {
        let filter = filter.clone();
        let user_ids = user_ids.to_vec();
        Box::pin(async move {
            if user_ids.is_empty() {
                return Ok(Vec::new());
            }
            let mut qb = QueryBuilder::<Postgres>::new("SELECT DATE(");
            self.push_local_time(&mut qb);
            qb.push(") AS day, m.user_id, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" AND m.user_id = ANY(")
                .push_bind(user_ids)
                .push(") GROUP BY day, m.user_id ORDER BY day");

            let rows = bounded(
                self.timeout,
                "daily_user_counts",
                qb.build().fetch_all(&self.pool),
            )
            .await?;
            rows.iter()
                .map(|row| {
                    Ok(DailyUserCount {
                        date: row.try_get::<Date, _>("day")?,
                        user_id: row.try_get("user_id")?,
                        count: row.try_get("total")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn users(&self, user_ids: &[i64]) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>> {
        let user_ids = user_ids.to_vec();
        Box::pin(async move {
            let rows = bounded(self.timeout, "users", async {
                sqlx::query(
                    "SELECT user_id, display_name, username, avatar_url \
                     FROM users WHERE user_id = ANY($1)",
                )
                .bind(&user_ids)
                .fetch_all(&self.pool)
                .await
            })
            .await?;
            rows.iter()
                .map(user_summary)
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::upstream)
        })
    }

    fn heatmap(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<HeatmapCell>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT EXTRACT(DOW FROM ");
            self.push_local_time(&mut qb);
            qb.push(")::INT AS dow, EXTRACT(HOUR FROM ");
            self.push_local_time(&mut qb);
            qb.push(")::INT AS hour, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" GROUP BY dow, hour ORDER BY dow, hour");

            let rows = bounded(self.timeout, "heatmap", qb.build().fetch_all(&self.pool)).await?;
            rows.iter()
                .map(|row| {
                    Ok(HeatmapCell {
                        dow: clamp_u8(row.try_get("dow")?),
                        hour: clamp_u8(row.try_get("hour")?),
                        count: row.try_get("total")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn channel_distribution(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ChannelShare>>> {
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new(
                "SELECT c.name, COUNT(*)::BIGINT AS total \
                 FROM messages m JOIN channels c ON m.channel_id = c.channel_id",
            );
            push_window(&mut qb, range, &StatsFilter::default());
            qb.push(" GROUP BY c.name ORDER BY total DESC LIMIT ");
            qb.push_bind(limit as i64);

            let rows = bounded(
                self.timeout,
                "channel_distribution",
                qb.build().fetch_all(&self.pool),
            )
            .await?;
            rows.iter()
                .map(|row| {
                    Ok(ChannelShare {
                        name: row.try_get("name")?,
                        value: row.try_get("total")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn analysis(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<ActivityAnalysis>> {
        let filter = filter.clone();
        Box::pin(async move {
            let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            let total: i64 = bounded(self.timeout, "analysis_total", async {
                qb.build().fetch_one(&self.pool).await?.try_get("total")
            })
            .await?;
            if total == 0 {
                return Ok(ActivityAnalysis::empty());
            }

            let mut qb = QueryBuilder::<Postgres>::new("SELECT DATE(");
            self.push_local_time(&mut qb);
            qb.push(") AS bucket, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" GROUP BY bucket ORDER BY total DESC LIMIT 1");
            let max_date = bounded(self.timeout, "analysis_date", async {
                match qb.build().fetch_optional(&self.pool).await? {
                    Some(row) => Ok(Some(DateCount {
                        date: row.try_get::<Date, _>("bucket")?.to_string(),
                        count: row.try_get("total")?,
                    })),
                    None => Ok(None),
                }
            })
            .await?;

            let mut qb = QueryBuilder::<Postgres>::new("SELECT EXTRACT(DOW FROM ");
            self.push_local_time(&mut qb);
            qb.push(")::INT AS bucket, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" GROUP BY bucket ORDER BY total DESC LIMIT 1");
            let max_dow = bounded(self.timeout, "analysis_dow", async {
                match qb.build().fetch_optional(&self.pool).await? {
                    Some(row) => Ok(Some(DowCount {
                        dow: clamp_u8(row.try_get("bucket")?),
                        count: row.try_get("total")?,
                    })),
                    None => Ok(None),
                }
            })
            .await?;

            let mut qb = QueryBuilder::<Postgres>::new("SELECT EXTRACT(HOUR FROM ");
            self.push_local_time(&mut qb);
            qb.push(")::INT AS bucket, COUNT(*)::BIGINT AS total FROM messages m");
            push_window(&mut qb, range, &filter);
            qb.push(" GROUP BY bucket ORDER BY total DESC LIMIT 1");
            let max_hour = bounded(self.timeout, "analysis_hour", async {
                match qb.build().fetch_optional(&self.pool).await? {
                    Some(row) => Ok(Some(HourCount {
                        hour: clamp_u8(row.try_get("bucket")?),
                        count: row.try_get("total")?,
                    })),
                    None => Ok(None),
                }
            })
            .await?;

            Ok(ActivityAnalysis {
                total,
                max_date,
                max_dow,
                max_hour,
            })
        })
    }

    fn search_users(
        &self,
        query: &str,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>> {
        let pattern = format!("%{}%", escape_like(query));
        Box::pin(async move {
            let sql = format!(
                "SELECT u.user_id, u.display_name, u.username, u.avatar_url FROM users u \
                 WHERE (u.display_name ILIKE $1 OR u.username ILIKE $1) AND {ACTIVE_AUTHOR} \
                 LIMIT $2"
            );
            let rows = bounded(self.timeout, "search_users", async {
                sqlx::query(&sql)
                    .bind(&pattern)
                    .bind(limit as i64)
                    .fetch_all(&self.pool)
                    .await
            })
            .await?;
            rows.iter()
                .map(user_summary)
                .collect::<Result<Vec<_>, _>>()
                .map_err(DomainError::upstream)
        })
    }
}

fn escape_like(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

#[derive(Clone)]
pub struct PostgresSnapshotRepository {
    pool: PgPool,
    timeout: Duration,
}

impl PostgresSnapshotRepository {
    pub fn new(pool: PgPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }
}

impl SnapshotRepository for PostgresSnapshotRepository {
    fn create(&self, title: &str, data: serde_json::Value) -> BoxFuture<'_, DomainResult<i64>> {
        let title = title.to_string();
        Box::pin(async move {
            bounded(self.timeout, "snapshot_create", async {
                sqlx::query(
                    "INSERT INTO snapshots (title, data) VALUES ($1, $2) \
                     RETURNING snapshot_id::BIGINT AS snapshot_id",
                )
                .bind(&title)
                .bind(Json(&data))
                .fetch_one(&self.pool)
                .await?
                .try_get("snapshot_id")
            })
            .await
        })
    }

    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<SnapshotSummary>>> {
        Box::pin(async move {
            let rows = bounded(self.timeout, "snapshot_list", async {
                sqlx::query(
                    "SELECT snapshot_id::BIGINT AS snapshot_id, created_at, title \
                     FROM snapshots ORDER BY snapshot_id DESC",
                )
                .fetch_all(&self.pool)
                .await
            })
            .await?;
            rows.iter()
                .map(|row| {
                    Ok(SnapshotSummary {
                        snapshot_id: row.try_get("snapshot_id")?,
                        created_at: row.try_get::<OffsetDateTime, _>("created_at")?,
                        title: row.try_get("title")?,
                    })
                })
                .collect::<Result<Vec<_>, sqlx::Error>>()
                .map_err(DomainError::upstream)
        })
    }

    fn get(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<Option<Snapshot>>> {
        Box::pin(async move {
            let row = bounded(self.timeout, "snapshot_get", async {
                sqlx::query(
                    "SELECT snapshot_id::BIGINT AS snapshot_id, created_at, title, data \
                     FROM snapshots WHERE snapshot_id = $1",
                )
                .bind(snapshot_id)
                .fetch_optional(&self.pool)
                .await
            })
            .await?;
            let Some(row) = row else {
                return Ok(None);
            };
            snapshot_row(&row).map(Some).map_err(DomainError::upstream)
        })
    }

    fn delete(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<bool>> {
        Box::pin(async move {
            let result = bounded(self.timeout, "snapshot_delete", async {
                sqlx::query("DELETE FROM snapshots WHERE snapshot_id = $1")
                    .bind(snapshot_id)
                    .execute(&self.pool)
                    .await
            })
            .await?;
            Ok(result.rows_affected() > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn like_wildcards_are_escaped() {
        assert_eq!(escape_like("50%_off\\"), "50\\%\\_off\\\\");
        assert_eq!(escape_like("alice"), "alice");
    }

    #[test]
    fn window_filters_bind_every_present_bound() {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT 1 FROM messages m");
        let range = TimeRange::until(Some(OffsetDateTime::UNIX_EPOCH));
        let filter = StatsFilter {
            channel_id: Some(1),
            user_id: None,
            excluded_channel_id: Some(2),
            guild_id: Some(3),
        };
        push_window(&mut qb, range, &filter);
        assert_eq!(
            qb.sql(),
            "SELECT 1 FROM messages m WHERE m.is_bot = FALSE AND m.created_at <= $1 \
             AND m.channel_id = $2 AND m.channel_id <> $3 AND m.guild_id = $4"
        );
    }
}
