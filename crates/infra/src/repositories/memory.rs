use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

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
use time::{Date, OffsetDateTime, UtcOffset};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MessageRecord {
    pub user_id: i64,
    pub channel_id: i64,
    pub guild_id: i64,
    pub created_at: OffsetDateTime,
    pub char_count: i64,
    pub is_bot: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserRecord {
    pub user_id: i64,
    pub display_name: Option<String>,
    pub username: Option<String>,
    pub avatar_url: Option<String>,
}

impl UserRecord {
    /// Placeholder accounts left behind by deleted users.
    pub fn is_deleted(&self) -> bool {
        let looks_deleted = |value: &Option<String>| {
            value.as_deref().is_some_and(|value| {
                let lower = value.to_lowercase();
                lower.starts_with("deleted") && lower.ends_with("user")
            })
        };
        looks_deleted(&self.username) || looks_deleted(&self.display_name)
    }

    fn summary(&self) -> UserSummary {
        UserSummary {
            user_id: self.user_id.to_string(),
            display_name: self.display_name.clone(),
            username: self.username.clone(),
            avatar: self.avatar_url.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChannelRecord {
    pub channel_id: i64,
    pub name: String,
    pub category_name: Option<String>,
    pub position: i32,
}

#[derive(Default)]
struct StatsData {
    messages: Vec<MessageRecord>,
    users: HashMap<i64, UserRecord>,
    channels: Vec<ChannelRecord>,
}

/// Message store held in process memory, for development and tests.
#[derive(Clone)]
pub struct InMemoryStatsRepository {
    offset: UtcOffset,
    data: Arc<Mutex<StatsData>>,
}

impl Default for InMemoryStatsRepository {
    fn default() -> Self {
        Self::new(UtcOffset::UTC)
    }
}

impl InMemoryStatsRepository {
    pub fn new(reporting_offset: UtcOffset) -> Self {
        Self {
            offset: reporting_offset,
            data: Arc::new(Mutex::new(StatsData::default())),
        }
    }

    fn lock(&self) -> DomainResult<MutexGuard<'_, StatsData>> {
        self.data
            .lock()
            .map_err(|_| DomainError::Upstream("in-memory stats lock poisoned".into()))
    }

    pub fn insert_message(&self, message: MessageRecord) {
        if let Ok(mut data) = self.data.lock() {
            data.messages.push(message);
        }
    }

    pub fn upsert_user(&self, user: UserRecord) {
        if let Ok(mut data) = self.data.lock() {
            data.users.insert(user.user_id, user);
        }
    }

    pub fn upsert_channel(&self, channel: ChannelRecord) {
        if let Ok(mut data) = self.data.lock() {
            data.channels.retain(|existing| existing.channel_id != channel.channel_id);
            data.channels.push(channel);
        }
    }

    fn local_date(&self, at: OffsetDateTime) -> Date {
        at.to_offset(self.offset).date()
    }
}

fn matches(message: &MessageRecord, range: &TimeRange, filter: &StatsFilter) -> bool {
    !message.is_bot
        && range.contains(message.created_at)
        && filter.channel_id.map_or(true, |id| message.channel_id == id)
        && filter.user_id.map_or(true, |id| message.user_id == id)
        && filter
            .excluded_channel_id
            .map_or(true, |id| message.channel_id != id)
        && filter.guild_id.map_or(true, |id| message.guild_id == id)
}

fn active_author<'a>(data: &'a StatsData, user_id: i64) -> Option<&'a UserRecord> {
    data.users.get(&user_id).filter(|user| !user.is_deleted())
}

/// Counts per key in first-seen order, then sorted by count descending.
/// The sort is stable so ties keep first-seen order.
fn ranked<K: Copy + Eq + std::hash::Hash>(keys: impl Iterator<Item = K>) -> Vec<(K, i64)> {
    let mut order: Vec<K> = Vec::new();
    let mut counts: HashMap<K, i64> = HashMap::new();
    for key in keys {
        let count = counts.entry(key).or_insert(0);
        if *count == 0 {
            order.push(key);
        }
        *count += 1;
    }
    let mut ranked: Vec<(K, i64)> = order
        .into_iter()
        .map(|key| (key, counts.get(&key).copied().unwrap_or(0)))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1));
    ranked
}

impl StatsRepository for InMemoryStatsRepository {
    fn channels(&self) -> BoxFuture<'_, DomainResult<Vec<ChannelInfo>>> {
        Box::pin(async move {
            let data = self.lock()?;
            let mut channels = data.channels.clone();
            channels.sort_by_key(|channel| channel.position);
            Ok(channels
                .into_iter()
                .map(|channel| ChannelInfo {
                    id: channel.channel_id.to_string(),
                    name: channel.name,
                    category: channel
                        .category_name
                        .unwrap_or_else(|| "Uncategorized".to_string()),
                })
                .collect())
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
            let data = self.lock()?;
            let eligible: Vec<&MessageRecord> = data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
                .filter(|message| active_author(&data, message.user_id).is_some())
                .collect();
            let mut chars: HashMap<i64, i64> = HashMap::new();
            for message in &eligible {
                *chars.entry(message.user_id).or_insert(0) += message.char_count;
            }

            Ok(ranked(eligible.iter().map(|message| message.user_id))
                .into_iter()
                .take(limit)
                .filter_map(|(user_id, count)| {
                    let user = active_author(&data, user_id)?;
                    Some(RankingRow {
                        user_id: user_id.to_string(),
                        display_name: user
                            .display_name
                            .clone()
                            .unwrap_or_else(|| "Unknown".to_string()),
                        username: user
                            .username
                            .clone()
                            .unwrap_or_else(|| "unknown".to_string()),
                        avatar: user.avatar_url.clone(),
                        message_count: count,
                        char_count: chars.get(&user_id).copied().unwrap_or(0),
                    })
                })
                .collect())
        })
    }

    fn daily_totals(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<DailyCount>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let data = self.lock()?;
            let mut days: BTreeMap<Date, i64> = BTreeMap::new();
            for message in data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
            {
                *days.entry(self.local_date(message.created_at)).or_insert(0) += 1;
            }
            Ok(days
                .into_iter()
                .map(|(date, count)| DailyCount { date, count })
                .collect())
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
            let data = self.lock()?;
            let mut buckets: BTreeMap<(Date, i64), i64> = BTreeMap::new();
            for message in data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
                .filter(|message| user_ids.contains(&message.user_id))
            {
                *buckets
                    .entry((self.local_date(message.created_at), message.user_id))
                    .or_insert(0) += 1;
            }
            Ok(buckets
                .into_iter()
                .map(|((date, user_id), count)| DailyUserCount {
                    date,
                    user_id,
                    count,
                })
                .collect())
        })
    }

    fn users(&self, user_ids: &[i64]) -> BoxFuture<'_, DomainResult<Vec<UserSummary>>> {
        let user_ids = user_ids.to_vec();
        Box::pin(async move {
            let data = self.lock()?;
            Ok(user_ids
                .iter()
                .filter_map(|id| data.users.get(id))
                .map(UserRecord::summary)
                .collect())
        })
    }

    fn heatmap(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<Vec<HeatmapCell>>> {
        let filter = filter.clone();
        Box::pin(async move {
            let data = self.lock()?;
            let mut cells: BTreeMap<(u8, u8), i64> = BTreeMap::new();
            for message in data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
            {
                let local = message.created_at.to_offset(self.offset);
                let dow = local.weekday().number_days_from_sunday();
                *cells.entry((dow, local.hour())).or_insert(0) += 1;
            }
            Ok(cells
                .into_iter()
                .map(|((dow, hour), count)| HeatmapCell { dow, hour, count })
                .collect())
        })
    }

    fn channel_distribution(
        &self,
        range: TimeRange,
        limit: usize,
    ) -> BoxFuture<'_, DomainResult<Vec<ChannelShare>>> {
        Box::pin(async move {
            let data = self.lock()?;
            let names: HashMap<i64, &str> = data
                .channels
                .iter()
                .map(|channel| (channel.channel_id, channel.name.as_str()))
                .collect();
            let filter = StatsFilter::default();
            let mut totals: Vec<(String, i64)> = Vec::new();
            for message in data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
            {
                let Some(name) = names.get(&message.channel_id) else {
                    continue;
                };
                match totals.iter_mut().find(|(existing, _)| existing == name) {
                    Some((_, count)) => *count += 1,
                    None => totals.push((name.to_string(), 1)),
                }
            }
            totals.sort_by(|a, b| b.1.cmp(&a.1));
            Ok(totals
                .into_iter()
                .take(limit)
                .map(|(name, value)| ChannelShare { name, value })
                .collect())
        })
    }

    fn analysis(
        &self,
        range: TimeRange,
        filter: &StatsFilter,
    ) -> BoxFuture<'_, DomainResult<ActivityAnalysis>> {
        let filter = filter.clone();
        Box::pin(async move {
            let data = self.lock()?;
            let local: Vec<OffsetDateTime> = data
                .messages
                .iter()
                .filter(|message| matches(message, &range, &filter))
                .map(|message| message.created_at.to_offset(self.offset))
                .collect();
            if local.is_empty() {
                return Ok(ActivityAnalysis::empty());
            }

            let max_date = ranked(local.iter().map(|at| at.date()))
                .first()
                .map(|(date, count)| DateCount {
                    date: date.to_string(),
                    count: *count,
                });
            let max_dow = ranked(local.iter().map(|at| at.weekday().number_days_from_sunday()))
                .first()
                .map(|(dow, count)| DowCount {
                    dow: *dow,
                    count: *count,
                });
            let max_hour = ranked(local.iter().map(|at| at.hour()))
                .first()
                .map(|(hour, count)| HourCount {
                    hour: *hour,
                    count: *count,
                });

            Ok(ActivityAnalysis {
                total: local.len() as i64,
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
        let needle = query.to_lowercase();
        Box::pin(async move {
            let data = self.lock()?;
            let mut users: Vec<&UserRecord> = data
                .users
                .values()
                .filter(|user| !user.is_deleted())
                .filter(|user| {
                    [&user.display_name, &user.username].iter().any(|value| {
                        value
                            .as_deref()
                            .is_some_and(|value| value.to_lowercase().contains(&needle))
                    })
                })
                .collect();
            users.sort_by_key(|user| user.user_id);
            Ok(users
                .into_iter()
                .take(limit)
                .map(UserRecord::summary)
                .collect())
        })
    }
}

/// Snapshot store held in process memory.
#[derive(Clone, Default)]
pub struct InMemorySnapshotRepository {
    rows: Arc<Mutex<BTreeMap<i64, Snapshot>>>,
    next_id: Arc<Mutex<i64>>,
}

impl InMemorySnapshotRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn rows(&self) -> DomainResult<MutexGuard<'_, BTreeMap<i64, Snapshot>>> {
        self.rows
            .lock()
            .map_err(|_| DomainError::Upstream("in-memory snapshot lock poisoned".into()))
    }
}

impl SnapshotRepository for InMemorySnapshotRepository {
    fn create(&self, title: &str, data: serde_json::Value) -> BoxFuture<'_, DomainResult<i64>> {
        let title = title.to_string();
        Box::pin(async move {
            let snapshot_id = {
                let mut next = self
                    .next_id
                    .lock()
                    .map_err(|_| DomainError::Upstream("snapshot id lock poisoned".into()))?;
                *next += 1;
                *next
            };
            self.rows()?.insert(
                snapshot_id,
                Snapshot {
                    snapshot_id,
                    created_at: OffsetDateTime::now_utc(),
                    title,
                    data,
                },
            );
            Ok(snapshot_id)
        })
    }

    fn list(&self) -> BoxFuture<'_, DomainResult<Vec<SnapshotSummary>>> {
        Box::pin(async move { Ok(self.rows()?.values().rev().map(Snapshot::summary).collect()) })
    }

    fn get(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<Option<Snapshot>>> {
        Box::pin(async move { Ok(self.rows()?.get(&snapshot_id).cloned()) })
    }

    fn delete(&self, snapshot_id: i64) -> BoxFuture<'_, DomainResult<bool>> {
        Box::pin(async move { Ok(self.rows()?.remove(&snapshot_id).is_some()) })
    }
}
